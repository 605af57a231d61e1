#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::must_use_candidate,
    clippy::module_name_repetitions
)]

pub mod category;
pub mod commons;
pub mod config;
pub mod dcc;
pub mod entity;
mod fs;
pub mod guard;
pub mod logging;
pub mod outcome;
pub mod project;
pub mod publish;
pub mod publisher;
pub mod store;
pub mod task;
pub mod user;
pub mod work;

pub use category::{Category, SubprojectCategory};
pub use commons::Commons;
pub use config::{Config, DEFAULT_LOCK_TIMEOUT};
pub use dcc::{
    CapabilityRegistry, DccHandler, ExtractContext, Extractor, SourceExtractor, StandaloneDcc,
    Validator,
};
pub use entity::Entity;
pub use fs::PURGATORY_DIR;
pub use guard::{Guard, DATABASE_DIR};
pub use outcome::{Outcome, Refusal, RefusalKind, Severity, UsageError};
pub use project::{Project, Subproject, SubprojectProps, SubprojectTree};
pub use publish::{Publish, PublishVersion};
pub use publisher::{PublishError, Publisher, PublisherState};
pub use store::{RecordData, RecordError, RecordStore};
pub use task::Task;
pub use user::Session;
pub use work::Work;
