#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::must_use_candidate
)]

pub mod definitions;
pub mod naming;
pub mod states;
pub mod tree;
pub mod users;
pub mod versions;

pub use definitions::{CategoryDefinition, CategoryDefinitions};
pub use naming::{
    join_relative, matches_wildcard, parse_version_number, publish_file_name, validate_name,
    version_name, version_tag, PUBLISH_EXTENSION, TASK_EXTENSION, WORK_EXTENSION,
};
pub use states::{ExtractStatus, PermissionLevel, Severity, ValidationState, WorkState};
pub use tree::{SubTreeNode, DEFAULT_FPS, DEFAULT_RESOLUTION};
pub use users::{
    hash_password, is_protected_user, UserEntry, Users, ADMIN_USER, DEFAULT_PASSWORD, GENERIC_USER,
};
pub use versions::{PromotedMarker, PublishElement, PurgatoryEntry, WorkVersion};

/// Current RFC 3339 timestamp used for `created_at` fields.
pub fn timestamp_now() -> String {
    time::OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_default()
}
