//! The multi-stage publish transaction.
//!
//! `Idle -> Resolved -> Reserved -> Validated -> Extracted -> Published`.
//! Calling a stage out of order is a programmer error and fails with
//! [`PublishError::OutOfOrder`]; business refusals come back as
//! [`Outcome::Refused`].

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use indexmap::IndexMap;
use serde_json::Value;
use tik_domain::{
    timestamp_now, version_tag, CategoryDefinition, ExtractStatus, PermissionLevel,
    PublishElement, ValidationState, WorkVersion,
};

use crate::dcc::{ExtractContext, Extractor, Validator};
use crate::entity::generate_id;
use crate::guard::Guard;
use crate::outcome::{Outcome, Refusal, RefusalKind};
use crate::proceed;
use crate::project::Project;
use crate::publish::{Publish, PublishVersion};
use crate::store::RecordStore;
use crate::work::Work;

pub const AUTO_NOTES: &str = "[Auto Generated]";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PublisherState {
    Idle,
    Resolved,
    Reserved,
    Validated,
    Extracted,
    Published,
}

#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("cannot {operation} while the publisher is {state:?}")]
    OutOfOrder {
        operation: &'static str,
        state: PublisherState,
    },
    #[error("publish slot {path} is already taken")]
    SlotTaken { path: PathBuf },
}

struct ExtractorSlot {
    extractor: Box<dyn Extractor>,
    status: ExtractStatus,
    output: Option<PathBuf>,
}

struct ValidatorSlot {
    validator: Box<dyn Validator>,
    state: ValidationState,
}

/// Drives one publish of one work version.
pub struct Publisher {
    guard: Arc<Guard>,
    state: PublisherState,
    work: Option<Work>,
    work_version: Option<WorkVersion>,
    definition: CategoryDefinition,
    extractors: IndexMap<String, ExtractorSlot>,
    validators: IndexMap<String, ValidatorSlot>,
    publish_version: u32,
    reservation: Option<RecordStore>,
    published: Option<PublishVersion>,
}

impl fmt::Debug for Publisher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Publisher")
            .field("state", &self.state)
            .field("work", &self.work.as_ref().map(Work::name))
            .field("publish_version", &self.publish_version)
            .field("extractors", &self.extractors.keys().collect::<Vec<_>>())
            .field("validators", &self.validators.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl Publisher {
    #[must_use]
    pub fn new(guard: Arc<Guard>) -> Self {
        Self {
            guard,
            state: PublisherState::Idle,
            work: None,
            work_version: None,
            definition: CategoryDefinition::default(),
            extractors: IndexMap::new(),
            validators: IndexMap::new(),
            publish_version: 0,
            reservation: None,
            published: None,
        }
    }

    pub fn state(&self) -> PublisherState {
        self.state
    }

    pub fn work(&self) -> Option<&Work> {
        self.work.as_ref()
    }

    pub fn work_version(&self) -> Option<&WorkVersion> {
        self.work_version.as_ref()
    }

    /// Slot computed at resolve time.
    pub fn publish_version(&self) -> u32 {
        self.publish_version
    }

    pub fn extractor_names(&self) -> Vec<&str> {
        self.extractors.keys().map(String::as_str).collect()
    }

    pub fn validator_names(&self) -> Vec<&str> {
        self.validators.keys().map(String::as_str).collect()
    }

    pub fn extract_status(&self, name: &str) -> Option<ExtractStatus> {
        self.extractors.get(name).map(|slot| slot.status)
    }

    pub fn validation_state(&self, name: &str) -> Option<ValidationState> {
        self.validators.get(name).map(|slot| slot.state)
    }

    pub fn validation_messages(&self, name: &str) -> Vec<String> {
        self.validators
            .get(name)
            .map(|slot| slot.validator.messages())
            .unwrap_or_default()
    }

    /// The record written by [`Publisher::publish`].
    pub fn published(&self) -> Option<&PublishVersion> {
        self.published.as_ref()
    }

    fn expect_state(&self, operation: &'static str, allowed: &[PublisherState]) -> Result<()> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(PublishError::OutOfOrder {
                operation,
                state: self.state,
            }
            .into())
        }
    }

    fn resolved_work(&self) -> Result<(&Work, &WorkVersion)> {
        match (&self.work, &self.work_version) {
            (Some(work), Some(version)) => Ok((work, version)),
            _ => Err(PublishError::OutOfOrder {
                operation: "continue",
                state: self.state,
            }
            .into()),
        }
    }

    /// Resolves the work and version open in the host application.
    pub fn resolve(&mut self, project: &Project) -> Result<Outcome<()>> {
        self.expect_state("resolve", &[PublisherState::Idle, PublisherState::Resolved])?;
        let Some((work, version)) = project.get_current_work()? else {
            return Ok(self.guard.refuse(Refusal::warning(
                RefusalKind::NotFound,
                "The current scene is not a work of this project.",
            )));
        };
        self.resolve_work(work, Some(version.version_number))
    }

    /// Resolves an explicit work version, the last one when `version` is
    /// `None`.
    pub fn resolve_work(&mut self, work: Work, version: Option<u32>) -> Result<Outcome<()>> {
        self.expect_state("resolve", &[PublisherState::Idle, PublisherState::Resolved])?;
        proceed!(work.entity().check_permissions(PermissionLevel::ARTIST));

        let number = match version {
            Some(number) => number,
            None => work.last_version_number()?,
        };
        let Some(work_version) = work.get_version(number)? else {
            return Ok(self.guard.refuse(Refusal::warning(
                RefusalKind::NotFound,
                format!("Work {} has no version {number}.", work.name()),
            )));
        };

        let definitions = self.guard.category_definitions();
        let definition = definitions.get(work.category()).cloned().unwrap_or_else(|| {
            tracing::warn!(
                category = work.category(),
                "category has no definition, nothing will be extracted"
            );
            CategoryDefinition::default()
        });
        let handler = self.guard.dcc_handler();
        let registry = handler.capabilities();

        self.extractors.clear();
        for name in &definition.extracts {
            match registry.extractor(name) {
                Some(extractor) => {
                    self.extractors.insert(
                        name.clone(),
                        ExtractorSlot {
                            extractor,
                            status: ExtractStatus::Idle,
                            output: None,
                        },
                    );
                }
                None => tracing::warn!(
                    extractor = %name,
                    dcc = handler.name(),
                    "configured extractor is not available"
                ),
            }
        }
        self.validators.clear();
        for name in &definition.validations {
            match registry.validator(name) {
                Some(validator) => {
                    self.validators.insert(
                        name.clone(),
                        ValidatorSlot {
                            validator,
                            state: ValidationState::Idle,
                        },
                    );
                }
                None => tracing::warn!(
                    validator = %name,
                    dcc = handler.name(),
                    "configured validator is not available"
                ),
            }
        }

        self.publish_version = work.publish()?.last_version()? + 1;
        tracing::debug!(
            work = work.name(),
            work_version = number,
            publish_version = self.publish_version,
            "publish resolved"
        );
        self.definition = definition;
        self.work = Some(work);
        self.work_version = Some(work_version);
        self.state = PublisherState::Resolved;
        Ok(Outcome::Done(()))
    }

    /// Claims the resolved slot by creating its placeholder record.
    ///
    /// Fails with [`PublishError::SlotTaken`] when another publisher got
    /// there first. The publisher stays resolved so the caller can resolve
    /// again and retry.
    pub fn reserve(&mut self) -> Result<()> {
        self.expect_state("reserve", &[PublisherState::Resolved])?;
        let (work, work_version) = self.resolved_work()?;
        let publish = work.publish()?;
        let path = publish.record_path(self.publish_version)?;

        let mut store = RecordStore::open(&path, self.guard.lock_timeout())?;
        if store.exists() {
            return Err(PublishError::SlotTaken { path }.into());
        }
        store.set("name", work.name());
        store.set("creator", self.guard.user_name());
        store.set("category", work.category());
        store.set("dcc", work.dcc());
        store.set("dcc_version", work_version.dcc_version.clone());
        store.set("publish_id", generate_id());
        store.set("version_number", self.publish_version);
        store.set("work_version", work_version.version_number);
        store.set("task_name", work.task_name());
        store.set("task_id", work.task_id());
        store.set("path", publish.relative_path());
        store.set("software_version", env!("CARGO_PKG_VERSION"));
        store.set("elements", Value::Array(Vec::new()));
        store.set("validations", Value::Object(serde_json::Map::new()));
        store.set("notes", "");
        store.set("created_at", timestamp_now());
        store.set("reserved", true);
        if !store.create_new()? {
            return Err(PublishError::SlotTaken { path }.into());
        }
        tracing::info!(
            work = work.name(),
            version = self.publish_version,
            "publish slot reserved"
        );
        self.reservation = Some(store);
        self.state = PublisherState::Reserved;
        Ok(())
    }

    /// Runs every validator that is not ignored. Failures are recorded, not
    /// raised.
    pub fn validate(&mut self) -> Result<()> {
        self.expect_state(
            "validate",
            &[PublisherState::Reserved, PublisherState::Validated],
        )?;
        for (name, slot) in &mut self.validators {
            if slot.state == ValidationState::Ignored {
                continue;
            }
            slot.state = slot.validator.validate();
            if slot.state == ValidationState::Failed {
                tracing::warn!(validator = %name, messages = ?slot.validator.messages(), "validation failed");
            }
        }
        self.state = PublisherState::Validated;
        Ok(())
    }

    /// Excludes a validator from this publish.
    pub fn ignore_validation(&mut self, name: &str) -> bool {
        self.set_validation_state(name, ValidationState::Ignored)
    }

    pub fn set_validation_state(&mut self, name: &str, state: ValidationState) -> bool {
        match self.validators.get_mut(name) {
            Some(slot) => {
                slot.state = state;
                true
            }
            None => false,
        }
    }

    /// Applies a validator's automatic fix and validates it again.
    pub fn fix_validation(&mut self, name: &str) -> Result<Option<ValidationState>> {
        let Some(slot) = self.validators.get_mut(name) else {
            return Ok(None);
        };
        if !slot.validator.fixable() {
            return Ok(Some(slot.state));
        }
        slot.validator.fix()?;
        slot.state = slot.validator.validate();
        Ok(Some(slot.state))
    }

    /// Runs every extractor into the publish project folder. A failing
    /// extractor is logged and marked `error`; its siblings still run.
    pub fn extract(&mut self) -> Result<()> {
        self.expect_state(
            "extract",
            &[PublisherState::Reserved, PublisherState::Validated],
        )?;
        let (work, work_version) = self.resolved_work()?;
        let publish = work.publish()?;
        let project_folder = publish.project_folder()?;
        let scene_file = Some(work.scene_abs_path(work_version)?);
        let category = work.category().to_string();
        let extract_name = work.name().to_string();
        let version_string = version_tag(self.publish_version);

        for (name, slot) in &mut self.extractors {
            let context = ExtractContext {
                category: category.clone(),
                output_dir: project_folder.join(name),
                extract_name: extract_name.clone(),
                version_string: version_string.clone(),
                scene_file: scene_file.clone(),
                settings: self.definition.settings.clone(),
            };
            match slot.extractor.extract(&context) {
                Ok(output) => {
                    if let Err(err) = crate::fs::protect_files_recursive(&output) {
                        tracing::warn!(path = %output.display(), error = %err, "failed to write-protect output");
                    }
                    slot.status = ExtractStatus::Extracted;
                    slot.output = Some(output);
                }
                Err(err) => {
                    tracing::error!(extractor = %name, error = %format!("{err:#}"), "extraction failed");
                    slot.status = ExtractStatus::Error;
                    slot.output = None;
                }
            }
        }
        self.state = PublisherState::Extracted;
        Ok(())
    }

    /// Turns the reservation into the final publish record.
    pub fn publish(&mut self, notes: &str) -> Result<PublishVersion> {
        self.expect_state("publish", &[PublisherState::Extracted])?;
        let project_root = self.guard.project_root()?;
        let mut elements = Vec::new();
        for slot in self.extractors.values() {
            let Some(output) = &slot.output else {
                continue;
            };
            elements.push(PublishElement {
                name: slot.extractor.nice_name().to_string(),
                kind: slot.extractor.name().to_string(),
                suffix: slot.extractor.extension().to_string(),
                path: crate::fs::relative_posix(&project_root, output)?,
                sequential: slot.extractor.sequential(),
                bundled: slot.extractor.bundled(),
            });
        }
        let validations: IndexMap<&str, ValidationState> = self
            .validators
            .iter()
            .map(|(name, slot)| (name.as_str(), slot.state))
            .collect();
        let notes = if notes.trim().is_empty() {
            AUTO_NOTES
        } else {
            notes
        };

        let Some(mut store) = self.reservation.take() else {
            return Err(PublishError::OutOfOrder {
                operation: "publish",
                state: self.state,
            }
            .into());
        };
        store.set_serialized("elements", &elements)?;
        store.set_serialized("validations", &validations)?;
        store.set("notes", notes);
        store.set("created_at", timestamp_now());
        store.remove("reserved");
        store.apply(true)?;

        if let Some(work) = self.work.as_mut() {
            work.mark_published()?;
        }
        let version = PublishVersion::from_store(Arc::clone(&self.guard), store);
        tracing::info!(
            publish = version.name(),
            version = version.version_number(),
            elements = elements.len(),
            "published"
        );
        self.published = Some(version.clone());
        self.state = PublisherState::Published;
        Ok(version)
    }

    /// Abandons an unfinished publish: extracted outputs and the placeholder
    /// are removed and the publisher returns to `Idle`.
    pub fn discard(&mut self) -> Result<()> {
        self.expect_state(
            "discard",
            &[
                PublisherState::Reserved,
                PublisherState::Validated,
                PublisherState::Extracted,
            ],
        )?;
        for slot in self.extractors.values_mut() {
            if let Some(output) = slot.output.take() {
                crate::fs::remove_all_writable(&output)?;
            }
        }
        if let Some(mut store) = self.reservation.take() {
            store.delete()?;
        }
        tracing::info!(version = self.publish_version, "publish discarded");
        self.reset();
        Ok(())
    }

    /// Promotes the publish this publisher just wrote.
    pub fn promote(&self) -> Result<Outcome<()>> {
        self.expect_state("promote", &[PublisherState::Published])?;
        match &self.published {
            Some(version) => version.promote(),
            None => Err(PublishError::OutOfOrder {
                operation: "promote",
                state: self.state,
            }
            .into()),
        }
    }

    /// Returns to `Idle`, keeping nothing from the previous run.
    pub fn reset(&mut self) {
        self.state = PublisherState::Idle;
        self.work = None;
        self.work_version = None;
        self.definition = CategoryDefinition::default();
        self.extractors.clear();
        self.validators.clear();
        self.publish_version = 0;
        self.reservation = None;
        self.published = None;
    }

    /// The per-work publish view of the resolved work.
    pub fn publish_view(&self) -> Result<Option<Publish>> {
        self.work.as_ref().map(Work::publish).transpose()
    }
}
