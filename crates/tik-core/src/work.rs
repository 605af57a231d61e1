use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use serde_json::Value;
use tik_domain::{
    timestamp_now, validate_name, version_name, version_tag, PermissionLevel, PurgatoryEntry,
    WorkState, WorkVersion, WORK_EXTENSION,
};

use crate::entity::Entity;
use crate::guard::Guard;
use crate::outcome::{Outcome, Refusal, RefusalKind, UsageError};
use crate::proceed;
use crate::publish::Publish;
use crate::store::RecordStore;

/// Where a new work lives and what it belongs to.
#[derive(Clone, Debug)]
pub(crate) struct WorkOrigin<'a> {
    pub category_path: &'a str,
    pub category: &'a str,
    pub task_name: &'a str,
    pub task_id: u32,
}

/// An iteratively versioned scene, persisted as `<name>.work` in the
/// database folder of its category.
#[derive(Debug, Clone)]
pub struct Work {
    entity: Entity,
    store: RecordStore,
}

impl Work {
    pub(crate) fn record_path(
        guard: &Arc<Guard>,
        category_path: &str,
        name: &str,
    ) -> Result<PathBuf> {
        Entity::new(Arc::clone(guard), name, category_path)
            .abs_database_path(&[&format!("{name}.{WORK_EXTENSION}")])
    }

    /// Prepares an in-memory work. Nothing is written until the first
    /// version is appended.
    pub(crate) fn prepare(guard: Arc<Guard>, origin: &WorkOrigin<'_>, name: &str) -> Result<Self> {
        validate_name(name)?;
        let entity = Entity::new(Arc::clone(&guard), name, origin.category_path);
        let path = entity.abs_database_path(&[&format!("{name}.{WORK_EXTENSION}")])?;
        let mut store = RecordStore::open(path, guard.lock_timeout())?;
        let handler = guard.dcc_handler();
        store.set("name", name);
        store.set("creator", guard.user_name());
        store.set("dcc", handler.name());
        store.set("dcc_version", handler.dcc_version());
        store.set("category", origin.category);
        store.set("task_name", origin.task_name);
        store.set("task_id", origin.task_id);
        store.set("work_id", entity.id());
        store.set("path", origin.category_path);
        store.set("software_version", env!("CARGO_PKG_VERSION"));
        store.set("state", WorkState::Working.as_str());
        store.set("versions", Value::Array(Vec::new()));
        Ok(Self { entity, store })
    }

    /// Loads an existing `.work` record.
    pub fn load(guard: Arc<Guard>, path: &Path) -> Result<Self> {
        let store = RecordStore::open(path, guard.lock_timeout())?;
        let name = store
            .get_str("name")
            .map(ToOwned::to_owned)
            .or_else(|| path.file_stem().map(|stem| stem.to_string_lossy().into_owned()))
            .unwrap_or_default();
        let category_path = path
            .parent()
            .and_then(|folder| {
                crate::fs::relative_posix(&guard.database_root().ok()?, folder).ok()
            })
            .unwrap_or_else(|| store.get_str("path").unwrap_or_default().to_string());
        let entity = match store.get("work_id").and_then(Value::as_u64) {
            Some(id) => Entity::with_id(guard, name, category_path, u32::try_from(id).unwrap_or(0)),
            None => Entity::new(guard, name, category_path),
        };
        Ok(Self { entity, store })
    }

    pub fn entity(&self) -> &Entity {
        &self.entity
    }

    pub fn name(&self) -> &str {
        self.entity.name()
    }

    pub fn id(&self) -> u32 {
        self.entity.id()
    }

    pub fn creator(&self) -> &str {
        self.store.get_str("creator").unwrap_or_default()
    }

    pub fn dcc(&self) -> &str {
        self.store.get_str("dcc").unwrap_or_default()
    }

    pub fn dcc_version(&self) -> &str {
        self.store.get_str("dcc_version").unwrap_or_default()
    }

    pub fn category(&self) -> &str {
        self.store.get_str("category").unwrap_or_default()
    }

    pub fn task_name(&self) -> &str {
        self.store.get_str("task_name").unwrap_or_default()
    }

    pub fn task_id(&self) -> u32 {
        self.store
            .get("task_id")
            .and_then(Value::as_u64)
            .and_then(|id| u32::try_from(id).ok())
            .unwrap_or_default()
    }

    /// Relative path of the owning category.
    pub fn path(&self) -> &str {
        self.entity.relative_path()
    }

    pub fn record_file(&self) -> &Path {
        self.store.path()
    }

    pub fn exists(&self) -> bool {
        self.store.exists()
    }

    pub fn state(&self) -> WorkState {
        self.store.get_as("state").unwrap_or_default()
    }

    pub fn versions(&self) -> Result<Vec<WorkVersion>> {
        self.store
            .get_as::<Option<Vec<WorkVersion>>>("versions")
            .map(Option::unwrap_or_default)
    }

    pub fn version_count(&self) -> Result<usize> {
        Ok(self.versions()?.len())
    }

    pub fn last_version_number(&self) -> Result<u32> {
        Ok(self
            .versions()?
            .last()
            .map_or(0, |version| version.version_number))
    }

    pub fn get_version(&self, version_number: u32) -> Result<Option<WorkVersion>> {
        Ok(self
            .versions()?
            .into_iter()
            .find(|version| version.version_number == version_number))
    }

    /// `(version number, scene file name, thumbnail file name)` for the next
    /// version, or for `version_number` when given.
    pub fn construct_names(
        &self,
        file_format: &str,
        version_number: Option<u32>,
    ) -> Result<(u32, String, String)> {
        let number = match version_number {
            Some(number) => number,
            None => self.last_version_number()? + 1,
        };
        let scene = version_name(self.name(), number, file_format);
        let thumbnail = format!("{}_{}_thumbnail.jpg", self.name(), version_tag(number));
        Ok((number, scene, thumbnail))
    }

    /// Absolute path of a version's scene file.
    pub fn scene_abs_path(&self, version: &WorkVersion) -> Result<PathBuf> {
        let parts: Vec<&str> = version.scene_path.split('/').collect();
        self.entity.abs_project_path(&parts)
    }

    /// Stored and running host versions when they disagree.
    pub fn check_dcc_version_mismatch(&self) -> Option<(String, String)> {
        let current = self.entity.guard().dcc_handler().dcc_version();
        if current.is_empty() {
            return None;
        }
        let defined = self.dcc_version();
        if defined.is_empty() || defined == "NA" || defined == current {
            return None;
        }
        Some((defined.to_string(), current))
    }

    /// Saves the open scene as the next version and records it.
    ///
    /// A format the host cannot write is a caller bug and fails with
    /// [`UsageError::UnsupportedFormat`].
    pub fn new_version(
        &mut self,
        file_format: Option<&str>,
        notes: &str,
        ignore_checks: bool,
    ) -> Result<Outcome<WorkVersion>> {
        proceed!(self.entity.check_permissions(PermissionLevel::ARTIST));
        let guard = Arc::clone(self.entity.guard());

        if self.store.exists() && self.store.is_modified() {
            tracing::debug!(work = self.name(), "work record changed on disk, reloading");
            self.store.reload()?;
        }

        if !ignore_checks {
            if let Some((defined, current)) = self.check_dcc_version_mismatch() {
                return Ok(guard.refuse(Refusal::warning(
                    RefusalKind::DccVersionMismatch,
                    format!(
                        "The current dcc version ({current}) does not match with the defined dcc version ({defined})."
                    ),
                )));
            }
        }

        let handler = guard.dcc_handler();
        let formats = handler.formats();
        let file_format = match file_format {
            Some(format) => format.to_string(),
            None => formats.first().cloned().ok_or_else(|| {
                UsageError::InvalidArgument(format!("{} declares no scene formats", handler.name()))
            })?,
        };
        if !formats.contains(&file_format) {
            return Err(UsageError::UnsupportedFormat {
                format: file_format,
                dcc: handler.name().to_string(),
                supported: formats,
            }
            .into());
        }

        let (number, scene_name, thumbnail_name) = self.construct_names(&file_format, None)?;
        let scene_path = self.entity.abs_project_path(&[self.name(), &scene_name])?;
        if let Some(parent) = scene_path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        handler
            .save_as(&scene_path)
            .with_context(|| format!("{} failed to save {}", handler.name(), scene_path.display()))?;

        let version = WorkVersion {
            version_number: number,
            workstation: guard.workstation(),
            user: guard.user_name(),
            notes: notes.to_string(),
            thumbnail: format!("thumbnails/{thumbnail_name}"),
            previews: indexmap::IndexMap::new(),
            scene_path: format!("{}/{scene_name}", self.name()),
            file_format,
            dcc_version: handler.dcc_version(),
            created_at: timestamp_now(),
        };
        let mut versions = self.versions()?;
        versions.push(version.clone());
        self.store.set_serialized("versions", &versions)?;
        if self.dcc_version().is_empty() && !version.dcc_version.is_empty() {
            self.store.set("dcc_version", version.dcc_version.clone());
        }
        self.store.apply(true)?;
        tracing::info!(work = self.name(), version = number, "new work version");
        Ok(Outcome::Done(version))
    }

    fn set_state(&mut self, state: WorkState) -> Result<()> {
        self.store.set("state", state.as_str());
        self.store.apply(false)?;
        Ok(())
    }

    pub(crate) fn mark_published(&mut self) -> Result<()> {
        if self.store.is_modified() {
            self.store.reload()?;
        }
        self.set_state(WorkState::Published)
    }

    /// Hides the work from day-to-day listings without deleting anything.
    pub fn omit(&mut self) -> Result<Outcome<()>> {
        proceed!(self.entity.check_permissions(PermissionLevel::ARTIST));
        self.set_state(WorkState::Omitted)?;
        Ok(Outcome::Done(()))
    }

    pub fn revive(&mut self) -> Result<Outcome<()>> {
        proceed!(self.entity.check_permissions(PermissionLevel::ARTIST));
        let state = if self.publish()?.versions()?.is_empty() {
            WorkState::Working
        } else {
            WorkState::Published
        };
        self.set_state(state)?;
        Ok(Outcome::Done(()))
    }

    /// Admins may destroy anything. Others only their own unpublished works
    /// where every version is theirs.
    pub fn check_destroy_permissions(&self) -> Result<Outcome<()>> {
        let guard = self.entity.guard();
        if guard.permission_level() >= PermissionLevel::ADMIN && guard.is_authenticated() {
            return Ok(Outcome::Done(()));
        }
        proceed!(self.entity.check_permissions(PermissionLevel::ARTIST));
        if !self.publish()?.versions()?.is_empty() {
            return Ok(guard.refuse(Refusal::warning(
                RefusalKind::NotAuthorized,
                "This work has published versions. Only admins can delete it.",
            )));
        }
        let user = guard.user_name();
        if self.creator() != user
            || self.versions()?.iter().any(|version| version.user != user)
        {
            return Ok(guard.refuse(Refusal::warning(
                RefusalKind::NotAuthorized,
                "Only admins can delete other users' works.",
            )));
        }
        Ok(Outcome::Done(()))
    }

    /// Moves the work, its scenes and all of its publishes to purgatory.
    ///
    /// The record goes last and remembers where each scene went, which is
    /// what [`Work::resurrect`] replays.
    pub fn destroy(&mut self) -> Result<Outcome<()>> {
        proceed!(self.check_destroy_permissions()?);
        if self.store.is_modified() {
            self.store.reload()?;
        }
        let root = self.entity.guard().project_root()?;
        let mut publish = self.publish()?;
        publish.move_all_to_purgatory()?;
        let mut moved = Vec::new();
        for version in self.versions()? {
            moved.extend(crate::fs::send_to_purgatory(&root, &self.scene_abs_path(&version)?)?);
        }
        let scene_folder = self.entity.abs_project_path(&[self.name()])?;
        if scene_folder.exists() && is_empty_dir(&scene_folder) {
            fs::remove_dir(&scene_folder)
                .with_context(|| format!("failed to remove {}", scene_folder.display()))?;
        }
        self.store.set_serialized("purgatory", &moved)?;
        self.store.apply(false)?;
        self.store.move_to_purgatory(&root)?;
        tracing::info!(work = self.name(), "work destroyed");
        Ok(Outcome::Done(()))
    }

    /// Brings a destroyed work back to `record`, its former location, along
    /// with the scenes it remembers. The most recent burial wins when the
    /// same name was destroyed more than once. Admin only.
    pub fn resurrect(guard: Arc<Guard>, record: &Path) -> Result<Outcome<Self>> {
        let name = record
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_default();
        let folder = record.parent().ok_or_else(|| {
            UsageError::InvalidArgument(format!("{} has no parent folder", record.display()))
        })?;
        let category_path = crate::fs::relative_posix(&guard.database_root()?, folder)?;
        let entity = Entity::new(Arc::clone(&guard), &name, category_path);
        proceed!(entity.check_permissions(PermissionLevel::ADMIN));
        if record.exists() {
            return Ok(guard.refuse(Refusal::warning(
                RefusalKind::Duplicate,
                format!("A work named {name} already exists."),
            )));
        }
        let root = guard.project_root()?;
        let Some(buried) = crate::fs::newest_in_purgatory(&root, record)? else {
            return Ok(guard.refuse(Refusal::warning(
                RefusalKind::NotFound,
                format!("There is no destroyed work named {name}."),
            )));
        };
        crate::fs::move_path(&buried, record)?;

        let mut work = Self::load(guard, record)?;
        let moved: Vec<PurgatoryEntry> = work
            .store
            .get_as::<Option<Vec<PurgatoryEntry>>>("purgatory")?
            .unwrap_or_default();
        for entry in &moved {
            crate::fs::restore_from_purgatory(&root, entry)?;
        }
        work.store.remove("purgatory");
        let state = if work.publish()?.versions()?.is_empty() {
            WorkState::Working
        } else {
            WorkState::Published
        };
        work.set_state(state)?;
        tracing::info!(work = %name, "work resurrected");
        Ok(Outcome::Done(work))
    }

    pub fn reload(&mut self) -> Result<()> {
        self.store.reload()
    }

    pub fn is_modified(&self) -> bool {
        self.store.is_modified()
    }

    /// Publishes made from this work.
    pub fn publish(&self) -> Result<Publish> {
        Publish::for_work(self)
    }
}

fn is_empty_dir(path: &Path) -> bool {
    fs::read_dir(path).is_ok_and(|mut entries| entries.next().is_none())
}
