use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use indexmap::IndexMap;
use serde_json::Value;
use tik_domain::{
    parse_version_number, PermissionLevel, PromotedMarker, PublishElement, PurgatoryEntry,
    ValidationState, PUBLISH_EXTENSION,
};

use crate::entity::Entity;
use crate::guard::Guard;
use crate::outcome::{Outcome, Refusal, RefusalKind};
use crate::proceed;
use crate::store::RecordStore;
use crate::work::Work;

pub const PROMOTED_MARKER: &str = "promoted.json";

/// The publishes of one work.
///
/// Records live in `tikDatabase/<category>/publish/<work>/` and extracted
/// elements in the mirrored folder under the project root. Deleted versions
/// stay there as tombstones so their numbers are never reused.
#[derive(Debug, Clone)]
pub struct Publish {
    entity: Entity,
    work_id: u32,
    category_path: String,
}

impl Publish {
    pub(crate) fn for_work(work: &Work) -> Result<Self> {
        let relative = tik_domain::join_relative(
            work.path(),
            &format!("publish/{}", work.name()),
        );
        Ok(Self {
            entity: Entity::new(Arc::clone(work.entity().guard()), work.name(), relative),
            work_id: work.id(),
            category_path: work.path().to_string(),
        })
    }

    pub fn name(&self) -> &str {
        self.entity.name()
    }

    pub fn work_id(&self) -> u32 {
        self.work_id
    }

    /// Folder holding the `.pub` records and the promoted marker.
    pub fn data_folder(&self) -> Result<PathBuf> {
        self.entity.abs_database_path(&[])
    }

    /// Folder the extractors write into.
    pub fn project_folder(&self) -> Result<PathBuf> {
        self.entity.abs_project_path(&[])
    }

    pub fn relative_path(&self) -> &str {
        self.entity.relative_path()
    }

    pub fn marker_path(&self) -> Result<PathBuf> {
        Ok(self.data_folder()?.join(PROMOTED_MARKER))
    }

    pub fn record_path(&self, version_number: u32) -> Result<PathBuf> {
        Ok(self
            .data_folder()?
            .join(tik_domain::publish_file_name(self.name(), version_number)))
    }

    /// Every record on disk, reservations and tombstones included, ordered
    /// by version.
    pub fn all_versions(&self) -> Result<Vec<PublishVersion>> {
        let folder = self.data_folder()?;
        let entries = match fs::read_dir(&folder) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                return Err(err).with_context(|| format!("failed to read {}", folder.display()))
            }
        };
        let mut found = Vec::new();
        for entry in entries {
            let path = entry
                .with_context(|| format!("failed to read {}", folder.display()))?
                .path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(PUBLISH_EXTENSION) {
                continue;
            }
            let Some(number) = path
                .file_name()
                .and_then(|name| name.to_str())
                .and_then(|name| parse_version_number(name, self.name()))
            else {
                continue;
            };
            found.push((number, path));
        }
        found.sort_by_key(|(number, _)| *number);
        found
            .into_iter()
            .map(|(_, path)| PublishVersion::load(Arc::clone(self.entity.guard()), &path))
            .collect()
    }

    /// Finished publishes that were not deleted.
    pub fn versions(&self) -> Result<Vec<PublishVersion>> {
        Ok(self
            .all_versions()?
            .into_iter()
            .filter(|version| !version.is_reserved() && !version.is_deleted())
            .collect())
    }

    /// Highest taken slot. Reservations and tombstones count, so a slot is
    /// never handed out twice.
    pub fn last_version(&self) -> Result<u32> {
        let folder = self.data_folder()?;
        let Ok(entries) = fs::read_dir(&folder) else {
            return Ok(0);
        };
        Ok(entries
            .flatten()
            .filter_map(|entry| {
                let name = entry.file_name().to_string_lossy().into_owned();
                name.ends_with(&format!(".{PUBLISH_EXTENSION}"))
                    .then(|| parse_version_number(&name, self.name()))
                    .flatten()
            })
            .max()
            .unwrap_or(0))
    }

    pub fn get_version(&self, version_number: u32) -> Result<Option<PublishVersion>> {
        Ok(self
            .versions()?
            .into_iter()
            .find(|version| version.version_number() == version_number))
    }

    pub fn promoted_marker(&self) -> Result<Option<PromotedMarker>> {
        read_marker(&self.marker_path()?, self.entity.guard().lock_timeout())
    }

    pub fn promoted_version(&self) -> Result<Option<PublishVersion>> {
        let Some(marker) = self.promoted_marker()? else {
            return Ok(None);
        };
        Ok(self
            .versions()?
            .into_iter()
            .find(|version| version.publish_id() == marker.publish_id))
    }

    /// Admin only. The extracted elements go to purgatory and the record
    /// becomes a tombstone.
    pub fn delete_version(&mut self, version_number: u32) -> Result<Outcome<()>> {
        proceed!(self.check_owner_permissions());
        let Some(mut version) = self.get_version(version_number)? else {
            return Ok(self.entity.guard().refuse(Refusal::warning(
                RefusalKind::NotFound,
                format!("Version {version_number} not found."),
            )));
        };
        if version.is_promoted()? {
            clear_marker(&self.marker_path()?, self.entity.guard().lock_timeout())?;
        }
        version.move_to_purgatory()?;
        Ok(Outcome::Done(()))
    }

    pub fn check_owner_permissions(&self) -> Outcome<()> {
        match self.entity.check_permissions(PermissionLevel::ADMIN) {
            Outcome::Done(()) => Outcome::Done(()),
            Outcome::Refused(_) => self.entity.guard().refuse(Refusal::warning(
                RefusalKind::NotAuthorized,
                "Only Admins can delete publishes.",
            )),
        }
    }

    /// Sends every publish of the work to purgatory. Admin only.
    pub fn destroy(&mut self) -> Result<Outcome<()>> {
        proceed!(self.check_owner_permissions());
        self.move_all_to_purgatory()?;
        Ok(Outcome::Done(()))
    }

    pub(crate) fn move_all_to_purgatory(&mut self) -> Result<()> {
        for mut version in self.versions()? {
            version.move_to_purgatory()?;
        }
        clear_marker(&self.marker_path()?, self.entity.guard().lock_timeout())?;
        Ok(())
    }

    /// Brings the newest deleted publish back. A destroyed work is restored
    /// first. Admin only.
    pub fn resurrect(&mut self) -> Result<Outcome<PublishVersion>> {
        let guard = Arc::clone(self.entity.guard());
        proceed!(self.entity.check_permissions(PermissionLevel::ADMIN));
        let work_record = Work::record_path(&guard, &self.category_path, self.name())?;
        if !work_record.exists() {
            proceed!(Work::resurrect(Arc::clone(&guard), &work_record)?);
        }
        let Some(mut version) = self
            .all_versions()?
            .into_iter()
            .rev()
            .find(PublishVersion::is_deleted)
        else {
            return Ok(guard.refuse(Refusal::warning(
                RefusalKind::NotFound,
                format!("{} has no deleted publish to resurrect.", self.name()),
            )));
        };
        version.resurrect()?;
        let mut work = Work::load(guard, &work_record)?;
        work.mark_published()?;
        tracing::info!(publish = self.name(), version = version.version_number(), "publish resurrected");
        Ok(Outcome::Done(version))
    }
}

fn read_marker(path: &Path, timeout: std::time::Duration) -> Result<Option<PromotedMarker>> {
    if !path.exists() {
        return Ok(None);
    }
    let store = RecordStore::open(path, timeout)?;
    if store.data().is_empty() {
        return Ok(None);
    }
    store.data_as().map(Some)
}

fn clear_marker(path: &Path, timeout: std::time::Duration) -> Result<()> {
    if path.exists() {
        RecordStore::open(path, timeout)?.delete()?;
    }
    Ok(())
}

/// One `.pub` record: a finished publish, or a reservation while a
/// publisher is still running.
#[derive(Debug, Clone)]
pub struct PublishVersion {
    entity: Entity,
    store: RecordStore,
}

impl PublishVersion {
    pub fn load(guard: Arc<Guard>, path: &Path) -> Result<Self> {
        let store = RecordStore::open(path, guard.lock_timeout())?;
        Ok(Self::from_store(guard, store))
    }

    pub(crate) fn from_store(guard: Arc<Guard>, store: RecordStore) -> Self {
        let name = store.get_str("name").unwrap_or_default().to_string();
        let relative = store.get_str("path").unwrap_or_default().to_string();
        let entity = match store
            .get("publish_id")
            .and_then(Value::as_u64)
            .and_then(|id| u32::try_from(id).ok())
        {
            Some(id) => Entity::with_id(guard, name, relative, id),
            None => Entity::new(guard, name, relative),
        };
        Self { entity, store }
    }

    pub fn name(&self) -> &str {
        self.entity.name()
    }

    pub fn publish_id(&self) -> u32 {
        self.entity.id()
    }

    pub fn version_number(&self) -> u32 {
        self.store
            .get("version_number")
            .and_then(Value::as_u64)
            .and_then(|number| u32::try_from(number).ok())
            .unwrap_or_default()
    }

    pub fn work_version(&self) -> u32 {
        self.store
            .get("work_version")
            .and_then(Value::as_u64)
            .and_then(|number| u32::try_from(number).ok())
            .unwrap_or_default()
    }

    pub fn creator(&self) -> &str {
        self.store.get_str("creator").unwrap_or_default()
    }

    pub fn notes(&self) -> &str {
        self.store.get_str("notes").unwrap_or_default()
    }

    pub fn is_reserved(&self) -> bool {
        self.store
            .get("reserved")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    pub fn is_deleted(&self) -> bool {
        self.store
            .get("deleted")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    pub fn elements(&self) -> Result<Vec<PublishElement>> {
        self.store
            .get_as::<Option<Vec<PublishElement>>>("elements")
            .map(Option::unwrap_or_default)
    }

    pub fn validations(&self) -> Result<IndexMap<String, ValidationState>> {
        self.store
            .get_as::<Option<IndexMap<String, ValidationState>>>("validations")
            .map(Option::unwrap_or_default)
    }

    pub fn record_file(&self) -> &Path {
        self.store.path()
    }

    pub fn element_abs_path(&self, element: &PublishElement) -> Result<PathBuf> {
        let mut path = self.entity.guard().project_root()?;
        path.extend(element.path.split('/').filter(|part| !part.is_empty()));
        Ok(path)
    }

    fn marker_path(&self) -> Result<PathBuf> {
        self.store
            .path()
            .parent()
            .map(|folder| folder.join(PROMOTED_MARKER))
            .context("publish record has no parent folder")
    }

    /// Pure read of the side-car marker.
    pub fn is_promoted(&self) -> Result<bool> {
        let marker = read_marker(&self.marker_path()?, self.entity.guard().lock_timeout())?;
        Ok(marker.is_some_and(|marker| marker.publish_id == self.publish_id()))
    }

    /// Makes this publish the canonical one of its work, replacing any
    /// previous promotion.
    pub fn promote(&self) -> Result<Outcome<()>> {
        proceed!(self.entity.check_permissions(PermissionLevel::SUPERVISOR));
        if self.is_reserved() || self.is_deleted() {
            return Ok(self.entity.guard().refuse(Refusal::warning(
                RefusalKind::NotFound,
                "Only finished publishes can be promoted.",
            )));
        }
        let guard = self.entity.guard();
        let marker = PromotedMarker {
            publish_id: self.publish_id(),
            name: self.name().to_string(),
            path: crate::fs::relative_posix(&guard.database_root()?, self.store.path())?,
        };
        let mut store = RecordStore::open(self.marker_path()?, guard.lock_timeout())?;
        store.set_serialized_data(&marker)?;
        store.apply(true)?;
        tracing::info!(publish = self.name(), version = self.version_number(), "promoted");
        Ok(Outcome::Done(()))
    }

    /// Sends the extracted elements to purgatory and turns the record into
    /// a tombstone that remembers where they went.
    pub(crate) fn move_to_purgatory(&mut self) -> Result<()> {
        if self.store.is_modified() {
            self.store.reload()?;
        }
        if self.is_deleted() {
            return Ok(());
        }
        let root = self.entity.guard().project_root()?;
        let mut moved = Vec::new();
        for element in self.elements()? {
            let path = self.element_abs_path(&element)?;
            crate::fs::make_writable_recursive(&path);
            moved.extend(crate::fs::send_to_purgatory(&root, &path)?);
        }
        self.store.set("deleted", true);
        self.store.set_serialized("purgatory", &moved)?;
        self.store.apply(false)?;
        Ok(())
    }

    /// Puts the elements back and clears the tombstone.
    pub(crate) fn resurrect(&mut self) -> Result<()> {
        if self.store.is_modified() {
            self.store.reload()?;
        }
        let root = self.entity.guard().project_root()?;
        let moved: Vec<PurgatoryEntry> = self
            .store
            .get_as::<Option<Vec<PurgatoryEntry>>>("purgatory")?
            .unwrap_or_default();
        for entry in &moved {
            crate::fs::restore_from_purgatory(&root, entry)?;
        }
        for element in self.elements()? {
            let path = self.element_abs_path(&element)?;
            if path.exists() {
                crate::fs::protect_files_recursive(&path)?;
            }
        }
        self.store.remove("deleted");
        self.store.remove("purgatory");
        self.store.apply(false)?;
        Ok(())
    }

    pub fn reload(&mut self) -> Result<()> {
        self.store.reload()
    }
}
