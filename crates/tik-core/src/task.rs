use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use serde_json::Value;
use tik_domain::{join_relative, validate_name, PermissionLevel, TASK_EXTENSION};

use crate::category::Category;
use crate::entity::Entity;
use crate::guard::Guard;
use crate::outcome::{Outcome, Refusal, RefusalKind};
use crate::proceed;
use crate::store::RecordStore;

/// A unit of work inside a subproject, persisted as `<name>.task` in the
/// subproject's database folder.
#[derive(Debug, Clone)]
pub struct Task {
    entity: Entity,
    store: RecordStore,
    sub_path: String,
}

impl Task {
    pub(crate) fn record_path(guard: &Arc<Guard>, sub_path: &str, name: &str) -> Result<PathBuf> {
        Entity::new(Arc::clone(guard), name, sub_path)
            .abs_database_path(&[&format!("{name}.{TASK_EXTENSION}")])
    }

    /// Writes a new task record. Callers check permissions and uniqueness.
    pub(crate) fn create(
        guard: Arc<Guard>,
        sub_path: &str,
        name: &str,
        categories: &[String],
        task_type: Option<&str>,
    ) -> Result<Self> {
        validate_name(name)?;
        let path = Self::record_path(&guard, sub_path, name)?;
        let entity = Entity::new(Arc::clone(&guard), name, join_relative(sub_path, name));
        let mut store = RecordStore::open(&path, guard.lock_timeout())?;
        store.set("name", name);
        store.set("creator", guard.user_name());
        store.set("type", task_type.map_or(Value::Null, Value::from));
        store.set("task_id", entity.id());
        store.set_serialized("categories", &categories)?;
        store.set("path", sub_path);
        store.set("file_name", format!("{name}.{TASK_EXTENSION}"));
        store.apply(true)?;
        tracing::info!(task = name, sub = sub_path, "task created");
        Ok(Self {
            entity,
            store,
            sub_path: sub_path.to_string(),
        })
    }

    pub fn load(guard: Arc<Guard>, path: &Path) -> Result<Self> {
        let store = RecordStore::open(path, guard.lock_timeout())?;
        let name = store
            .get_str("name")
            .map(ToOwned::to_owned)
            .or_else(|| path.file_stem().map(|stem| stem.to_string_lossy().into_owned()))
            .unwrap_or_default();
        // The folder is authoritative: it follows subproject renames, the
        // stored path does not.
        let sub_path = path
            .parent()
            .and_then(|folder| {
                crate::fs::relative_posix(&guard.database_root().ok()?, folder).ok()
            })
            .unwrap_or_else(|| store.get_str("path").unwrap_or_default().to_string());
        let relative = join_relative(&sub_path, &name);
        let entity = match store
            .get("task_id")
            .and_then(Value::as_u64)
            .and_then(|id| u32::try_from(id).ok())
        {
            Some(id) => Entity::with_id(guard, name, relative, id),
            None => Entity::new(guard, name, relative),
        };
        Ok(Self {
            entity,
            store,
            sub_path,
        })
    }

    pub fn name(&self) -> &str {
        self.entity.name()
    }

    /// Reference id, stable across renames.
    pub fn id(&self) -> u32 {
        self.entity.id()
    }

    pub fn creator(&self) -> &str {
        self.store.get_str("creator").unwrap_or_default()
    }

    pub fn task_type(&self) -> Option<&str> {
        self.store.get_str("type")
    }

    /// Path of the owning subproject.
    pub fn sub_path(&self) -> &str {
        &self.sub_path
    }

    /// `<subproject>/<task>`
    pub fn path(&self) -> &str {
        self.entity.relative_path()
    }

    pub fn file_name(&self) -> &str {
        self.store.get_str("file_name").unwrap_or_default()
    }

    pub fn record_file(&self) -> &Path {
        self.store.path()
    }

    pub fn category_labels(&self) -> Vec<String> {
        self.store
            .get_as::<Option<Vec<String>>>("categories")
            .ok()
            .flatten()
            .unwrap_or_default()
    }

    pub fn categories(&self) -> Vec<Category> {
        self.category_labels()
            .iter()
            .map(|label| Category::new(Arc::clone(self.entity.guard()), self, label))
            .collect()
    }

    pub fn category(&self, label: &str) -> Option<Category> {
        self.category_labels()
            .iter()
            .any(|existing| existing == label)
            .then(|| Category::new(Arc::clone(self.entity.guard()), self, label))
    }

    /// True when no category holds a work.
    pub fn is_empty(&self) -> Result<bool> {
        for category in self.categories() {
            if !category.is_empty()? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    pub fn add_category(&mut self, label: &str) -> Result<Outcome<Category>> {
        proceed!(self.entity.check_permissions(PermissionLevel::SUPERVISOR));
        let guard = Arc::clone(self.entity.guard());
        let definitions = guard.category_definitions();
        if !definitions.is_empty() && !definitions.contains(label) {
            return Ok(guard.refuse(Refusal::warning(
                RefusalKind::NotFound,
                format!("Category '{label}' is not defined in category definitions."),
            )));
        }
        let mut labels = self.category_labels();
        if labels.iter().any(|existing| existing == label) {
            return Ok(guard.refuse(Refusal::warning(
                RefusalKind::Duplicate,
                format!("Category '{label}' already exists in task '{}'.", self.name()),
            )));
        }
        labels.push(label.to_string());
        self.store.set_serialized("categories", &labels)?;
        self.store.apply(false)?;
        Ok(Outcome::Done(Category::new(guard, self, label)))
    }

    /// Renames the task, changes its type, or replaces its category list.
    ///
    /// Every guard runs before anything is written, so a refusal leaves the
    /// task as it was. Renaming moves the record and folders and is only
    /// allowed while the task holds no works. Dropped labels follow the
    /// rules of [`Task::delete_category`], and one non-empty label raises
    /// the whole edit to level 3.
    pub fn edit(
        &mut self,
        name: Option<&str>,
        task_type: Option<&str>,
        categories: Option<&[String]>,
    ) -> Result<Outcome<()>> {
        proceed!(self.entity.check_permissions(PermissionLevel::SUPERVISOR));
        let guard = Arc::clone(self.entity.guard());

        let mut dropped = Vec::new();
        if let Some(categories) = categories {
            let definitions = guard.category_definitions();
            if let Some(unknown) = categories
                .iter()
                .find(|label| !definitions.is_empty() && !definitions.contains(label))
            {
                return Ok(guard.refuse(Refusal::warning(
                    RefusalKind::NotFound,
                    format!("Category '{unknown}' is not defined in category definitions."),
                )));
            }
            for category in self.categories() {
                if !categories.iter().any(|label| label == category.name()) {
                    dropped.push((category.name().to_string(), category.is_empty()?));
                }
            }
        }
        if dropped.iter().any(|(_, empty)| !empty) {
            proceed!(self.entity.check_permissions(PermissionLevel::ADMIN));
        }

        let new_name = name.filter(|new_name| *new_name != self.name());
        if let Some(new_name) = new_name {
            if let Err(err) = validate_name(new_name) {
                return Ok(guard.refuse(Refusal::warning(RefusalKind::InvalidName, err.to_string())));
            }
            if Self::record_path(&guard, self.sub_path(), new_name)?.exists() {
                return Ok(guard.refuse(Refusal::warning(
                    RefusalKind::Duplicate,
                    format!("Task name '{new_name}' already exists in sub '{}'.", self.sub_path()),
                )));
            }
            if !self.is_empty()? {
                return Ok(guard.refuse(Refusal::warning(
                    RefusalKind::Protected,
                    format!("Task '{}' has works and cannot be renamed.", self.name()),
                )));
            }
        }

        if let Some(task_type) = task_type {
            self.store.set("type", task_type);
        }
        if let Some(categories) = categories {
            self.store.set_serialized("categories", &categories)?;
        }
        match new_name {
            Some(new_name) => self.rename(new_name)?,
            None => {
                self.store.apply(false)?;
            }
        }
        for (label, empty) in dropped {
            let category = Category::new(Arc::clone(&guard), self, &label);
            self.discard_category_content(&category, empty)?;
        }
        Ok(Outcome::Done(()))
    }

    fn rename(&mut self, new_name: &str) -> Result<()> {
        let guard = Arc::clone(self.entity.guard());
        let old_database = self.entity.abs_database_path(&[])?;
        let old_project = self.entity.abs_project_path(&[])?;
        let new_path = join_relative(self.sub_path(), new_name);
        let new_record = Self::record_path(&guard, self.sub_path(), new_name)?;

        let mut old_store = self.store.clone();
        self.store.set_file(&new_record)?;
        self.store.set_data(old_store.data().clone());
        self.store.set("name", new_name);
        self.store.set("file_name", format!("{new_name}.{TASK_EXTENSION}"));
        self.store.apply(true)?;
        old_store.delete()?;

        self.entity.set_name(new_name);
        self.entity.set_relative_path(new_path);
        for (old, new) in [
            (old_database, self.entity.abs_database_path(&[])?),
            (old_project, self.entity.abs_project_path(&[])?),
        ] {
            if old.exists() {
                crate::fs::move_path(&old, &new)?;
            }
        }
        tracing::info!(task = new_name, "task renamed");
        Ok(())
    }

    /// Reorders the categories. Only a permutation of the current labels is
    /// accepted; anything else is refused and the order stays as it was.
    pub fn order_categories(&mut self, new_order: &[String]) -> Result<Outcome<()>> {
        proceed!(self.entity.check_permissions(PermissionLevel::SUPERVISOR));
        let guard = self.entity.guard();
        let current = self.category_labels();
        if new_order.len() != current.len() {
            return Ok(guard.refuse(Refusal::error(
                RefusalKind::WrongLength,
                "New order list is not the same length as the current categories list.",
            )));
        }
        let mut seen = Vec::with_capacity(new_order.len());
        for label in new_order {
            if !current.contains(label) || seen.contains(&label) {
                return Ok(guard.refuse(Refusal::error(
                    RefusalKind::ForeignLabel,
                    format!(
                        "New order list contains '{label}' which is not in the current categories list."
                    ),
                )));
            }
            seen.push(label);
        }
        self.store.set_serialized("categories", &new_order)?;
        self.store.apply(false)?;
        Ok(Outcome::Done(()))
    }

    /// Removes a label. Empty categories need level 2 and simply vanish;
    /// categories holding works need level 3 and go to purgatory.
    pub fn delete_category(&mut self, label: &str) -> Result<Outcome<()>> {
        let guard = Arc::clone(self.entity.guard());
        let Some(category) = self.category(label) else {
            return Ok(guard.refuse(Refusal::warning(
                RefusalKind::NotFound,
                format!("Category '{label}' does not exist in task '{}'.", self.name()),
            )));
        };
        let empty = category.is_empty()?;
        let level = if empty {
            PermissionLevel::SUPERVISOR
        } else {
            PermissionLevel::ADMIN
        };
        proceed!(self.entity.check_permissions(level));

        let labels: Vec<String> = self
            .category_labels()
            .into_iter()
            .filter(|existing| existing != label)
            .collect();
        self.store.set_serialized("categories", &labels)?;
        self.store.apply(false)?;
        self.discard_category_content(&category, empty)?;
        Ok(Outcome::Done(()))
    }

    /// Folders of a label that left the record: deleted when empty, sent to
    /// purgatory otherwise.
    fn discard_category_content(&self, category: &Category, empty: bool) -> Result<()> {
        let folders = [category.database_folder()?, category.project_folder()?];
        if empty {
            for folder in folders {
                crate::fs::remove_all_writable(&folder)?;
            }
            return Ok(());
        }
        let root = self.entity.guard().project_root()?;
        tracing::warn!(category = category.name(), task = self.name(), "sending category to purgatory");
        for folder in folders {
            crate::fs::make_writable_recursive(&folder);
            crate::fs::move_to_purgatory(&root, &folder)?;
        }
        Ok(())
    }

    pub fn reload(&mut self) -> Result<()> {
        self.store.reload()
    }

    pub fn is_modified(&self) -> bool {
        self.store.is_modified()
    }

    /// Removes the task: the record alone when empty, record and content to
    /// purgatory otherwise. Permissions are checked by the project.
    pub(crate) fn remove(mut self, empty: bool) -> Result<()> {
        let root = self.entity.guard().project_root()?;
        let database = self.entity.abs_database_path(&[])?;
        let project = self.entity.abs_project_path(&[])?;
        if empty {
            self.store.delete()?;
            crate::fs::remove_all_writable(&database)?;
            crate::fs::remove_all_writable(&project)?;
        } else {
            tracing::warn!(task = self.name(), "sending task and everything underneath to purgatory");
            self.store.move_to_purgatory(&root)?;
            for folder in [database, project] {
                crate::fs::make_writable_recursive(&folder);
                crate::fs::move_to_purgatory(&root, &folder)?;
            }
        }
        Ok(())
    }
}
