use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tik_domain::{join_relative, CategoryDefinition, WORK_EXTENSION};

use crate::entity::Entity;
use crate::guard::Guard;
use crate::outcome::Outcome;
use crate::task::Task;
use crate::work::{Work, WorkOrigin};

/// One label of a task, owning the works made under it.
///
/// Lives at `<subproject>/<task>/<label>` in both roots.
#[derive(Debug, Clone)]
pub struct Category {
    entity: Entity,
    task_name: String,
    task_id: u32,
}

impl Category {
    pub(crate) fn new(guard: Arc<Guard>, task: &Task, label: &str) -> Self {
        Self {
            entity: Entity::new(guard, label, join_relative(task.path(), label)),
            task_name: task.name().to_string(),
            task_id: task.id(),
        }
    }

    pub fn name(&self) -> &str {
        self.entity.name()
    }

    pub fn path(&self) -> &str {
        self.entity.relative_path()
    }

    pub fn task_name(&self) -> &str {
        &self.task_name
    }

    pub fn definition(&self) -> Option<CategoryDefinition> {
        self.entity
            .guard()
            .category_definitions()
            .get(self.name())
            .cloned()
    }

    pub fn database_folder(&self) -> Result<PathBuf> {
        self.entity.abs_database_path(&[])
    }

    pub fn project_folder(&self) -> Result<PathBuf> {
        self.entity.abs_project_path(&[])
    }

    /// Works found on disk, sorted by name.
    pub fn works(&self) -> Result<Vec<Work>> {
        let folder = self.database_folder()?;
        let entries = match fs::read_dir(&folder) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                return Err(err).with_context(|| format!("failed to read {}", folder.display()))
            }
        };
        let mut paths = Vec::new();
        for entry in entries {
            let path = entry
                .with_context(|| format!("failed to read {}", folder.display()))?
                .path();
            if path.extension().and_then(|ext| ext.to_str()) == Some(WORK_EXTENSION) {
                paths.push(path);
            }
        }
        paths.sort();
        paths
            .iter()
            .map(|path| Work::load(Arc::clone(self.entity.guard()), path))
            .collect()
    }

    pub fn find_work(&self, name: &str) -> Result<Option<Work>> {
        let path = Work::record_path(self.entity.guard(), self.path(), name)?;
        if !path.exists() {
            return Ok(None);
        }
        Work::load(Arc::clone(self.entity.guard()), &path).map(Some)
    }

    /// Restores a destroyed work of this category from purgatory.
    pub fn resurrect_work(&self, name: &str) -> Result<Outcome<Work>> {
        let path = Work::record_path(self.entity.guard(), self.path(), name)?;
        Work::resurrect(Arc::clone(self.entity.guard()), &path)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.works()?.is_empty())
    }

    /// Saves the current scene as a new work, or as the next version of the
    /// work when one with this name already exists.
    pub fn create_work(
        &self,
        name: &str,
        file_format: Option<&str>,
        notes: &str,
        ignore_checks: bool,
    ) -> Result<Outcome<Work>> {
        let guard = Arc::clone(self.entity.guard());
        let mut work = match self.find_work(name)? {
            Some(existing) => {
                tracing::debug!(work = name, "work exists, appending a version");
                existing
            }
            None => {
                let origin = WorkOrigin {
                    category_path: self.path(),
                    category: self.name(),
                    task_name: &self.task_name,
                    task_id: self.task_id,
                };
                Work::prepare(guard, &origin, name)?
            }
        };
        Ok(work
            .new_version(file_format, notes, ignore_checks)?
            .map(|_| work))
    }
}

/// A label of a subproject together with the tasks carrying it.
#[derive(Debug, Clone)]
pub struct SubprojectCategory {
    pub label: String,
    pub tasks: Vec<Task>,
}
