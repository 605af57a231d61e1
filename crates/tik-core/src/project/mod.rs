//! The project: its subproject tree plus the task, work and publish records
//! below it.

mod tree;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use tik_domain::{
    CategoryDefinitions, PermissionLevel, SubTreeNode, WorkVersion, TASK_EXTENSION,
    WORK_EXTENSION,
};

pub use tree::{Subproject, SubprojectProps, SubprojectTree};

use crate::category::SubprojectCategory;
use crate::commons::{CATEGORY_DEFINITIONS_FILE, PROJECT_SETTINGS_FILE};
use crate::entity::{generate_id, Entity};
use crate::fs::join_posix;
use crate::guard::{Guard, DATABASE_DIR};
use crate::outcome::{Outcome, Refusal, RefusalKind, UsageError};
use crate::proceed;
use crate::store::{RecordData, RecordStore};
use crate::task::Task;
use crate::work::Work;

pub const STRUCTURE_FILE: &str = "project_structure.json";

#[derive(Debug)]
pub struct Project {
    entity: Entity,
    tree: SubprojectTree,
    store: RecordStore,
}

impl Project {
    /// Opens the project at `root` and makes it the active project of the
    /// guard. A folder without a structure record starts as a bare root.
    pub fn open(guard: Arc<Guard>, root: &Path) -> Result<Self> {
        if !root.is_dir() {
            return Err(UsageError::InvalidArgument(format!(
                "project folder {} does not exist",
                root.display()
            ))
            .into());
        }
        let name = folder_name(root);
        guard.set_project_root(root.to_path_buf());
        load_project_settings(&guard)?;

        let structure = guard.database_root()?.join(STRUCTURE_FILE);
        let store = RecordStore::open(&structure, guard.lock_timeout())?;
        let project = if store.data().is_empty() {
            let mut project = Self {
                entity: Entity::new(guard, &name, ""),
                tree: SubprojectTree::new(&name),
                store,
            };
            project.save_structure()?;
            project
        } else {
            let node: SubTreeNode = store.data_as()?;
            let tree = SubprojectTree::from_sub_tree(&node).with_context(|| {
                format!("failed to load the project structure {}", structure.display())
            })?;
            Self {
                entity: Entity::with_id(guard, &name, "", node.id),
                tree,
                store,
            }
        };
        project.create_folders(project.tree.root_id())?;
        tracing::info!(project = %root.display(), subprojects = project.tree.len(), "project opened");
        Ok(project)
    }

    /// Creates the project folder and writes a structure built from
    /// `template`. The root node is always named after the folder.
    pub(crate) fn init(guard: Arc<Guard>, root: &Path, template: &SubTreeNode) -> Result<Self> {
        fs::create_dir_all(root.join(DATABASE_DIR))
            .with_context(|| format!("failed to create {}", root.display()))?;
        let mut node = template.clone();
        node.name = folder_name(root);
        assign_fresh_ids(&mut node);
        let tree = SubprojectTree::from_sub_tree(&node)?;
        let structure = root.join(DATABASE_DIR).join(STRUCTURE_FILE);
        let mut store = RecordStore::open(&structure, guard.lock_timeout())?;
        store.set_serialized_data(&tree.to_sub_tree())?;
        store.apply(true)?;
        Self::open(guard, root)
    }

    pub fn guard(&self) -> &Arc<Guard> {
        self.entity.guard()
    }

    pub fn name(&self) -> &str {
        self.entity.name()
    }

    pub fn absolute_path(&self) -> Result<PathBuf> {
        self.guard().project_root()
    }

    pub fn database_path(&self) -> Result<PathBuf> {
        self.guard().database_root()
    }

    pub fn tree(&self) -> &SubprojectTree {
        &self.tree
    }

    pub fn root_id(&self) -> u32 {
        self.tree.root_id()
    }

    pub fn find_sub_by_id(&self, id: u32) -> Option<&Subproject> {
        self.tree.find_sub_by_id(id)
    }

    pub fn find_sub_by_path(&self, path: &str) -> Option<&Subproject> {
        self.tree.find_sub_by_path(path)
    }

    pub fn find_subs_by_wildcard(&self, pattern: &str) -> Vec<&Subproject> {
        self.tree.find_subs_by_wildcard(pattern)
    }

    /// Runs `edit` on a copy of the tree and adopts the copy only once the
    /// structure record is written, so a failed save leaves nothing behind.
    fn commit_tree<T>(
        &mut self,
        edit: impl FnOnce(&mut SubprojectTree) -> Result<Outcome<T>>,
    ) -> Result<Outcome<T>> {
        let mut candidate = self.tree.clone();
        let outcome = edit(&mut candidate)?;
        let value = proceed!(self.logged(outcome));
        self.store.set_serialized_data(&candidate.to_sub_tree())?;
        if let Err(err) = self.store.apply(false) {
            self.store.reset();
            return Err(err);
        }
        self.tree = candidate;
        Ok(Outcome::Done(value))
    }

    /// Persists the whole tree to `project_structure.json`.
    pub fn save_structure(&mut self) -> Result<()> {
        self.store.set_serialized_data(&self.tree.to_sub_tree())?;
        self.store.apply(false)?;
        Ok(())
    }

    /// Picks up structure edits made by another process.
    pub fn refresh(&mut self) -> Result<bool> {
        if !self.store.is_modified() {
            return Ok(false);
        }
        self.store.reload()?;
        let node: SubTreeNode = self.store.data_as()?;
        self.tree.set_sub_tree(&node)?;
        tracing::debug!(project = self.name(), "structure reloaded");
        Ok(true)
    }

    fn sub(&self, id: u32) -> Result<&Subproject> {
        self.tree
            .find_sub_by_id(id)
            .ok_or_else(|| UsageError::InvalidArgument(format!("unknown subproject id {id}")).into())
    }

    fn sub_id_by_path(&self, path: &str) -> Result<u32> {
        self.tree
            .find_sub_by_path(path)
            .map(|sub| sub.id)
            .ok_or_else(|| {
                UsageError::InvalidArgument(format!("unknown subproject path '{path}'")).into()
            })
    }

    fn logged<T>(&self, outcome: Outcome<T>) -> Outcome<T> {
        match outcome {
            Outcome::Refused(refusal) => self.guard().refuse(refusal),
            done @ Outcome::Done(_) => done,
        }
    }

    pub fn create_sub_project(
        &mut self,
        parent: u32,
        name: &str,
        props: SubprojectProps,
    ) -> Result<Outcome<u32>> {
        proceed!(self.entity.check_permissions(PermissionLevel::SUPERVISOR));
        let id = proceed!(self.commit_tree(|tree| tree.add_sub_project(parent, name, props, None))?);
        self.create_folders(id)?;
        tracing::info!(subproject = name, id, "subproject created");
        Ok(Outcome::Done(id))
    }

    pub fn create_sub_project_path(
        &mut self,
        parent_path: &str,
        name: &str,
        props: SubprojectProps,
    ) -> Result<Outcome<u32>> {
        let parent = self.sub_id_by_path(parent_path)?;
        self.create_sub_project(parent, name, props)
    }

    /// Renames a subproject and/or edits its properties. A rename moves its
    /// folders in both roots.
    pub fn edit_sub_project(
        &mut self,
        id: u32,
        name: Option<&str>,
        props: SubprojectProps,
    ) -> Result<Outcome<()>> {
        proceed!(self.entity.check_permissions(PermissionLevel::SUPERVISOR));
        let old_path = self.sub(id)?.path.clone();
        proceed!(self.commit_tree(|tree| tree.edit_sub_project(id, name, props))?);
        let new_path = self.sub(id)?.path.clone();
        if new_path != old_path {
            let project = self.absolute_path()?;
            let database = self.database_path()?;
            for root in [database, project] {
                let from = join_posix(&root, &old_path);
                if from.exists() {
                    crate::fs::move_path(&from, &join_posix(&root, &new_path))?;
                }
            }
        }
        Ok(Outcome::Done(()))
    }

    /// True when the subproject or anything below it holds a task.
    fn subtree_has_tasks(&self, id: u32) -> Result<bool> {
        for sub in self.tree.walk(id) {
            if !self.scan_tasks(sub.id)?.is_empty() {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Detaches the subproject, saves the structure, then deletes its
    /// folders in both roots. Not reversible.
    pub fn delete_sub_project(&mut self, id: u32) -> Result<Outcome<()>> {
        let sub = self.sub(id)?;
        let level = if sub.has_children() || self.subtree_has_tasks(id)? {
            PermissionLevel::ADMIN
        } else {
            PermissionLevel::SUPERVISOR
        };
        proceed!(self.entity.check_permissions(level));
        let removed =
            proceed!(self.commit_tree(|tree| tree.remove_sub_project(id).map(Outcome::Done))?);
        let project = self.absolute_path()?;
        let database = self.database_path()?;
        for root in [database, project] {
            crate::fs::remove_all_writable(&join_posix(&root, &removed.path))?;
        }
        tracing::info!(subproject = %removed.path, "subproject deleted");
        Ok(Outcome::Done(()))
    }

    /// Makes sure every subproject from `id` down has its folder in both
    /// roots.
    pub fn create_folders(&self, id: u32) -> Result<()> {
        let roots = [self.database_path()?, self.absolute_path()?];
        for sub in self.tree.walk(id) {
            for root in &roots {
                let folder = join_posix(root, &sub.path);
                fs::create_dir_all(&folder)
                    .with_context(|| format!("failed to create {}", folder.display()))?;
            }
        }
        Ok(())
    }

    /// Creates a task under the subproject. Categories default to the
    /// subproject's list and the type to its mode.
    pub fn create_task(
        &mut self,
        sub_id: u32,
        name: &str,
        categories: Option<&[String]>,
        task_type: Option<&str>,
    ) -> Result<Outcome<Task>> {
        proceed!(self.entity.check_permissions(PermissionLevel::SUPERVISOR));
        let guard = Arc::clone(self.guard());
        let sub = self.sub(sub_id)?;
        if let Err(err) = tik_domain::validate_name(name) {
            return Ok(guard.refuse(Refusal::warning(RefusalKind::InvalidName, err.to_string())));
        }
        if Task::record_path(&guard, &sub.path, name)?.exists() {
            return Ok(guard.refuse(Refusal::warning(
                RefusalKind::Duplicate,
                format!("There is a task under this sub-project with the same name => {name}"),
            )));
        }
        let categories = categories.map_or_else(|| sub.categories.clone(), <[String]>::to_vec);
        let task_type = task_type.or(sub.mode.as_deref());
        Task::create(guard, &sub.path, name, &categories, task_type).map(Outcome::Done)
    }

    pub fn add_task(
        &mut self,
        sub_path: &str,
        name: &str,
        categories: Option<&[String]>,
        task_type: Option<&str>,
    ) -> Result<Outcome<Task>> {
        let sub_id = self.sub_id_by_path(sub_path)?;
        self.create_task(sub_id, name, categories, task_type)
    }

    /// Tasks of one subproject, read from its `*.task` records.
    pub fn scan_tasks(&self, sub_id: u32) -> Result<Vec<Task>> {
        let folder = join_posix(&self.database_path()?, &self.sub(sub_id)?.path);
        let entries = match fs::read_dir(&folder) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                return Err(err).with_context(|| format!("failed to read {}", folder.display()))
            }
        };
        let mut paths: Vec<PathBuf> = entries
            .flatten()
            .map(|entry| entry.path())
            .filter(|path| path.extension().and_then(|ext| ext.to_str()) == Some(TASK_EXTENSION))
            .collect();
        paths.sort();
        paths
            .iter()
            .map(|path| Task::load(Arc::clone(self.guard()), path))
            .collect()
    }

    pub fn find_task(&self, sub_id: u32, name: &str) -> Result<Option<Task>> {
        let path = Task::record_path(self.guard(), &self.sub(sub_id)?.path, name)?;
        if !path.exists() {
            return Ok(None);
        }
        Task::load(Arc::clone(self.guard()), &path).map(Some)
    }

    /// Searches every subproject for the task with this reference id.
    pub fn find_task_by_id(&self, task_id: u32) -> Result<Option<Task>> {
        for sub in self.tree.walk(self.tree.root_id()) {
            if let Some(task) = self
                .scan_tasks(sub.id)?
                .into_iter()
                .find(|task| task.id() == task_id)
            {
                return Ok(Some(task));
            }
        }
        Ok(None)
    }

    /// Level 2 for an empty task, level 3 when it holds works.
    pub fn delete_task(&mut self, sub_id: u32, name: &str) -> Result<Outcome<()>> {
        let Some(task) = self.find_task(sub_id, name)? else {
            return Ok(self.guard().refuse(Refusal::warning(
                RefusalKind::NotFound,
                format!("There is no task with the name => {name}"),
            )));
        };
        let empty = task.is_empty()?;
        let level = if empty {
            PermissionLevel::SUPERVISOR
        } else {
            PermissionLevel::ADMIN
        };
        proceed!(self.entity.check_permissions(level));
        task.remove(empty)?;
        tracing::info!(task = name, "task deleted");
        Ok(Outcome::Done(()))
    }

    /// The subproject's labels, each with the tasks that carry it.
    pub fn subproject_categories(&self, sub_id: u32) -> Result<Vec<SubprojectCategory>> {
        let sub = self.sub(sub_id)?;
        let tasks = self.scan_tasks(sub_id)?;
        Ok(sub
            .categories
            .iter()
            .map(|label| SubprojectCategory {
                label: label.clone(),
                tasks: tasks
                    .iter()
                    .filter(|task| task.category_labels().contains(label))
                    .cloned()
                    .collect(),
            })
            .collect())
    }

    /// The work and version whose scene is `file_path`, if any.
    pub fn find_work_by_absolute_path(&self, file_path: &Path) -> Result<Option<(Work, WorkVersion)>> {
        let root = self.absolute_path()?;
        let (Some(work_folder), Some(file_name)) = (file_path.parent(), file_path.file_name())
        else {
            return Ok(None);
        };
        let Some(category_folder) = work_folder.parent() else {
            return Ok(None);
        };
        let Ok(category_path) = crate::fs::relative_posix(&root, category_folder) else {
            tracing::debug!(path = %file_path.display(), "scene is outside of the project");
            return Ok(None);
        };
        let scene_path = format!(
            "{}/{}",
            work_folder
                .file_name()
                .map(|name| name.to_string_lossy())
                .unwrap_or_default(),
            file_name.to_string_lossy()
        );
        let database_folder = join_posix(&self.database_path()?, &category_path);
        let pattern = format!(
            "{}/*.{WORK_EXTENSION}",
            glob::Pattern::escape(&database_folder.to_string_lossy())
        );
        for record in glob::glob(&pattern).context("invalid work search pattern")? {
            let record = record.context("failed to read a work record path")?;
            let work = Work::load(Arc::clone(self.guard()), &record)?;
            if let Some(version) = work
                .versions()?
                .into_iter()
                .find(|version| version.scene_path == scene_path)
            {
                return Ok(Some((work, version)));
            }
        }
        Ok(None)
    }

    /// Resolves the scene open in the host application.
    pub fn get_current_work(&self) -> Result<Option<(Work, WorkVersion)>> {
        match self.guard().dcc_handler().scene_file() {
            Some(scene) => self.find_work_by_absolute_path(&scene),
            None => Ok(None),
        }
    }
}

/// Templates are reused for many projects, so every node gets a new id.
fn assign_fresh_ids(node: &mut SubTreeNode) {
    node.id = generate_id();
    for sub in &mut node.subs {
        assign_fresh_ids(sub);
    }
}

fn folder_name(root: &Path) -> String {
    root.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Loads the per-project category definitions and settings into the guard.
/// Missing project copies are seeded from the commons folder.
fn load_project_settings(guard: &Guard) -> Result<()> {
    let database = guard.database_root()?;
    let commons = guard.commons_dir();
    let open = |file: &str| -> Result<RecordStore> {
        let mut store = RecordStore::open(database.join(file), guard.lock_timeout())?;
        if let Some(commons) = &commons {
            store.set_fallback(commons.join(file))?;
        }
        Ok(store)
    };
    let definitions: CategoryDefinitions = open(CATEGORY_DEFINITIONS_FILE)?.data_as()?;
    let settings: RecordData = open(PROJECT_SETTINGS_FILE)?.data().clone();
    guard.set_category_definitions(definitions);
    guard.set_project_settings(settings);
    Ok(())
}
