//! The user session: who is working, their local preferences, and the
//! account administration backed by the commons `users.json`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use indexmap::IndexMap;
use serde_json::{json, Value};
use tik_domain::{
    hash_password, is_protected_user, PermissionLevel, SubTreeNode, UserEntry, GENERIC_USER,
};

use crate::commons::{Commons, EMPTY_STRUCTURE};
use crate::config::Config;
use crate::dcc::{DccHandler, StandaloneDcc};
use crate::entity::Entity;
use crate::guard::{Guard, DATABASE_DIR};
use crate::outcome::{Outcome, Refusal, RefusalKind};
use crate::proceed;
use crate::project::{Project, STRUCTURE_FILE};
use crate::store::RecordStore;

pub const BOOKMARKS_FILE: &str = "bookmarks.json";
pub const RESUME_FILE: &str = "resume.json";
pub const USER_SETTINGS_FILE: &str = "user_settings.json";
pub const RECENT_LIMIT: usize = 10;

const BOOKMARKED: &str = "bookmarkedProjects";
const RECENT_PROJECTS: &str = "recentProjects";
const RECENT_COMMONS: &str = "recentCommons";
const COLOR_CODES: &str = "colorCodes";

pub struct Session {
    guard: Arc<Guard>,
    commons: Commons,
    bookmarks: RecordStore,
    resume: RecordStore,
    user_settings: RecordStore,
    project: Option<Project>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("guard", &self.guard)
            .field("commons", &self.commons.folder())
            .field("project", &self.project.as_ref().map(Project::name))
            .finish_non_exhaustive()
    }
}

impl Session {
    pub fn new(config: &Config) -> Result<Self> {
        Self::with_dcc(config, Arc::new(StandaloneDcc::new()))
    }

    /// Opens the user directory and the commons folder, then restores the
    /// last active user. Without a stored auto-login hash the user starts
    /// unauthenticated.
    pub fn with_dcc(config: &Config, dcc: Arc<dyn DccHandler>) -> Result<Self> {
        let user_dir = config.user_dir();
        std::fs::create_dir_all(user_dir)
            .with_context(|| format!("failed to create {}", user_dir.display()))?;
        let timeout = config.lock_timeout();

        let mut user_settings = RecordStore::open(user_dir.join(USER_SETTINGS_FILE), timeout)?;
        let commons_dir = match config.commons_dir() {
            Some(dir) => dir.clone(),
            None => user_settings
                .get_str("commonFolder")
                .map_or_else(|| user_dir.join("commons"), PathBuf::from),
        };
        user_settings.set("commonFolder", commons_dir.to_string_lossy().into_owned());
        user_settings.add(COLOR_CODES, json!({}), false);
        user_settings.apply(false)?;

        let guard = Guard::with_dcc(config, dcc);
        guard.set_commons_dir(commons_dir.clone());
        let commons = Commons::open(&commons_dir, timeout)?;

        let mut bookmarks = RecordStore::open(user_dir.join(BOOKMARKS_FILE), timeout)?;
        for key in [BOOKMARKED, RECENT_PROJECTS, RECENT_COMMONS] {
            bookmarks.add(key, Value::Array(Vec::new()), false);
        }
        bookmarks.apply(false)?;

        let mut resume = RecordStore::open(user_dir.join(RESUME_FILE), timeout)?;
        resume.add("user", GENERIC_USER, false);
        resume.add("user_dhash", Value::Null, false);
        resume.add("project", Value::Null, false);
        resume.apply(false)?;

        let mut session = Self {
            guard,
            commons,
            bookmarks,
            resume,
            user_settings,
            project: None,
        };
        session.add_recent_commons(&commons_dir.to_string_lossy())?;

        let mut user = session
            .resume
            .get_str("user")
            .unwrap_or(GENERIC_USER)
            .to_string();
        if !session.commons.users()?.contains(&user) {
            tracing::warn!(user = %user, "last user no longer exists, falling back to Generic");
            user = GENERIC_USER.to_string();
        }
        let _ = session.set(&user, None, false, false)?;
        Ok(session)
    }

    pub fn guard(&self) -> &Arc<Guard> {
        &self.guard
    }

    pub fn commons(&mut self) -> &mut Commons {
        &mut self.commons
    }

    pub fn project(&self) -> Option<&Project> {
        self.project.as_ref()
    }

    pub fn project_mut(&mut self) -> Option<&mut Project> {
        self.project.as_mut()
    }

    pub fn user_name(&self) -> String {
        self.guard.user_name()
    }

    pub fn permission_level(&self) -> u8 {
        self.guard.permission_level()
    }

    pub fn is_authenticated(&self) -> bool {
        self.guard.is_authenticated()
    }

    pub fn email(&mut self) -> Result<String> {
        let user = self.user_name();
        Ok(self
            .commons
            .users()?
            .get(&user)
            .map(|entry| entry.email.clone())
            .unwrap_or_default())
    }

    fn auto_login_hash(user: &str, stored_hash: &str) -> String {
        hash_password(&format!("{user}{stored_hash}"))
    }

    /// Makes `user` the active user.
    ///
    /// With a password the user is authenticated against it. Without one the
    /// stored auto-login hash decides. `save_to_db` stores a new hash,
    /// `clear_db` removes it.
    pub fn set(
        &mut self,
        user: &str,
        password: Option<&str>,
        save_to_db: bool,
        clear_db: bool,
    ) -> Result<Outcome<()>> {
        let users = self.commons.users()?;
        let Some(entry) = users.get(user) else {
            return Ok(self.guard.refuse(Refusal::warning(
                RefusalKind::NotFound,
                format!("User {user} cannot be set because it does not exist in commons database"),
            )));
        };
        let stored_hash = Self::auto_login_hash(user, &entry.password_hash);
        let authenticated = match password {
            Some(password) if entry.check_password(password) => true,
            Some(_) => {
                return Ok(self.guard.refuse(Refusal::warning(
                    RefusalKind::WrongPassword,
                    format!("Wrong password provided for user {user}"),
                )))
            }
            None => self.resume.get_str("user_dhash") == Some(stored_hash.as_str()),
        };
        self.guard
            .set_user(user, entry.permission_level, authenticated);
        self.resume.set("user", user);
        if save_to_db {
            self.resume.set("user_dhash", stored_hash);
        }
        if clear_db {
            self.resume.set("user_dhash", Value::Null);
        }
        self.resume.apply(false)?;
        tracing::info!(user, authenticated, "active user set");
        Ok(Outcome::Done(()))
    }

    pub fn check_password(&mut self, user: &str, password: &str) -> Result<bool> {
        Ok(self
            .commons
            .users()?
            .get(user)
            .is_some_and(|entry| entry.check_password(password)))
    }

    pub fn authenticate(&mut self, password: &str) -> Result<Outcome<()>> {
        let user = self.user_name();
        if self.check_password(&user, password)? {
            self.guard.set_authenticated(true);
            return Ok(Outcome::Done(()));
        }
        self.guard.set_authenticated(false);
        Ok(self.guard.refuse(Refusal::warning(
            RefusalKind::WrongPassword,
            format!("Wrong password provided for user {user}"),
        )))
    }

    /// Level 3 and a fresh authentication when the acting user's password
    /// is given. With `reauthenticate` the password is mandatory.
    fn check_admin(
        &mut self,
        active_user_password: Option<&str>,
        reauthenticate: bool,
        action: &str,
    ) -> Result<Outcome<()>> {
        if self.guard.permission_level() < PermissionLevel::ADMIN {
            return Ok(self.guard.refuse(Refusal::warning(
                RefusalKind::NotAuthorized,
                format!("User {} has no permission to {action}", self.user_name()),
            )));
        }
        match active_user_password {
            Some(password) => {
                let _ = self.authenticate(password)?;
            }
            None if reauthenticate => {
                return Ok(self.guard.refuse(Refusal::warning(
                    RefusalKind::NotAuthenticated,
                    format!("The password of the active user is required to {action}"),
                )));
            }
            None => {}
        }
        if !self.guard.is_authenticated() {
            return Ok(self.guard.refuse(Refusal::warning(
                RefusalKind::NotAuthenticated,
                "Active user is not authenticated or the password is wrong",
            )));
        }
        Ok(Outcome::Done(()))
    }

    pub fn create_new_user(
        &mut self,
        name: &str,
        initials: &str,
        password: &str,
        permission_level: i64,
        active_user_password: Option<&str>,
        email: Option<&str>,
    ) -> Result<Outcome<()>> {
        proceed!(self.check_admin(active_user_password, true, "create new users")?);
        let mut users = self.commons.users()?;
        if users.contains(name) {
            return Ok(self.guard.refuse(Refusal::error(
                RefusalKind::Duplicate,
                format!("User {name} already exists. Aborting"),
            )));
        }
        users.insert(
            name,
            UserEntry::new(
                initials,
                password,
                PermissionLevel::clamp(permission_level),
                email.unwrap_or_default(),
            ),
        );
        self.commons.set_users(&users)?;
        tracing::info!(user = name, "user created");
        Ok(Outcome::Done(()))
    }

    pub fn delete_user(&mut self, name: &str, active_user_password: Option<&str>) -> Result<Outcome<()>> {
        proceed!(self.check_admin(active_user_password, false, "delete users")?);
        if is_protected_user(name) {
            return Ok(self.guard.refuse(Refusal::warning(
                RefusalKind::Protected,
                format!("{name} User cannot be deleted"),
            )));
        }
        let mut users = self.commons.users()?;
        if users.remove(name).is_none() {
            return Ok(self.guard.refuse(Refusal::error(
                RefusalKind::NotFound,
                format!("User {name} does not exist. Aborting"),
            )));
        }
        self.commons.set_users(&users)?;
        tracing::info!(user = name, "user deleted");
        Ok(Outcome::Done(()))
    }

    pub fn change_permission_level(
        &mut self,
        name: &str,
        level: i64,
        active_user_password: Option<&str>,
    ) -> Result<Outcome<()>> {
        proceed!(self.check_admin(
            active_user_password,
            false,
            "change permission level of other users"
        )?);
        if is_protected_user(name) {
            return Ok(self.guard.refuse(Refusal::warning(
                RefusalKind::Protected,
                format!("{name} permission levels cannot be altered"),
            )));
        }
        let mut users = self.commons.users()?;
        let Some(entry) = users.get_mut(name) else {
            return Ok(self.guard.refuse(Refusal::error(
                RefusalKind::NotFound,
                format!("User {name} does not exist. Aborting"),
            )));
        };
        entry.permission_level = PermissionLevel::clamp(level);
        self.commons.set_users(&users)?;
        if name == self.user_name() {
            self.guard.set_permission_level(PermissionLevel::clamp(level));
        }
        Ok(Outcome::Done(()))
    }

    /// Changes a password after checking the old one. Defaults to the
    /// active user.
    pub fn change_user_password(
        &mut self,
        old_password: &str,
        new_password: &str,
        user: Option<&str>,
    ) -> Result<Outcome<()>> {
        let user = user.map_or_else(|| self.user_name(), ToOwned::to_owned);
        let mut users = self.commons.users()?;
        let Some(entry) = users.get_mut(&user).filter(|entry| entry.check_password(old_password))
        else {
            return Ok(self.guard.refuse(Refusal::error(
                RefusalKind::WrongPassword,
                format!("Old password for {user} does not match"),
            )));
        };
        entry.password_hash = hash_password(new_password);
        self.commons.set_users(&users)?;
        Ok(Outcome::Done(()))
    }

    fn list(store: &RecordStore, key: &str) -> Vec<String> {
        store
            .get_as::<Option<Vec<String>>>(key)
            .ok()
            .flatten()
            .unwrap_or_default()
    }

    pub fn project_bookmarks(&self) -> Vec<String> {
        Self::list(&self.bookmarks, BOOKMARKED)
    }

    pub fn add_project_bookmark(&mut self, project_path: &str) -> Result<Outcome<()>> {
        let mut bookmarks = self.project_bookmarks();
        if bookmarks.iter().any(|existing| existing == project_path) {
            return Ok(self.guard.refuse(Refusal::warning(
                RefusalKind::Duplicate,
                format!("Project {project_path} already exists in bookmarks"),
            )));
        }
        bookmarks.push(project_path.to_string());
        self.bookmarks.set_serialized(BOOKMARKED, &bookmarks)?;
        self.bookmarks.apply(false)?;
        Ok(Outcome::Done(()))
    }

    pub fn delete_project_bookmark(&mut self, project_path: &str) -> Result<Outcome<()>> {
        let mut bookmarks = self.project_bookmarks();
        let before = bookmarks.len();
        bookmarks.retain(|existing| existing != project_path);
        if bookmarks.len() == before {
            return Ok(self.guard.refuse(Refusal::warning(
                RefusalKind::NotFound,
                format!("Project {project_path} doesn't exist in bookmarks"),
            )));
        }
        self.bookmarks.set_serialized(BOOKMARKED, &bookmarks)?;
        self.bookmarks.apply(false)?;
        Ok(Outcome::Done(()))
    }

    fn push_recent(&mut self, key: &str, path: &str) -> Result<()> {
        let mut recent = Self::list(&self.bookmarks, key);
        recent.retain(|existing| existing != path);
        recent.push(path.to_string());
        if recent.len() > RECENT_LIMIT {
            recent.drain(..recent.len() - RECENT_LIMIT);
        }
        self.bookmarks.set_serialized(key, &recent)?;
        self.bookmarks.apply(false)?;
        Ok(())
    }

    /// Most recent last. Re-adding a project moves it to the end.
    pub fn add_recent_project(&mut self, path: &str) -> Result<()> {
        self.push_recent(RECENT_PROJECTS, path)
    }

    pub fn recent_projects(&self) -> Vec<String> {
        Self::list(&self.bookmarks, RECENT_PROJECTS)
    }

    pub fn add_recent_commons(&mut self, path: &str) -> Result<()> {
        self.push_recent(RECENT_COMMONS, path)
    }

    pub fn recent_commons(&self) -> Vec<String> {
        Self::list(&self.bookmarks, RECENT_COMMONS)
    }

    pub fn last_project(&self) -> Option<PathBuf> {
        self.resume.get_str("project").map(PathBuf::from)
    }

    /// Display colors keyed by work state or category.
    pub fn color_codes(&self) -> IndexMap<String, String> {
        self.user_settings
            .get_as::<Option<IndexMap<String, String>>>(COLOR_CODES)
            .ok()
            .flatten()
            .unwrap_or_default()
    }

    pub fn set_color_code(&mut self, key: &str, color: &str) -> Result<()> {
        let mut codes = self.color_codes();
        codes.insert(key.to_string(), color.to_string());
        self.user_settings.set_serialized(COLOR_CODES, &codes)?;
        self.user_settings.apply(false)?;
        Ok(())
    }

    /// Creates a project from a commons structure template and gives it a
    /// `main` task carrying every defined category. Admin only.
    pub fn create_project(
        &mut self,
        path: &Path,
        structure_template: Option<&str>,
        set_after_creation: bool,
    ) -> Result<Outcome<()>> {
        proceed!(Entity::new(Arc::clone(&self.guard), "", "").check_permissions(PermissionLevel::ADMIN));
        if path.join(DATABASE_DIR).join(STRUCTURE_FILE).exists() {
            return Ok(self.guard.refuse(Refusal::warning(
                RefusalKind::Duplicate,
                format!("Project {} already exists. Aborting", path.display()),
            )));
        }
        let template_name = structure_template.unwrap_or(EMPTY_STRUCTURE);
        let template = match self.commons.structure(template_name)? {
            Some(template) => template,
            None => {
                tracing::warn!(
                    template = template_name,
                    "structure template is not defined, creating an empty project"
                );
                let mut root = SubTreeNode::root("");
                root.mode = Some("root".to_string());
                root
            }
        };

        let previous = self.guard.project_root().ok();
        match self.init_project(path, &template, template_name) {
            Ok(Outcome::Done(project)) if set_after_creation => {
                self.activate(project)?;
                Ok(Outcome::Done(()))
            }
            created => {
                self.restore_project_root(previous)?;
                created.map(|outcome| outcome.map(|_| ()))
            }
        }
    }

    fn init_project(
        &self,
        path: &Path,
        template: &SubTreeNode,
        template_name: &str,
    ) -> Result<Outcome<Project>> {
        let mut project = Project::init(Arc::clone(&self.guard), path, template)?;
        let labels: Vec<String> = self
            .guard
            .category_definitions()
            .labels()
            .map(ToOwned::to_owned)
            .collect();
        let root = project.root_id();
        proceed!(project.create_task(root, "main", Some(labels.as_slice()), None)?);
        tracing::info!(project = %path.display(), template = template_name, "project created");
        Ok(Outcome::Done(project))
    }

    /// Points the guard back at the project that was active before a
    /// creation that did not switch to the new one.
    fn restore_project_root(&mut self, previous: Option<PathBuf>) -> Result<()> {
        match previous {
            Some(previous) => {
                self.project = Some(Project::open(Arc::clone(&self.guard), &previous)?);
            }
            None => {
                self.guard.clear_project_root();
                self.project = None;
            }
        }
        Ok(())
    }

    /// Opens an existing project and remembers it as the last and most
    /// recent one.
    pub fn set_project(&mut self, path: &Path) -> Result<Outcome<()>> {
        if !path.is_dir() {
            return Ok(self.guard.refuse(Refusal::error(
                RefusalKind::NotFound,
                format!("Project path {} does not exist. Aborting", path.display()),
            )));
        }
        let project = Project::open(Arc::clone(&self.guard), path)?;
        self.activate(project)?;
        Ok(Outcome::Done(()))
    }

    /// Reopens the most recent project that still has a structure record.
    /// Returns `false` when none is left.
    pub fn restore_recent_project(&mut self) -> Result<bool> {
        let candidate = self
            .recent_projects()
            .into_iter()
            .rev()
            .map(PathBuf::from)
            .find(|path| path.join(DATABASE_DIR).join(STRUCTURE_FILE).exists());
        let Some(path) = candidate else {
            tracing::debug!("no recent project to restore");
            return Ok(false);
        };
        Ok(self.set_project(&path)?.is_done())
    }

    fn activate(&mut self, project: Project) -> Result<()> {
        let path = project.absolute_path()?.to_string_lossy().into_owned();
        self.add_recent_project(&path)?;
        self.resume.set("project", path);
        self.resume.apply(false)?;
        self.project = Some(project);
        Ok(())
    }
}
