use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use anyhow::Result;
use tik_domain::{CategoryDefinitions, PermissionLevel};

use crate::config::Config;
use crate::dcc::{DccHandler, StandaloneDcc};
use crate::outcome::{Outcome, Refusal, UsageError};
use crate::store::RecordData;

pub const DATABASE_DIR: &str = "tikDatabase";

struct GuardState {
    project_root: Option<PathBuf>,
    commons_dir: Option<PathBuf>,
    user: Option<String>,
    permission_level: u8,
    authenticated: bool,
    dcc_handler: Arc<dyn DccHandler>,
    category_definitions: CategoryDefinitions,
    project_settings: RecordData,
    lock_timeout: Duration,
    workstation: String,
}

/// Session-wide context shared by every entity in the process.
///
/// Entities hold an `Arc<Guard>` and read through it, so switching the
/// project, user or host application is visible everywhere at once.
pub struct Guard {
    state: RwLock<GuardState>,
    last_message: Mutex<Option<Refusal>>,
}

impl std::fmt::Debug for Guard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.read();
        f.debug_struct("Guard")
            .field("project_root", &state.project_root)
            .field("user", &state.user)
            .field("permission_level", &state.permission_level)
            .field("authenticated", &state.authenticated)
            .field("dcc", &state.dcc_handler.name())
            .finish_non_exhaustive()
    }
}

impl Guard {
    #[must_use]
    pub fn new(config: &Config) -> Arc<Self> {
        Self::with_dcc(config, Arc::new(StandaloneDcc::new()))
    }

    #[must_use]
    pub fn with_dcc(config: &Config, dcc_handler: Arc<dyn DccHandler>) -> Arc<Self> {
        Arc::new(Self {
            state: RwLock::new(GuardState {
                project_root: None,
                commons_dir: config.commons_dir().cloned(),
                user: None,
                permission_level: PermissionLevel::VIEWER,
                authenticated: false,
                dcc_handler,
                category_definitions: CategoryDefinitions::default(),
                project_settings: RecordData::new(),
                lock_timeout: config.lock_timeout(),
                workstation: config.workstation().to_string(),
            }),
            last_message: Mutex::new(None),
        })
    }

    fn read(&self) -> RwLockReadGuard<'_, GuardState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, GuardState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Root of the active project content tree.
    pub fn project_root(&self) -> Result<PathBuf> {
        self.read().project_root.clone().ok_or_else(|| {
            UsageError::InvalidArgument("no project is set".to_string()).into()
        })
    }

    pub fn database_root(&self) -> Result<PathBuf> {
        Ok(self.project_root()?.join(DATABASE_DIR))
    }

    pub(crate) fn set_project_root(&self, root: PathBuf) {
        self.write().project_root = Some(root);
    }

    pub(crate) fn clear_project_root(&self) {
        self.write().project_root = None;
    }

    pub fn commons_dir(&self) -> Option<PathBuf> {
        self.read().commons_dir.clone()
    }

    pub(crate) fn set_commons_dir(&self, dir: PathBuf) {
        self.write().commons_dir = Some(dir);
    }

    pub fn user(&self) -> Option<String> {
        self.read().user.clone()
    }

    /// Name recorded as creator on new records.
    pub fn user_name(&self) -> String {
        self.read().user.clone().unwrap_or_default()
    }

    pub fn permission_level(&self) -> u8 {
        self.read().permission_level
    }

    pub fn is_authenticated(&self) -> bool {
        self.read().authenticated
    }

    pub(crate) fn set_user(&self, user: &str, permission_level: u8, authenticated: bool) {
        let mut state = self.write();
        state.user = Some(user.to_string());
        state.permission_level = permission_level;
        state.authenticated = authenticated;
    }

    pub(crate) fn set_authenticated(&self, authenticated: bool) {
        self.write().authenticated = authenticated;
    }

    pub(crate) fn set_permission_level(&self, level: u8) {
        self.write().permission_level = level;
    }

    pub fn dcc_handler(&self) -> Arc<dyn DccHandler> {
        Arc::clone(&self.read().dcc_handler)
    }

    pub fn dcc(&self) -> String {
        self.read().dcc_handler.name().to_string()
    }

    pub fn set_dcc_handler(&self, handler: Arc<dyn DccHandler>) {
        self.write().dcc_handler = handler;
    }

    pub fn category_definitions(&self) -> CategoryDefinitions {
        self.read().category_definitions.clone()
    }

    pub(crate) fn set_category_definitions(&self, definitions: CategoryDefinitions) {
        self.write().category_definitions = definitions;
    }

    pub fn project_settings(&self) -> RecordData {
        self.read().project_settings.clone()
    }

    pub(crate) fn set_project_settings(&self, settings: RecordData) {
        self.write().project_settings = settings;
    }

    pub fn lock_timeout(&self) -> Duration {
        self.read().lock_timeout
    }

    pub fn workstation(&self) -> String {
        self.read().workstation.clone()
    }

    /// Logs a refusal, remembers it as the last message and hands it back
    /// as an [`Outcome`].
    pub fn refuse<T>(&self, refusal: Refusal) -> Outcome<T> {
        match refusal.severity {
            tik_domain::Severity::Warning => {
                tracing::warn!(kind = ?refusal.kind, "{}", refusal.message);
            }
            tik_domain::Severity::Error => {
                tracing::error!(kind = ?refusal.kind, "{}", refusal.message);
            }
        }
        *self
            .last_message
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(refusal.clone());
        Outcome::Refused(refusal)
    }

    /// The most recent refusal, for UI layers that show one message at a time.
    pub fn last_message(&self) -> Option<Refusal> {
        self.last_message
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn clear_last_message(&self) {
        *self
            .last_message
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = None;
    }
}
