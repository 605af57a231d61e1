use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::Result;

use crate::guard::Guard;
use crate::outcome::{Outcome, Refusal, RefusalKind};

static LAST_ID: AtomicU32 = AtomicU32::new(0);

/// Time based id: low 32 bits of a 100 ns tick count, bumped so ids handed
/// out by one process never repeat or go backwards.
pub(crate) fn generate_id() -> u32 {
    let ticks = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_nanos() / 100)
        .unwrap_or(0);
    #[allow(clippy::cast_possible_truncation)]
    let candidate = ticks as u32;
    let mut last = LAST_ID.load(Ordering::Relaxed);
    loop {
        let next = if candidate > last {
            candidate
        } else {
            last.wrapping_add(1)
        };
        match LAST_ID.compare_exchange_weak(last, next, Ordering::Relaxed, Ordering::Relaxed) {
            Ok(_) => return next,
            Err(actual) => last = actual,
        }
    }
}

/// Identity, location and permission checks shared by every database object.
#[derive(Debug, Clone)]
pub struct Entity {
    guard: Arc<Guard>,
    name: String,
    relative_path: String,
    id: OnceLock<u32>,
}

impl Entity {
    pub fn new(guard: Arc<Guard>, name: impl Into<String>, relative_path: impl Into<String>) -> Self {
        Self {
            guard,
            name: name.into(),
            relative_path: relative_path.into(),
            id: OnceLock::new(),
        }
    }

    /// An entity whose id was already persisted.
    pub fn with_id(
        guard: Arc<Guard>,
        name: impl Into<String>,
        relative_path: impl Into<String>,
        id: u32,
    ) -> Self {
        let entity = Self::new(guard, name, relative_path);
        let _ = entity.id.set(id);
        entity
    }

    pub fn guard(&self) -> &Arc<Guard> {
        &self.guard
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub fn id(&self) -> u32 {
        *self.id.get_or_init(generate_id)
    }

    /// Posix path relative to both roots; the project root is `""`.
    pub fn relative_path(&self) -> &str {
        &self.relative_path
    }

    pub(crate) fn set_relative_path(&mut self, path: impl Into<String>) {
        self.relative_path = path.into();
    }

    pub fn abs_database_path(&self, parts: &[&str]) -> Result<PathBuf> {
        let base = join_parts(self.guard.database_root()?, &self.path_segments());
        Ok(join_parts(base, parts))
    }

    pub fn abs_project_path(&self, parts: &[&str]) -> Result<PathBuf> {
        let base = join_parts(self.guard.project_root()?, &self.path_segments());
        Ok(join_parts(base, parts))
    }

    fn path_segments(&self) -> Vec<&str> {
        self.relative_path.split('/').collect()
    }

    /// Refuses when the active user is below `level` or not authenticated.
    pub fn check_permissions(&self, level: u8) -> Outcome<()> {
        if level == 0 {
            return Outcome::Done(());
        }
        if self.guard.permission_level() < level {
            return self.guard.refuse(Refusal::warning(
                RefusalKind::NotAuthorized,
                "This user does not have permissions for this action",
            ));
        }
        if !self.guard.is_authenticated() {
            return self.guard.refuse(Refusal::warning(
                RefusalKind::NotAuthenticated,
                "User is not authenticated",
            ));
        }
        Outcome::Done(())
    }
}

fn join_parts(mut base: PathBuf, parts: &[&str]) -> PathBuf {
    for part in parts.iter().filter(|part| !part.is_empty()) {
        base.push(part);
    }
    base
}
