//! The studio-wide settings folder shared by every user.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use indexmap::IndexMap;
use serde_json::{json, Value};
use tik_domain::{CategoryDefinitions, SubTreeNode, Users};

use crate::store::{RecordData, RecordStore};

pub const USERS_FILE: &str = "users.json";
pub const CATEGORY_DEFINITIONS_FILE: &str = "category_definitions.json";
pub const PROJECT_SETTINGS_FILE: &str = "project_settings.json";
pub const STRUCTURES_FILE: &str = "structures.json";

pub const EMPTY_STRUCTURE: &str = "empty";

/// Handles to the commons records. Missing files are seeded with studio
/// defaults when the folder is opened.
#[derive(Debug)]
pub struct Commons {
    folder: PathBuf,
    users: RecordStore,
    structures: RecordStore,
}

impl Commons {
    pub fn open(folder: &Path, lock_timeout: Duration) -> Result<Self> {
        std::fs::create_dir_all(folder)
            .with_context(|| format!("failed to create {}", folder.display()))?;
        seed(folder, USERS_FILE, &Users::defaults(), lock_timeout)?;
        seed(
            folder,
            CATEGORY_DEFINITIONS_FILE,
            &CategoryDefinitions::studio_defaults(),
            lock_timeout,
        )?;
        seed(folder, PROJECT_SETTINGS_FILE, &default_project_settings(), lock_timeout)?;
        seed(folder, STRUCTURES_FILE, &default_structures(), lock_timeout)?;
        Ok(Self {
            folder: folder.to_path_buf(),
            users: RecordStore::open(folder.join(USERS_FILE), lock_timeout)?,
            structures: RecordStore::open(folder.join(STRUCTURES_FILE), lock_timeout)?,
        })
    }

    pub fn folder(&self) -> &Path {
        &self.folder
    }

    /// Re-reads the users record when another session changed it.
    fn refresh_users(&mut self) -> Result<()> {
        if self.users.is_modified() {
            self.users.reload()?;
        }
        Ok(())
    }

    pub fn users(&mut self) -> Result<Users> {
        self.refresh_users()?;
        self.users.data_as()
    }

    pub fn set_users(&mut self, users: &Users) -> Result<()> {
        self.users.set_serialized_data(users)?;
        self.users.apply(false)?;
        Ok(())
    }

    pub fn permission_level(&mut self, user: &str) -> Result<u8> {
        Ok(self
            .users()?
            .get(user)
            .map_or(0, |entry| entry.permission_level))
    }

    /// Names of the structure templates offered for new projects.
    pub fn structure_names(&self) -> Vec<&str> {
        self.structures.data().keys().map(String::as_str).collect()
    }

    pub fn structure(&self, name: &str) -> Result<Option<SubTreeNode>> {
        self.structures
            .get(name)
            .map(|value| {
                serde_json::from_value(value.clone())
                    .with_context(|| format!("structure template '{name}' is malformed"))
            })
            .transpose()
    }
}

fn seed<T: serde::Serialize>(
    folder: &Path,
    file: &str,
    defaults: &T,
    lock_timeout: Duration,
) -> Result<()> {
    let path = folder.join(file);
    if path.exists() {
        return Ok(());
    }
    let mut store = RecordStore::open(&path, lock_timeout)?;
    store.set_serialized_data(defaults)?;
    store.apply(true)?;
    tracing::info!(path = %path.display(), "seeded commons record");
    Ok(())
}

fn default_project_settings() -> RecordData {
    let mut settings = IndexMap::new();
    settings.insert("resolution".to_string(), json!([1920, 1080]));
    settings.insert("fps".to_string(), json!(25));
    settings.insert("preview_settings".to_string(), json!({}));
    settings
}

fn default_structures() -> IndexMap<String, Value> {
    let mut structures = IndexMap::new();
    structures.insert(
        EMPTY_STRUCTURE.to_string(),
        json!({"name": "", "path": "", "mode": "root", "subs": []}),
    );
    structures.insert(
        "asset_shot".to_string(),
        json!({
            "name": "",
            "path": "",
            "mode": "root",
            "subs": [
                {"name": "Assets", "mode": "asset", "categories": ["Model", "Rig", "LookDev"], "subs": []},
                {"name": "Shots", "mode": "shot", "categories": ["Layout", "Animation", "Lighting"], "subs": []}
            ]
        }),
    );
    structures
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_LOCK_TIMEOUT;

    #[test]
    fn seeds_missing_files_and_keeps_existing_ones() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join(PROJECT_SETTINGS_FILE), b"{\"fps\": 30}")
            .expect("write");
        let mut commons = Commons::open(dir.path(), DEFAULT_LOCK_TIMEOUT).expect("commons");

        for file in [USERS_FILE, CATEGORY_DEFINITIONS_FILE, STRUCTURES_FILE] {
            assert!(dir.path().join(file).exists(), "{file}");
        }
        let settings = std::fs::read_to_string(dir.path().join(PROJECT_SETTINGS_FILE))
            .expect("read");
        assert!(settings.contains("30"));

        assert_eq!(commons.permission_level("Admin").expect("level"), 3);
        assert_eq!(commons.permission_level("Nobody").expect("level"), 0);
        assert!(commons.structure_names().contains(&EMPTY_STRUCTURE));
        let template = commons
            .structure("asset_shot")
            .expect("read")
            .expect("template");
        assert_eq!(template.subs.len(), 2);
        assert!(commons.structure("missing").expect("read").is_none());
    }
}
