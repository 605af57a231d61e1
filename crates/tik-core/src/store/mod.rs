//! JSON records on shared storage.
//!
//! Every read and write of a record goes through the `<record>.lock` side
//! file so that concurrent processes never observe a half written record.

mod lock;

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use anyhow::{Context, Result};
use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tempfile::NamedTempFile;

pub(crate) use lock::RecordLock;

pub type RecordData = IndexMap<String, Value>;

pub const RECORD_EXTENSIONS: &[&str] = &["json", "task", "work", "pub"];

#[derive(Debug, thiserror::Error)]
pub enum RecordError {
    #[error("record {path} has unsupported extension '.{extension}' (expected json, task, work or pub)")]
    UnsupportedExtension { path: PathBuf, extension: String },
    #[error("record {path} has no file extension")]
    MissingExtension { path: PathBuf },
    #[error("record {path} is locked by another process (waited {waited:?})")]
    Busy { path: PathBuf, waited: Duration },
    #[error("record {path} is corrupt: {reason}")]
    Corrupt { path: PathBuf, reason: String },
}

impl RecordError {
    /// True for contention that may clear up if the caller retries.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Busy { .. })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Stamp {
    modified: Option<SystemTime>,
    len: u64,
}

impl Stamp {
    fn of(path: &Path) -> Option<Self> {
        let meta = fs::metadata(path).ok()?;
        Some(Self {
            modified: meta.modified().ok(),
            len: meta.len(),
        })
    }
}

/// A single persisted record with change tracking.
///
/// `original` mirrors what is on disk as of the last load or apply, and
/// `current` holds in-memory edits until [`RecordStore::apply`] writes them.
#[derive(Debug, Clone)]
pub struct RecordStore {
    path: PathBuf,
    original: RecordData,
    current: RecordData,
    stamp: Option<Stamp>,
    fallback: Option<PathBuf>,
    lock_timeout: Duration,
}

impl RecordStore {
    /// Binds a store to `path`, loading it when the file exists.
    pub fn open(path: impl Into<PathBuf>, lock_timeout: Duration) -> Result<Self> {
        let mut store = Self {
            path: PathBuf::new(),
            original: RecordData::new(),
            current: RecordData::new(),
            stamp: None,
            fallback: None,
            lock_timeout,
        };
        store.set_file(path)?;
        Ok(store)
    }

    /// Rebinds the store to another file and loads it.
    pub fn set_file(&mut self, path: impl Into<PathBuf>) -> Result<()> {
        let path = path.into();
        check_extension(&path)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        self.path = path;
        self.original.clear();
        self.current.clear();
        self.stamp = None;
        if self.path.exists() {
            self.reload()?;
        }
        Ok(())
    }

    /// Seeds a missing primary record from `fallback` and persists the copy.
    pub fn set_fallback(&mut self, fallback: impl Into<PathBuf>) -> Result<()> {
        let fallback = fallback.into();
        check_extension(&fallback)?;
        if !self.path.exists() && fallback.exists() {
            let data = read_record(&fallback, self.lock_timeout)?;
            tracing::debug!(
                path = %self.path.display(),
                fallback = %fallback.display(),
                "seeding record from fallback"
            );
            self.current = data;
            self.apply(true)?;
        }
        self.fallback = Some(fallback);
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn fallback(&self) -> Option<&Path> {
        self.fallback.as_deref()
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    pub fn reload(&mut self) -> Result<()> {
        let data = read_record(&self.path, self.lock_timeout)?;
        self.original = data.clone();
        self.current = data;
        self.stamp = Stamp::of(&self.path);
        Ok(())
    }

    /// True when another writer touched the file since it was last stamped.
    pub fn is_modified(&self) -> bool {
        Stamp::of(&self.path) != self.stamp
    }

    pub fn is_changed(&self) -> bool {
        self.current != self.original
    }

    /// Persists pending edits. Returns whether anything was written.
    pub fn apply(&mut self, force: bool) -> Result<bool> {
        if !force && !self.is_changed() {
            return Ok(false);
        }
        let _lock = RecordLock::acquire(&self.path, self.lock_timeout)?;
        write_atomic(&self.path, &self.current)?;
        self.original = self.current.clone();
        self.stamp = Stamp::of(&self.path);
        tracing::trace!(path = %self.path.display(), "record written");
        Ok(true)
    }

    /// Writes `current` only if no file exists yet, under the record lock.
    ///
    /// Returns `false` without touching anything when the file is already
    /// present.
    pub fn create_new(&mut self) -> Result<bool> {
        let _lock = RecordLock::acquire(&self.path, self.lock_timeout)?;
        let mut file = match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.path)
        {
            Ok(file) => file,
            Err(err) if err.kind() == ErrorKind::AlreadyExists => return Ok(false),
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("failed to create {}", self.path.display()))
            }
        };
        let bytes = serde_json::to_vec_pretty(&self.current)?;
        file.write_all(&bytes)
            .and_then(|()| file.sync_all())
            .with_context(|| format!("failed to write {}", self.path.display()))?;
        drop(file);
        self.original = self.current.clone();
        self.stamp = Stamp::of(&self.path);
        Ok(true)
    }

    /// Removes the record file. The `.lock` side file stays behind: another
    /// process may already hold an open handle on it.
    pub fn delete(&mut self) -> Result<()> {
        {
            let _lock = RecordLock::acquire(&self.path, self.lock_timeout)?;
            match fs::remove_file(&self.path) {
                Ok(()) => {}
                Err(err) if err.kind() == ErrorKind::NotFound => {}
                Err(err) => {
                    return Err(err)
                        .with_context(|| format!("failed to remove {}", self.path.display()))
                }
            }
        }
        self.original.clear();
        self.current.clear();
        self.stamp = None;
        Ok(())
    }

    /// Soft-deletes the record file into `root/__purgatory`.
    pub(crate) fn move_to_purgatory(&mut self, root: &Path) -> Result<Option<PathBuf>> {
        let moved = {
            let _lock = RecordLock::acquire(&self.path, self.lock_timeout)?;
            crate::fs::move_to_purgatory(root, &self.path)?
        };
        self.original.clear();
        self.stamp = None;
        Ok(moved)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.current.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.current.get(key).and_then(Value::as_str)
    }

    /// Typed read of a key; missing keys decode from `null`.
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Result<T> {
        let value = self.current.get(key).cloned().unwrap_or(Value::Null);
        serde_json::from_value(value).map_err(|err| {
            RecordError::Corrupt {
                path: self.path.clone(),
                reason: format!("key '{key}': {err}"),
            }
            .into()
        })
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.current.insert(key.into(), value.into());
    }

    pub fn set_serialized<T: Serialize>(&mut self, key: impl Into<String>, value: &T) -> Result<()> {
        let value = serde_json::to_value(value)?;
        self.current.insert(key.into(), value);
        Ok(())
    }

    /// Inserts `value` unless the key exists and `force` is false.
    pub fn add(&mut self, key: impl Into<String>, value: impl Into<Value>, force: bool) -> bool {
        let key = key.into();
        if !force && self.current.contains_key(&key) {
            return false;
        }
        self.current.insert(key, value.into());
        true
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.current.shift_remove(key)
    }

    /// Merges `data` into the record. Unknown keys are skipped unless
    /// `add_missing_keys` is set.
    pub fn update(&mut self, data: RecordData, add_missing_keys: bool) {
        for (key, value) in data {
            if add_missing_keys || self.current.contains_key(&key) {
                self.current.insert(key, value);
            }
        }
    }

    /// Drops in-memory edits.
    pub fn reset(&mut self) {
        self.current = self.original.clone();
    }

    pub fn data(&self) -> &RecordData {
        &self.current
    }

    pub fn set_data(&mut self, data: RecordData) {
        self.current = data;
    }

    /// Typed read of the whole record.
    pub fn data_as<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::to_value(&self.current)
            .and_then(serde_json::from_value)
            .map_err(|err| {
                RecordError::Corrupt {
                    path: self.path.clone(),
                    reason: err.to_string(),
                }
                .into()
            })
    }

    /// Replaces the record with the fields of `value`, which must serialize
    /// to a JSON object.
    pub fn set_serialized_data<T: Serialize>(&mut self, value: &T) -> Result<()> {
        self.current = serde_json::from_value(serde_json::to_value(value)?)?;
        Ok(())
    }
}

fn check_extension(path: &Path) -> Result<()> {
    let Some(extension) = path.extension().and_then(|ext| ext.to_str()) else {
        return Err(RecordError::MissingExtension {
            path: path.to_path_buf(),
        }
        .into());
    };
    if RECORD_EXTENSIONS.contains(&extension) {
        Ok(())
    } else {
        Err(RecordError::UnsupportedExtension {
            path: path.to_path_buf(),
            extension: extension.to_string(),
        }
        .into())
    }
}

fn read_record(path: &Path, timeout: Duration) -> Result<RecordData> {
    let bytes = {
        let _lock = RecordLock::acquire(path, timeout)?;
        match fs::read(path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(RecordData::new()),
            Err(err) => {
                return Err(err).with_context(|| format!("failed to read {}", path.display()))
            }
        }
    };
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(RecordData::new());
    }
    serde_json::from_slice(&bytes).map_err(|err| {
        RecordError::Corrupt {
            path: path.to_path_buf(),
            reason: err.to_string(),
        }
        .into()
    })
}

fn write_atomic(path: &Path, data: &RecordData) -> Result<()> {
    let parent = path
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent).with_context(|| format!("failed to create {}", parent.display()))?;
    let mut tmp = NamedTempFile::new_in(parent)
        .with_context(|| format!("failed to create temp file in {}", parent.display()))?;
    serde_json::to_writer_pretty(&mut tmp, data)?;
    tmp.as_file()
        .sync_all()
        .with_context(|| format!("failed to flush {}", tmp.path().display()))?;
    tmp.persist(path)
        .map_err(|err| err.error)
        .with_context(|| format!("failed to replace {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const TIMEOUT: Duration = Duration::from_millis(200);

    #[test]
    fn rejects_unknown_extensions() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = RecordStore::open(dir.path().join("notes.txt"), TIMEOUT).expect_err("txt");
        assert!(matches!(
            err.downcast_ref::<RecordError>(),
            Some(RecordError::UnsupportedExtension { .. })
        ));
        let err = RecordStore::open(dir.path().join("plain"), TIMEOUT).expect_err("no ext");
        assert!(matches!(
            err.downcast_ref::<RecordError>(),
            Some(RecordError::MissingExtension { .. })
        ));
    }

    #[test]
    fn apply_writes_only_pending_changes() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("db").join("shot.task");
        let mut store = RecordStore::open(&path, TIMEOUT).expect("open");
        assert!(!store.exists());
        assert!(!store.apply(false).expect("noop apply"));

        store.set("name", "shot");
        store.set("categories", json!(["Layout", "Animation"]));
        assert!(store.is_changed());
        assert!(store.apply(false).expect("apply"));
        assert!(!store.is_changed());
        assert!(store.apply(true).expect("forced apply"));

        let reopened = RecordStore::open(&path, TIMEOUT).expect("reopen");
        assert_eq!(reopened.get_str("name"), Some("shot"));
        let categories: Vec<String> = reopened.get_as("categories").expect("categories");
        assert_eq!(categories, vec!["Layout", "Animation"]);
        assert_eq!(
            reopened.data().keys().collect::<Vec<_>>(),
            vec!["name", "categories"]
        );
    }

    #[test]
    fn detects_foreign_writes() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("hero.work");
        let mut mine = RecordStore::open(&path, TIMEOUT).expect("open");
        mine.set("versions", json!([]));
        mine.apply(false).expect("apply");
        assert!(!mine.is_modified());

        let mut theirs = RecordStore::open(&path, TIMEOUT).expect("open other");
        theirs.set("versions", json!([{"version_number": 1}]));
        theirs.apply(false).expect("apply other");

        assert!(mine.is_modified());
        mine.reload().expect("reload");
        assert!(!mine.is_modified());
        assert_eq!(mine.get("versions"), Some(&json!([{"version_number": 1}])));
    }

    #[test]
    fn add_update_reset_follow_key_rules() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut store = RecordStore::open(dir.path().join("a.json"), TIMEOUT).expect("open");
        assert!(store.add("fps", 25, false));
        assert!(!store.add("fps", 30, false));
        assert!(store.add("fps", 24, true));

        let mut incoming = RecordData::new();
        incoming.insert("fps".into(), json!(48));
        incoming.insert("extra".into(), json!(true));
        store.update(incoming.clone(), false);
        assert_eq!(store.get("fps"), Some(&json!(48)));
        assert!(store.get("extra").is_none());
        store.update(incoming, true);
        assert_eq!(store.get("extra"), Some(&json!(true)));

        store.reset();
        assert!(store.data().is_empty());
    }

    #[test]
    fn corrupt_records_are_typed() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("broken.json");
        fs::write(&path, b"{ not json").expect("write");
        let err = RecordStore::open(&path, TIMEOUT).expect_err("corrupt");
        assert!(matches!(
            err.downcast_ref::<RecordError>(),
            Some(RecordError::Corrupt { .. })
        ));
    }

    #[test]
    fn fallback_seeds_and_persists_primary() {
        let dir = tempfile::tempdir().expect("tempdir");
        let fallback = dir.path().join("commons").join("category_definitions.json");
        fs::create_dir_all(fallback.parent().expect("parent")).expect("mkdir");
        fs::write(&fallback, br#"{"Model": {"extracts": ["source"]}}"#).expect("write");

        let primary = dir.path().join("proj").join("category_definitions.json");
        let mut store = RecordStore::open(&primary, TIMEOUT).expect("open");
        store.set_fallback(&fallback).expect("fallback");
        assert!(primary.exists());
        assert!(store.get("Model").is_some());
        assert!(!store.is_changed());
    }

    #[test]
    fn create_new_refuses_existing_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("test_v001.pub");
        let mut first = RecordStore::open(&path, TIMEOUT).expect("open");
        first.set("reserved", true);
        assert!(first.create_new().expect("create"));

        let mut second = RecordStore::open(dir.path().join("x.pub"), TIMEOUT).expect("open");
        second.set_file(&path).expect("rebind");
        second.set("reserved", false);
        assert!(!second.create_new().expect("second create"));
        let on_disk = RecordStore::open(&path, TIMEOUT).expect("reopen");
        assert_eq!(on_disk.get("reserved"), Some(&json!(true)));
    }

    #[test]
    fn delete_leaves_the_lock_file_to_later_writers() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("hero.task");
        let mut store = RecordStore::open(&path, TIMEOUT).expect("open");
        store.set("name", "hero");
        store.apply(false).expect("apply");

        let waiter = lock::lock_path(&path);
        let held = fs::File::open(&waiter).expect("open lock");
        store.delete().expect("delete");
        assert!(!path.exists());
        assert!(waiter.exists());

        // A later writer locks the same file the earlier handle points at.
        let _lock = RecordLock::acquire(&path, TIMEOUT).expect("lock");
        let busy = fs4::FileExt::try_lock_exclusive(&held);
        assert!(busy.is_err());
    }
}
