use std::fs::{self, File, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use fs4::FileExt;

use super::RecordError;

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Exclusive advisory lock on `<record>.lock`, released on drop.
#[derive(Debug)]
pub(crate) struct RecordLock {
    file: File,
    path: PathBuf,
}

impl RecordLock {
    pub(crate) fn try_acquire(record: &Path) -> Result<Option<Self>> {
        let path = lock_path(record);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .with_context(|| format!("failed to open {}", path.display()))?;

        match file.try_lock_exclusive() {
            Ok(()) => Ok(Some(Self { file, path })),
            Err(err) if err.kind() == ErrorKind::WouldBlock => Ok(None),
            #[cfg(windows)]
            Err(err) if matches!(err.raw_os_error(), Some(32 | 33)) => Ok(None),
            Err(err) => Err(err).with_context(|| format!("failed to lock {}", path.display())),
        }
    }

    /// Polls until the lock is free or `timeout` elapses.
    pub(crate) fn acquire(record: &Path, timeout: Duration) -> Result<Self> {
        let started = Instant::now();
        loop {
            if let Some(lock) = Self::try_acquire(record)? {
                return Ok(lock);
            }
            if started.elapsed() >= timeout {
                tracing::warn!(path = %record.display(), "record lock timed out");
                return Err(RecordError::Busy {
                    path: record.to_path_buf(),
                    waited: timeout,
                }
                .into());
            }
            thread::sleep(POLL_INTERVAL);
        }
    }
}

impl Drop for RecordLock {
    fn drop(&mut self) {
        if let Err(err) = FileExt::unlock(&self.file) {
            tracing::debug!(path = %self.path.display(), %err, "failed to release record lock");
        }
    }
}

pub(crate) fn lock_path(record: &Path) -> PathBuf {
    let mut name = record.as_os_str().to_os_string();
    name.push(".lock");
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_holder_waits_then_reports_busy() {
        let dir = tempfile::tempdir().expect("tempdir");
        let record = dir.path().join("shot.work");
        let held = RecordLock::acquire(&record, Duration::from_millis(50)).expect("first lock");
        assert!(lock_path(&record).exists());

        let err = RecordLock::acquire(&record, Duration::from_millis(60)).expect_err("busy");
        assert!(matches!(
            err.downcast_ref::<RecordError>(),
            Some(RecordError::Busy { .. })
        ));

        drop(held);
        RecordLock::acquire(&record, Duration::from_millis(50)).expect("lock after release");
    }
}
