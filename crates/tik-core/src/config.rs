use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, Result};

pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(3);
const USER_DIR_NAME: &str = "TikManager4";

#[derive(Debug, Clone)]
pub(crate) struct EnvSnapshot {
    vars: HashMap<String, String>,
}

impl EnvSnapshot {
    pub(crate) fn capture() -> Self {
        Self {
            vars: env::vars().collect(),
        }
    }

    pub(crate) fn var(&self, key: &str) -> Option<&str> {
        self.vars
            .get(key)
            .map(String::as_str)
            .filter(|value| !value.trim().is_empty())
    }

    #[cfg(test)]
    pub(crate) fn testing(pairs: &[(&str, &str)]) -> Self {
        let vars = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        Self { vars }
    }
}

/// Process-level settings resolved once at start-up.
#[derive(Debug, Clone)]
pub struct Config {
    pub(crate) user_dir: PathBuf,
    pub(crate) commons_dir: Option<PathBuf>,
    pub(crate) lock_timeout: Duration,
    pub(crate) workstation: String,
}

impl Config {
    /// Builds a configuration snapshot from the current process environment.
    ///
    /// # Errors
    /// Returns an error if no user directory can be determined.
    pub fn from_env() -> Result<Self> {
        Self::from_snapshot(&EnvSnapshot::capture())
    }

    pub(crate) fn from_snapshot(snapshot: &EnvSnapshot) -> Result<Self> {
        let user_dir = match snapshot.var("TIK_USER_DIR") {
            Some(dir) => PathBuf::from(dir),
            None => dirs_next::home_dir()
                .map(|home| home.join(USER_DIR_NAME))
                .ok_or_else(|| anyhow!("unable to determine the home directory"))?,
        };
        let lock_timeout = match snapshot.var("TIK_LOCK_TIMEOUT_MS") {
            Some(raw) => Duration::from_millis(
                raw.trim()
                    .parse()
                    .map_err(|_| anyhow!("TIK_LOCK_TIMEOUT_MS must be milliseconds, got {raw:?}"))?,
            ),
            None => DEFAULT_LOCK_TIMEOUT,
        };
        let workstation = snapshot
            .var("TIK_WORKSTATION")
            .or_else(|| snapshot.var("HOSTNAME"))
            .or_else(|| snapshot.var("COMPUTERNAME"))
            .map(ToOwned::to_owned)
            .or_else(read_hostname_file)
            .unwrap_or_else(|| "unknown".to_string());
        Ok(Self {
            user_dir,
            commons_dir: snapshot.var("TIK_COMMONS_DIR").map(PathBuf::from),
            lock_timeout,
            workstation,
        })
    }

    /// Configuration rooted in explicit folders, independent of the environment.
    #[must_use]
    pub fn at(user_dir: impl Into<PathBuf>, commons_dir: impl Into<PathBuf>) -> Self {
        Self {
            user_dir: user_dir.into(),
            commons_dir: Some(commons_dir.into()),
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            workstation: "localhost".to_string(),
        }
    }

    #[must_use]
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    #[must_use]
    pub fn user_dir(&self) -> &PathBuf {
        &self.user_dir
    }

    #[must_use]
    pub fn commons_dir(&self) -> Option<&PathBuf> {
        self.commons_dir.as_ref()
    }

    #[must_use]
    pub fn lock_timeout(&self) -> Duration {
        self.lock_timeout
    }

    #[must_use]
    pub fn workstation(&self) -> &str {
        &self.workstation
    }
}

fn read_hostname_file() -> Option<String> {
    fs::read_to_string("/etc/hostname")
        .ok()
        .map(|raw| raw.trim().to_string())
        .filter(|name| !name.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_overrides_take_precedence() {
        let snapshot = EnvSnapshot::testing(&[
            ("TIK_USER_DIR", "/tmp/tik-user"),
            ("TIK_COMMONS_DIR", "/mnt/share/commons"),
            ("TIK_LOCK_TIMEOUT_MS", "250"),
            ("TIK_WORKSTATION", "ws-42"),
            ("HOSTNAME", "ignored"),
        ]);
        let config = Config::from_snapshot(&snapshot).expect("config");
        assert_eq!(config.user_dir(), &PathBuf::from("/tmp/tik-user"));
        assert_eq!(
            config.commons_dir(),
            Some(&PathBuf::from("/mnt/share/commons"))
        );
        assert_eq!(config.lock_timeout(), Duration::from_millis(250));
        assert_eq!(config.workstation(), "ws-42");
    }

    #[test]
    fn falls_back_to_defaults() {
        let snapshot = EnvSnapshot::testing(&[("TIK_USER_DIR", "/tmp/u"), ("HOSTNAME", "render7")]);
        let config = Config::from_snapshot(&snapshot).expect("config");
        assert_eq!(config.lock_timeout(), DEFAULT_LOCK_TIMEOUT);
        assert_eq!(config.workstation(), "render7");
        assert!(config.commons_dir().is_none());
    }

    #[test]
    fn rejects_malformed_timeouts() {
        let snapshot =
            EnvSnapshot::testing(&[("TIK_USER_DIR", "/tmp/u"), ("TIK_LOCK_TIMEOUT_MS", "soon")]);
        let err = Config::from_snapshot(&snapshot).expect_err("bad timeout");
        assert!(err.to_string().contains("TIK_LOCK_TIMEOUT_MS"));
    }
}
