use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

pub const LOG_FILE_NAME: &str = "tik_manager4.log";

fn filter_directive(verbose: u8, trace: bool) -> String {
    let level = if trace {
        "trace"
    } else {
        match verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    format!("tik_core={level},tik_domain={level}")
}

/// Installs a stderr subscriber for hosts embedding the library.
///
/// Calling it twice is harmless; the second install is ignored.
pub fn init_tracing(verbose: u8, trace: bool) {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter_directive(verbose, trace))
        .with_target(false)
        .with_level(true)
        .finish();

    let _ = tracing::subscriber::set_global_default(subscriber);
}

/// Opens `<dir>/tik_manager4.log` for appending. `Mutex<File>` is a
/// `MakeWriter` on its own.
fn open_log(dir: &Path) -> Result<Mutex<File>> {
    fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir.display()))?;
    let path = dir.join(LOG_FILE_NAME);
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("failed to open {}", path.display()))?;
    Ok(Mutex::new(file))
}

/// Like [`init_tracing`], but also appends plain-text events to
/// `<dir>/tik_manager4.log`.
pub fn init_file_logging(dir: &Path, verbose: u8) -> Result<()> {
    let writer = open_log(dir)?;
    let directive = filter_directive(verbose, false);
    let stderr_layer = fmt::layer()
        .with_target(false)
        .with_writer(io::stderr)
        .with_filter(EnvFilter::new(&directive));
    let file_layer = fmt::layer()
        .with_ansi(false)
        .with_writer(writer)
        .with_filter(EnvFilter::new(&directive));
    let _ = tracing_subscriber::registry()
        .with(stderr_layer)
        .with(file_layer)
        .try_init();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbosity_maps_to_crate_filters() {
        assert_eq!(filter_directive(0, false), "tik_core=info,tik_domain=info");
        assert_eq!(filter_directive(1, false), "tik_core=debug,tik_domain=debug");
        assert_eq!(filter_directive(0, true), "tik_core=trace,tik_domain=trace");
    }

    #[test]
    fn file_logging_creates_the_log() {
        let dir = tempfile::tempdir().expect("tempdir");
        init_file_logging(dir.path(), 0).expect("init");
        assert!(dir.path().join(LOG_FILE_NAME).exists());
    }

    #[test]
    fn events_are_appended_to_the_log_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let subscriber = tracing_subscriber::fmt()
            .with_ansi(false)
            .with_writer(open_log(dir.path()).expect("open"))
            .finish();
        tracing::subscriber::with_default(subscriber, || {
            tracing::info!(work = "test", "work destroyed");
        });
        let text = fs::read_to_string(dir.path().join(LOG_FILE_NAME)).expect("read");
        assert!(text.contains("work destroyed"));
    }
}
