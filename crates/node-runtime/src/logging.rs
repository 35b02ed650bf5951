//! Tracing setup.
//!
//! Stdout carries the chat console, so diagnostics go to a file next to
//! the block log through a background writer thread. `RUST_LOG` overrides
//! the default level.

use std::fs::{File, OpenOptions};
use std::path::Path;

use anyhow::Context;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::non_blocking;
use tracing_subscriber::EnvFilter;

#[cfg(debug_assertions)]
const DEFAULT_LEVEL: &str = "debug";
#[cfg(not(debug_assertions))]
const DEFAULT_LEVEL: &str = "info";

/// Install the global subscriber writing to `path` (appending).
///
/// Buffered lines are flushed when the returned guard is dropped, so keep
/// it alive until the node has stopped.
#[must_use = "dropping the guard stops the log writer"]
pub fn init_logging(path: &Path) -> anyhow::Result<WorkerGuard> {
    let (writer, guard) = create_file_writer(path)?;
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LEVEL));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("a global tracing subscriber is already installed")?;
    Ok(guard)
}

fn create_file_writer(path: &Path) -> anyhow::Result<(NonBlocking, WorkerGuard)> {
    Ok(non_blocking(open_log(path)?))
}

fn open_log(path: &Path) -> anyhow::Result<File> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("cannot open log file {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_log_appends() {
        use std::io::Write;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("node.log");
        writeln!(open_log(&path).unwrap(), "first").unwrap();
        writeln!(open_log(&path).unwrap(), "second").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "first\nsecond\n");
    }

    #[test]
    fn test_file_writer_flushes_on_guard_drop() {
        use std::io::Write;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("node.log");
        let (mut writer, guard) = create_file_writer(&path).unwrap();
        writer.write_all(b"[bc-03] Listening on port 4000\n").unwrap();
        drop(guard);

        let logged = std::fs::read_to_string(&path).unwrap();
        assert_eq!(logged, "[bc-03] Listening on port 4000\n");
    }

    #[test]
    fn test_open_log_in_missing_dir_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("node.log");
        let err = open_log(&path).unwrap_err();
        assert!(err.to_string().contains("cannot open log file"));
    }
}
