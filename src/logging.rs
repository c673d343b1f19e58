//! Tracing configuration and log routing.
//!
//! Human-readable logs go to stderr so the CLI can print JSON reports on stdout. A second,
//! non‑blocking layer appends to a log file: `PAGELEDGER_LOG_FILE` when set, otherwise
//! `logs/pageledger.log`.
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

static LOG_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Environment variable overriding the log file location.
pub const LOG_FILE_ENV: &str = "PAGELEDGER_LOG_FILE";

const DEFAULT_LOG_DIR: &str = "logs";
const DEFAULT_LOG_FILE: &str = "pageledger.log";

#[derive(Debug, PartialEq, Eq)]
enum LogFile {
    /// Append to a caller-chosen file.
    Explicit(PathBuf),
    /// Append to `DEFAULT_LOG_FILE` inside `DEFAULT_LOG_DIR`, creating the directory.
    Default,
}

fn resolve_log_file(explicit: Option<String>) -> LogFile {
    match explicit.filter(|value| !value.trim().is_empty()) {
        Some(path) => LogFile::Explicit(PathBuf::from(path)),
        None => LogFile::Default,
    }
}

/// Configure tracing subscribers for stderr and file logging.
///
/// Respects `RUST_LOG` for filtering and defaults to `info`.
pub fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact();

    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with(stderr_layer);

    let target = resolve_log_file(std::env::var(LOG_FILE_ENV).ok());
    if let Some(writer) = configure_file_writer(&target) {
        let file_layer = fmt::layer()
            .with_writer(writer)
            .with_target(true)
            .with_ansi(false)
            .compact();

        registry.with(file_layer).init();
    } else {
        registry.init();
    }
}

/// Build a non‑blocking writer for file logging.
///
/// Returns `None` when the logs directory cannot be created or the target file cannot be opened.
fn configure_file_writer(target: &LogFile) -> Option<NonBlocking> {
    match target {
        LogFile::Explicit(path) => match open_append(path) {
            Ok(file) => {
                let (non_blocking, guard) = tracing_appender::non_blocking(file);
                let _ = LOG_GUARD.set(guard);
                Some(non_blocking)
            }
            Err(err) => {
                eprintln!("Failed to open log file {}: {err}", path.display());
                None
            }
        },
        LogFile::Default => {
            if let Err(err) = std::fs::create_dir_all(DEFAULT_LOG_DIR) {
                eprintln!("Failed to create logs directory: {err}");
                return None;
            }
            let file_appender = tracing_appender::rolling::never(DEFAULT_LOG_DIR, DEFAULT_LOG_FILE);
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            let _ = LOG_GUARD.set(guard);
            Some(non_blocking)
        }
    }
}

fn open_append(path: &Path) -> std::io::Result<std::fs::File> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_override_falls_back_to_default_file() {
        assert_eq!(resolve_log_file(None), LogFile::Default);
        assert_eq!(resolve_log_file(Some("  ".into())), LogFile::Default);
        assert_eq!(
            resolve_log_file(Some("/var/log/pageledger.log".into())),
            LogFile::Explicit(PathBuf::from("/var/log/pageledger.log"))
        );
    }

    #[test]
    fn explicit_file_parent_is_created() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/run.log");
        assert!(open_append(&path).is_ok());
        assert!(path.exists());
    }
}
