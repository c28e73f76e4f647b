//! Process-wide tracing setup
//!
//! Console output always; with a log directory, also a daily rolling file
//! whose writer guard lives for the rest of the process.

use anyhow::Context;
use chrono::NaiveDate;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

const LOG_FILE_PREFIX: &str = "observatory.log";
const KEEP_LOG_DAYS: i64 = 7;

static LOG_DIR: OnceLock<PathBuf> = OnceLock::new();
static LOG_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Install the global subscriber
///
/// `RUST_LOG` overrides the default `debug` filter. Fails if a subscriber is
/// already installed.
pub fn init_logging(log_directory: Option<&Path>) -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"));
    let console_layer = fmt::layer().with_target(false).with_ansi(true);

    let Some(log_dir) = log_directory else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(console_layer)
            .try_init()?;
        tracing::info!("Logging to console only");
        return Ok(());
    };

    std::fs::create_dir_all(log_dir)
        .with_context(|| format!("Failed to create log directory {}", log_dir.display()))?;

    let file_appender = tracing_appender::rolling::daily(log_dir, LOG_FILE_PREFIX);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = fmt::layer()
        .with_target(true)
        .with_ansi(false)
        .with_writer(non_blocking);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()?;

    LOG_GUARD.set(guard).ok();
    LOG_DIR.set(log_dir.to_path_buf()).ok();

    tracing::info!("Log directory: {}", log_dir.display());
    let removed = prune_logs(log_dir, KEEP_LOG_DAYS, chrono::Local::now().date_naive());
    if removed > 0 {
        tracing::debug!("Removed {} old log files", removed);
    }
    Ok(())
}

pub fn log_directory() -> Option<&'static Path> {
    LOG_DIR.get().map(PathBuf::as_path)
}

/// Today's log file, if file logging is on
pub fn current_log_file() -> Option<PathBuf> {
    LOG_DIR
        .get()
        .map(|dir| log_file_for(dir, chrono::Local::now().date_naive()))
}

fn log_file_for(dir: &Path, date: NaiveDate) -> PathBuf {
    dir.join(format!("{}.{}", LOG_FILE_PREFIX, date.format("%Y-%m-%d")))
}

/// Delete rolled log files older than `keep_days` before `today`
fn prune_logs(log_dir: &Path, keep_days: i64, today: NaiveDate) -> usize {
    let cutoff = today - chrono::Duration::days(keep_days);
    let entries = match std::fs::read_dir(log_dir) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::debug!("Cannot read log directory for cleanup: {}", e);
            return 0;
        }
    };

    let mut removed = 0;
    for entry in entries.filter_map(|e| e.ok()) {
        let path = entry.path();
        let date = path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(|n| n.strip_prefix(LOG_FILE_PREFIX))
            .and_then(|n| n.strip_prefix('.'))
            .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok());

        match date {
            Some(date) if date < cutoff => match std::fs::remove_file(&path) {
                Ok(()) => removed += 1,
                Err(e) => tracing::warn!("Failed to remove old log {}: {}", path.display(), e),
            },
            _ => {}
        }
    }
    removed
}
