//! Structured logging setup (console + optional daily rolling file).

use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use anyhow::Context;
use tracing::warn;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Log files kept by default, including the active one.
pub const MAX_LOG_FILES: usize = 10;

pub const DEFAULT_FILTER: &str = "info,small_pos_tse=debug";

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Directory for rolling log files; console only when `None`.
    pub log_dir: Option<PathBuf>,
    pub file_prefix: String,
    pub max_files: usize,
    /// Used when `RUST_LOG` is unset or invalid.
    pub default_filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_dir: None,
            file_prefix: "tse".into(),
            max_files: MAX_LOG_FILES,
            default_filter: DEFAULT_FILTER.into(),
        }
    }
}

impl LoggingConfig {
    pub fn with_log_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.log_dir = Some(dir.into());
        self
    }
}

/// Install the global subscriber.
///
/// The returned guard flushes the file writer on drop; hold it for the
/// lifetime of the process.
pub fn init_logging(config: &LoggingConfig) -> anyhow::Result<Option<WorkerGuard>> {
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.default_filter)
            .with_context(|| format!("invalid log filter '{}'", config.default_filter))?,
    };
    let console_layer = fmt::layer().with_target(true);

    let Some(log_dir) = config.log_dir.as_deref() else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(console_layer)
            .try_init()
            .context("failed to install tracing subscriber")?;
        return Ok(None);
    };

    fs::create_dir_all(log_dir)
        .with_context(|| format!("failed to create log directory {}", log_dir.display()))?;
    // Leave room for the file the appender is about to open.
    prune_old_logs(
        log_dir,
        &config.file_prefix,
        config.max_files.saturating_sub(1),
    );

    let file_appender = tracing_appender::rolling::daily(log_dir, &config.file_prefix);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    let file_layer = fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(true);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .context("failed to install tracing subscriber")?;

    Ok(Some(guard))
}

/// Delete all but the newest `keep` files named `<prefix>` or `<prefix>.*`.
///
/// Returns how many files were removed. Removal failures are logged and
/// skipped.
pub fn prune_old_logs(dir: &Path, prefix: &str, keep: usize) -> usize {
    let Ok(entries) = fs::read_dir(dir) else {
        return 0;
    };

    let dotted = format!("{prefix}.");
    let mut log_files: Vec<(PathBuf, SystemTime)> = entries
        .flatten()
        .filter_map(|entry| {
            let path = entry.path();
            if !path.is_file() {
                return None;
            }
            let name = path.file_name()?.to_str()?;
            if name != prefix && !name.starts_with(&dotted) {
                return None;
            }
            let modified = entry
                .metadata()
                .ok()
                .and_then(|m| m.modified().ok())
                .unwrap_or(SystemTime::UNIX_EPOCH);
            Some((path, modified))
        })
        .collect();

    // Newest first; daily suffixes sort by date when mtimes tie.
    log_files.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| b.0.cmp(&a.0)));

    let mut removed = 0;
    for (path, _) in log_files.iter().skip(keep) {
        match fs::remove_file(path) {
            Ok(()) => removed += 1,
            Err(e) => warn!("Failed to prune log file {}: {e}", path.display()),
        }
    }
    removed
}
