//! Tracing setup.
//!
//! The TUI owns the terminal, so in that mode logs go to a file; headless
//! modes log to stderr.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const LOG_FILE: &str = "streaming-launcher.log";

pub enum LogTarget<'a> {
    Stderr,
    File(Option<&'a Path>),
}

/// `$XDG_STATE_HOME/streaming-launcher/streaming-launcher.log`, falling back
/// to the cache dir and then the temp dir.
pub fn default_log_path() -> PathBuf {
    dirs::state_dir()
        .or_else(dirs::cache_dir)
        .unwrap_or_else(std::env::temp_dir)
        .join("streaming-launcher")
        .join(LOG_FILE)
}

fn filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
}

/// Install the global subscriber. Keep the returned guard alive for the
/// life of the program so buffered lines are flushed.
pub fn init(level: &str, target: LogTarget<'_>) -> Result<Option<WorkerGuard>> {
    match target {
        LogTarget::Stderr => {
            tracing_subscriber::registry()
                .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
                .with(filter(level))
                .try_init()
                .context("install stderr logger")?;
            Ok(None)
        }
        LogTarget::File(path) => {
            let path = path.map(Path::to_path_buf).unwrap_or_else(default_log_path);
            let dir = path
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from("."));
            std::fs::create_dir_all(&dir)
                .with_context(|| format!("create log directory {}", dir.display()))?;
            let file_name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| LOG_FILE.to_string());

            let appender = tracing_appender::rolling::never(&dir, file_name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::registry()
                .with(
                    fmt::layer()
                        .with_writer(writer)
                        .with_ansi(false)
                        .with_target(true),
                )
                .with(filter(level))
                .try_init()
                .context("install file logger")?;
            Ok(Some(guard))
        }
    }
}
