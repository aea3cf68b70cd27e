//! Tracing setup. The terminal belongs to the UI, so logs only ever go to a
//! file and only when `REELFEED_LOG` is set.

use std::env;
use std::fs::{create_dir_all, File};
use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::{Context, Result};
use once_cell::sync::OnceCell;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

pub const LOG_ENV: &str = "REELFEED_LOG";
pub const LOG_FILE_ENV: &str = "REELFEED_LOG_FILE";

static INITIALIZED: OnceCell<Option<PathBuf>> = OnceCell::new();

/// Installs the global subscriber. Returns the log file path when logging
/// is enabled. Safe to call more than once; later calls are no-ops.
pub fn init() -> Result<Option<PathBuf>> {
    INITIALIZED
        .get_or_try_init(|| {
            let Some(directive) = env::var(LOG_ENV).ok().filter(|v| !v.trim().is_empty()) else {
                return Ok(None);
            };
            let path = log_path().context("logging: resolve log file path")?;
            install(&directive, path.clone())?;
            Ok(Some(path))
        })
        .cloned()
}

fn install(directive: &str, path: PathBuf) -> Result<()> {
    if let Some(parent) = path.parent() {
        create_dir_all(parent)
            .with_context(|| format!("logging: create directory {}", parent.display()))?;
    }
    let file = File::create(&path)
        .with_context(|| format!("logging: open {}", path.display()))?;

    let filter = EnvFilter::try_new(directive.trim())
        .with_context(|| format!("logging: invalid filter {directive:?}"))?;
    let file_layer = fmt::layer()
        .with_target(true)
        .with_thread_names(true)
        .with_line_number(true)
        .with_ansi(false)
        .with_writer(Mutex::new(file))
        .with_filter(filter);

    tracing_subscriber::registry()
        .with(file_layer)
        .try_init()
        .context("logging: install subscriber")?;

    tracing::info!(version = crate::VERSION, file = %path.display(), "logging initialized");
    Ok(())
}

fn log_path() -> Option<PathBuf> {
    if let Some(path) = env::var_os(LOG_FILE_ENV).filter(|p| !p.is_empty()) {
        return Some(PathBuf::from(path));
    }
    dirs::cache_dir().map(|dir| dir.join("reelfeed").join("reelfeed.log"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_log_file_wins() {
        env::set_var(LOG_FILE_ENV, "/tmp/reelfeed-test.log");
        assert_eq!(log_path(), Some(PathBuf::from("/tmp/reelfeed-test.log")));
        env::remove_var(LOG_FILE_ENV);
    }
}
