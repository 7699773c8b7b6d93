//! Structured logging setup.
//!
//! Console output is compact and human-readable; a daily-rotated JSON
//! file under the platform log directory keeps the machine-parseable
//! record. `RUST_LOG` overrides the default `info` filter.

use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::APP_DIR_NAME;

/// Initialize logging, returning the log directory. Failure here is
/// for the caller to absorb; the process runs fine without a file log.
pub fn init_logging() -> Result<PathBuf> {
    let log_dir = log_directory()?;
    std::fs::create_dir_all(&log_dir)
        .with_context(|| format!("Failed to create log directory {}", log_dir.display()))?;

    let file_appender = RollingFileAppender::new(Rotation::DAILY, &log_dir, "lansight.log");

    let console_layer = fmt::layer().with_target(false).compact();

    let file_layer = fmt::layer()
        .with_writer(file_appender)
        .with_ansi(false)
        .with_target(true)
        .json();

    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new("info"))?;

    let init_result = tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .try_init();

    if let Err(e) = init_result {
        // A test harness or embedding host may have installed one.
        if e.to_string().contains("already been set") {
            return Ok(log_dir);
        }
        return Err(anyhow!("Failed to install logging subscriber: {}", e));
    }

    tracing::debug!("Logging initialized, log directory: {}", log_dir.display());
    Ok(log_dir)
}

fn log_directory() -> Result<PathBuf> {
    let base_dir = if cfg!(target_os = "windows") {
        dirs::data_local_dir().context("Could not find local data directory")?
    } else {
        dirs::config_dir().context("Could not find config directory")?
    };
    Ok(base_dir.join(APP_DIR_NAME).join("logs"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_directory_is_under_app_dir() {
        let dir = log_directory().expect("platform dirs should resolve");
        assert!(dir.ends_with(PathBuf::from(APP_DIR_NAME).join("logs")));
    }
}
