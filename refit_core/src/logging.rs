//! Run logging: tracing with a file layer under `.logs/` and a terse
//! stderr layer.
//!
//! The file layer is ANSI-free and keeps target/level fields so a run log is
//! greppable; stderr only carries the message. `RUST_LOG` overrides the
//! configured level when set.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LOGS_DIR_NAME;

/// Initialize logging for one run. Returns the log file path for the report.
///
/// May only be called once per process; tests leave logging uninitialized.
pub fn init_run_logging(target_dir: &Path, mode: &str, level: &str) -> Result<PathBuf> {
    let log_dir = target_dir.join(LOGS_DIR_NAME);
    std::fs::create_dir_all(&log_dir)
        .with_context(|| format!("Failed to create log directory {}", log_dir.display()))?;

    let timestamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
    let file_name = format!("{mode}_run_{timestamp}.log");
    let appender = tracing_appender::rolling::never(&log_dir, &file_name);

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("refit={level},refit_core={level}")));

    let file_layer = fmt::layer()
        .with_writer(appender)
        .with_ansi(false)
        .with_target(true)
        .with_level(true);

    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(true)
        .with_target(false)
        .with_level(true)
        .without_time();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(stderr_layer)
        .try_init()
        .map_err(|e| anyhow::anyhow!("logging already initialized: {e}"))?;

    let log_path = log_dir.join(file_name);
    tracing::info!(log = %log_path.display(), mode, level, "Logging initialized");
    Ok(log_path)
}
