//! Engine-level error type.
//!
//! Per-file failures never surface here; they end up as `FAIL` outcomes on
//! the results channel. Only the errors that must stop the whole run (missing
//! tools, unusable target, cancellation) cross the process boundary.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("required tool not found: {tool}\n   Install it and re-run (e.g. `brew install {package}` / `apt install {package}`)")]
    MissingTool { tool: String, package: String },

    #[error("target directory not usable: {path}: {reason}")]
    BadTarget { path: PathBuf, reason: String },

    #[error("refused to operate on protected directory: {0}")]
    ProtectedDirectory(String),

    #[error("run cancelled by user")]
    Cancelled,

    #[error("{tool} timed out after {seconds}s")]
    ToolTimeout { tool: String, seconds: u64 },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// True when the error is a per-attempt failure the fallback chain may
    /// absorb rather than a run-level stop.
    pub fn is_attempt_local(&self) -> bool {
        matches!(self, EngineError::ToolTimeout { .. } | EngineError::Io(_))
    }
}
