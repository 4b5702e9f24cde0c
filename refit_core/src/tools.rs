//! External tool discovery.
//!
//! Hard dependencies (ffmpeg, ffprobe, exiftool) are resolved once at
//! startup; a miss is fatal with a message naming the tool. Optional tools
//! (cjxl, file) gate strategy choices instead: no cjxl means stills target
//! AVIF, no `file` means MIME falls back to the extension map.

use std::path::PathBuf;

use anyhow::Result;
use tracing::{debug, info};

use crate::cancel::CancelToken;
use crate::error::EngineError;
use crate::subprocess::run_tool;

#[derive(Debug, Clone)]
pub struct Toolchain {
    pub ffmpeg: PathBuf,
    pub ffprobe: PathBuf,
    pub exiftool: PathBuf,
    pub file: Option<PathBuf>,
    pub cjxl: Option<PathBuf>,
    pub has_libsvtav1: bool,
    pub has_libx265: bool,
    pub has_libaom: bool,
}

impl Toolchain {
    /// Resolve every tool and probe ffmpeg's encoder list.
    pub fn discover() -> Result<Self, EngineError> {
        let ffmpeg = require("ffmpeg", "ffmpeg")?;
        let ffprobe = require("ffprobe", "ffmpeg")?;
        let exiftool = require("exiftool", "exiftool")?;
        let file = which::which("file").ok();
        let cjxl = which::which("cjxl").ok();

        let encoders = probe_encoders(&ffmpeg);
        let chain = Self {
            ffmpeg,
            ffprobe,
            exiftool,
            file,
            cjxl,
            has_libsvtav1: encoders.contains("libsvtav1"),
            has_libx265: encoders.contains("libx265"),
            has_libaom: encoders.contains("libaom-av1"),
        };
        info!(
            jxl = chain.cjxl.is_some(),
            svtav1 = chain.has_libsvtav1,
            x265 = chain.has_libx265,
            libaom = chain.has_libaom,
            "Toolchain ready"
        );
        Ok(chain)
    }

    /// A toolchain whose binaries do not exist. Probes fail cleanly and MIME
    /// detection falls back to extensions, which keeps tests hermetic.
    #[cfg(test)]
    pub fn unavailable() -> Self {
        let missing = PathBuf::from("/nonexistent/refit-tool");
        Self {
            ffmpeg: missing.clone(),
            ffprobe: missing.clone(),
            exiftool: missing,
            file: None,
            cjxl: None,
            has_libsvtav1: false,
            has_libx265: false,
            has_libaom: false,
        }
    }
}

fn require(tool: &str, package: &str) -> Result<PathBuf, EngineError> {
    which::which(tool).map_err(|_| EngineError::MissingTool {
        tool: tool.to_string(),
        package: package.to_string(),
    })
}

fn probe_encoders(ffmpeg: &PathBuf) -> String {
    let args = vec!["-hide_banner".to_string(), "-encoders".to_string()];
    match run_tool(ffmpeg, &args, &CancelToken::new(), None) {
        Ok(out) if out.success() => out.stdout,
        _ => {
            debug!("Could not list ffmpeg encoders; assuming none of the optional ones");
            String::new()
        }
    }
}
