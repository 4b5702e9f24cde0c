//! Metadata preservation across a format change.
//!
//! exiftool carries the internal tags (EXIF/IPTC/XMP), xattr carries the
//! system layer, and filetime restores mtime last because exiftool rewrites
//! the destination. Creation time is only attempted where the platform has a
//! way to set it.

use std::path::Path;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use tracing::debug;

use crate::cancel::CancelToken;
use crate::subprocess::run_tool;
use crate::tools::Toolchain;

const METADATA_TIMEOUT: Duration = Duration::from_secs(120);

/// Copy all tags from `src` to `dst` in place and restore timestamps.
///
/// Tag copy failure is an error (commit aborts on it); the xattr and
/// birth-time layers are best-effort because many filesystems simply do not
/// support them.
pub fn copy_metadata(
    tools: &Toolchain,
    src: &Path,
    dst: &Path,
    cancel: &CancelToken,
) -> Result<()> {
    let args = vec![
        "-TagsFromFile".to_string(),
        src.display().to_string(),
        "-all:all".to_string(),
        "-overwrite_original".to_string(),
        "-q".to_string(),
        dst.display().to_string(),
    ];
    let out = run_tool(&tools.exiftool, &args, cancel, Some(METADATA_TIMEOUT))
        .context("exiftool invocation failed")?;
    if !out.success() {
        return Err(anyhow!(
            "exiftool could not copy tags: {}",
            out.stderr.trim()
        ));
    }

    copy_xattrs(src, dst);
    preserve_times(src, dst)?;
    try_preserve_birth_time(src, dst);
    Ok(())
}

/// Apply the source's atime/mtime to the destination. Always runs after any
/// write to `dst`, since every tool touches mtime.
pub fn preserve_times(src: &Path, dst: &Path) -> Result<()> {
    let meta = std::fs::metadata(src)
        .with_context(|| format!("Failed to stat {}", src.display()))?;
    let atime = filetime::FileTime::from_last_access_time(&meta);
    let mtime = filetime::FileTime::from_last_modification_time(&meta);
    filetime::set_file_times(dst, atime, mtime)
        .with_context(|| format!("Failed to set times on {}", dst.display()))?;
    Ok(())
}

fn copy_xattrs(src: &Path, dst: &Path) {
    match xattr::list(src) {
        Ok(names) => {
            for name in names {
                if let Ok(Some(value)) = xattr::get(src, &name) {
                    if let Err(e) = xattr::set(dst, &name, &value) {
                        debug!(attr = ?name, error = %e, "xattr copy skipped");
                    }
                }
            }
        }
        Err(e) => debug!(src = %src.display(), error = %e, "xattr listing unavailable"),
    }
}

/// Birth time can only be written back on macOS (SetFile / APFS). Elsewhere
/// this logs at debug and moves on.
#[cfg(target_os = "macos")]
fn try_preserve_birth_time(src: &Path, dst: &Path) {
    use std::process::Command;
    use tracing::warn;

    let created = match std::fs::metadata(src).and_then(|m| m.created()) {
        Ok(t) => t,
        Err(_) => return,
    };
    let stamp: chrono::DateTime<chrono::Local> = created.into();
    let formatted = stamp.format("%m/%d/%Y %H:%M:%S").to_string();
    let result = Command::new("SetFile")
        .arg("-d")
        .arg(&formatted)
        .arg(dst)
        .output();
    if let Err(e) = result {
        warn!(dst = %dst.display(), error = %e, "SetFile unavailable; birth time not preserved");
    }
}

#[cfg(not(target_os = "macos"))]
fn try_preserve_birth_time(_src: &Path, dst: &Path) {
    debug!(dst = %dst.display(), "No birth-time tool on this platform");
}
