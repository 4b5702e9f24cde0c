//! Discovery: walk the target tree and stream candidate paths.
//!
//! Classification happens downstream; this stage only filters out
//! directories the engine owns (`.backups`, `.media_conversion_results`,
//! `.logs`, the scratch root) at any depth. Per-directory read errors are
//! logged and the subtree skipped; they never end the walk.

use std::path::{Path, PathBuf};

use crossbeam_channel::Sender;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::cancel::CancelToken;
use crate::config::is_reserved_dir_name;
use crate::stats::RunStats;

pub fn run_discovery(
    target_dir: &Path,
    paths_tx: Sender<PathBuf>,
    stats: &RunStats,
    cancel: &CancelToken,
) {
    let walker = WalkDir::new(target_dir)
        .follow_links(false)
        .into_iter()
        .filter_entry(|entry| {
            if !entry.file_type().is_dir() {
                return true;
            }
            let name = entry.file_name().to_string_lossy();
            if is_reserved_dir_name(&name) {
                debug!(dir = %entry.path().display(), "Skipping reserved directory");
                return false;
            }
            true
        });

    let mut emitted: u64 = 0;
    for entry in walker {
        if cancel.is_cancelled() {
            info!("Discovery cancelled");
            break;
        }
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                warn!(error = %e, "Directory read error; subtree skipped");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }

        stats.inc_found();
        emitted += 1;
        // Bounded channel: blocks here when assessment falls behind.
        if paths_tx.send(entry.into_path()).is_err() {
            break;
        }
    }

    info!(candidates = emitted, "Discovery complete");
    // Dropping the sender closes the stream for assessment workers.
}
