//! Assessment: turn candidate paths into typed, graded FileTasks.
//!
//! Workers are bounded and cheap relative to conversion; each path costs a
//! stat plus one or two probe subprocesses. Probe failures degrade the task
//! to `Unknown` quality instead of dropping it. Paths recorded by a previous
//! run are dropped here (counted as resumed) unless `overwrite` is set.

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info};

use crate::cancel::CancelToken;
use crate::config::RunConfig;
use crate::mime::{is_supported, probe_mime};
use crate::outcome::ConversionOutcome;
use crate::probe;
use crate::quality::{grade_image, grade_video};
use crate::stats::RunStats;
use crate::store::ResultStore;
use crate::task::{BatchDecision, FileTask, MediaType, QualityGrade};
use crate::tools::Toolchain;

const RECV_TICK: Duration = Duration::from_millis(200);

pub struct AssessCtx<'a> {
    pub config: &'a RunConfig,
    pub tools: &'a Toolchain,
    pub store: &'a ResultStore,
    pub stats: &'a RunStats,
    pub cancel: &'a CancelToken,
}

/// Where a path ended up after assessment.
enum Routed {
    Main(FileTask),
    LowQuality(FileTask),
    Skip(ConversionOutcome),
    /// Unsupported, reserved, resumed or stat-failed: excluded, not recorded.
    Excluded,
}

pub fn run_assessment_worker(
    ctx: &AssessCtx<'_>,
    paths_rx: Receiver<PathBuf>,
    task_tx: Sender<FileTask>,
    lowq_tx: Sender<FileTask>,
    results_tx: Sender<ConversionOutcome>,
) {
    loop {
        let path = match paths_rx.recv_timeout(RECV_TICK) {
            Ok(path) => path,
            Err(RecvTimeoutError::Timeout) => {
                if ctx.cancel.is_cancelled() {
                    return;
                }
                continue;
            }
            Err(RecvTimeoutError::Disconnected) => return,
        };

        match assess_path(ctx, path) {
            Routed::Main(task) => {
                if task_tx.send(task).is_err() {
                    return;
                }
            }
            Routed::LowQuality(task) => {
                if lowq_tx.send(task).is_err() {
                    return;
                }
            }
            Routed::Skip(outcome) => {
                if results_tx.send(outcome).is_err() {
                    return;
                }
            }
            Routed::Excluded => {}
        }
    }
}

fn assess_path(ctx: &AssessCtx<'_>, path: PathBuf) -> Routed {
    let size = match std::fs::metadata(&path) {
        Ok(meta) => meta.len(),
        Err(e) => {
            debug!(path = %path.display(), error = %e, "Stat failed; excluding");
            return Routed::Excluded;
        }
    };

    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .unwrap_or_default();

    let mime = match probe_mime(ctx.tools, &path, ctx.cancel) {
        Some(mime) if is_supported(&mime, &ext) => mime,
        Some(mime) => {
            info!(path = %path.display(), mime = %mime, "Unsupported MIME; excluding");
            return Routed::Excluded;
        }
        None => {
            debug!(path = %path.display(), "No MIME detected; excluding");
            return Routed::Excluded;
        }
    };

    // Resume check runs before any probing or skip record so a second pass
    // over the same tree is pure bookkeeping: no subprocesses, no duplicate
    // records, every previously-seen path counted as resumed.
    if ctx.store.contains(&path) {
        if !ctx.config.overwrite {
            ctx.stats.inc_resumed();
            debug!(path = %path.display(), "Already recorded; resumed");
            return Routed::Excluded;
        }
        if let Some(prev) = ctx.store.load(&path) {
            info!(
                path = %path.display(),
                prev_decision = prev.decision.as_str(),
                prev_tag = %prev.tag,
                "Overwrite: re-processing a recorded file"
            );
        }
    }

    let media_type = classify_media(ctx, &path, &mime);

    // Live Photo halves and spatial images are never converted, but they are
    // recorded so a re-run does not revisit them.
    if probe::is_live_photo_half(&path) {
        info!(path = %path.display(), "Live Photo pair; skipping both halves");
        return Routed::Skip(ConversionOutcome::skip(&path, size, "live-photo"));
    }
    if mime == "image/heic" && probe::is_spatial_image(ctx.tools, &path, ctx.cancel) {
        info!(path = %path.display(), "Spatial image; skipping");
        return Routed::Skip(ConversionOutcome::skip(&path, size, "spatial-image"));
    }

    let quality = grade(ctx, &path, size, media_type);

    ctx.stats.inc_assessed(quality);
    let task = FileTask {
        path,
        ext,
        size,
        mime,
        media_type,
        quality,
        batch_decision: BatchDecision::Na,
    };

    if quality == QualityGrade::ExtremeLow {
        Routed::LowQuality(task)
    } else {
        Routed::Main(task)
    }
}

fn classify_media(ctx: &AssessCtx<'_>, path: &std::path::Path, mime: &str) -> MediaType {
    if mime.starts_with("video/") {
        return MediaType::Video;
    }
    // image/*: more than one frame makes it animated. A probe miss means we
    // treat it as a still; the lossless path is safe for both.
    match probe::probe_frame_count(ctx.tools, path, ctx.cancel) {
        Some(frames) if frames > 1 => MediaType::Animated,
        _ => MediaType::Static,
    }
}

fn grade(
    ctx: &AssessCtx<'_>,
    path: &std::path::Path,
    size: u64,
    media_type: MediaType,
) -> QualityGrade {
    match media_type {
        MediaType::Video => match probe::probe_stream(ctx.tools, path, ctx.cancel) {
            Ok(info) => grade_video(size, info.effective_bit_rate(), info.width, info.height),
            Err(e) => {
                debug!(path = %path.display(), error = %e, "Video probe failed; grading Unknown");
                grade_video(size, 0, 0, 0)
            }
        },
        _ => match probe::probe_dimensions(ctx.tools, path, ctx.cancel) {
            Some((w, h)) => grade_image(size, w, h, &ctx.config.thresholds),
            None => {
                debug!(path = %path.display(), "Dimension probe failed; grading Unknown");
                grade_image(size, 0, 0, &ctx.config.thresholds)
            }
        },
    }
}
