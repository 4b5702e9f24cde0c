//! Conversion worker: one task at a time from skip-check through commit.
//!
//! A worker exclusively owns its task's stem until the outcome goes onto
//! the results channel, so no two workers ever race on one file. Failures
//! retry the whole per-file pipeline with linear backoff; only cancellation
//! escapes without producing an outcome.

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use anyhow::Result;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use tracing::{debug, info, warn};

use crate::cancel::CancelToken;
use crate::commit::{commit_replace, CommitRequest, CommitResult};
use crate::config::RunConfig;
use crate::decide::{resolve_mode, EffectiveMode};
use crate::error::EngineError;
use crate::image::{self, Candidate, ImageOutcome};
use crate::outcome::{ConversionOutcome, Decision};
use crate::probe;
use crate::stats::RunStats;
use crate::task::{FileTask, MediaType};
use crate::tools::Toolchain;
use crate::video::{self, VideoOutcome};

const RECV_TICK: Duration = Duration::from_millis(200);
const THROTTLE_TICK: Duration = Duration::from_millis(500);

/// Everything a conversion worker needs, shared by reference.
pub struct ConvertCtx<'a> {
    pub config: &'a RunConfig,
    pub tools: &'a Toolchain,
    pub stats: &'a RunStats,
    pub cancel: &'a CancelToken,
    pub temp_root: &'a Path,
    /// Raised by the memory watchdog; workers pause before new tasks.
    pub throttle: &'a AtomicBool,
    /// Number of workers mid-task; the hang detector reads it.
    pub active_workers: &'a AtomicUsize,
    /// This worker's index among the conversion slots.
    pub worker_slot: usize,
    /// Watchdog-adjusted concurrency. Slots at or past it sit out until the
    /// count recovers.
    pub effective_jobs: &'a AtomicUsize,
}

pub fn run_conversion_worker(
    ctx: &ConvertCtx<'_>,
    work_rx: Receiver<FileTask>,
    results_tx: Sender<ConversionOutcome>,
) {
    loop {
        let task = match work_rx.recv_timeout(RECV_TICK) {
            Ok(task) => task,
            Err(RecvTimeoutError::Timeout) => {
                if ctx.cancel.is_cancelled() {
                    return;
                }
                continue;
            }
            Err(RecvTimeoutError::Disconnected) => return,
        };

        wait_for_throttle(ctx);
        if ctx.cancel.is_cancelled() {
            return;
        }

        ctx.active_workers.fetch_add(1, Ordering::SeqCst);
        let outcome = process_task(ctx, &task);
        ctx.active_workers.fetch_sub(1, Ordering::SeqCst);

        match outcome {
            Some(outcome) => {
                if results_tx.send(outcome).is_err() {
                    return;
                }
            }
            // Cancelled mid-task: no record, the run is winding down.
            None => return,
        }
    }
}

fn wait_for_throttle(ctx: &ConvertCtx<'_>) {
    while !ctx.cancel.is_cancelled()
        && (ctx.throttle.load(Ordering::SeqCst)
            || ctx.worker_slot >= ctx.effective_jobs.load(Ordering::SeqCst))
    {
        debug!(slot = ctx.worker_slot, "Worker paused by watchdog");
        thread::sleep(THROTTLE_TICK);
    }
}

/// Full per-file pipeline with retries. `None` means the run was cancelled
/// before a terminal outcome existed.
pub fn process_task(ctx: &ConvertCtx<'_>, task: &FileTask) -> Option<ConversionOutcome> {
    let max_retries = ctx.config.max_retries;
    for attempt in 0..=max_retries {
        match convert_once(ctx, task) {
            Ok(outcome) => {
                if outcome.decision == Decision::Fail && attempt < max_retries {
                    let backoff = Duration::from_secs(attempt as u64 + 1);
                    warn!(
                        path = %task.path.display(),
                        attempt = attempt + 1,
                        error = ?outcome.error,
                        "Conversion failed; retrying after backoff"
                    );
                    thread::sleep(backoff);
                    continue;
                }
                if attempt > 0 && outcome.decision != Decision::Fail {
                    ctx.stats.inc_retry_success();
                }
                return Some(outcome);
            }
            Err(_) => return None,
        }
    }
    unreachable!("retry loop always returns on the final attempt")
}

/// One shot through skip-check, encode and commit. Per-file failures come
/// back as FAIL outcomes; `Err` is reserved for cancellation.
fn convert_once(ctx: &ConvertCtx<'_>, task: &FileTask) -> Result<ConversionOutcome> {
    if ctx.cancel.is_cancelled() {
        return Err(EngineError::Cancelled.into());
    }

    // Defense in depth: assessment already filters Live Photo halves, but a
    // pair straddling a resume boundary could slip one half through.
    if probe::is_live_photo_half(&task.path) {
        return Ok(ConversionOutcome::skip(&task.path, task.size, "live-photo"));
    }

    let mode = resolve_mode(ctx.config.mode, task);

    match task.media_type {
        MediaType::Static | MediaType::Animated => convert_image_task(ctx, task, mode),
        MediaType::Video => convert_video_task(ctx, task, mode),
    }
}

fn convert_image_task(
    ctx: &ConvertCtx<'_>,
    task: &FileTask,
    mode: EffectiveMode,
) -> Result<ConversionOutcome> {
    let target = image::target_ext(ctx.tools, task.media_type);

    // Already a modern image format (covers the identical-extension no-op
    // like .avif -> .avif as well).
    if task.ext == target || task.ext == "avif" || task.ext == "jxl" {
        return Ok(ConversionOutcome::skip(&task.path, task.size, "already-target-format"));
    }
    if let Some(existing) = same_stem_target(task, target) {
        debug!(path = %task.path.display(), existing = %existing, "Same-stem target already present");
        return Ok(ConversionOutcome::skip(&task.path, task.size, "target-exists"));
    }

    let scratch = match new_scratch(ctx.temp_root, task) {
        Ok(s) => s,
        Err(e) => return Ok(ConversionOutcome::fail(&task.path, task.size, "", e.to_string())),
    };

    let result = image::convert_image(ctx.tools, task, mode, scratch.path(), ctx.stats, ctx.cancel);
    match result {
        Ok(ImageOutcome::Winner(candidate)) => {
            commit_candidate(ctx, task, mode, candidate, target, Decision::Success)
        }
        Ok(ImageOutcome::NoGain { best_size, tag }) => Ok(ConversionOutcome::skip_larger(
            &task.path, task.size, best_size, &tag,
        )),
        Ok(ImageOutcome::Failed(reason)) => {
            Ok(ConversionOutcome::fail(&task.path, task.size, "", reason))
        }
        Err(e) => propagate_cancel_or_fail(task, e),
    }
}

fn convert_video_task(
    ctx: &ConvertCtx<'_>,
    task: &FileTask,
    mode: EffectiveMode,
) -> Result<ConversionOutcome> {
    if let Some(existing) = same_stem_target(task, video::VIDEO_TARGET_EXT) {
        debug!(path = %task.path.display(), existing = %existing, "Same-stem target already present");
        return Ok(ConversionOutcome::skip(&task.path, task.size, "target-exists"));
    }

    let scratch = match new_scratch(ctx.temp_root, task) {
        Ok(s) => s,
        Err(e) => return Ok(ConversionOutcome::fail(&task.path, task.size, "", e.to_string())),
    };

    let result = match probe::probe_stream(ctx.tools, &task.path, ctx.cancel) {
        Ok(info) => {
            if video::is_already_modern(&info) {
                return Ok(ConversionOutcome::skip(&task.path, task.size, "already-target-format"));
            }
            video::convert_with_info(
                ctx.tools,
                task,
                &info,
                mode,
                ctx.config.crf,
                ctx.config.hw_accel,
                scratch.path(),
                ctx.cancel,
            )
        }
        Err(e) => {
            warn!(path = %task.path.display(), error = %e, "Probe failed; attempting repair remux");
            video::attempt_repair(ctx.tools, task, scratch.path(), ctx.cancel)
        }
    };

    match result {
        Ok(VideoOutcome::Winner(candidate)) => commit_candidate(
            ctx,
            task,
            mode,
            candidate,
            video::VIDEO_TARGET_EXT,
            Decision::Success,
        ),
        Ok(VideoOutcome::Repaired(candidate)) => commit_candidate(
            ctx,
            task,
            mode,
            candidate,
            video::VIDEO_TARGET_EXT,
            Decision::RepairedRemux,
        ),
        Ok(VideoOutcome::Failed(reason)) => {
            Ok(ConversionOutcome::fail(&task.path, task.size, "", reason))
        }
        Err(e) => propagate_cancel_or_fail(task, e),
    }
}

fn commit_candidate(
    ctx: &ConvertCtx<'_>,
    task: &FileTask,
    mode: EffectiveMode,
    candidate: Candidate,
    target_ext: &str,
    success_decision: Decision,
) -> Result<ConversionOutcome> {
    // Quality mode replaces valid output unconditionally; repair always
    // replaces because the original is unreadable anyway.
    let unconditional =
        mode == EffectiveMode::Quality || success_decision == Decision::RepairedRemux;

    let request = CommitRequest {
        original: &task.path,
        original_size: task.size,
        output: &candidate.path,
        new_ext: target_ext,
        target_dir: &ctx.config.target_dir,
        enable_backup: ctx.config.enable_backups,
        replace_unconditionally: unconditional,
    };

    match commit_replace(ctx.tools, &request, ctx.cancel) {
        Ok(CommitResult::Replaced { new_path, new_size }) => {
            info!(
                path = %task.path.display(),
                new_path = %new_path.display(),
                tag = %candidate.tag,
                "File replaced"
            );
            let outcome = if success_decision == Decision::RepairedRemux {
                ConversionOutcome::repaired(&task.path, task.size, new_path, new_size, &candidate.tag)
            } else {
                ConversionOutcome::success(&task.path, task.size, new_path, new_size, &candidate.tag)
            };
            Ok(outcome)
        }
        Ok(CommitResult::RejectedLarger { candidate_size }) => Ok(
            ConversionOutcome::skip_larger(&task.path, task.size, candidate_size, &candidate.tag),
        ),
        Err(e) => {
            if is_cancelled(&e) {
                return Err(e);
            }
            // Commit aborts leave the original untouched.
            Ok(ConversionOutcome::fail(
                &task.path,
                task.size,
                &candidate.tag,
                format!("commit aborted: {e}"),
            ))
        }
    }
}

/// A finished `<stem>.<target_ext>` sitting beside the original means some
/// earlier run (or the user) already produced the target.
fn same_stem_target(task: &FileTask, target_ext: &str) -> Option<String> {
    let parent = task.path.parent()?;
    let sibling = parent.join(format!("{}.{}", task.stem(), target_ext));
    if sibling != task.path && sibling.is_file() {
        Some(sibling.display().to_string())
    } else {
        None
    }
}

/// Per-task scratch dir named after the stem so a wedged run's leftovers are
/// attributable at a glance.
fn new_scratch(temp_root: &Path, task: &FileTask) -> std::io::Result<tempfile::TempDir> {
    tempfile::Builder::new()
        .prefix(&format!("{}_", task.stem()))
        .tempdir_in(temp_root)
}

fn is_cancelled(e: &anyhow::Error) -> bool {
    matches!(e.downcast_ref::<EngineError>(), Some(EngineError::Cancelled))
}

fn propagate_cancel_or_fail(task: &FileTask, e: anyhow::Error) -> Result<ConversionOutcome> {
    if is_cancelled(&e) {
        Err(e)
    } else {
        Ok(ConversionOutcome::fail(&task.path, task.size, "", e.to_string()))
    }
}
