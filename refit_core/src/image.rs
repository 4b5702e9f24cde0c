//! Image encoding attempts.
//!
//! Stills target JXL when cjxl is on the host and AVIF otherwise; animated
//! inputs always target AVIF (AV1 in an image container). Efficiency mode
//! races a lossless candidate against the first lossy rung and hands both
//! sizes to the smart decision; an `ExploreFurther` verdict walks the rest
//! of the ladder keeping the best result under the original size.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use tracing::{debug, info};

use crate::cancel::CancelToken;
use crate::decide::{
    adaptive_threshold, smart_decision, EffectiveMode, SmartChoice, ANIMATED_CRF_LADDER,
    STATIC_QUALITY_LADDER,
};
use crate::stats::RunStats;
use crate::subprocess::{run_tool, tail_of};
use crate::task::{FileTask, MediaType};
use crate::tools::Toolchain;

const IMAGE_ENCODE_TIMEOUT: Duration = Duration::from_secs(600);

/// One finished encode candidate sitting in the scratch dir.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub path: PathBuf,
    pub size: u64,
    pub tag: String,
}

#[derive(Debug)]
pub enum ImageOutcome {
    Winner(Candidate),
    /// Every candidate came out at least as large as the original.
    NoGain { best_size: u64, tag: String },
    Failed(String),
}

/// File extension the winning output will carry.
pub fn target_ext(tools: &Toolchain, media_type: MediaType) -> &'static str {
    match media_type {
        MediaType::Static if tools.cjxl.is_some() => "jxl",
        _ => "avif",
    }
}

pub fn convert_image(
    tools: &Toolchain,
    task: &FileTask,
    mode: EffectiveMode,
    scratch: &Path,
    stats: &RunStats,
    cancel: &CancelToken,
) -> Result<ImageOutcome> {
    match mode {
        EffectiveMode::Quality => quality_convert(tools, task, scratch, cancel),
        EffectiveMode::Efficiency => efficiency_convert(tools, task, scratch, stats, cancel),
        EffectiveMode::Sticker => sticker_convert(tools, task, scratch, cancel),
    }
}

fn quality_convert(
    tools: &Toolchain,
    task: &FileTask,
    scratch: &Path,
    cancel: &CancelToken,
) -> Result<ImageOutcome> {
    match encode_lossless(tools, task, scratch, cancel) {
        Ok(Some(candidate)) => Ok(ImageOutcome::Winner(candidate)),
        Ok(None) => Ok(ImageOutcome::Failed(
            "no lossless encoder produced output".to_string(),
        )),
        Err(e) => Err(e),
    }
}

fn efficiency_convert(
    tools: &Toolchain,
    task: &FileTask,
    scratch: &Path,
    stats: &RunStats,
    cancel: &CancelToken,
) -> Result<ImageOutcome> {
    let ladder = lossy_ladder(task);
    let first_step = ladder[0];

    // Lossless and the opening lossy bid race in parallel; per-file latency
    // is dominated by the slower of the two, not their sum.
    let (lossless, lossy) = std::thread::scope(|s| {
        let lossless_handle =
            s.spawn(|| encode_lossless(tools, task, scratch, cancel).ok().flatten());
        let lossy_handle =
            s.spawn(move || encode_lossy(tools, task, scratch, first_step, cancel).ok().flatten());
        (
            lossless_handle.join().unwrap_or(None),
            lossy_handle.join().unwrap_or(None),
        )
    });

    if cancel.is_cancelled() {
        return Err(crate::error::EngineError::Cancelled.into());
    }

    let threshold = adaptive_threshold(&task.mime, task.size);
    let lossless_size = lossless.as_ref().map(|c| c.size).unwrap_or(0);
    let lossy_size = lossy.as_ref().map(|c| c.size).unwrap_or(0);
    let choice = smart_decision(task.size, lossless_size, lossy_size, threshold);
    stats.inc_smart_decision();
    debug!(
        path = %task.path.display(),
        original = task.size,
        lossless = lossless_size,
        lossy = lossy_size,
        threshold,
        choice = ?choice,
        "Smart decision"
    );

    match choice {
        SmartChoice::Fail => Ok(ImageOutcome::Failed(
            "both lossless and lossy candidates failed".to_string(),
        )),
        c if c.picks_lossless() => {
            stats.inc_lossless_win();
            Ok(ImageOutcome::Winner(lossless.expect("lossless candidate present")))
        }
        SmartChoice::UseLossyAcceptable => {
            Ok(ImageOutcome::Winner(lossy.expect("lossy candidate present")))
        }
        _explore => {
            explore_ladder(tools, task, scratch, &ladder[1..], [lossless, lossy], cancel)
        }
    }
}

/// Walk the remaining lossy rungs, keeping the smallest candidate seen. Only
/// a candidate strictly under the original counts as a win here.
fn explore_ladder(
    tools: &Toolchain,
    task: &FileTask,
    scratch: &Path,
    remaining: &[u32],
    seeds: [Option<Candidate>; 2],
    cancel: &CancelToken,
) -> Result<ImageOutcome> {
    let mut best: Option<Candidate> = seeds
        .into_iter()
        .flatten()
        .min_by_key(|c| c.size);

    for &step in remaining {
        if cancel.is_cancelled() {
            return Err(crate::error::EngineError::Cancelled.into());
        }
        // Exploration exists because nothing has cleared the 80% bar yet;
        // stop as soon as a rung does.
        if best
            .as_ref()
            .is_some_and(|b| (b.size as f64) < task.size as f64 * 0.8)
        {
            break;
        }
        if let Some(candidate) = encode_lossy(tools, task, scratch, step, cancel)? {
            if best.as_ref().is_none_or(|b| candidate.size < b.size) {
                best = Some(candidate);
            }
        }
    }

    match best {
        Some(c) if c.size < task.size => {
            info!(path = %task.path.display(), tag = %c.tag, "Ladder exploration found a win");
            Ok(ImageOutcome::Winner(c))
        }
        Some(c) => Ok(ImageOutcome::NoGain {
            best_size: c.size,
            tag: c.tag,
        }),
        None => Ok(ImageOutcome::Failed("every ladder step failed".to_string())),
    }
}

fn sticker_convert(
    tools: &Toolchain,
    task: &FileTask,
    scratch: &Path,
    cancel: &CancelToken,
) -> Result<ImageOutcome> {
    // Most aggressive rung, no comparison pass.
    let step = *lossy_ladder(task).last().expect("ladder is non-empty");
    match encode_lossy(tools, task, scratch, step, cancel)? {
        Some(c) => Ok(ImageOutcome::Winner(c)),
        None => Ok(ImageOutcome::Failed("sticker encode failed".to_string())),
    }
}

fn lossy_ladder(task: &FileTask) -> [u32; 3] {
    match task.media_type {
        MediaType::Animated => ANIMATED_CRF_LADDER,
        _ => STATIC_QUALITY_LADDER,
    }
}

/// Lossless candidate: JXL (effort 9, distance 0) for stills with cjxl,
/// AV1 `-crf 0` otherwise. Returns Ok(None) on a failed-but-survivable
/// encode so the caller can fall through.
fn encode_lossless(
    tools: &Toolchain,
    task: &FileTask,
    scratch: &Path,
    cancel: &CancelToken,
) -> Result<Option<Candidate>> {
    if task.media_type == MediaType::Static {
        if let Some(ref cjxl) = tools.cjxl {
            let out_path = scratch.join("lossless.jxl");
            let args = vec![
                task.path.display().to_string(),
                out_path.display().to_string(),
                "-e".to_string(),
                "9".to_string(),
                "-d".to_string(),
                "0".to_string(),
            ];
            let out = run_tool(cjxl, &args, cancel, Some(IMAGE_ENCODE_TIMEOUT))?;
            if let Some(c) = candidate_from(&out_path, "JXL-Lossless", out.success()) {
                return Ok(Some(c));
            }
            debug!(path = %task.path.display(), "cjxl lossless failed; falling back to AVIF");
        }
    }

    // Generic lossless re-encode through ffmpeg's AV1 path.
    let out_path = scratch.join("lossless.avif");
    let mut args = ffmpeg_base_args(&task.path);
    if task.media_type == MediaType::Animated && tools.has_libsvtav1 {
        // qp 0 with a fast preset; animations are long encodes even lossless.
        args.extend(str_args(&["-c:v", "libsvtav1", "-qp", "0", "-preset", "8"]));
    } else {
        args.extend(str_args(&["-c:v", "libaom-av1", "-crf", "0", "-b:v", "0"]));
    }
    args.push(out_path.display().to_string());
    let out = run_tool(&tools.ffmpeg, &args, cancel, Some(IMAGE_ENCODE_TIMEOUT))?;
    Ok(candidate_from(&out_path, "AVIF-Lossless", out.success()))
}

/// One lossy rung. Stills interpret `step` as a quality (higher = better);
/// animated inputs interpret it as a CRF (higher = smaller).
fn encode_lossy(
    tools: &Toolchain,
    task: &FileTask,
    scratch: &Path,
    step: u32,
    cancel: &CancelToken,
) -> Result<Option<Candidate>> {
    if task.media_type == MediaType::Static {
        if let Some(ref cjxl) = tools.cjxl {
            let out_path = scratch.join(format!("lossy_q{step}.jxl"));
            let args = vec![
                task.path.display().to_string(),
                out_path.display().to_string(),
                "-q".to_string(),
                step.to_string(),
            ];
            let out = run_tool(cjxl, &args, cancel, Some(IMAGE_ENCODE_TIMEOUT))?;
            return Ok(candidate_from(&out_path, &format!("JXL-Q{step}"), out.success()));
        }

        let out_path = scratch.join(format!("lossy_q{step}.avif"));
        let mut args = ffmpeg_base_args(&task.path);
        args.extend(str_args(&["-c:v", "libaom-av1", "-b:v", "0"]));
        args.push("-crf".to_string());
        args.push(quality_to_aom_crf(step).to_string());
        args.push(out_path.display().to_string());
        let out = run_tool(&tools.ffmpeg, &args, cancel, Some(IMAGE_ENCODE_TIMEOUT))?;
        return Ok(candidate_from(&out_path, &format!("AVIF-Q{step}"), out.success()));
    }

    let out_path = scratch.join(format!("lossy_crf{step}.avif"));
    let mut args = ffmpeg_base_args(&task.path);
    if tools.has_libsvtav1 {
        args.extend(str_args(&["-c:v", "libsvtav1", "-preset", "8"]));
    } else {
        args.extend(str_args(&["-c:v", "libaom-av1", "-b:v", "0"]));
    }
    args.push("-crf".to_string());
    args.push(step.to_string());
    args.push(out_path.display().to_string());
    let out = run_tool(&tools.ffmpeg, &args, cancel, Some(IMAGE_ENCODE_TIMEOUT))?;
    if !out.success() {
        debug!(path = %task.path.display(), step, error = %tail_of(&out.stderr), "Animated encode step failed");
    }
    Ok(candidate_from(&out_path, &format!("AVIF-CRF{step}"), out.success()))
}

/// Map a 0-100 quality to libaom's 0-63 CRF scale (inverted).
pub fn quality_to_aom_crf(quality: u32) -> u32 {
    ((100 - quality.min(100)) / 2).min(63)
}

fn ffmpeg_base_args(input: &Path) -> Vec<String> {
    vec![
        "-hide_banner".to_string(),
        "-y".to_string(),
        "-i".to_string(),
        input.display().to_string(),
    ]
}

fn str_args(args: &[&str]) -> Vec<String> {
    args.iter().map(|s| s.to_string()).collect()
}

fn candidate_from(path: &Path, tag: &str, tool_succeeded: bool) -> Option<Candidate> {
    if !tool_succeeded {
        return None;
    }
    let size = fs::metadata(path).ok()?.len();
    if size == 0 {
        return None;
    }
    Some(Candidate {
        path: path.to_path_buf(),
        size,
        tag: tag.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_ext_prefers_jxl_for_stills_with_cjxl() {
        let mut tools = Toolchain::unavailable();
        assert_eq!(target_ext(&tools, MediaType::Static), "avif");

        tools.cjxl = Some(PathBuf::from("/usr/local/bin/cjxl"));
        assert_eq!(target_ext(&tools, MediaType::Static), "jxl");
        // Animated inputs never go to JXL.
        assert_eq!(target_ext(&tools, MediaType::Animated), "avif");
    }

    #[test]
    fn test_quality_to_aom_crf_mapping() {
        assert_eq!(quality_to_aom_crf(100), 0);
        assert_eq!(quality_to_aom_crf(80), 10);
        assert_eq!(quality_to_aom_crf(65), 17);
        assert_eq!(quality_to_aom_crf(50), 25);
        assert_eq!(quality_to_aom_crf(0), 50);
        // Out-of-range input saturates instead of underflowing.
        assert_eq!(quality_to_aom_crf(200), 0);
    }

    #[test]
    fn test_candidate_rejects_missing_and_empty_outputs() {
        let temp = tempfile::TempDir::new().unwrap();
        let missing = temp.path().join("none.avif");
        assert!(candidate_from(&missing, "T", true).is_none());

        let empty = temp.path().join("empty.avif");
        fs::write(&empty, b"").unwrap();
        assert!(candidate_from(&empty, "T", true).is_none());

        let good = temp.path().join("good.avif");
        fs::write(&good, b"data").unwrap();
        assert!(candidate_from(&good, "T", false).is_none());
        let c = candidate_from(&good, "AVIF-Q80", true).unwrap();
        assert_eq!(c.size, 4);
        assert_eq!(c.tag, "AVIF-Q80");
    }
}
