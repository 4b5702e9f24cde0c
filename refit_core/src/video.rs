//! Video encoding: fixed-order fallback chains per mode.
//!
//! Quality: HEVC lossless -> AV1 lossless -> remux. Efficiency: HEVC CRF ->
//! AV1 CRF 35 -> remux -> video-only. The first attempt that leaves a
//! non-empty file wins and names the outcome tag. AV1 attempts are gated on
//! the host ffmpeg carrying libsvtav1; every attempt runs under the same
//! wall-clock deadline and the run-wide cancel token.

use std::env;
use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use tracing::{debug, info, warn};

use crate::cancel::CancelToken;
use crate::decide::{EffectiveMode, VIDEO_AV1_CRF};
use crate::error::EngineError;
use crate::image::Candidate;
use crate::probe::StreamInfo;
use crate::subprocess::{run_tool, tail_of};
use crate::task::FileTask;
use crate::tools::Toolchain;

/// Per-attempt wall clock. One wedged encoder must not stall the run.
pub const DEFAULT_ENCODE_TIMEOUT_SECS: u64 = 1800;
pub const TIMEOUT_ENV_VAR: &str = "MAX_VIDEO_TASK_SECONDS";

/// Output container for every video attempt.
pub const VIDEO_TARGET_EXT: &str = "mov";

pub fn encode_timeout() -> Duration {
    let secs = env::var(TIMEOUT_ENV_VAR)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .filter(|&s| s > 0)
        .unwrap_or(DEFAULT_ENCODE_TIMEOUT_SECS);
    Duration::from_secs(secs)
}

#[derive(Debug)]
pub enum VideoOutcome {
    Winner(Candidate),
    /// The container was broken but a stream-copy remux salvaged it.
    Repaired(Candidate),
    Failed(String),
}

/// Already HEVC/AV1 in a modern container: re-encoding burns hours for
/// nothing, and a lossless re-encode of lossy HEVC is strictly worse.
pub fn is_already_modern(info: &StreamInfo) -> bool {
    matches!(info.video_codec.as_str(), "hevc" | "h265" | "av1")
}

/// One attempt in the chain.
#[derive(Debug, Clone)]
struct Attempt {
    tag: String,
    /// Encoder/audio args between input and output.
    codec_args: Vec<String>,
    /// Stream-copy attempts must not carry a pad filter.
    reencodes: bool,
}

/// Run the fallback chain for a video whose probe succeeded. Callers that
/// could not probe the file go through `attempt_repair` instead.
pub fn convert_with_info(
    tools: &Toolchain,
    task: &FileTask,
    info: &StreamInfo,
    mode: EffectiveMode,
    crf: u32,
    hw_accel: bool,
    scratch: &Path,
    cancel: &CancelToken,
) -> Result<VideoOutcome> {
    let chain = build_chain(tools, mode, crf);
    if chain.is_empty() {
        return Ok(VideoOutcome::Failed(
            "no usable video encoder on this host".to_string(),
        ));
    }

    let pad = info.has_odd_dimension();
    if pad {
        debug!(
            path = %task.path.display(),
            width = info.width,
            height = info.height,
            "Odd dimensions; padding to even before encode"
        );
    }

    let deadline = encode_timeout();
    let mut last_error = String::new();
    for (index, attempt) in chain.iter().enumerate() {
        if cancel.is_cancelled() {
            return Err(EngineError::Cancelled.into());
        }
        let out_path = scratch.join(format!("attempt_{index}.{VIDEO_TARGET_EXT}"));
        let args = assemble_args(&task.path, &out_path, attempt, pad, hw_accel);

        match run_tool(&tools.ffmpeg, &args, cancel, Some(deadline)) {
            Ok(out) if out.success() => {
                if let Ok(meta) = std::fs::metadata(&out_path) {
                    if meta.len() > 0 {
                        info!(path = %task.path.display(), tag = %attempt.tag, "Video attempt succeeded");
                        return Ok(VideoOutcome::Winner(Candidate {
                            path: out_path,
                            size: meta.len(),
                            tag: attempt.tag.clone(),
                        }));
                    }
                }
                last_error = format!("{}: produced empty output", attempt.tag);
            }
            Ok(out) => {
                last_error = format!("{}: {}", attempt.tag, tail_of(&out.stderr));
                debug!(path = %task.path.display(), tag = %attempt.tag, error = %last_error, "Attempt failed; falling through");
            }
            Err(e) => {
                if let Some(EngineError::Cancelled) = e.downcast_ref::<EngineError>() {
                    return Err(e);
                }
                // Timeout or spawn failure: treated as attempt failure.
                last_error = format!("{}: {}", attempt.tag, e);
                warn!(path = %task.path.display(), tag = %attempt.tag, error = %e, "Attempt aborted; falling through");
            }
        }
    }

    Ok(VideoOutcome::Failed(last_error))
}

fn build_chain(tools: &Toolchain, mode: EffectiveMode, crf: u32) -> Vec<Attempt> {
    let mut chain = Vec::new();
    match mode {
        EffectiveMode::Quality => {
            if tools.has_libx265 {
                chain.push(Attempt {
                    tag: "HEVC-Lossless".to_string(),
                    codec_args: str_args(&[
                        "-c:v", "libx265", "-x265-params", "lossless=1", "-preset", "medium",
                        "-c:a", "aac", "-b:a", "192k",
                    ]),
                    reencodes: true,
                });
            }
            if tools.has_libsvtav1 {
                chain.push(Attempt {
                    tag: "AV1-Lossless".to_string(),
                    codec_args: str_args(&[
                        "-c:v", "libsvtav1", "-qp", "0", "-preset", "7", "-c:a", "copy",
                    ]),
                    reencodes: true,
                });
            }
            chain.push(remux_attempt());
        }
        EffectiveMode::Efficiency | EffectiveMode::Sticker => {
            if tools.has_libx265 {
                chain.push(Attempt {
                    tag: format!("HEVC-CRF{crf}"),
                    codec_args: vec![
                        "-c:v".into(), "libx265".into(),
                        "-crf".into(), crf.to_string(),
                        "-preset".into(), "medium".into(),
                        "-c:a".into(), "aac".into(),
                        "-b:a".into(), "128k".into(),
                    ],
                    reencodes: true,
                });
            }
            if tools.has_libsvtav1 {
                chain.push(Attempt {
                    tag: format!("AV1-CRF{VIDEO_AV1_CRF}"),
                    codec_args: vec![
                        "-c:v".into(), "libsvtav1".into(),
                        "-crf".into(), VIDEO_AV1_CRF.to_string(),
                        "-preset".into(), "7".into(),
                        "-c:a".into(), "aac".into(),
                        "-b:a".into(), "128k".into(),
                    ],
                    reencodes: true,
                });
            }
            chain.push(remux_attempt());
            if tools.has_libx265 {
                // Last resort: drop audio, keep the picture.
                chain.push(Attempt {
                    tag: "HEVC-VideoOnly".to_string(),
                    codec_args: vec![
                        "-c:v".into(), "libx265".into(),
                        "-crf".into(), crf.to_string(),
                        "-preset".into(), "medium".into(),
                        "-an".into(),
                    ],
                    reencodes: true,
                });
            }
        }
    }
    chain
}

fn remux_attempt() -> Attempt {
    Attempt {
        tag: "REMUX-Fallback".to_string(),
        codec_args: str_args(&["-c", "copy"]),
        reencodes: false,
    }
}

fn assemble_args(
    input: &Path,
    output: &Path,
    attempt: &Attempt,
    pad: bool,
    hw_accel: bool,
) -> Vec<String> {
    let mut args = vec!["-hide_banner".to_string(), "-y".to_string()];

    // Hardware-assisted decode only; encoding stays software so two runs of
    // the same config produce the same streams.
    if hw_accel && attempt.reencodes && cfg!(target_os = "macos") {
        args.extend(str_args(&["-hwaccel", "videotoolbox"]));
    }

    args.push("-i".to_string());
    args.push(input.display().to_string());

    if pad && attempt.reencodes {
        args.extend(str_args(&["-vf", "pad=ceil(iw/2)*2:ceil(ih/2)*2"]));
    }

    args.extend(attempt.codec_args.iter().cloned());
    args.extend(str_args(&[
        "-movflags", "+faststart", "-avoid_negative_ts", "make_zero", "-map_metadata", "0",
    ]));
    args.push(output.display().to_string());
    args
}

/// Salvage attempt for a container the prober could not read: stream-copy
/// remux into a fresh container.
pub fn attempt_repair(
    tools: &Toolchain,
    task: &FileTask,
    scratch: &Path,
    cancel: &CancelToken,
) -> Result<VideoOutcome> {
    let out_path = scratch.join(format!("repair.{VIDEO_TARGET_EXT}"));
    let attempt = remux_attempt();
    let args = assemble_args(&task.path, &out_path, &attempt, false, false);
    match run_tool(&tools.ffmpeg, &args, cancel, Some(encode_timeout())) {
        Ok(out) if out.success() => {
            if let Ok(meta) = std::fs::metadata(&out_path) {
                if meta.len() > 0 {
                    info!(path = %task.path.display(), "Broken container salvaged by remux");
                    return Ok(VideoOutcome::Repaired(Candidate {
                        path: out_path,
                        size: meta.len(),
                        tag: "REMUX-Repair".to_string(),
                    }));
                }
            }
            Ok(VideoOutcome::Failed("repair remux produced empty output".to_string()))
        }
        Ok(out) => Ok(VideoOutcome::Failed(format!(
            "unreadable container, repair failed: {}",
            tail_of(&out.stderr)
        ))),
        Err(e) => {
            if let Some(EngineError::Cancelled) = e.downcast_ref::<EngineError>() {
                return Err(e);
            }
            Ok(VideoOutcome::Failed(format!("repair remux aborted: {e}")))
        }
    }
}

fn str_args(args: &[&str]) -> Vec<String> {
    args.iter().map(|s| s.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full_tools() -> Toolchain {
        let mut t = Toolchain::unavailable();
        t.has_libx265 = true;
        t.has_libsvtav1 = true;
        t
    }

    #[test]
    fn test_quality_chain_order() {
        let chain = build_chain(&full_tools(), EffectiveMode::Quality, 28);
        let tags: Vec<&str> = chain.iter().map(|a| a.tag.as_str()).collect();
        assert_eq!(tags, vec!["HEVC-Lossless", "AV1-Lossless", "REMUX-Fallback"]);
    }

    #[test]
    fn test_efficiency_chain_order_and_crf() {
        let chain = build_chain(&full_tools(), EffectiveMode::Efficiency, 28);
        let tags: Vec<&str> = chain.iter().map(|a| a.tag.as_str()).collect();
        assert_eq!(
            tags,
            vec!["HEVC-CRF28", "AV1-CRF35", "REMUX-Fallback", "HEVC-VideoOnly"]
        );
    }

    #[test]
    fn test_av1_attempts_gated_on_svtav1() {
        let mut tools = full_tools();
        tools.has_libsvtav1 = false;
        let chain = build_chain(&tools, EffectiveMode::Efficiency, 28);
        assert!(chain.iter().all(|a| !a.tag.starts_with("AV1")));
        // HEVC leads, so the first success tags HEVC-CRF28.
        assert_eq!(chain[0].tag, "HEVC-CRF28");
    }

    #[test]
    fn test_chain_without_any_encoder_still_remuxes() {
        let tools = Toolchain::unavailable();
        let chain = build_chain(&tools, EffectiveMode::Quality, 28);
        let tags: Vec<&str> = chain.iter().map(|a| a.tag.as_str()).collect();
        assert_eq!(tags, vec!["REMUX-Fallback"]);
    }

    #[test]
    fn test_pad_filter_applied_to_reencodes_only() {
        let chain = build_chain(&full_tools(), EffectiveMode::Efficiency, 28);
        let encode = &chain[0];
        let remux = chain.iter().find(|a| !a.reencodes).unwrap();

        let args = assemble_args(Path::new("/in.mp4"), Path::new("/out.mov"), encode, true, false);
        assert!(args.contains(&"pad=ceil(iw/2)*2:ceil(ih/2)*2".to_string()));

        let args = assemble_args(Path::new("/in.mp4"), Path::new("/out.mov"), remux, true, false);
        assert!(!args.iter().any(|a| a.contains("pad=")));
    }

    #[test]
    fn test_container_flags_always_present() {
        let chain = build_chain(&full_tools(), EffectiveMode::Quality, 28);
        for attempt in &chain {
            let args =
                assemble_args(Path::new("/in.mp4"), Path::new("/out.mov"), attempt, false, false);
            assert!(args.contains(&"+faststart".to_string()), "tag {}", attempt.tag);
            assert!(args.contains(&"make_zero".to_string()), "tag {}", attempt.tag);
        }
    }

    #[test]
    fn test_timeout_env_override() {
        // Env is process-global; restore it when done.
        let original = env::var(TIMEOUT_ENV_VAR).ok();
        env::set_var(TIMEOUT_ENV_VAR, "120");
        assert_eq!(encode_timeout(), Duration::from_secs(120));
        env::set_var(TIMEOUT_ENV_VAR, "not-a-number");
        assert_eq!(
            encode_timeout(),
            Duration::from_secs(DEFAULT_ENCODE_TIMEOUT_SECS)
        );
        match original {
            Some(v) => env::set_var(TIMEOUT_ENV_VAR, v),
            None => env::remove_var(TIMEOUT_ENV_VAR),
        }
    }

    #[test]
    fn test_already_modern_codecs() {
        let mut info = StreamInfo {
            video_codec: "hevc".to_string(),
            ..Default::default()
        };
        assert!(is_already_modern(&info));
        info.video_codec = "av1".to_string();
        assert!(is_already_modern(&info));
        info.video_codec = "h264".to_string();
        assert!(!is_already_modern(&info));
    }
}
