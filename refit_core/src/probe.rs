//! Stream probing via ffprobe, with exiftool as the secondary source.
//!
//! Assessment and the video strategy both consume `StreamInfo`; the fields
//! are the subset the decision engine actually reads (dimensions, frame
//! count, bitrate, codec, audio presence).

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Result};
use tracing::debug;

use crate::cancel::CancelToken;
use crate::subprocess::run_tool;
use crate::tools::Toolchain;

const PROBE_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Default)]
pub struct StreamInfo {
    pub format_name: String,
    pub duration: f64,
    pub bit_rate: u64,
    pub video_codec: String,
    pub width: u32,
    pub height: u32,
    pub frame_count: u64,
    pub has_audio: bool,
    pub video_bit_rate: Option<u64>,
}

impl StreamInfo {
    /// Bitrate to grade on: the video stream's own rate when the container
    /// reports it, else the container rate.
    pub fn effective_bit_rate(&self) -> u64 {
        self.video_bit_rate.unwrap_or(self.bit_rate)
    }

    pub fn has_odd_dimension(&self) -> bool {
        (self.width % 2 == 1) || (self.height % 2 == 1)
    }
}

pub fn probe_stream(tools: &Toolchain, path: &Path, cancel: &CancelToken) -> Result<StreamInfo> {
    let args = vec![
        "-v".to_string(),
        "error".to_string(),
        "-print_format".to_string(),
        "json".to_string(),
        "-show_format".to_string(),
        "-show_streams".to_string(),
        "--".to_string(),
        path.display().to_string(),
    ];
    let out = run_tool(&tools.ffprobe, &args, cancel, Some(PROBE_TIMEOUT))?;
    if !out.success() {
        return Err(anyhow!(
            "ffprobe failed for {}: {}",
            path.display(),
            out.stderr.trim()
        ));
    }
    parse_ffprobe_json(&out.stdout)
}

pub fn parse_ffprobe_json(json_str: &str) -> Result<StreamInfo> {
    let json: serde_json::Value = serde_json::from_str(json_str)?;

    let format = &json["format"];
    let format_name = format["format_name"].as_str().unwrap_or("unknown").to_string();
    let duration = format["duration"]
        .as_str()
        .and_then(|s| s.parse::<f64>().ok())
        .unwrap_or(0.0);
    let bit_rate = format["bit_rate"]
        .as_str()
        .and_then(|s| s.parse::<u64>().ok())
        .unwrap_or(0);

    let streams = json["streams"]
        .as_array()
        .ok_or_else(|| anyhow!("no streams in probe output"))?;

    let video_stream = streams
        .iter()
        .find(|s| s["codec_type"].as_str() == Some("video"))
        .ok_or_else(|| anyhow!("no video stream in probe output"))?;

    let video_codec = video_stream["codec_name"].as_str().unwrap_or("unknown").to_string();
    let width = video_stream["width"].as_u64().unwrap_or(0) as u32;
    let height = video_stream["height"].as_u64().unwrap_or(0) as u32;

    let frame_rate = parse_frame_rate(video_stream["r_frame_rate"].as_str().unwrap_or("0/1"));
    let frame_count = video_stream["nb_frames"]
        .as_str()
        .and_then(|s| s.parse::<u64>().ok())
        .unwrap_or((duration * frame_rate) as u64);

    let video_bit_rate = video_stream["bit_rate"]
        .as_str()
        .and_then(|s| s.parse::<u64>().ok());

    let has_audio = streams
        .iter()
        .any(|s| s["codec_type"].as_str() == Some("audio"));

    Ok(StreamInfo {
        format_name,
        duration,
        bit_rate,
        video_codec,
        width,
        height,
        frame_count,
        has_audio,
        video_bit_rate,
    })
}

fn parse_frame_rate(s: &str) -> f64 {
    if let Some((num, den)) = s.split_once('/') {
        let num = num.parse::<f64>().unwrap_or(0.0);
        let den = den.parse::<f64>().unwrap_or(0.0);
        if den > 0.0 && num > 0.0 {
            return num / den;
        }
        return 0.0;
    }
    s.parse::<f64>().unwrap_or(0.0)
}

/// Image stream frame count: ffprobe is primary, exiftool the fallback.
/// `None` when neither tool can say.
pub fn probe_frame_count(tools: &Toolchain, path: &Path, cancel: &CancelToken) -> Option<u64> {
    let args = vec![
        "-v".to_string(),
        "error".to_string(),
        "-select_streams".to_string(),
        "v:0".to_string(),
        "-count_packets".to_string(),
        "-show_entries".to_string(),
        "stream=nb_read_packets".to_string(),
        "-of".to_string(),
        "default=noprint_wrappers=1:nokey=1".to_string(),
        "--".to_string(),
        path.display().to_string(),
    ];
    if let Ok(out) = run_tool(&tools.ffprobe, &args, cancel, Some(PROBE_TIMEOUT)) {
        if out.success() {
            if let Ok(n) = out.stdout.trim().parse::<u64>() {
                return Some(n);
            }
        }
    }

    debug!(path = %path.display(), "ffprobe frame count failed; trying exiftool");
    let args = vec![
        "-s3".to_string(),
        "-FrameCount".to_string(),
        path.display().to_string(),
    ];
    let out = run_tool(&tools.exiftool, &args, cancel, Some(PROBE_TIMEOUT)).ok()?;
    if out.success() {
        out.stdout.trim().parse::<u64>().ok()
    } else {
        None
    }
}

/// Image dimensions for bpp grading. ffprobe handles every raster format we
/// accept; a miss degrades the grade to Unknown upstream.
pub fn probe_dimensions(tools: &Toolchain, path: &Path, cancel: &CancelToken) -> Option<(u32, u32)> {
    let args = vec![
        "-v".to_string(),
        "error".to_string(),
        "-select_streams".to_string(),
        "v:0".to_string(),
        "-show_entries".to_string(),
        "stream=width,height".to_string(),
        "-of".to_string(),
        "csv=p=0:s=x".to_string(),
        "--".to_string(),
        path.display().to_string(),
    ];
    let out = run_tool(&tools.ffprobe, &args, cancel, Some(PROBE_TIMEOUT)).ok()?;
    if !out.success() {
        return None;
    }
    let line = out.stdout.trim().lines().next()?;
    let (w, h) = line.split_once('x')?;
    Some((w.trim().parse().ok()?, h.trim().parse().ok()?))
}

/// Spatial (immersive) images declare their projection in metadata.
pub fn is_spatial_image(tools: &Toolchain, path: &Path, cancel: &CancelToken) -> bool {
    let args = vec![
        "-s3".to_string(),
        "-ProjectionType".to_string(),
        path.display().to_string(),
    ];
    match run_tool(&tools.exiftool, &args, cancel, Some(PROBE_TIMEOUT)) {
        Ok(out) if out.success() => {
            let projection = out.stdout.trim().to_lowercase();
            projection.contains("equirectangular") || projection.contains("cubemap")
        }
        _ => false,
    }
}

const LIVE_PHOTO_STILL_EXTS: &[&str] = &["heic", "heif"];
const LIVE_PHOTO_MOTION_EXTS: &[&str] = &["mov", "mp4"];

/// Live Photo pairs share a stem: `IMG_1234.HEIC` + `IMG_1234.MOV`. Both
/// halves are skipped; converting either breaks the pairing.
pub fn live_photo_companion(path: &Path) -> Option<PathBuf> {
    let ext = path.extension()?.to_str()?.to_lowercase();
    let companions: &[&str] = if LIVE_PHOTO_STILL_EXTS.contains(&ext.as_str()) {
        LIVE_PHOTO_MOTION_EXTS
    } else if LIVE_PHOTO_MOTION_EXTS.contains(&ext.as_str()) {
        LIVE_PHOTO_STILL_EXTS
    } else {
        return None;
    };

    for companion_ext in companions {
        for candidate_ext in [
            companion_ext.to_string(),
            companion_ext.to_uppercase(),
        ] {
            let candidate = path.with_extension(&candidate_ext);
            if candidate.is_file() {
                return Some(candidate);
            }
        }
    }
    None
}

pub fn is_live_photo_half(path: &Path) -> bool {
    live_photo_companion(path).is_some()
}
