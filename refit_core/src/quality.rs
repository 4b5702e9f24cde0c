//! Perceptual quality grading.
//!
//! Images grade on bits per pixel (`size*8 / (w*h)`). Videos grade on
//! bitrate per pixel when the probe reports a usable bitrate, with absolute
//! bitrate bands as the fallback. Grading at a threshold boundary picks the
//! higher grade, so the classification is monotonic across the four cutoffs.

use crate::task::QualityGrade;

/// Anything under 5 KiB cannot hold meaningful image or video data at the
/// resolutions we care about.
pub const MIN_GRADABLE_SIZE: u64 = 5 * 1024;

/// Four descending cutoffs. Values above `extreme_high` grade ExtremeHigh,
/// below `low` grade ExtremeLow.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QualityThresholds {
    pub extreme_high: f64,
    pub high: f64,
    pub medium: f64,
    pub low: f64,
}

impl Default for QualityThresholds {
    fn default() -> Self {
        IMAGE_BPP_THRESHOLDS
    }
}

/// Image bits-per-pixel cutoffs. A 12 MiB 4000x3000 JPEG sits at ~2.7 bpp.
pub const IMAGE_BPP_THRESHOLDS: QualityThresholds = QualityThresholds {
    extreme_high: 2.0,
    high: 1.0,
    medium: 0.4,
    low: 0.1,
};

/// Video bitrate-per-pixel cutoffs (bits/s per pixel). 8 Mb/s at 1080p is
/// ~3.9, a typical phone capture.
pub const VIDEO_BPP_THRESHOLDS: QualityThresholds = QualityThresholds {
    extreme_high: 4.0,
    high: 2.0,
    medium: 0.8,
    low: 0.2,
};

/// Absolute bitrate bands (bits/s) when the probe cannot give dimensions.
pub const VIDEO_BITRATE_BANDS: [u64; 4] = [20_000_000, 10_000_000, 4_000_000, 1_000_000];

fn grade_from_cutoffs(value: f64, t: &QualityThresholds) -> QualityGrade {
    if value >= t.extreme_high {
        QualityGrade::ExtremeHigh
    } else if value >= t.high {
        QualityGrade::High
    } else if value >= t.medium {
        QualityGrade::Medium
    } else if value >= t.low {
        QualityGrade::Low
    } else {
        QualityGrade::ExtremeLow
    }
}

pub fn image_bpp(size: u64, width: u32, height: u32) -> Option<f64> {
    let pixels = width as u64 * height as u64;
    if pixels == 0 {
        return None;
    }
    Some(size as f64 * 8.0 / pixels as f64)
}

pub fn grade_image(size: u64, width: u32, height: u32, t: &QualityThresholds) -> QualityGrade {
    if size < MIN_GRADABLE_SIZE {
        return QualityGrade::ExtremeLow;
    }
    match image_bpp(size, width, height) {
        Some(bpp) => grade_from_cutoffs(bpp, t),
        None => QualityGrade::Unknown,
    }
}

pub fn grade_video(size: u64, bit_rate: u64, width: u32, height: u32) -> QualityGrade {
    if size < MIN_GRADABLE_SIZE {
        return QualityGrade::ExtremeLow;
    }
    if bit_rate == 0 {
        return QualityGrade::Unknown;
    }
    let pixels = width as u64 * height as u64;
    if pixels > 0 {
        return grade_from_cutoffs(bit_rate as f64 / pixels as f64, &VIDEO_BPP_THRESHOLDS);
    }
    // Dimension probe failed; fall back to absolute bands.
    let [eh, h, m, l] = VIDEO_BITRATE_BANDS;
    if bit_rate >= eh {
        QualityGrade::ExtremeHigh
    } else if bit_rate >= h {
        QualityGrade::High
    } else if bit_rate >= m {
        QualityGrade::Medium
    } else if bit_rate >= l {
        QualityGrade::Low
    } else {
        QualityGrade::ExtremeLow
    }
}
