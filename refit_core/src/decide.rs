//! Encoder strategy selection and the smart size decision.
//!
//! Strategy is the product of what the file is and how hard we are allowed
//! to squeeze it: `{StaticImage, AnimatedImage, Video}` x `{Quality,
//! Efficiency, Sticker}`. The smart decision arbitrates between a lossless
//! and a lossy candidate by size alone, with an adaptive percentage gap that
//! depends on the source format.

use crate::config::Mode;
use crate::task::{FileTask, MediaType, QualityGrade};

/// Per-file effective mode after `auto` resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EffectiveMode {
    Quality,
    Efficiency,
    Sticker,
}

/// Source formats that are themselves lossless; `auto` preserves them
/// losslessly rather than burning quality.
const LOSSLESS_SOURCE_EXTS: &[&str] = &["png", "bmp", "tiff", "tif"];

pub fn resolve_mode(mode: Mode, task: &FileTask) -> EffectiveMode {
    match mode {
        Mode::Quality => EffectiveMode::Quality,
        Mode::Efficiency => EffectiveMode::Efficiency,
        Mode::Sticker => EffectiveMode::Sticker,
        Mode::Auto => {
            // Probe failures grade Unknown and are squeezed, not preserved.
            if task.quality == QualityGrade::Unknown {
                return EffectiveMode::Efficiency;
            }
            if LOSSLESS_SOURCE_EXTS.contains(&task.ext.as_str()) {
                EffectiveMode::Quality
            } else {
                EffectiveMode::Efficiency
            }
        }
    }
}

/// What kind of encode pipeline a task wants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    StaticImage,
    AnimatedImage,
    Video,
}

impl TaskKind {
    pub fn of(task: &FileTask) -> Self {
        match task.media_type {
            MediaType::Static => TaskKind::StaticImage,
            MediaType::Animated => TaskKind::AnimatedImage,
            MediaType::Video => TaskKind::Video,
        }
    }
}

/// Descending lossy ladders. The first step is the efficiency-mode opening
/// bid; later steps only run when the smart decision says explore further.
pub const STATIC_QUALITY_LADDER: [u32; 3] = [80, 65, 50];
pub const ANIMATED_CRF_LADDER: [u32; 3] = [32, 40, 50];
pub const VIDEO_AV1_CRF: u32 = 35;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SmartChoice {
    Fail,
    UseLosslessExtreme,
    UseLosslessSignificant,
    UseLosslessBetter,
    UseLossyAcceptable,
    ExploreFurther,
}

impl SmartChoice {
    pub fn picks_lossless(&self) -> bool {
        matches!(
            self,
            SmartChoice::UseLosslessExtreme
                | SmartChoice::UseLosslessSignificant
                | SmartChoice::UseLosslessBetter
        )
    }
}

/// Percentage gap (of the original size) the lossless candidate must win by
/// to be preferred over a smaller-is-fine lossy one. Formats whose lossless
/// recompression is usually dramatic (GIF) need less of an excuse.
pub fn adaptive_threshold(mime: &str, original_size: u64) -> f64 {
    const TWO_MIB: u64 = 2 * 1024 * 1024;
    if mime == "image/gif" {
        if original_size >= TWO_MIB {
            20.0
        } else {
            35.0
        }
    } else if mime == "image/png" || mime == "image/bmp" {
        25.0
    } else if mime.starts_with("video/") {
        50.0
    } else {
        30.0
    }
}

/// Pick between candidates by size. A size of 0 means the candidate is
/// missing (its encode failed or was not attempted).
pub fn smart_decision(original: u64, lossless: u64, lossy: u64, threshold: f64) -> SmartChoice {
    if lossless == 0 && lossy == 0 {
        return SmartChoice::Fail;
    }
    if lossless > 0 && lossy == 0 {
        return SmartChoice::UseLosslessSignificant;
    }
    if lossy > 0 && lossless == 0 {
        if (lossy as f64) < original as f64 * 0.8 {
            return SmartChoice::UseLossyAcceptable;
        }
        return SmartChoice::ExploreFurther;
    }

    // Both candidates exist.
    if (lossless as f64) < original as f64 * 0.2 && lossless * 2 < lossy {
        return SmartChoice::UseLosslessExtreme;
    }
    if lossless < lossy {
        let gap_pct = (lossy - lossless) as f64 / original as f64 * 100.0;
        if gap_pct > threshold {
            return SmartChoice::UseLosslessSignificant;
        }
        return SmartChoice::UseLosslessBetter;
    }
    if (lossy as f64) < original as f64 * 0.8 {
        return SmartChoice::UseLossyAcceptable;
    }
    SmartChoice::ExploreFurther
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::BatchDecision;
    use std::path::PathBuf;

    fn task(ext: &str, quality: QualityGrade, media_type: MediaType) -> FileTask {
        FileTask {
            path: PathBuf::from(format!("/m/file.{ext}")),
            ext: ext.to_string(),
            size: 100_000,
            mime: format!("image/{ext}"),
            media_type,
            quality,
            batch_decision: BatchDecision::Na,
        }
    }

    #[test]
    fn test_auto_mode_preserves_lossless_sources() {
        let png = task("png", QualityGrade::High, MediaType::Static);
        assert_eq!(resolve_mode(Mode::Auto, &png), EffectiveMode::Quality);

        let jpg = task("jpg", QualityGrade::High, MediaType::Static);
        assert_eq!(resolve_mode(Mode::Auto, &jpg), EffectiveMode::Efficiency);
    }

    #[test]
    fn test_unknown_grade_is_squeezed_in_auto() {
        let png = task("png", QualityGrade::Unknown, MediaType::Static);
        assert_eq!(resolve_mode(Mode::Auto, &png), EffectiveMode::Efficiency);
    }

    #[test]
    fn test_explicit_modes_pass_through() {
        let jpg = task("jpg", QualityGrade::High, MediaType::Static);
        assert_eq!(resolve_mode(Mode::Quality, &jpg), EffectiveMode::Quality);
        assert_eq!(resolve_mode(Mode::Sticker, &jpg), EffectiveMode::Sticker);
    }

    #[test]
    fn test_adaptive_threshold_table() {
        assert_eq!(adaptive_threshold("image/gif", 3 * 1024 * 1024), 20.0);
        assert_eq!(adaptive_threshold("image/gif", 1024), 35.0);
        assert_eq!(adaptive_threshold("image/png", 1), 25.0);
        assert_eq!(adaptive_threshold("image/bmp", u64::MAX), 25.0);
        assert_eq!(adaptive_threshold("video/mp4", 1), 50.0);
        assert_eq!(adaptive_threshold("image/jpeg", 1), 30.0);
    }

    #[test]
    fn test_smart_decision_missing_candidates() {
        assert_eq!(smart_decision(1000, 0, 0, 30.0), SmartChoice::Fail);
        assert_eq!(
            smart_decision(1000, 500, 0, 30.0),
            SmartChoice::UseLosslessSignificant
        );
        // Lossy alone, under 80% of original.
        assert_eq!(
            smart_decision(1000, 0, 700, 30.0),
            SmartChoice::UseLossyAcceptable
        );
        // Lossy alone, not good enough yet.
        assert_eq!(smart_decision(1000, 0, 900, 30.0), SmartChoice::ExploreFurther);
    }

    #[test]
    fn test_smart_decision_lossless_extreme() {
        // lossless < 20% of original AND < 50% of lossy.
        assert_eq!(
            smart_decision(10_000, 1_500, 4_000, 30.0),
            SmartChoice::UseLosslessExtreme
        );
        // Under 20% of original but not half of lossy: falls through.
        assert_eq!(
            smart_decision(10_000, 1_500, 2_000, 30.0),
            SmartChoice::UseLosslessBetter
        );
    }

    #[test]
    fn test_smart_decision_gap_threshold() {
        // Gap = (6000-2000)/10000*100 = 40 > 30 -> significant.
        assert_eq!(
            smart_decision(10_000, 2_000, 6_000, 30.0),
            SmartChoice::UseLosslessSignificant
        );
        // Same sizes, higher threshold: merely better.
        assert_eq!(
            smart_decision(10_000, 2_000, 6_000, 50.0),
            SmartChoice::UseLosslessBetter
        );
    }

    #[test]
    fn test_smart_decision_lossy_acceptable() {
        // Lossy smaller than lossless and under 80% of original.
        assert_eq!(
            smart_decision(10_000, 6_000, 5_000, 30.0),
            SmartChoice::UseLossyAcceptable
        );
        // Neither candidate buys anything.
        assert_eq!(
            smart_decision(10_000, 9_900, 9_500, 30.0),
            SmartChoice::ExploreFurther
        );
    }
}
