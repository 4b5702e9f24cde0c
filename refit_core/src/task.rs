//! The unit of work flowing through the pipeline.

use std::path::PathBuf;

/// Media classification produced by assessment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaType {
    Static,
    Animated,
    Video,
}

/// Five-level perceptual quality grade plus `Unknown` for probe failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QualityGrade {
    ExtremeHigh,
    High,
    Medium,
    Low,
    ExtremeLow,
    Unknown,
}

impl QualityGrade {
    pub fn label(&self) -> &'static str {
        match self {
            QualityGrade::ExtremeHigh => "extreme-high",
            QualityGrade::High => "high",
            QualityGrade::Medium => "medium",
            QualityGrade::Low => "low",
            QualityGrade::ExtremeLow => "extreme-low",
            QualityGrade::Unknown => "unknown",
        }
    }

    /// Stable index for per-grade counters and best-first ordering
    /// (0 = highest quality).
    pub fn rank(&self) -> usize {
        match self {
            QualityGrade::ExtremeHigh => 0,
            QualityGrade::High => 1,
            QualityGrade::Medium => 2,
            QualityGrade::Low => 3,
            QualityGrade::ExtremeLow => 4,
            QualityGrade::Unknown => 5,
        }
    }

    pub const COUNT: usize = 6;

    /// Every grade in rank order; counters and report rows index by this.
    pub const ALL: [QualityGrade; QualityGrade::COUNT] = [
        QualityGrade::ExtremeHigh,
        QualityGrade::High,
        QualityGrade::Medium,
        QualityGrade::Low,
        QualityGrade::ExtremeLow,
        QualityGrade::Unknown,
    ];
}

/// Decision applied to a whole low-quality batch during triage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BatchDecision {
    #[default]
    Na,
    Skip,
    ForceConvert,
    Delete,
}

/// One candidate file, classified and graded. Immutable after assessment
/// except `batch_decision`, which triage sets before re-injection.
#[derive(Debug, Clone)]
pub struct FileTask {
    pub path: PathBuf,
    pub ext: String,
    pub size: u64,
    pub mime: String,
    pub media_type: MediaType,
    pub quality: QualityGrade,
    pub batch_decision: BatchDecision,
}

impl FileTask {
    pub fn stem(&self) -> &str {
        self.path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grade_rank_matches_all_order() {
        for (index, grade) in QualityGrade::ALL.iter().enumerate() {
            assert_eq!(grade.rank(), index);
        }
    }

    #[test]
    fn test_grade_labels_are_distinct() {
        let mut labels: Vec<&str> = QualityGrade::ALL.iter().map(|g| g.label()).collect();
        labels.sort();
        labels.dedup();
        assert_eq!(labels.len(), QualityGrade::COUNT);
    }

    #[test]
    fn test_task_stem() {
        let task = FileTask {
            path: PathBuf::from("/media/IMG_1234.HEIC"),
            ext: "heic".to_string(),
            size: 1024,
            mime: "image/heic".to_string(),
            media_type: MediaType::Static,
            quality: QualityGrade::Medium,
            batch_decision: BatchDecision::Na,
        };
        assert_eq!(task.stem(), "IMG_1234");
    }
}
