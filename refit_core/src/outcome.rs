//! Terminal outcome for one file, and its on-disk record line.
//!
//! Record lines are `DECISION|TAG|origSize|newSize[|sizeChange]`. The fifth
//! field was added after the first release; the parser accepts both shapes.

use std::path::{Path, PathBuf};

/// Closed set of terminal decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Skip,
    SkipLarger,
    Success,
    Fail,
    Deleted,
    RepairedRemux,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::Skip => "SKIP",
            Decision::SkipLarger => "SKIP_LARGER",
            Decision::Success => "SUCCESS",
            Decision::Fail => "FAIL",
            Decision::Deleted => "DELETED",
            Decision::RepairedRemux => "REPAIRED_REMUX",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "SKIP" => Some(Decision::Skip),
            "SKIP_LARGER" => Some(Decision::SkipLarger),
            "SUCCESS" => Some(Decision::Success),
            "FAIL" => Some(Decision::Fail),
            "DELETED" => Some(Decision::Deleted),
            "REPAIRED_REMUX" => Some(Decision::RepairedRemux),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeChange {
    Reduced,
    Increased,
    Unchanged,
}

impl SizeChange {
    pub fn from_sizes(original: u64, new: u64) -> Self {
        if new < original {
            SizeChange::Reduced
        } else if new > original {
            SizeChange::Increased
        } else {
            SizeChange::Unchanged
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SizeChange::Reduced => "REDUCED",
            SizeChange::Increased => "INCREASED",
            SizeChange::Unchanged => "UNCHANGED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "REDUCED" => Some(SizeChange::Reduced),
            "INCREASED" => Some(SizeChange::Increased),
            "UNCHANGED" => Some(SizeChange::Unchanged),
            _ => None,
        }
    }
}

/// Result for one FileTask, persisted before the task counts as done.
///
/// `tag` is the encoder label for successes ("AVIF-Q80", "HEVC-CRF28") and a
/// short reason slug for skips ("live-photo", "batch-skip").
#[derive(Debug, Clone)]
pub struct ConversionOutcome {
    pub original_path: PathBuf,
    pub original_size: u64,
    pub new_size: u64,
    pub output_path: Option<PathBuf>,
    pub tag: String,
    pub decision: Decision,
    pub error: Option<String>,
    pub size_change: SizeChange,
}

impl ConversionOutcome {
    pub fn skip(path: &Path, size: u64, reason: &str) -> Self {
        Self {
            original_path: path.to_path_buf(),
            original_size: size,
            new_size: 0,
            output_path: None,
            tag: reason.to_string(),
            decision: Decision::Skip,
            error: None,
            size_change: SizeChange::Unchanged,
        }
    }

    pub fn skip_larger(path: &Path, size: u64, candidate_size: u64, tag: &str) -> Self {
        Self {
            original_path: path.to_path_buf(),
            original_size: size,
            new_size: candidate_size,
            output_path: None,
            tag: tag.to_string(),
            decision: Decision::SkipLarger,
            error: None,
            size_change: SizeChange::Increased,
        }
    }

    pub fn success(
        path: &Path,
        original_size: u64,
        output_path: PathBuf,
        new_size: u64,
        tag: &str,
    ) -> Self {
        Self {
            original_path: path.to_path_buf(),
            original_size,
            new_size,
            output_path: Some(output_path),
            tag: tag.to_string(),
            decision: Decision::Success,
            error: None,
            size_change: SizeChange::from_sizes(original_size, new_size),
        }
    }

    pub fn repaired(
        path: &Path,
        original_size: u64,
        output_path: PathBuf,
        new_size: u64,
        tag: &str,
    ) -> Self {
        Self {
            decision: Decision::RepairedRemux,
            ..Self::success(path, original_size, output_path, new_size, tag)
        }
    }

    pub fn fail(path: &Path, size: u64, tag: &str, error: String) -> Self {
        Self {
            original_path: path.to_path_buf(),
            original_size: size,
            new_size: 0,
            output_path: None,
            tag: tag.to_string(),
            decision: Decision::Fail,
            error: Some(error),
            size_change: SizeChange::Unchanged,
        }
    }

    pub fn deleted(path: &Path, size: u64) -> Self {
        Self {
            original_path: path.to_path_buf(),
            original_size: size,
            new_size: 0,
            output_path: None,
            tag: "batch-delete".to_string(),
            decision: Decision::Deleted,
            error: None,
            size_change: SizeChange::Unchanged,
        }
    }

    /// Serialize for the result store.
    pub fn record_line(&self) -> String {
        format!(
            "{}|{}|{}|{}|{}",
            self.decision.as_str(),
            self.tag,
            self.original_size,
            self.new_size,
            self.size_change.as_str()
        )
    }
}

/// A record line read back from the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultRecord {
    pub decision: Decision,
    pub tag: String,
    pub original_size: u64,
    pub new_size: u64,
    pub size_change: Option<SizeChange>,
}

impl ResultRecord {
    pub fn parse(line: &str) -> Option<Self> {
        let mut parts = line.trim().split('|');
        let decision = Decision::parse(parts.next()?)?;
        let tag = parts.next()?.to_string();
        let original_size = parts.next()?.parse().ok()?;
        let new_size = parts.next()?.parse().ok()?;
        let size_change = parts.next().and_then(SizeChange::parse);
        Some(Self {
            decision,
            tag,
            original_size,
            new_size,
            size_change,
        })
    }
}
