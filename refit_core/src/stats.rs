//! Atomically updated run counters.
//!
//! Counters mirror the union of result records produced during the run; the
//! final report is re-derived from the records themselves, and the two must
//! agree.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::outcome::{ConversionOutcome, Decision, SizeChange};
use crate::task::QualityGrade;

#[derive(Debug, Default)]
pub struct RunStats {
    pub found: AtomicU64,
    pub assessed: AtomicU64,
    pub processed: AtomicU64,
    pub success: AtomicU64,
    pub fail: AtomicU64,
    pub skip: AtomicU64,
    pub delete: AtomicU64,
    pub resumed: AtomicU64,
    pub retry_success: AtomicU64,
    pub bytes_decreased: AtomicU64,
    pub bytes_increased: AtomicU64,
    pub smart_decisions: AtomicU64,
    pub lossless_wins: AtomicU64,
    grade_counts: [AtomicU64; QualityGrade::COUNT],
}

impl RunStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc_found(&self) {
        self.found.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_assessed(&self, grade: QualityGrade) {
        self.assessed.fetch_add(1, Ordering::Relaxed);
        self.grade_counts[grade.rank()].fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_resumed(&self) {
        self.resumed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_retry_success(&self) {
        self.retry_success.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_smart_decision(&self) {
        self.smart_decisions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_lossless_win(&self) {
        self.lossless_wins.fetch_add(1, Ordering::Relaxed);
    }

    /// Applied by the recorder, once per terminal outcome.
    pub fn apply_outcome(&self, outcome: &ConversionOutcome) {
        self.processed.fetch_add(1, Ordering::Relaxed);
        match outcome.decision {
            Decision::Success | Decision::RepairedRemux => {
                self.success.fetch_add(1, Ordering::Relaxed);
                match outcome.size_change {
                    SizeChange::Reduced => {
                        self.bytes_decreased.fetch_add(
                            outcome.original_size.saturating_sub(outcome.new_size),
                            Ordering::Relaxed,
                        );
                    }
                    SizeChange::Increased => {
                        self.bytes_increased.fetch_add(
                            outcome.new_size.saturating_sub(outcome.original_size),
                            Ordering::Relaxed,
                        );
                    }
                    SizeChange::Unchanged => {}
                }
            }
            Decision::Fail => {
                self.fail.fetch_add(1, Ordering::Relaxed);
            }
            Decision::Skip | Decision::SkipLarger => {
                self.skip.fetch_add(1, Ordering::Relaxed);
            }
            Decision::Deleted => {
                self.delete.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let mut grade_counts = [0u64; QualityGrade::COUNT];
        for (slot, counter) in grade_counts.iter_mut().zip(self.grade_counts.iter()) {
            *slot = counter.load(Ordering::Relaxed);
        }
        StatsSnapshot {
            found: self.found.load(Ordering::Relaxed),
            assessed: self.assessed.load(Ordering::Relaxed),
            processed: self.processed.load(Ordering::Relaxed),
            success: self.success.load(Ordering::Relaxed),
            fail: self.fail.load(Ordering::Relaxed),
            skip: self.skip.load(Ordering::Relaxed),
            delete: self.delete.load(Ordering::Relaxed),
            resumed: self.resumed.load(Ordering::Relaxed),
            retry_success: self.retry_success.load(Ordering::Relaxed),
            bytes_decreased: self.bytes_decreased.load(Ordering::Relaxed),
            bytes_increased: self.bytes_increased.load(Ordering::Relaxed),
            smart_decisions: self.smart_decisions.load(Ordering::Relaxed),
            lossless_wins: self.lossless_wins.load(Ordering::Relaxed),
            grade_counts,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub found: u64,
    pub assessed: u64,
    pub processed: u64,
    pub success: u64,
    pub fail: u64,
    pub skip: u64,
    pub delete: u64,
    pub resumed: u64,
    pub retry_success: u64,
    pub bytes_decreased: u64,
    pub bytes_increased: u64,
    pub smart_decisions: u64,
    pub lossless_wins: u64,
    pub grade_counts: [u64; QualityGrade::COUNT],
}
