//! Progress reporting and the hang detector.
//!
//! One thread owns the bar and watches the counters. If neither `found` nor
//! `processed` moves for the configured interval while workers are mid-task,
//! the force-exit callback fires: that state means a subprocess is wedged
//! past its deadline and ignoring signals, and the run cannot finish.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use indicatif::{ProgressBar, ProgressStyle};
use tracing::error;

use crate::cancel::CancelToken;
use crate::stats::RunStats;

pub const DEFAULT_HANG_TIMEOUT: Duration = Duration::from_secs(30);
const REPORT_TICK: Duration = Duration::from_millis(250);

pub struct ProgressReporter {
    pub hang_timeout: Duration,
    pub show_bar: bool,
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self {
            hang_timeout: DEFAULT_HANG_TIMEOUT,
            show_bar: true,
        }
    }
}

impl ProgressReporter {
    /// Runs until `done` flips or cancel. `on_hang` is invoked at most once.
    pub fn run(
        &self,
        stats: &RunStats,
        active_workers: &AtomicUsize,
        done: &AtomicBool,
        cancel: &CancelToken,
        on_hang: &(dyn Fn() + Send + Sync),
    ) {
        let bar = if self.show_bar {
            let bar = ProgressBar::new_spinner();
            bar.set_style(
                ProgressStyle::with_template("{spinner} {msg}")
                    .unwrap_or_else(|_| ProgressStyle::default_spinner()),
            );
            Some(bar)
        } else {
            None
        };

        let mut last_advance = Instant::now();
        let mut last_seen = (0u64, 0u64);
        let mut hang_fired = false;

        while !done.load(Ordering::SeqCst) && !cancel.is_cancelled() {
            let snap = stats.snapshot();
            let now_seen = (snap.found, snap.processed);
            if now_seen != last_seen {
                last_seen = now_seen;
                last_advance = Instant::now();
            }

            if let Some(ref bar) = bar {
                bar.set_message(format!(
                    "found {} | assessed {} | processed {} (ok {}, skip {}, fail {})",
                    snap.found, snap.assessed, snap.processed, snap.success, snap.skip, snap.fail
                ));
                bar.tick();
            }

            let workers_busy = active_workers.load(Ordering::SeqCst) > 0;
            if !hang_fired
                && workers_busy
                && last_advance.elapsed() > self.hang_timeout
            {
                hang_fired = true;
                error!(
                    stalled_secs = last_advance.elapsed().as_secs(),
                    "No pipeline progress with active workers; forcing exit"
                );
                on_hang();
            }

            std::thread::sleep(REPORT_TICK);
        }

        if let Some(bar) = bar {
            bar.finish_and_clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU64;
    use std::sync::Arc;

    fn run_reporter(
        hang_timeout: Duration,
        active: usize,
        run_for: Duration,
    ) -> u64 {
        let stats = RunStats::new();
        let active_workers = AtomicUsize::new(active);
        let done = AtomicBool::new(false);
        let cancel = CancelToken::new();
        let fired = Arc::new(AtomicU64::new(0));

        let reporter = ProgressReporter {
            hang_timeout,
            show_bar: false,
        };

        std::thread::scope(|s| {
            let fired = Arc::clone(&fired);
            let handle = s.spawn(|| {
                reporter.run(&stats, &active_workers, &done, &cancel, &move || {
                    fired.fetch_add(1, Ordering::SeqCst);
                });
            });
            std::thread::sleep(run_for);
            done.store(true, Ordering::SeqCst);
            handle.join().unwrap();
        });

        fired.load(Ordering::SeqCst)
    }

    #[test]
    fn test_hang_fires_once_when_workers_stall() {
        let fired = run_reporter(Duration::from_millis(300), 2, Duration::from_secs(2));
        assert_eq!(fired, 1);
    }

    #[test]
    fn test_no_hang_with_idle_workers() {
        // No active workers: a quiet pipeline is not a hang.
        let fired = run_reporter(Duration::from_millis(300), 0, Duration::from_secs(1));
        assert_eq!(fired, 0);
    }

    #[test]
    fn test_progress_resets_the_hang_clock() {
        let stats = RunStats::new();
        let active_workers = AtomicUsize::new(1);
        let done = AtomicBool::new(false);
        let cancel = CancelToken::new();
        let fired = Arc::new(AtomicU64::new(0));

        let reporter = ProgressReporter {
            hang_timeout: Duration::from_millis(1500),
            show_bar: false,
        };

        std::thread::scope(|s| {
            let fired_clone = Arc::clone(&fired);
            let handle = s.spawn(|| {
                reporter.run(&stats, &active_workers, &done, &cancel, &move || {
                    fired_clone.fetch_add(1, Ordering::SeqCst);
                });
            });
            // Keep advancing `found` faster than the timeout.
            for _ in 0..5 {
                std::thread::sleep(Duration::from_millis(300));
                stats.inc_found();
            }
            done.store(true, Ordering::SeqCst);
            handle.join().unwrap();
        });

        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }
}
