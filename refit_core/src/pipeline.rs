//! The six-stage engine: discover -> assess -> triage -> convert -> commit
//! -> record, glued together with bounded channels and scoped threads.
//!
//! Every stage polls one cancel token; every queue is bounded so a slow
//! stage backpressures its producers instead of growing a buffer. The run
//! ends when the results channel closes, which can only happen after every
//! upstream sender is gone.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;
use std::time::Instant;

use anyhow::{Context, Result};
use tracing::{error, info};

use crate::assess::{run_assessment_worker, AssessCtx};
use crate::cancel::CancelToken;
use crate::config::{RunConfig, SortOrder, TEMP_ROOT_PREFIX};
use crate::convert::{run_conversion_worker, ConvertCtx};
use crate::discover::run_discovery;
use crate::outcome::ConversionOutcome;
use crate::progress::ProgressReporter;
use crate::report::{self, RunReport};
use crate::stats::RunStats;
use crate::store::ResultStore;
use crate::task::FileTask;
use crate::tools::Toolchain;
use crate::triage::{run_triage, PromptFn, TriageChoice, TriageSummary};
use crate::watchdog::MemoryWatchdog;

pub const PATH_QUEUE_CAP: usize = 1024;
pub const TASK_QUEUE_CAP: usize = 2048;
pub const LOWQ_QUEUE_CAP: usize = 512;
pub const RESULT_QUEUE_CAP: usize = 1024;

pub struct Engine {
    config: RunConfig,
    tools: Toolchain,
    prompt: Box<PromptFn>,
    /// Replaced in tests; the default logs and exits the process.
    on_hang: Box<dyn Fn() + Send + Sync>,
}

pub struct RunSummary {
    pub report: RunReport,
    pub report_path: Option<PathBuf>,
    pub cancelled: bool,
}

impl Engine {
    pub fn new(config: RunConfig, tools: Toolchain) -> Self {
        Self {
            config,
            tools,
            prompt: Box::new(crate::triage::terminal_prompt),
            on_hang: Box::new(|| {
                error!("Pipeline hang; forcing exit");
                std::process::exit(1);
            }),
        }
    }

    pub fn with_prompt(
        mut self,
        prompt: impl Fn(&TriageSummary<'_>) -> TriageChoice + Send + Sync + 'static,
    ) -> Self {
        self.prompt = Box::new(prompt);
        self
    }

    pub fn with_hang_handler(mut self, handler: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_hang = Box::new(handler);
        self
    }

    pub fn run(&self, cancel: &CancelToken, log_path: Option<PathBuf>) -> Result<RunSummary> {
        self.config.validate()?;
        let started = Instant::now();

        let store = ResultStore::open(&self.config.target_dir)?;
        let stats = RunStats::new();

        // Scratch lives inside the target so the final rename never crosses
        // a filesystem boundary. The whole root dies with this guard.
        let temp_root = tempfile::Builder::new()
            .prefix(TEMP_ROOT_PREFIX)
            .tempdir_in(&self.config.target_dir)
            .context("Failed to create run temp root")?;

        let jobs = self.config.effective_jobs();
        let assess_workers = self.config.assess_workers();
        let watchdog = MemoryWatchdog::new(jobs);
        let done = AtomicBool::new(false);
        let active_workers = AtomicUsize::new(0);

        info!(
            mode = self.config.mode.as_str(),
            target = %self.config.target_dir.display(),
            jobs,
            assess_workers,
            resumable_records = store.len(),
            "Engine starting"
        );

        let (paths_tx, paths_rx) = crossbeam_channel::bounded::<PathBuf>(PATH_QUEUE_CAP);
        let (assessed_tx, assessed_rx) = crossbeam_channel::bounded::<FileTask>(TASK_QUEUE_CAP);
        let (work_tx, work_rx) = crossbeam_channel::bounded::<FileTask>(TASK_QUEUE_CAP);
        let (lowq_tx, lowq_rx) = crossbeam_channel::bounded::<FileTask>(LOWQ_QUEUE_CAP);
        let (results_tx, results_rx) =
            crossbeam_channel::bounded::<ConversionOutcome>(RESULT_QUEUE_CAP);

        let outcomes = thread::scope(|s| {
            // Stage 1: discovery.
            {
                let paths_tx = paths_tx;
                let stats = &stats;
                let cancel = cancel.clone();
                let target = self.config.target_dir.clone();
                s.spawn(move || run_discovery(&target, paths_tx, stats, &cancel));
            }

            // Stage 2: assessment workers.
            for _ in 0..assess_workers {
                let paths_rx = paths_rx.clone();
                let assessed_tx = assessed_tx.clone();
                let lowq_tx = lowq_tx.clone();
                let results_tx = results_tx.clone();
                let ctx = AssessCtx {
                    config: &self.config,
                    tools: &self.tools,
                    store: &store,
                    stats: &stats,
                    cancel,
                };
                s.spawn(move || {
                    run_assessment_worker(&ctx, paths_rx, assessed_tx, lowq_tx, results_tx)
                });
            }
            drop(paths_rx);
            drop(lowq_tx);

            // Stage 3: triage. Re-injected tasks enter the assessed channel
            // so they flow through the same sort pass as everything else.
            {
                let reinject_tx = assessed_tx.clone();
                let results_tx = results_tx.clone();
                let prompt = &*self.prompt;
                s.spawn(move || run_triage(lowq_rx, reinject_tx, results_tx, cancel, prompt));
            }
            drop(assessed_tx);

            // Feeder: streams tasks straight through, or buffers and sorts
            // when a sort order is requested (assessment finishes out of
            // order, so sorted feeding needs the full set first).
            {
                let sort_order = self.config.sort_order;
                s.spawn(move || match sort_order {
                    SortOrder::Default => {
                        for task in assessed_rx.iter() {
                            if work_tx.send(task).is_err() {
                                break;
                            }
                        }
                    }
                    SortOrder::Size | SortOrder::Quality => {
                        let mut buffered: Vec<FileTask> = assessed_rx.iter().collect();
                        match sort_order {
                            SortOrder::Size => buffered.sort_by_key(|t| t.size),
                            _ => buffered.sort_by_key(|t| t.quality.rank()),
                        }
                        info!(tasks = buffered.len(), "Pre-sort pass complete");
                        for task in buffered {
                            if work_tx.send(task).is_err() {
                                break;
                            }
                        }
                    }
                });
            }

            // Stage 4+5: conversion workers (commit happens inline).
            for slot in 0..jobs {
                let work_rx = work_rx.clone();
                let results_tx = results_tx.clone();
                let ctx = ConvertCtx {
                    config: &self.config,
                    tools: &self.tools,
                    stats: &stats,
                    cancel,
                    temp_root: temp_root.path(),
                    throttle: &watchdog.throttle,
                    active_workers: &active_workers,
                    worker_slot: slot,
                    effective_jobs: &watchdog.effective_jobs,
                };
                s.spawn(move || run_conversion_worker(&ctx, work_rx, results_tx));
            }
            drop(work_rx);
            drop(results_tx);

            // Cross-cutting: watchdog and progress/hang detection.
            {
                let watchdog = &watchdog;
                let done = &done;
                s.spawn(move || watchdog.run(cancel, done));
            }
            {
                let stats = &stats;
                let active_workers = &active_workers;
                let done = &done;
                let on_hang = &*self.on_hang;
                let reporter = ProgressReporter {
                    show_bar: console::user_attended_stderr(),
                    ..ProgressReporter::default()
                };
                s.spawn(move || {
                    reporter.run(stats, active_workers, done, cancel, on_hang)
                });
            }

            // Stage 6: the recorder is the only writer of the store. Joining
            // it here means every other pipeline thread has already drained.
            let recorder = s.spawn(|| {
                let mut outcomes = Vec::new();
                for outcome in results_rx.iter() {
                    if let Err(e) = store.record(&outcome) {
                        error!(
                            path = %outcome.original_path.display(),
                            error = %e,
                            "Failed to persist result record"
                        );
                    }
                    stats.apply_outcome(&outcome);
                    outcomes.push(outcome);
                }
                outcomes
            });

            let outcomes = recorder.join().unwrap_or_default();
            done.store(true, Ordering::SeqCst);
            outcomes
        });

        let elapsed = started.elapsed();
        let snapshot = stats.snapshot();
        let report = report::aggregate(&outcomes, &snapshot, &self.config, elapsed, log_path);

        // A cancelled run still writes its partial report; only a target we
        // cannot write to suppresses it.
        let report_path = match report::write_report_file(&self.config.target_dir, &report) {
            Ok(path) => Some(path),
            Err(e) => {
                error!(error = %e, "Could not write report file");
                None
            }
        };

        info!(
            records = report.total_records,
            success = report.success,
            fail = report.fail,
            skip = report.skip + report.skip_larger,
            resumed = report.resumed,
            elapsed_secs = elapsed.as_secs_f64(),
            "Engine finished"
        );

        Ok(RunSummary {
            report,
            report_path,
            cancelled: cancel.is_cancelled(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Mode, RESULTS_DIR_NAME};
    use crate::quality::QualityThresholds;
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    fn config_for(target: &Path, mode: Mode) -> RunConfig {
        RunConfig {
            mode,
            target_dir: target.to_path_buf(),
            concurrent_jobs: 2,
            enable_backups: false,
            sort_order: SortOrder::Default,
            hw_accel: false,
            max_retries: 0,
            overwrite: false,
            thresholds: QualityThresholds::default(),
            log_level: "info".to_string(),
            crf: 28,
        }
    }

    fn engine_for(target: &Path, mode: Mode) -> Engine {
        Engine::new(config_for(target, mode), Toolchain::unavailable())
            .with_prompt(|_| TriageChoice::Skip)
            .with_hang_handler(|| panic!("hang detector fired in test"))
    }

    /// Files already in a modern format travel the entire pipeline and come
    /// out as SKIP records without any encoder on the host.
    #[test]
    fn test_modern_files_flow_to_skip_records() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("a.avif"), vec![0u8; 6000]).unwrap();
        fs::write(temp.path().join("b.avif"), vec![0u8; 7000]).unwrap();
        fs::write(temp.path().join("notes.txt"), b"not media").unwrap();

        let engine = engine_for(temp.path(), Mode::Efficiency);
        let summary = engine.run(&CancelToken::new(), None).unwrap();

        assert!(!summary.cancelled);
        assert_eq!(summary.report.total_records, 2);
        assert_eq!(summary.report.skip, 2);
        assert_eq!(summary.report.fail, 0);

        // Exactly one record file per candidate.
        let store_dir = temp.path().join(RESULTS_DIR_NAME);
        assert_eq!(fs::read_dir(store_dir).unwrap().count(), 2);
        // The report file landed at the target root.
        assert!(summary.report_path.unwrap().exists());
    }

    /// Running the engine twice over the same tree converts nothing the
    /// second time: every candidate resumes from the store.
    #[test]
    fn test_second_run_is_all_resumed() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("a.avif"), vec![0u8; 6000]).unwrap();
        fs::write(temp.path().join("b.avif"), vec![0u8; 7000]).unwrap();

        let first = engine_for(temp.path(), Mode::Efficiency)
            .run(&CancelToken::new(), None)
            .unwrap();
        assert_eq!(first.report.total_records, 2);
        assert_eq!(first.report.resumed, 0);

        let second = engine_for(temp.path(), Mode::Efficiency)
            .run(&CancelToken::new(), None)
            .unwrap();
        assert_eq!(second.report.total_records, 0);
        assert_eq!(second.report.resumed, 2);
    }

    /// Extreme-low files reach triage; a Skip answer records them all.
    #[test]
    fn test_low_quality_batch_skip_records() {
        let temp = TempDir::new().unwrap();
        // 800 bytes, under the gradable floor: forced ExtremeLow.
        fs::write(temp.path().join("tiny.png"), vec![0u8; 800]).unwrap();

        let engine = engine_for(temp.path(), Mode::Auto);
        let summary = engine.run(&CancelToken::new(), None).unwrap();

        assert_eq!(summary.report.total_records, 1);
        assert_eq!(summary.report.skip, 1);
        // The file itself is untouched.
        assert!(temp.path().join("tiny.png").exists());
    }

    /// A Delete answer removes the batch from disk and records DELETED.
    #[test]
    fn test_low_quality_batch_delete() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("tiny.png"), vec![0u8; 800]).unwrap();

        let engine = Engine::new(
            config_for(temp.path(), Mode::Auto),
            Toolchain::unavailable(),
        )
        .with_prompt(|_| TriageChoice::Delete)
        .with_hang_handler(|| panic!("hang detector fired in test"));
        let summary = engine.run(&CancelToken::new(), None).unwrap();

        assert_eq!(summary.report.deleted, 1);
        assert!(!temp.path().join("tiny.png").exists());
    }

    /// Reserved directories contribute no tasks and no records.
    #[test]
    fn test_reserved_dirs_invisible_end_to_end() {
        let temp = TempDir::new().unwrap();
        for reserved in [".backups", ".media_conversion_results", ".logs"] {
            let dir = temp.path().join(reserved);
            fs::create_dir_all(&dir).unwrap();
            fs::write(dir.join("planted.avif"), vec![0u8; 6000]).unwrap();
        }
        fs::write(temp.path().join("real.avif"), vec![0u8; 6000]).unwrap();

        let summary = engine_for(temp.path(), Mode::Efficiency)
            .run(&CancelToken::new(), None)
            .unwrap();
        assert_eq!(summary.report.total_records, 1);
    }

    /// Cancellation before the walk produces a summary with nothing in it
    /// and leaves no scratch directories behind.
    #[test]
    fn test_cancelled_run_is_clean() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("a.avif"), vec![0u8; 6000]).unwrap();

        let cancel = CancelToken::new();
        cancel.cancel();
        let summary = engine_for(temp.path(), Mode::Efficiency)
            .run(&cancel, None)
            .unwrap();

        assert!(summary.cancelled);
        assert_eq!(summary.report.total_records, 0);
        // Temp root released on the cancel path too.
        let leftovers = fs::read_dir(temp.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| {
                e.file_name()
                    .to_string_lossy()
                    .starts_with(TEMP_ROOT_PREFIX)
            })
            .count();
        assert_eq!(leftovers, 0);
    }

    /// Sort modes buffer, order, then feed; the run still terminates and
    /// records everything exactly once.
    #[test]
    fn test_sorted_feed_still_records_everything() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("small.avif"), vec![0u8; 6000]).unwrap();
        fs::write(temp.path().join("large.avif"), vec![0u8; 60000]).unwrap();

        let mut config = config_for(temp.path(), Mode::Efficiency);
        config.sort_order = SortOrder::Size;
        let engine = Engine::new(config, Toolchain::unavailable())
            .with_prompt(|_| TriageChoice::Skip)
            .with_hang_handler(|| panic!("hang detector fired in test"));

        let summary = engine.run(&CancelToken::new(), None).unwrap();
        assert_eq!(summary.report.total_records, 2);
    }
}
