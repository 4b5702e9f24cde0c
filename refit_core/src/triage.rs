//! Triage: the one interactive moment in the run.
//!
//! Extreme-low-grade files pile up on their own channel while assessment
//! runs. Once assessment finishes (or the collection cap is hit) the user is
//! shown a summary and asked once: skip them, force-convert them, or delete
//! them. The prompt times out to Skip so an unattended run never stalls.
//! Whatever the answer, tasks that keep arriving after the prompt get the
//! same treatment.

use std::io::BufRead;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use tracing::{info, warn};

use crate::cancel::CancelToken;
use crate::outcome::ConversionOutcome;
use crate::task::{BatchDecision, FileTask};

/// Collection stops asking for more after this many entries.
pub const TRIAGE_CAP: usize = 10_000;

/// Samples shown in the prompt.
pub const SAMPLE_COUNT: usize = 10;

pub const PROMPT_TIMEOUT: Duration = Duration::from_secs(30);

const RECV_TICK: Duration = Duration::from_millis(200);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriageChoice {
    Skip,
    ForceConvert,
    Delete,
}

/// What the prompt gets to show.
pub struct TriageSummary<'a> {
    pub total: usize,
    pub total_bytes: u64,
    pub samples: &'a [FileTask],
}

/// The prompt is injected so the pipeline stays headless in tests and the
/// CLI owns the terminal interaction.
pub type PromptFn = dyn Fn(&TriageSummary<'_>) -> TriageChoice + Send + Sync;

pub fn run_triage(
    lowq_rx: Receiver<FileTask>,
    reinject_tx: Sender<FileTask>,
    results_tx: Sender<ConversionOutcome>,
    cancel: &CancelToken,
    prompt: &PromptFn,
) {
    let mut batch: Vec<FileTask> = Vec::new();
    let mut channel_open = true;

    // Collect until assessment closes the channel or the cap is reached.
    while batch.len() < TRIAGE_CAP {
        match lowq_rx.recv_timeout(RECV_TICK) {
            Ok(task) => batch.push(task),
            Err(RecvTimeoutError::Timeout) => {
                if cancel.is_cancelled() {
                    return;
                }
            }
            Err(RecvTimeoutError::Disconnected) => {
                channel_open = false;
                break;
            }
        }
    }

    if batch.is_empty() && !channel_open {
        return;
    }

    let choice = if cancel.is_cancelled() {
        TriageChoice::Skip
    } else {
        let total_bytes = batch.iter().map(|t| t.size).sum();
        let summary = TriageSummary {
            total: batch.len(),
            total_bytes,
            samples: &batch[..batch.len().min(SAMPLE_COUNT)],
        };
        prompt(&summary)
    };
    info!(total = batch.len(), choice = ?choice, "Low-quality batch decision");

    for task in batch {
        apply_choice(choice, task, &reinject_tx, &results_tx);
    }

    // Late arrivals past the cap get the same decision without a new prompt.
    while channel_open {
        match lowq_rx.recv_timeout(RECV_TICK) {
            Ok(task) => apply_choice(choice, task, &reinject_tx, &results_tx),
            Err(RecvTimeoutError::Timeout) => {
                if cancel.is_cancelled() {
                    return;
                }
            }
            Err(RecvTimeoutError::Disconnected) => channel_open = false,
        }
    }
}

fn apply_choice(
    choice: TriageChoice,
    mut task: FileTask,
    reinject_tx: &Sender<FileTask>,
    results_tx: &Sender<ConversionOutcome>,
) {
    match choice {
        TriageChoice::Skip => {
            let _ = results_tx.send(ConversionOutcome::skip(
                &task.path,
                task.size,
                "low-quality-batch-skip",
            ));
        }
        TriageChoice::ForceConvert => {
            task.batch_decision = BatchDecision::ForceConvert;
            let _ = reinject_tx.send(task);
        }
        TriageChoice::Delete => match std::fs::remove_file(&task.path) {
            Ok(()) => {
                let _ = results_tx.send(ConversionOutcome::deleted(&task.path, task.size));
            }
            Err(e) => {
                warn!(path = %task.path.display(), error = %e, "Batch delete failed");
                let _ = results_tx.send(ConversionOutcome::fail(
                    &task.path,
                    task.size,
                    "batch-delete",
                    e.to_string(),
                ));
            }
        },
    }
}

/// Terminal prompt used by the CLI: summary, up to ten samples, one choice
/// with a timeout defaulting to Skip. Reading stdin happens on a helper
/// thread so the timeout cannot be held hostage by a closed terminal.
pub fn terminal_prompt(summary: &TriageSummary<'_>) -> TriageChoice {
    use console::style;

    eprintln!();
    eprintln!(
        "{} {} extreme-low-quality files ({:.1} MiB total)",
        style("▶").cyan(),
        summary.total,
        summary.total_bytes as f64 / (1024.0 * 1024.0)
    );
    for task in summary.samples {
        eprintln!("   {} ({} bytes)", task.path.display(), task.size);
    }
    if summary.total > summary.samples.len() {
        eprintln!("   ... and {} more", summary.total - summary.samples.len());
    }
    eprintln!(
        "{}",
        style(format!(
            "Choose: [s]kip / [f]orce-convert / [d]elete (default skip in {}s): ",
            PROMPT_TIMEOUT.as_secs()
        ))
        .bold()
    );

    let (line_tx, line_rx) = crossbeam_channel::bounded::<String>(1);
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        let mut line = String::new();
        if stdin.lock().read_line(&mut line).is_ok() {
            let _ = line_tx.send(line);
        }
    });

    match line_rx.recv_timeout(PROMPT_TIMEOUT) {
        Ok(line) => parse_choice(&line),
        Err(_) => {
            eprintln!("No answer; defaulting to skip");
            TriageChoice::Skip
        }
    }
}

pub fn parse_choice(input: &str) -> TriageChoice {
    match input.trim().to_lowercase().as_str() {
        "f" | "force" | "force-convert" => TriageChoice::ForceConvert,
        "d" | "delete" => TriageChoice::Delete,
        _ => TriageChoice::Skip,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outcome::Decision;
    use crate::task::{MediaType, QualityGrade};
    use std::fs;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn low_task(path: PathBuf, size: u64) -> FileTask {
        FileTask {
            path,
            ext: "png".to_string(),
            size,
            mime: "image/png".to_string(),
            media_type: MediaType::Static,
            quality: QualityGrade::ExtremeLow,
            batch_decision: BatchDecision::Na,
        }
    }

    fn run_with_choice(
        choice: TriageChoice,
        tasks: Vec<FileTask>,
    ) -> (Vec<FileTask>, Vec<ConversionOutcome>) {
        let (lowq_tx, lowq_rx) = crossbeam_channel::bounded(512);
        let (reinject_tx, reinject_rx) = crossbeam_channel::bounded(512);
        let (results_tx, results_rx) = crossbeam_channel::bounded(512);
        let cancel = CancelToken::new();

        for task in tasks {
            lowq_tx.send(task).unwrap();
        }
        drop(lowq_tx);

        run_triage(lowq_rx, reinject_tx, results_tx, &cancel, &move |_| choice);

        (reinject_rx.into_iter().collect(), results_rx.into_iter().collect())
    }

    #[test]
    fn test_skip_records_every_task() {
        let temp = TempDir::new().unwrap();
        let tasks: Vec<FileTask> = (0..3)
            .map(|i| {
                let path = temp.path().join(format!("t{i}.png"));
                fs::write(&path, b"x").unwrap();
                low_task(path, 800)
            })
            .collect();

        let (reinjected, outcomes) = run_with_choice(TriageChoice::Skip, tasks);
        assert!(reinjected.is_empty());
        assert_eq!(outcomes.len(), 3);
        for outcome in &outcomes {
            assert_eq!(outcome.decision, Decision::Skip);
            assert_eq!(outcome.tag, "low-quality-batch-skip");
        }
    }

    #[test]
    fn test_force_convert_reinjects_with_decision() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("t.png");
        fs::write(&path, b"x").unwrap();

        let (reinjected, outcomes) =
            run_with_choice(TriageChoice::ForceConvert, vec![low_task(path, 800)]);
        assert!(outcomes.is_empty());
        assert_eq!(reinjected.len(), 1);
        assert_eq!(reinjected[0].batch_decision, BatchDecision::ForceConvert);
    }

    #[test]
    fn test_delete_removes_files_and_records() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("t.png");
        fs::write(&path, b"x").unwrap();

        let (_, outcomes) = run_with_choice(TriageChoice::Delete, vec![low_task(path.clone(), 800)]);
        assert!(!path.exists());
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].decision, Decision::Deleted);
    }

    #[test]
    fn test_delete_failure_records_fail() {
        let temp = TempDir::new().unwrap();
        let gone = temp.path().join("never-existed.png");

        let (_, outcomes) = run_with_choice(TriageChoice::Delete, vec![low_task(gone, 800)]);
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].decision, Decision::Fail);
    }

    #[test]
    fn test_empty_batch_never_prompts() {
        let (lowq_tx, lowq_rx) = crossbeam_channel::bounded::<FileTask>(8);
        let (reinject_tx, _reinject_rx) = crossbeam_channel::bounded(8);
        let (results_tx, results_rx) = crossbeam_channel::bounded::<ConversionOutcome>(8);
        drop(lowq_tx);

        let cancel = CancelToken::new();
        run_triage(lowq_rx, reinject_tx, results_tx, &cancel, &|_| {
            panic!("prompt must not fire for an empty batch")
        });
        assert_eq!(results_rx.into_iter().count(), 0);
    }

    #[test]
    fn test_parse_choice() {
        assert_eq!(parse_choice("f\n"), TriageChoice::ForceConvert);
        assert_eq!(parse_choice("DELETE"), TriageChoice::Delete);
        assert_eq!(parse_choice("s"), TriageChoice::Skip);
        assert_eq!(parse_choice(""), TriageChoice::Skip);
        assert_eq!(parse_choice("whatever"), TriageChoice::Skip);
    }

    #[test]
    fn test_prompt_sees_capped_samples() {
        let temp = TempDir::new().unwrap();
        let tasks: Vec<FileTask> = (0..SAMPLE_COUNT + 5)
            .map(|i| {
                let path = temp.path().join(format!("t{i}.png"));
                fs::write(&path, b"x").unwrap();
                low_task(path, 100)
            })
            .collect();

        let (lowq_tx, lowq_rx) = crossbeam_channel::bounded(512);
        let (reinject_tx, _r) = crossbeam_channel::bounded(512);
        let (results_tx, _o) = crossbeam_channel::bounded(512);
        for task in tasks {
            lowq_tx.send(task).unwrap();
        }
        drop(lowq_tx);

        let cancel = CancelToken::new();
        run_triage(lowq_rx, reinject_tx, results_tx, &cancel, &|summary| {
            assert_eq!(summary.total, SAMPLE_COUNT + 5);
            assert_eq!(summary.samples.len(), SAMPLE_COUNT);
            TriageChoice::Skip
        });
    }
}
