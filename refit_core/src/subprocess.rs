//! Cancelable external tool invocation.
//!
//! Every encoder and prober call goes through here: stdout and stderr are
//! drained on their own threads (a full 64 KiB pipe buffer deadlocks the
//! child otherwise), the run-wide cancel token is polled while the child
//! runs, and an optional wall-clock deadline kills wedged encoders.

use std::io::Read;
use std::path::Path;
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use crate::cancel::CancelToken;
use crate::error::EngineError;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug)]
pub struct ToolOutput {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
}

impl ToolOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Run `program args...`, honoring `cancel` and an optional deadline.
///
/// Returns `Err(EngineError::Cancelled)` when the run was interrupted and
/// `Err(EngineError::ToolTimeout)` when the deadline passed; in both cases
/// the child has been killed and reaped. A nonzero exit is NOT an error
/// here; callers inspect `exit_code` because a failed encoder attempt is
/// usually just the cue to try the next one in the chain.
pub fn run_tool(
    program: &Path,
    args: &[String],
    cancel: &CancelToken,
    deadline: Option<Duration>,
) -> Result<ToolOutput> {
    let tool_name = program
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| program.display().to_string());

    debug!(tool = %tool_name, args = ?args, "Spawning external tool");
    let start = Instant::now();

    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .with_context(|| format!("Failed to spawn {}", tool_name))?;

    let mut stdout_pipe = child.stdout.take();
    let mut stderr_pipe = child.stderr.take();
    let stdout_thread = thread::spawn(move || {
        let mut buf = String::new();
        if let Some(ref mut pipe) = stdout_pipe {
            let _ = pipe.read_to_string(&mut buf);
        }
        buf
    });
    let stderr_thread = thread::spawn(move || {
        let mut buf = String::new();
        if let Some(ref mut pipe) = stderr_pipe {
            let _ = pipe.read_to_string(&mut buf);
        }
        buf
    });

    let mut killed: Option<EngineError> = None;
    let status = loop {
        if let Some(status) = child.try_wait().context("Failed to poll child")? {
            break status;
        }
        if cancel.is_cancelled() {
            warn!(tool = %tool_name, "Killing child: run cancelled");
            let _ = child.kill();
            killed = Some(EngineError::Cancelled);
            break child.wait().context("Failed to reap killed child")?;
        }
        if let Some(limit) = deadline {
            if start.elapsed() > limit {
                warn!(tool = %tool_name, seconds = limit.as_secs(), "Killing child: deadline exceeded");
                let _ = child.kill();
                killed = Some(EngineError::ToolTimeout {
                    tool: tool_name.clone(),
                    seconds: limit.as_secs(),
                });
                break child.wait().context("Failed to reap killed child")?;
            }
        }
        thread::sleep(POLL_INTERVAL);
    };

    let stdout = stdout_thread.join().unwrap_or_default();
    let stderr = stderr_thread.join().unwrap_or_default();
    let duration = start.elapsed();

    if let Some(err) = killed {
        return Err(err.into());
    }

    match status.code() {
        Some(0) => info!(
            tool = %tool_name,
            duration_secs = duration.as_secs_f64(),
            "External tool completed"
        ),
        code => info!(
            tool = %tool_name,
            exit_code = ?code,
            duration_secs = duration.as_secs_f64(),
            stderr_tail = %tail_of(&stderr),
            "External tool failed"
        ),
    }

    Ok(ToolOutput {
        exit_code: status.code(),
        stdout,
        stderr,
        duration,
    })
}

/// Last meaningful stderr line, skipping encoder progress spam. Used in FAIL
/// outcomes so the report shows something actionable.
pub fn tail_of(stderr: &str) -> String {
    stderr
        .lines()
        .rev()
        .find(|line| {
            let t = line.trim();
            !t.is_empty()
                && !t.starts_with("frame=")
                && !t.starts_with("fps=")
                && !t.starts_with("size=")
        })
        .map(|s| s.trim().to_string())
        .unwrap_or_else(|| "unknown tool error".to_string())
}
