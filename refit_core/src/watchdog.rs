//! Memory watchdog.
//!
//! Every tick it reads system memory pressure and the process's own RSS.
//! High system pressure raises a throttle flag workers check before starting
//! a task; an oversized RSS lowers the effective job count. Concurrency is
//! never raised above the initial configured value.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::cancel::CancelToken;

/// System memory use above this ratio raises the throttle.
pub const PRESSURE_HIGH_WATER: f64 = 0.60;

/// Own-process RSS above this decrements the effective job count.
pub const RSS_LIMIT_MB: u64 = 2048;

pub const WATCHDOG_INTERVAL: Duration = Duration::from_secs(10);

pub struct MemoryWatchdog {
    pub throttle: AtomicBool,
    pub effective_jobs: AtomicUsize,
    initial_jobs: usize,
}

impl MemoryWatchdog {
    pub fn new(initial_jobs: usize) -> Self {
        Self {
            throttle: AtomicBool::new(false),
            effective_jobs: AtomicUsize::new(initial_jobs),
            initial_jobs,
        }
    }

    pub fn is_throttled(&self) -> bool {
        self.throttle.load(Ordering::SeqCst)
    }

    /// Blocks in `WATCHDOG_INTERVAL` ticks until cancel or `done` flips.
    pub fn run(&self, cancel: &CancelToken, done: &AtomicBool) {
        while !cancel.is_cancelled() && !done.load(Ordering::SeqCst) {
            self.tick(used_memory_ratio(), process_rss_mb());
            // Sleep in small slices so shutdown is prompt.
            for _ in 0..(WATCHDOG_INTERVAL.as_millis() / 250) {
                if cancel.is_cancelled() || done.load(Ordering::SeqCst) {
                    return;
                }
                std::thread::sleep(Duration::from_millis(250));
            }
        }
    }

    /// One observation applied to the flags. Split from `run` so the policy
    /// is testable without a clock.
    pub fn tick(&self, used_ratio: Option<f64>, rss_mb: Option<u64>) {
        if let Some(ratio) = used_ratio {
            let throttled = ratio > PRESSURE_HIGH_WATER;
            let was = self.throttle.swap(throttled, Ordering::SeqCst);
            if throttled && !was {
                warn!(used_ratio = ratio, "Memory pressure high; throttling workers");
            } else if !throttled && was {
                info!(used_ratio = ratio, "Memory pressure cleared");
            }
        }

        if let Some(rss) = rss_mb {
            if rss > RSS_LIMIT_MB {
                let current = self.effective_jobs.load(Ordering::SeqCst);
                if current > 1 {
                    self.effective_jobs.store(current - 1, Ordering::SeqCst);
                    warn!(rss_mb = rss, jobs = current - 1, "Own RSS over limit; lowering concurrency");
                }
            } else {
                // Recover slowly, never past the configured start point.
                let current = self.effective_jobs.load(Ordering::SeqCst);
                if current < self.initial_jobs {
                    self.effective_jobs.store(current + 1, Ordering::SeqCst);
                    debug!(jobs = current + 1, "RSS back under limit; restoring concurrency");
                }
            }
        }
    }
}

/// Fraction of physical memory in use, from the platform indicator.
pub fn used_memory_ratio() -> Option<f64> {
    let (available_mb, total_mb) = memory_mb()?;
    if total_mb == 0 {
        return None;
    }
    Some(1.0 - available_mb as f64 / total_mb as f64)
}

/// (available_mb, total_mb), platform specific.
pub fn memory_mb() -> Option<(u64, u64)> {
    if cfg!(target_os = "linux") {
        memory_mb_linux()
    } else if cfg!(target_os = "macos") {
        memory_mb_macos()
    } else {
        None
    }
}

fn memory_mb_linux() -> Option<(u64, u64)> {
    let content = std::fs::read_to_string("/proc/meminfo").ok()?;
    parse_meminfo(&content)
}

fn parse_meminfo(content: &str) -> Option<(u64, u64)> {
    let mut available = None;
    let mut total = None;
    for line in content.lines() {
        if let Some(rest) = line.strip_prefix("MemAvailable:") {
            available = rest.split_whitespace().next()?.parse::<u64>().ok().map(|kb| kb / 1024);
        } else if let Some(rest) = line.strip_prefix("MemTotal:") {
            total = rest.split_whitespace().next()?.parse::<u64>().ok().map(|kb| kb / 1024);
        }
    }
    Some((available?, total?))
}

fn memory_mb_macos() -> Option<(u64, u64)> {
    use std::process::Command;

    let total = Command::new("sysctl")
        .args(["-n", "hw.memsize"])
        .output()
        .ok()
        .filter(|o| o.status.success())
        .and_then(|o| String::from_utf8(o.stdout).ok())
        .and_then(|s| s.trim().parse::<u64>().ok())
        .map(|bytes| bytes / (1024 * 1024))?;

    let vm_stat = Command::new("vm_stat")
        .output()
        .ok()
        .filter(|o| o.status.success())
        .and_then(|o| String::from_utf8(o.stdout).ok())?;
    let available = parse_vm_stat_available(&vm_stat)?;
    Some((available, total))
}

fn parse_vm_stat_available(out: &str) -> Option<u64> {
    let mut page_size = 4096u64;
    let mut pages_free = None;
    let mut pages_inactive = None;
    for line in out.lines() {
        let line = line.trim();
        if let Some(rest) = line
            .strip_prefix("Mach Virtual Memory Statistics: (page size of ")
            .and_then(|s| s.strip_suffix(" bytes)"))
        {
            if let Ok(n) = rest.parse::<u64>() {
                page_size = n;
            }
        } else if line.starts_with("Pages free:") {
            pages_free = parse_vm_stat_value(line);
        } else if line.starts_with("Pages inactive:") {
            pages_inactive = parse_vm_stat_value(line);
        }
    }
    let pages = pages_free? + pages_inactive.unwrap_or(0);
    Some(pages * page_size / (1024 * 1024))
}

fn parse_vm_stat_value(line: &str) -> Option<u64> {
    line.split(':').nth(1)?.trim().trim_end_matches('.').parse().ok()
}

/// Own resident set size in MB.
pub fn process_rss_mb() -> Option<u64> {
    #[cfg(target_os = "linux")]
    {
        let status = std::fs::read_to_string("/proc/self/status").ok()?;
        for line in status.lines() {
            if let Some(rest) = line.strip_prefix("VmRSS:") {
                return rest.split_whitespace().next()?.parse::<u64>().ok().map(|kb| kb / 1024);
            }
        }
        None
    }
    #[cfg(target_os = "macos")]
    {
        use std::process::Command;
        let out = Command::new("ps")
            .args(["-o", "rss=", "-p", &std::process::id().to_string()])
            .output()
            .ok()
            .filter(|o| o.status.success())?;
        String::from_utf8(out.stdout)
            .ok()?
            .trim()
            .parse::<u64>()
            .ok()
            .map(|kb| kb / 1024)
    }
    #[cfg(not(any(target_os = "linux", target_os = "macos")))]
    {
        None
    }
}
