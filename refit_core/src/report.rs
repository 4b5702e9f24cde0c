//! End-of-run report.
//!
//! Aggregation is a pure function of the outcomes produced during the run
//! (plus the counters assessment kept for resumed files and grades), so the
//! report always agrees with the result store. Two renderings: colorized
//! for the terminal, plain for the file dropped beside the target dir.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use console::style;

use crate::config::RunConfig;
use crate::outcome::{ConversionOutcome, Decision};
use crate::stats::StatsSnapshot;
use crate::task::QualityGrade;

#[derive(Debug, Clone)]
pub struct RunReport {
    pub mode: String,
    pub total_records: u64,
    pub success: u64,
    pub repaired: u64,
    pub fail: u64,
    pub skip: u64,
    pub skip_larger: u64,
    pub deleted: u64,
    pub resumed: u64,
    pub retry_success: u64,
    pub bytes_saved: u64,
    pub bytes_grown: u64,
    pub per_tag: BTreeMap<String, u64>,
    pub grade_counts: [u64; QualityGrade::COUNT],
    pub smart_decisions: u64,
    pub lossless_wins: u64,
    pub elapsed: Duration,
    pub log_path: Option<PathBuf>,
}

pub fn aggregate(
    outcomes: &[ConversionOutcome],
    snapshot: &StatsSnapshot,
    config: &RunConfig,
    elapsed: Duration,
    log_path: Option<PathBuf>,
) -> RunReport {
    let mut report = RunReport {
        mode: config.mode.as_str().to_string(),
        total_records: outcomes.len() as u64,
        success: 0,
        repaired: 0,
        fail: 0,
        skip: 0,
        skip_larger: 0,
        deleted: 0,
        resumed: snapshot.resumed,
        retry_success: snapshot.retry_success,
        bytes_saved: 0,
        bytes_grown: 0,
        per_tag: BTreeMap::new(),
        grade_counts: snapshot.grade_counts,
        smart_decisions: snapshot.smart_decisions,
        lossless_wins: snapshot.lossless_wins,
        elapsed,
        log_path,
    };

    for outcome in outcomes {
        match outcome.decision {
            Decision::Success => report.success += 1,
            Decision::RepairedRemux => report.repaired += 1,
            Decision::Fail => report.fail += 1,
            Decision::Skip => report.skip += 1,
            Decision::SkipLarger => report.skip_larger += 1,
            Decision::Deleted => report.deleted += 1,
        }
        if matches!(outcome.decision, Decision::Success | Decision::RepairedRemux) {
            if outcome.new_size <= outcome.original_size {
                report.bytes_saved += outcome.original_size - outcome.new_size;
            } else {
                report.bytes_grown += outcome.new_size - outcome.original_size;
            }
            if !outcome.tag.is_empty() {
                *report.per_tag.entry(outcome.tag.clone()).or_insert(0) += 1;
            }
        }
    }

    report
}

pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}

pub fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    if secs >= 3600 {
        format!("{}h{:02}m{:02}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    } else if secs >= 60 {
        format!("{}m{:02}s", secs / 60, secs % 60)
    } else {
        format!("{}s", secs)
    }
}

pub fn render_plain(report: &RunReport) -> String {
    let mut out = String::new();
    out.push_str(&format!("Conversion report (mode: {})\n", report.mode));
    out.push_str("==========================================\n");
    out.push_str(&format!("records:        {}\n", report.total_records));
    out.push_str(&format!("success:        {}\n", report.success));
    if report.repaired > 0 {
        out.push_str(&format!("repaired:       {}\n", report.repaired));
    }
    out.push_str(&format!("failed:         {}\n", report.fail));
    out.push_str(&format!(
        "skipped:        {} (of which larger-output: {})\n",
        report.skip + report.skip_larger,
        report.skip_larger
    ));
    out.push_str(&format!("deleted:        {}\n", report.deleted));
    out.push_str(&format!("resumed:        {}\n", report.resumed));
    out.push_str(&format!("retry wins:     {}\n", report.retry_success));
    out.push_str(&format!("bytes saved:    {}\n", format_bytes(report.bytes_saved)));
    out.push_str(&format!("bytes grown:    {}\n", format_bytes(report.bytes_grown)));
    out.push_str(&format!("smart decisions: {} (lossless wins: {})\n",
        report.smart_decisions, report.lossless_wins));

    out.push_str("\nquality grades seen:\n");
    for grade in QualityGrade::ALL {
        let count = report.grade_counts[grade.rank()];
        if count > 0 {
            let label = grade.label();
            out.push_str(&format!("  {label:<13} {count}\n"));
        }
    }

    if !report.per_tag.is_empty() {
        out.push_str("\nwinning encoders:\n");
        for (tag, count) in &report.per_tag {
            out.push_str(&format!("  {tag:<16} {count}\n"));
        }
    }

    out.push_str(&format!("\nelapsed: {}\n", format_duration(report.elapsed)));
    if let Some(ref log) = report.log_path {
        out.push_str(&format!("log: {}\n", log.display()));
    }
    out
}

pub fn render_colored(report: &RunReport) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "\n{} mode {}\n",
        style("media refit complete").bold().green(),
        style(&report.mode).cyan()
    ));
    out.push_str(&format!(
        "  {} success   {} failed   {} skipped   {} deleted   {} resumed\n",
        style(report.success + report.repaired).green(),
        style(report.fail).red(),
        style(report.skip + report.skip_larger).yellow(),
        report.deleted,
        report.resumed
    ));
    out.push_str(&format!(
        "  saved {}   grown {}   elapsed {}\n",
        style(format_bytes(report.bytes_saved)).green().bold(),
        format_bytes(report.bytes_grown),
        format_duration(report.elapsed)
    ));
    for (tag, count) in &report.per_tag {
        out.push_str(&format!("    {:<16} {}\n", style(tag).dim(), count));
    }
    if let Some(ref log) = report.log_path {
        out.push_str(&format!("  log: {}\n", style(log.display()).dim()));
    }
    out
}

/// Write the plain rendering beside the target directory's root.
pub fn write_report_file(target_dir: &Path, report: &RunReport) -> Result<PathBuf> {
    let timestamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
    let path = target_dir.join(format!("conversion_report_{timestamp}.txt"));
    std::fs::write(&path, render_plain(report))
        .with_context(|| format!("Failed to write report to {}", path.display()))?;
    Ok(path)
}
