//! CLI surface.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use refit_core::{Mode, QualityThresholds, RunConfig, SortOrder};

#[derive(Parser)]
#[command(name = "refit")]
#[command(version, about = "Walks a directory tree and refits images and videos into modern formats", long_about = None)]
pub struct Cli {
    /// Target directory (also accepted via --dir)
    #[arg(value_name = "DIR")]
    pub target: Option<PathBuf>,

    #[arg(long, value_name = "DIR")]
    pub dir: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = ModeArg::Auto)]
    pub mode: ModeArg,

    /// Concurrent conversion workers; 0 = 75% of cores, capped at 7
    #[arg(long, default_value_t = 0)]
    pub jobs: usize,

    /// Do not copy originals into .backups before replacing them
    #[arg(long)]
    pub no_backup: bool,

    /// Hardware-assisted decode when the platform supports it
    #[arg(long, default_value_t = true)]
    pub hwaccel: bool,

    #[arg(long)]
    pub no_hwaccel: bool,

    #[arg(long = "sort-by", value_enum, default_value_t = SortArg::Quality)]
    pub sort_by: SortArg,

    /// Max retries of the full per-file pipeline
    #[arg(long, default_value_t = 2)]
    pub retry: u32,

    /// Re-process files already in the result store
    #[arg(long)]
    pub overwrite: bool,

    #[arg(long = "log-level", value_enum, default_value_t = LogLevelArg::Info)]
    pub log_level: LogLevelArg,

    /// Efficiency-mode CRF for video
    #[arg(long, default_value_t = 28)]
    pub crf: u32,

    /// Validate configuration and exit
    #[arg(long = "check-only")]
    pub check_only: bool,
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum)]
pub enum ModeArg {
    Quality,
    Efficiency,
    Auto,
    Sticker,
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum)]
pub enum SortArg {
    Size,
    Quality,
    Default,
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum)]
pub enum LogLevelArg {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevelArg {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevelArg::Debug => "debug",
            LogLevelArg::Info => "info",
            LogLevelArg::Warn => "warn",
            LogLevelArg::Error => "error",
        }
    }
}

impl Cli {
    pub fn target_dir(&self) -> Option<PathBuf> {
        self.dir.clone().or_else(|| self.target.clone())
    }

    pub fn to_config(&self) -> Option<RunConfig> {
        let target_dir = self.target_dir()?;
        Some(RunConfig {
            mode: match self.mode {
                ModeArg::Quality => Mode::Quality,
                ModeArg::Efficiency => Mode::Efficiency,
                ModeArg::Auto => Mode::Auto,
                ModeArg::Sticker => Mode::Sticker,
            },
            target_dir,
            concurrent_jobs: self.jobs,
            enable_backups: !self.no_backup,
            sort_order: match self.sort_by {
                SortArg::Size => SortOrder::Size,
                SortArg::Quality => SortOrder::Quality,
                SortArg::Default => SortOrder::Default,
            },
            hw_accel: self.hwaccel && !self.no_hwaccel,
            max_retries: self.retry,
            overwrite: self.overwrite,
            thresholds: QualityThresholds::default(),
            log_level: self.log_level.as_str().to_string(),
            crf: self.crf,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cli = Cli::parse_from(["refit", "/media/photos"]);
        let config = cli.to_config().unwrap();
        assert_eq!(config.mode, Mode::Auto);
        assert_eq!(config.concurrent_jobs, 0);
        assert!(config.enable_backups);
        assert!(config.hw_accel);
        assert_eq!(config.sort_order, SortOrder::Quality);
        assert_eq!(config.max_retries, 2);
        assert!(!config.overwrite);
        assert_eq!(config.crf, 28);
        assert!(!cli.check_only);
    }

    #[test]
    fn test_dir_flag_wins_over_positional() {
        let cli = Cli::parse_from(["refit", "--dir", "/a", "/b"]);
        assert_eq!(cli.target_dir().unwrap(), PathBuf::from("/a"));
    }

    #[test]
    fn test_missing_dir_yields_no_config() {
        let cli = Cli::parse_from(["refit"]);
        assert!(cli.to_config().is_none());
    }

    #[test]
    fn test_flags_map_through() {
        let cli = Cli::parse_from([
            "refit", "--mode", "sticker", "--jobs", "3", "--no-backup", "--no-hwaccel",
            "--sort-by", "size", "--retry", "5", "--overwrite", "--crf", "35", "/media",
        ]);
        let config = cli.to_config().unwrap();
        assert_eq!(config.mode, Mode::Sticker);
        assert_eq!(config.concurrent_jobs, 3);
        assert!(!config.enable_backups);
        assert!(!config.hw_accel);
        assert_eq!(config.sort_order, SortOrder::Size);
        assert_eq!(config.max_retries, 5);
        assert!(config.overwrite);
        assert_eq!(config.crf, 35);
    }

    #[test]
    fn test_unknown_flag_is_an_error() {
        assert!(Cli::try_parse_from(["refit", "--frobnicate", "/media"]).is_err());
    }
}
