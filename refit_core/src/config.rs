//! Frozen run configuration.
//!
//! Built once from the CLI, validated, then passed by shared reference to
//! every stage. No stage mutates it; runtime adjustments (the watchdog
//! lowering concurrency) live in their own atomics.

use std::path::{Path, PathBuf};

use crate::error::EngineError;
use crate::quality::QualityThresholds;

/// Conversion workers when `--jobs 0`: 75% of cores, capped.
pub const MAX_AUTO_JOBS: usize = 7;

/// Assessment workers: cheap probe work, bounded regardless of core count.
pub const MAX_ASSESS_WORKERS: usize = 8;

pub const DEFAULT_MAX_RETRIES: u32 = 2;
pub const DEFAULT_VIDEO_CRF: u32 = 28;

/// Directories the engine owns under the target root. Discovery never
/// descends into them.
pub const BACKUP_DIR_NAME: &str = ".backups";
pub const RESULTS_DIR_NAME: &str = ".media_conversion_results";
pub const LOGS_DIR_NAME: &str = ".logs";

/// Run-wide scratch root also lives inside the target so commit renames stay
/// on one filesystem.
pub const TEMP_ROOT_PREFIX: &str = ".refit_tmp";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Quality,
    Efficiency,
    Auto,
    Sticker,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Quality => "quality",
            Mode::Efficiency => "efficiency",
            Mode::Auto => "auto",
            Mode::Sticker => "sticker",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Size,
    Quality,
    Default,
}

#[derive(Debug, Clone)]
pub struct RunConfig {
    pub mode: Mode,
    pub target_dir: PathBuf,
    pub concurrent_jobs: usize,
    pub enable_backups: bool,
    pub sort_order: SortOrder,
    pub hw_accel: bool,
    pub max_retries: u32,
    pub overwrite: bool,
    pub thresholds: QualityThresholds,
    pub log_level: String,
    pub crf: u32,
}

impl RunConfig {
    /// Resolve `--jobs 0` to the automatic worker count.
    pub fn effective_jobs(&self) -> usize {
        resolve_jobs(self.concurrent_jobs, num_cpus::get())
    }

    pub fn assess_workers(&self) -> usize {
        num_cpus::get().min(MAX_ASSESS_WORKERS).max(1)
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        check_protected_directory(&self.target_dir)?;
        if !self.target_dir.is_dir() {
            return Err(EngineError::BadTarget {
                path: self.target_dir.clone(),
                reason: "not a directory".to_string(),
            });
        }
        Ok(())
    }
}

pub fn resolve_jobs(requested: usize, cpus: usize) -> usize {
    if requested > 0 {
        return requested;
    }
    (cpus * 3 / 4).clamp(1, MAX_AUTO_JOBS)
}

const PROTECTED_DIRS: &[&str] = &[
    "/", "/System", "/usr", "/bin", "/sbin", "/etc", "/var", "/private", "/Library",
    "/Applications", "/Users", "/home", "/boot", "/dev", "/proc", "/sys", "/opt",
];

/// Refuse to run on system roots or a bare home directory. Operating there
/// would rewrite files the OS or every application depends on.
pub fn check_protected_directory(path: &Path) -> Result<(), EngineError> {
    let canonical = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
    let as_str = canonical.to_string_lossy();

    for dangerous in PROTECTED_DIRS {
        if as_str == *dangerous {
            return Err(EngineError::ProtectedDirectory(as_str.to_string()));
        }
    }

    // /home/<user> or /Users/<user> themselves are off limits; subdirs are fine.
    if (as_str.starts_with("/home/") || as_str.starts_with("/Users/"))
        && canonical.components().count() <= 3
    {
        return Err(EngineError::ProtectedDirectory(as_str.to_string()));
    }

    Ok(())
}

pub fn is_reserved_dir_name(name: &str) -> bool {
    name == BACKUP_DIR_NAME
        || name == RESULTS_DIR_NAME
        || name == LOGS_DIR_NAME
        || name.starts_with(TEMP_ROOT_PREFIX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_jobs_auto_is_capped() {
        assert_eq!(resolve_jobs(0, 4), 3);
        assert_eq!(resolve_jobs(0, 8), 6);
        assert_eq!(resolve_jobs(0, 16), MAX_AUTO_JOBS);
        assert_eq!(resolve_jobs(0, 1), 1);
    }

    #[test]
    fn test_resolve_jobs_explicit_wins() {
        assert_eq!(resolve_jobs(3, 16), 3);
        assert_eq!(resolve_jobs(12, 4), 12);
    }

    #[test]
    fn test_protected_directories_are_rejected() {
        assert!(check_protected_directory(Path::new("/")).is_err());
        assert!(check_protected_directory(Path::new("/usr")).is_err());
        assert!(check_protected_directory(Path::new("/etc")).is_err());
    }

    #[test]
    fn test_ordinary_subdirectory_is_accepted() {
        let temp = tempfile::TempDir::new().unwrap();
        assert!(check_protected_directory(temp.path()).is_ok());
    }

    #[test]
    fn test_reserved_dir_names() {
        assert!(is_reserved_dir_name(".backups"));
        assert!(is_reserved_dir_name(".media_conversion_results"));
        assert!(is_reserved_dir_name(".logs"));
        assert!(is_reserved_dir_name(".refit_tmp_x1y2"));
        assert!(!is_reserved_dir_name("photos"));
        assert!(!is_reserved_dir_name(".git"));
    }
}
