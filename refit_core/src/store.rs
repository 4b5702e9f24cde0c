//! Resumable result store.
//!
//! One file per recorded path under `.media_conversion_results/`, named by
//! the hash of the absolute original path, containing a single record line.
//! The set of known keys is loaded once at startup; a path whose key is
//! already present is not re-processed unless the run has `overwrite` set.
//!
//! Keys are disjoint across workers (one file is owned by one worker from
//! skip-check through commit), so each key has exactly one writer.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use tracing::{debug, warn};

use crate::config::RESULTS_DIR_NAME;
use crate::outcome::{ConversionOutcome, ResultRecord};

pub struct ResultStore {
    dir: PathBuf,
    known: Mutex<HashSet<String>>,
}

impl ResultStore {
    /// Open (creating if needed) the store under `target_dir` and load the
    /// keys recorded by previous runs.
    pub fn open(target_dir: &Path) -> Result<Self> {
        let dir = target_dir.join(RESULTS_DIR_NAME);
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create result store at {}", dir.display()))?;

        let mut known = HashSet::new();
        for entry in fs::read_dir(&dir)
            .with_context(|| format!("Failed to read result store at {}", dir.display()))?
        {
            let entry = entry?;
            if entry.path().is_file() {
                known.insert(entry.file_name().to_string_lossy().into_owned());
            }
        }

        debug!(dir = %dir.display(), known = known.len(), "Result store opened");
        Ok(Self {
            dir,
            known: Mutex::new(known),
        })
    }

    /// Stable content identifier for a path: hash of its absolute form.
    pub fn key_for(path: &Path) -> String {
        let canonical = path
            .canonicalize()
            .unwrap_or_else(|_| path.to_path_buf());
        blake3::hash(canonical.to_string_lossy().as_bytes()).to_hex().to_string()
    }

    /// True when the path was recorded by this or a previous run.
    pub fn contains(&self, path: &Path) -> bool {
        let key = Self::key_for(path);
        self.known
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(&key)
    }

    pub fn len(&self) -> usize {
        self.known.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Persist one outcome. Append-only per run: a key written twice in the
    /// same run indicates a pipeline bug and is logged loudly.
    pub fn record(&self, outcome: &ConversionOutcome) -> Result<()> {
        let key = Self::key_for(&outcome.original_path);
        {
            let mut known = self.known.lock().unwrap_or_else(|e| e.into_inner());
            if !known.insert(key.clone()) {
                warn!(
                    path = %outcome.original_path.display(),
                    key = %key,
                    "Duplicate result record for path; overwriting"
                );
            }
        }
        let file = self.dir.join(&key);
        fs::write(&file, outcome.record_line())
            .with_context(|| format!("Failed to write result record {}", file.display()))?;
        Ok(())
    }

    /// Read back a previously recorded outcome, if any.
    pub fn load(&self, path: &Path) -> Option<ResultRecord> {
        let file = self.dir.join(Self::key_for(path));
        let content = fs::read_to_string(file).ok()?;
        ResultRecord::parse(&content)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}
