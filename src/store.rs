//! On-disk persistence of task result bundles.
//!
//! One JSON file per (task, mode), named from the output patterns. Writes go
//! through a temporary file and a rename so an interrupted sweep never leaves
//! a truncated checkpoint behind.

use crate::config::{EvalMode, OutputSettings};
use crate::table::TaskResultBundle;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors raised while reading or writing bundles
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("No stored bundle at {0}")]
    NotFound(PathBuf),

    #[error("Invalid glob pattern: {0}")]
    Pattern(#[from] glob::PatternError),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Bundle directory plus the file-name patterns
#[derive(Debug, Clone)]
pub struct ResultStore {
    output: OutputSettings,
}

impl ResultStore {
    /// Store rooted at `output.results_dir`
    #[must_use]
    pub const fn new(output: OutputSettings) -> Self {
        Self { output }
    }

    /// Results directory
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.output.results_dir
    }

    /// File a bundle for `task_code` in `mode` is stored at
    #[must_use]
    pub fn path_for(&self, task_code: &str, mode: EvalMode) -> PathBuf {
        self.root().join(self.output.bundle_file(task_code, mode))
    }

    /// Write a bundle, replacing any previous one for the same task and mode
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or the file
    /// cannot be written.
    pub fn save(&self, bundle: &TaskResultBundle) -> Result<PathBuf, StoreError> {
        std::fs::create_dir_all(self.root())?;
        let path = self.path_for(&bundle.task_code, bundle.mode);
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_string_pretty(bundle)?)?;
        std::fs::rename(&tmp, &path)?;
        tracing::info!(task = %bundle.task, mode = %bundle.mode, path = %path.display(), "Bundle saved");
        Ok(path)
    }

    /// Read the bundle for `task_code` in `mode`
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if no bundle was stored, or a parse error.
    pub fn load(&self, task_code: &str, mode: EvalMode) -> Result<TaskResultBundle, StoreError> {
        let path = self.path_for(task_code, mode);
        Self::load_path(&path)
    }

    /// Read a bundle from an explicit path
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the file does not exist, or a parse error.
    pub fn load_path(path: &Path) -> Result<TaskResultBundle, StoreError> {
        if !path.exists() {
            return Err(StoreError::NotFound(path.to_path_buf()));
        }
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Every readable bundle in the results directory, sorted by file name
    ///
    /// Files that are not bundles are skipped with a warning.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be listed.
    pub fn load_all(&self) -> Result<Vec<TaskResultBundle>, StoreError> {
        let pattern = self.root().join("*.json");
        let mut paths: Vec<PathBuf> = glob::glob(&pattern.to_string_lossy())?
            .filter_map(Result::ok)
            .collect();
        paths.sort();

        let mut bundles = Vec::with_capacity(paths.len());
        for path in paths {
            match Self::load_path(&path) {
                Ok(bundle) => bundles.push(bundle),
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "Skipping unreadable bundle"),
            }
        }
        Ok(bundles)
    }
}
