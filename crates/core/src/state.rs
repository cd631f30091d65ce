//! Process-wide launcher state: where the service was staged and how it
//! should be shown. The live instance itself is owned by the supervisor.

use crate::cleanup::{remove_file_with_retries, OsFs, RetryPolicy};
use crate::config::LauncherConfig;
use crate::error::StagingError;
use crate::stager::{create_temp_root, BinaryStager, StagedBinary};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct LauncherState {
    temp_root: PathBuf,
    staged_binary: StagedBinary,
    show_console: bool,
}

impl LauncherState {
    /// Create a fresh temp root under `temp_parent` and stage `blob` into it.
    /// A failed stage leaves no directory behind.
    pub fn prepare(
        config: &LauncherConfig,
        blob: &[u8],
        temp_parent: &Path,
    ) -> Result<Self, StagingError> {
        if blob.is_empty() {
            return Err(StagingError::ResourceMissing);
        }

        let policy = config.retry_policy();
        let temp_root = create_temp_root(temp_parent, &config.staging_prefix)?;
        match BinaryStager::new(policy).stage(blob, &temp_root) {
            Ok(staged_binary) => Ok(Self {
                temp_root,
                staged_binary,
                show_console: config.show_console,
            }),
            Err(e) => {
                discard_temp_root(&temp_root, &policy);
                Err(e)
            }
        }
    }

    pub fn temp_root(&self) -> &Path {
        &self.temp_root
    }

    pub fn staged_binary(&self) -> &StagedBinary {
        &self.staged_binary
    }

    pub fn show_console(&self) -> bool {
        self.show_console
    }
}

fn discard_temp_root(temp_root: &Path, policy: &RetryPolicy) {
    if let Ok(entries) = std::fs::read_dir(temp_root) {
        for entry in entries.flatten() {
            let _ = remove_file_with_retries(&OsFs, policy, &entry.path());
        }
    }
    if let Err(e) = std::fs::remove_dir_all(temp_root) {
        tracing::warn!(path = ?temp_root, "Could not remove temp directory after failed staging: {}", e);
    }
}
