//! Binary Stager
//!
//! Writes the embedded service executable to a fresh path under a per-run
//! temp directory so it can be spawned as a separate process.

use crate::cleanup::{remove_file_with_retries, ArtifactFs, OsFs, RetryPolicy};
use crate::error::StagingError;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Service binary embedded at build time (empty when none was provided)
static SERVICE_BLOB: &[u8] = include_bytes!(concat!(env!("OUT_DIR"), "/service.bin"));

pub fn embedded_service_blob() -> &'static [u8] {
    SERVICE_BLOB
}

/// File name the staged service gets inside the temp root
pub fn staged_file_name() -> &'static str {
    if cfg!(windows) {
        "server.exe"
    } else {
        "server"
    }
}

/// A service binary written to disk for this run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedBinary {
    path: PathBuf,
    size_bytes: u64,
}

impl StagedBinary {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn size_bytes(&self) -> u64 {
        self.size_bytes
    }
}

/// Create `<parent>/<prefix><random id>` for this run
pub fn create_temp_root(parent: &Path, prefix: &str) -> Result<PathBuf, StagingError> {
    let root = parent.join(format!("{}{}", prefix, Uuid::new_v4().simple()));
    fs::create_dir_all(&root).map_err(|source| StagingError::IoFailure {
        path: root.clone(),
        source,
    })?;
    Ok(root)
}

pub struct BinaryStager<F: ArtifactFs = OsFs> {
    fs: F,
    policy: RetryPolicy,
    file_name: String,
}

impl BinaryStager<OsFs> {
    pub fn new(policy: RetryPolicy) -> Self {
        Self::with_fs(OsFs, policy)
    }
}

impl<F: ArtifactFs> BinaryStager<F> {
    pub fn with_fs(fs: F, policy: RetryPolicy) -> Self {
        Self {
            fs,
            policy,
            file_name: staged_file_name().to_string(),
        }
    }

    pub fn with_file_name(mut self, file_name: impl Into<String>) -> Self {
        self.file_name = file_name.into();
        self
    }

    /// Stage `blob` under `destination_root`, creating the directory if needed
    pub fn stage(&self, blob: &[u8], destination_root: &Path) -> Result<StagedBinary, StagingError> {
        if blob.is_empty() {
            return Err(StagingError::ResourceMissing);
        }

        fs::create_dir_all(destination_root).map_err(|source| StagingError::IoFailure {
            path: destination_root.to_path_buf(),
            source,
        })?;

        let path = self.resolve_destination(destination_root);
        tracing::info!(path = ?path, size = blob.len(), "Staging service binary");

        write_blob(&path, blob)?;

        let expected = blob.len() as u64;
        if let Err(e) = verify_size(&path, expected) {
            let _ = remove_file_with_retries(&self.fs, &self.policy, &path);
            return Err(e);
        }

        mark_executable(&path)?;

        Ok(StagedBinary {
            path,
            size_bytes: expected,
        })
    }

    /// Pick the destination, clearing a leftover from a crashed run if possible
    fn resolve_destination(&self, destination_root: &Path) -> PathBuf {
        let candidate = destination_root.join(&self.file_name);
        if !candidate.exists() {
            return candidate;
        }

        tracing::warn!(path = ?candidate, "Found leftover service binary, removing");
        match remove_file_with_retries(&self.fs, &self.policy, &candidate) {
            Ok(()) => candidate,
            Err(e) => {
                let fallback = destination_root.join(suffixed_name(&self.file_name));
                tracing::warn!(
                    path = ?candidate,
                    fallback = ?fallback,
                    "Leftover binary is locked ({}), staging beside it",
                    e
                );
                fallback
            }
        }
    }
}

/// `server.exe` -> `server-1a2b3c4d.exe`
fn suffixed_name(file_name: &str) -> String {
    let id = Uuid::new_v4().simple().to_string();
    let short = &id[..8];
    match file_name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => format!("{}-{}.{}", stem, short, ext),
        _ => format!("{}-{}", file_name, short),
    }
}

fn write_blob(path: &Path, blob: &[u8]) -> Result<(), StagingError> {
    let io_failure = |source| StagingError::IoFailure {
        path: path.to_path_buf(),
        source,
    };

    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)
        .map_err(io_failure)?;
    file.write_all(blob).map_err(io_failure)?;
    file.sync_all().map_err(io_failure)?;
    Ok(())
}

/// Compare the on-disk length with what was written
pub fn verify_size(path: &Path, expected: u64) -> Result<(), StagingError> {
    let written = fs::metadata(path)
        .map_err(|source| StagingError::IoFailure {
            path: path.to_path_buf(),
            source,
        })?
        .len();
    if written != expected {
        return Err(StagingError::Incomplete {
            path: path.to_path_buf(),
            expected,
            written,
        });
    }
    Ok(())
}

/// Executable bits are only set once the size check passed
fn mark_executable(path: &Path) -> Result<(), StagingError> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o755)).map_err(|source| {
            StagingError::IoFailure {
                path: path.to_path_buf(),
                source,
            }
        })?;
    }
    #[cfg(not(unix))]
    let _ = path;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::io;
    use std::time::Duration;

    struct LockedFs;

    impl ArtifactFs for LockedFs {
        fn clear_readonly(&self, _path: &Path) -> io::Result<()> {
            Ok(())
        }

        fn remove_file(&self, _path: &Path) -> io::Result<()> {
            Err(io::Error::new(io::ErrorKind::PermissionDenied, "in use"))
        }

        fn remove_dir_all(&self, _path: &Path) -> io::Result<()> {
            Err(io::Error::new(io::ErrorKind::PermissionDenied, "in use"))
        }
    }

    /// Holds the file for the first `failures` deletes, then lets go
    struct FlakyFs {
        failures: u32,
        calls: Cell<u32>,
    }

    impl ArtifactFs for FlakyFs {
        fn clear_readonly(&self, _path: &Path) -> io::Result<()> {
            Ok(())
        }

        fn remove_file(&self, path: &Path) -> io::Result<()> {
            self.calls.set(self.calls.get() + 1);
            if self.calls.get() <= self.failures {
                return Err(io::Error::new(io::ErrorKind::PermissionDenied, "in use"));
            }
            fs::remove_file(path)
        }

        fn remove_dir_all(&self, path: &Path) -> io::Result<()> {
            fs::remove_dir_all(path)
        }
    }

    fn policy() -> RetryPolicy {
        RetryPolicy::new(3, Duration::from_millis(1))
    }

    #[test]
    fn test_briefly_locked_leftover_is_replaced_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let leftover = dir.path().join(staged_file_name());
        fs::write(&leftover, vec![0u8; 4096]).unwrap();

        let attempts = policy().attempts();
        let flaky = FlakyFs {
            failures: attempts - 1,
            calls: Cell::new(0),
        };
        let stager = BinaryStager::with_fs(flaky, policy());
        let blob = b"fresh service";
        let staged = stager.stage(blob, dir.path()).unwrap();

        assert_eq!(stager.fs.calls.get(), attempts);
        assert_eq!(staged.path(), leftover);
        assert_eq!(staged.size_bytes(), blob.len() as u64);
        assert_eq!(fs::metadata(&leftover).unwrap().len(), blob.len() as u64);
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_stage_writes_blob() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("MediaGallery_x");
        let blob = b"#!/bin/sh\nexit 0\n";

        let staged = BinaryStager::new(policy()).stage(blob, &root).unwrap();

        assert_eq!(staged.path(), root.join(staged_file_name()));
        assert_eq!(staged.size_bytes(), blob.len() as u64);
        assert_eq!(fs::read(staged.path()).unwrap(), blob);
    }

    #[test]
    fn test_empty_blob_is_missing_resource() {
        let dir = tempfile::tempdir().unwrap();
        let result = BinaryStager::new(policy()).stage(&[], dir.path());
        assert!(matches!(result, Err(StagingError::ResourceMissing)));
    }

    #[test]
    fn test_leftover_file_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let leftover = dir.path().join(staged_file_name());
        fs::write(&leftover, vec![0u8; 4096]).unwrap();

        let blob = b"fresh service";
        let staged = BinaryStager::new(policy()).stage(blob, dir.path()).unwrap();

        assert_eq!(staged.path(), leftover);
        assert_eq!(fs::metadata(&leftover).unwrap().len(), blob.len() as u64);
    }

    #[test]
    fn test_locked_leftover_gets_suffixed_path() {
        let dir = tempfile::tempdir().unwrap();
        let leftover = dir.path().join("server.exe");
        fs::write(&leftover, b"old").unwrap();

        let stager = BinaryStager::with_fs(LockedFs, policy()).with_file_name("server.exe");
        let staged = stager.stage(b"new", dir.path()).unwrap();

        assert_ne!(staged.path(), leftover);
        let name = staged.path().file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("server-") && name.ends_with(".exe"), "{}", name);
        assert_eq!(fs::read(&leftover).unwrap(), b"old");
        assert_eq!(fs::read(staged.path()).unwrap(), b"new");
    }

    #[test]
    fn test_verify_size_reports_incomplete() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("server");
        fs::write(&path, b"abc").unwrap();

        assert!(verify_size(&path, 3).is_ok());
        match verify_size(&path, 10) {
            Err(StagingError::Incomplete {
                expected, written, ..
            }) => {
                assert_eq!(expected, 10);
                assert_eq!(written, 3);
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_temp_roots_are_unique() {
        let dir = tempfile::tempdir().unwrap();
        let a = create_temp_root(dir.path(), "MediaGallery_").unwrap();
        let b = create_temp_root(dir.path(), "MediaGallery_").unwrap();
        assert_ne!(a, b);
        assert!(a.is_dir() && b.is_dir());
    }

    #[test]
    fn test_suffixed_name_without_extension() {
        let name = suffixed_name("server");
        assert!(name.starts_with("server-"));
        assert_eq!(name.len(), "server-".len() + 8);
    }
}
