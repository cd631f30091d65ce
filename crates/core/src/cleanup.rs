//! Cleanup Manager
//!
//! Removes the staged service binary and its temp directory once the child is
//! confirmed dead. The OS (or an antivirus scanner) may keep the executable
//! open for a moment after exit, so every removal runs under a bounded
//! [`RetryPolicy`]. Exhausting the retries is logged and never blocks exit.

use std::io;
use std::path::Path;
use std::thread;
use std::time::Duration;

/// Fixed attempt count with a fixed delay between attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    attempts: u32,
    delay: Duration,
}

impl RetryPolicy {
    /// `attempts` is clamped to at least one
    pub fn new(attempts: u32, delay: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            delay,
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Run `op` until it succeeds or the attempts run out.
    /// The closure receives the 1-based attempt number.
    pub fn run<T, F>(&self, label: &str, mut op: F) -> io::Result<T>
    where
        F: FnMut(u32) -> io::Result<T>,
    {
        let mut attempt = 1;
        loop {
            match op(attempt) {
                Ok(value) => return Ok(value),
                Err(e) if attempt >= self.attempts => {
                    tracing::warn!(attempt, "{} failed after {} attempts: {}", label, attempt, e);
                    return Err(e);
                }
                Err(e) => {
                    tracing::debug!(attempt, "{} failed, retrying: {}", label, e);
                    thread::sleep(self.delay);
                    attempt += 1;
                }
            }
        }
    }
}

/// Filesystem operations used to remove staged artifacts
pub trait ArtifactFs {
    fn clear_readonly(&self, path: &Path) -> io::Result<()>;
    fn remove_file(&self, path: &Path) -> io::Result<()>;
    fn remove_dir_all(&self, path: &Path) -> io::Result<()>;
}

/// The real filesystem
#[derive(Debug, Default, Clone, Copy)]
pub struct OsFs;

impl ArtifactFs for OsFs {
    fn clear_readonly(&self, path: &Path) -> io::Result<()> {
        let mut permissions = std::fs::metadata(path)?.permissions();
        if !permissions.readonly() {
            return Ok(());
        }
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            permissions.set_mode(permissions.mode() | 0o200);
        }
        #[cfg(not(unix))]
        {
            #[allow(clippy::permissions_set_readonly_false)]
            permissions.set_readonly(false);
        }
        std::fs::set_permissions(path, permissions)
    }

    fn remove_file(&self, path: &Path) -> io::Result<()> {
        std::fs::remove_file(path)
    }

    fn remove_dir_all(&self, path: &Path) -> io::Result<()> {
        std::fs::remove_dir_all(path)
    }
}

/// Delete one file under `policy`, clearing read-only first.
/// A file that is already gone counts as removed.
pub fn remove_file_with_retries(
    fs: &dyn ArtifactFs,
    policy: &RetryPolicy,
    path: &Path,
) -> io::Result<()> {
    policy.run("delete file", |_| {
        // Best effort; the delete below reports the real error
        let _ = fs.clear_readonly(path);
        match fs.remove_file(path) {
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            other => other,
        }
    })
}

/// Outcome of a cleanup pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CleanupReport {
    pub binary_removed: bool,
    pub temp_root_removed: bool,
    /// Cleanup had already run; nothing was touched
    pub skipped: bool,
}

impl CleanupReport {
    pub fn is_clean(&self) -> bool {
        self.binary_removed && self.temp_root_removed
    }
}

/// Seam used by the control plane to hand off to cleanup
pub trait ArtifactCleaner {
    fn cleanup(&mut self, staged_binary: &Path, temp_root: &Path) -> CleanupReport;
}

/// Best-effort removal of staged artifacts, run once per launcher
pub struct CleanupManager<F: ArtifactFs = OsFs> {
    fs: F,
    policy: RetryPolicy,
    settle_delay: Duration,
    completed: bool,
}

impl CleanupManager<OsFs> {
    pub fn new(policy: RetryPolicy, settle_delay: Duration) -> Self {
        Self::with_fs(OsFs, policy, settle_delay)
    }
}

impl<F: ArtifactFs> CleanupManager<F> {
    pub fn with_fs(fs: F, policy: RetryPolicy, settle_delay: Duration) -> Self {
        Self {
            fs,
            policy,
            settle_delay,
            completed: false,
        }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    pub fn fs(&self) -> &F {
        &self.fs
    }
}

impl<F: ArtifactFs> ArtifactCleaner for CleanupManager<F> {
    fn cleanup(&mut self, staged_binary: &Path, temp_root: &Path) -> CleanupReport {
        if self.completed {
            tracing::warn!("Cleanup already ran, ignoring repeated request");
            return CleanupReport {
                skipped: true,
                ..CleanupReport::default()
            };
        }
        self.completed = true;

        if !self.settle_delay.is_zero() {
            thread::sleep(self.settle_delay);
        }

        let mut report = CleanupReport::default();

        match remove_file_with_retries(&self.fs, &self.policy, staged_binary) {
            Ok(()) => {
                tracing::info!(path = ?staged_binary, "Staged binary removed");
                report.binary_removed = true;
            }
            Err(e) => {
                tracing::warn!(path = ?staged_binary, "Could not remove staged binary: {}", e);
            }
        }

        let removed_root = self.policy.run("remove temp directory", |_| {
            match self.fs.remove_dir_all(temp_root) {
                Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
                other => other,
            }
        });
        match removed_root {
            Ok(()) => {
                tracing::info!(path = ?temp_root, "Temp directory removed");
                report.temp_root_removed = true;
            }
            Err(e) => {
                tracing::warn!(path = ?temp_root, "Leaving temp directory behind: {}", e);
            }
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::time::Instant;

    /// Every delete fails as if another process held the file open
    #[derive(Default)]
    struct LockedFs {
        file_attempts: Cell<u32>,
        dir_attempts: Cell<u32>,
    }

    impl ArtifactFs for LockedFs {
        fn clear_readonly(&self, _path: &Path) -> io::Result<()> {
            Ok(())
        }

        fn remove_file(&self, _path: &Path) -> io::Result<()> {
            self.file_attempts.set(self.file_attempts.get() + 1);
            Err(io::Error::new(io::ErrorKind::PermissionDenied, "file is locked"))
        }

        fn remove_dir_all(&self, _path: &Path) -> io::Result<()> {
            self.dir_attempts.set(self.dir_attempts.get() + 1);
            Err(io::Error::new(io::ErrorKind::PermissionDenied, "directory in use"))
        }
    }

    /// Fails the first `failures` deletes, then behaves
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
                return Err(io::Error::new(io::ErrorKind::PermissionDenied, "locked"));
            }
            std::fs::remove_file(path)
        }

        fn remove_dir_all(&self, path: &Path) -> io::Result<()> {
            std::fs::remove_dir_all(path)
        }
    }

    #[test]
    fn test_locked_file_exhausts_configured_attempts() {
        for attempts in [1, 2, 4] {
            let delay = Duration::from_millis(5);
            let mut manager = CleanupManager::with_fs(
                LockedFs::default(),
                RetryPolicy::new(attempts, delay),
                Duration::ZERO,
            );

            let started = Instant::now();
            let report = manager.cleanup(Path::new("server"), Path::new("tmp"));
            let elapsed = started.elapsed();

            assert_eq!(manager.fs().file_attempts.get(), attempts);
            assert_eq!(manager.fs().dir_attempts.get(), attempts);
            assert!(!report.binary_removed);
            assert!(!report.temp_root_removed);
            // Two retry loops, each sleeping between attempts
            assert!(elapsed >= delay * (2 * (attempts - 1)));
        }
    }

    #[test]
    fn test_transient_lock_is_retried_away() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("MediaGallery_test");
        std::fs::create_dir_all(&root).unwrap();
        let binary = root.join("server");
        std::fs::write(&binary, b"binary").unwrap();

        let fs = FlakyFs {
            failures: 2,
            calls: Cell::new(0),
        };
        let mut manager =
            CleanupManager::with_fs(fs, RetryPolicy::new(3, Duration::from_millis(1)), Duration::ZERO);
        let report = manager.cleanup(&binary, &root);

        assert!(report.is_clean());
        assert_eq!(manager.fs().calls.get(), 3);
        assert!(!root.exists());
    }

    #[test]
    fn test_cleanup_runs_once() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("stage");
        std::fs::create_dir_all(&root).unwrap();
        let binary = root.join("server");
        std::fs::write(&binary, b"x").unwrap();

        let mut manager = CleanupManager::new(RetryPolicy::new(2, Duration::ZERO), Duration::ZERO);
        assert!(manager.cleanup(&binary, &root).is_clean());

        let second = manager.cleanup(&binary, &root);
        assert!(second.skipped);
        assert!(!second.binary_removed);
    }

    #[test]
    fn test_read_only_binary_is_removed() {
        let dir = tempfile::tempdir().unwrap();
        let binary = dir.path().join("server");
        std::fs::write(&binary, b"x").unwrap();
        let mut permissions = std::fs::metadata(&binary).unwrap().permissions();
        permissions.set_readonly(true);
        std::fs::set_permissions(&binary, permissions).unwrap();

        remove_file_with_retries(&OsFs, &RetryPolicy::new(1, Duration::ZERO), &binary).unwrap();
        assert!(!binary.exists());
    }

    #[test]
    fn test_missing_artifacts_count_as_removed() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("never-created");
        let mut manager = CleanupManager::new(RetryPolicy::new(3, Duration::ZERO), Duration::ZERO);
        assert!(manager.cleanup(&root.join("server"), &root).is_clean());
    }
}
