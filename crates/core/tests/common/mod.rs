//! Shared helpers for the integration tests
#![allow(dead_code)]

use media_gallery_core::cleanup::RetryPolicy;
use media_gallery_core::stager::{BinaryStager, StagedBinary};
use parking_lot::{Mutex, MutexGuard};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Writing an executable while another thread forks can make the exec fail
/// with ETXTBSY, so tests that stage and spawn run one at a time.
static PROCESS_TESTS: Mutex<()> = parking_lot::const_mutex(());

pub fn serial() -> MutexGuard<'static, ()> {
    PROCESS_TESTS.lock()
}

/// Exits cleanly on SIGINT and records its arguments beside itself
pub const GRACEFUL_SERVICE: &[u8] = b"#!/bin/sh
trap 'exit 0' INT
printf '%s\\n' \"$@\" > \"$(dirname \"$0\")/args.txt\"
while :; do sleep 0.05; done
";

/// Ignores SIGINT so only a forced kill stops it
pub const STUBBORN_SERVICE: &[u8] = b"#!/bin/sh
trap '' INT
printf '%s\\n' \"$@\" > \"$(dirname \"$0\")/args.txt\"
while :; do sleep 0.05; done
";

/// Dies on its own shortly after starting
pub const CRASHING_SERVICE: &[u8] = b"#!/bin/sh
sleep 0.1
exit 3
";

pub fn stage(blob: &[u8], root: &Path) -> StagedBinary {
    BinaryStager::new(RetryPolicy::new(3, Duration::from_millis(10)))
        .stage(blob, root)
        .expect("stage test service")
}

/// Arguments the staged script recorded, once it has written them
pub fn recorded_args(staged: &StagedBinary) -> Vec<String> {
    let path: PathBuf = staged.path().with_file_name("args.txt");
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        if let Ok(contents) = std::fs::read_to_string(&path) {
            if contents.ends_with('\n') {
                return contents.lines().map(str::to_string).collect();
            }
        }
        assert!(Instant::now() < deadline, "service never recorded its arguments");
        std::thread::sleep(Duration::from_millis(20));
    }
}

pub fn clear_recorded_args(staged: &StagedBinary) {
    let _ = std::fs::remove_file(staged.path().with_file_name("args.txt"));
}
