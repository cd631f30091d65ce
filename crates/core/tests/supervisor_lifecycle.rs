//! Start, restart, poll and terminate against real child processes
#![cfg(unix)]

mod common;

use common::*;
use media_gallery_core::config::LauncherConfig;
use media_gallery_core::process_group::os_reports_running;
use media_gallery_core::{
    Health, LauncherState, RestartRequest, ServiceConfig, StartError, Supervise, Supervisor,
    SupervisorState,
};
use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};

const GRACE: Duration = Duration::from_millis(2_000);

fn supervisor_for(staged: &media_gallery_core::stager::StagedBinary, grace: Duration) -> Supervisor {
    Supervisor::for_binary(staged.path(), "nobrowser", false, grace)
}

#[test]
fn test_start_records_instance_fields() {
    let _guard = serial();
    let dir = tempfile::tempdir().unwrap();
    let staged = stage(GRACEFUL_SERVICE, dir.path());
    let mut supervisor = supervisor_for(&staged, GRACE);

    let info = supervisor
        .start(ServiceConfig::new(r"C:\Photos", 8987))
        .unwrap();

    assert_eq!(supervisor.state(), SupervisorState::Running);
    let instance = supervisor.current().unwrap();
    assert_eq!(instance.pid(), info.pid);
    assert_eq!(instance.media_directory(), PathBuf::from(r"C:\Photos"));
    assert_eq!(instance.port(), 8987);
    assert!(instance.headless());

    assert_eq!(recorded_args(&staged), vec![r"C:\Photos", "8987", "nobrowser"]);

    supervisor.terminate();
}

#[test]
fn test_start_is_rejected_while_running() {
    let _guard = serial();
    let dir = tempfile::tempdir().unwrap();
    let staged = stage(GRACEFUL_SERVICE, dir.path());
    let mut supervisor = supervisor_for(&staged, GRACE);

    let first = supervisor.start(ServiceConfig::new("/srv/a", 8987)).unwrap();
    assert!(supervisor.start(ServiceConfig::new("/srv/b", 8988)).is_err());
    assert_eq!(supervisor.current().unwrap().pid(), first.pid);

    supervisor.terminate();
}

#[test]
fn test_graceful_terminate_confirms_death() {
    let _guard = serial();
    let dir = tempfile::tempdir().unwrap();
    let staged = stage(GRACEFUL_SERVICE, dir.path());
    let mut supervisor = supervisor_for(&staged, GRACE);

    let info = supervisor.start(ServiceConfig::new("/srv/photos", 8987)).unwrap();
    recorded_args(&staged);

    let started = Instant::now();
    let status = supervisor.terminate().expect("exit status");

    assert!(status.success(), "graceful exit should be clean: {:?}", status);
    assert!(started.elapsed() < GRACE);
    assert!(!os_reports_running(info.pid));
    assert_eq!(supervisor.state(), SupervisorState::Stopped);
    assert!(supervisor.current().is_none());
}

#[test]
fn test_unresponsive_service_is_force_killed() {
    let _guard = serial();
    let dir = tempfile::tempdir().unwrap();
    let staged = stage(STUBBORN_SERVICE, dir.path());
    let grace = Duration::from_millis(300);
    let mut supervisor = supervisor_for(&staged, grace);

    let info = supervisor.start(ServiceConfig::new("/srv/photos", 8987)).unwrap();
    recorded_args(&staged);

    let started = Instant::now();
    let status = supervisor.terminate().expect("exit status");

    assert!(!status.success());
    assert!(started.elapsed() >= grace);
    assert!(!os_reports_running(info.pid));
    assert_eq!(supervisor.state(), SupervisorState::Stopped);
}

#[test]
fn test_restart_inherits_folder_and_replaces_instance() {
    let _guard = serial();
    let dir = tempfile::tempdir().unwrap();
    let staged = stage(GRACEFUL_SERVICE, dir.path());
    let mut supervisor = supervisor_for(&staged, GRACE);

    let old = supervisor.start(ServiceConfig::new(r"C:\Photos", 8987)).unwrap();
    recorded_args(&staged);
    clear_recorded_args(&staged);

    let new = supervisor.restart(RestartRequest::port(8443)).unwrap();

    assert_ne!(old.pid, new.pid);
    assert!(!os_reports_running(old.pid));
    assert_eq!(new.config.port, 8443);
    assert_eq!(new.config.media_directory, PathBuf::from(r"C:\Photos"));
    assert_eq!(supervisor.current().unwrap().pid(), new.pid);
    assert_eq!(recorded_args(&staged), vec![r"C:\Photos", "8443", "nobrowser"]);

    supervisor.terminate();
}

#[test]
fn test_repeated_restarts_keep_one_live_instance() {
    let _guard = serial();
    let dir = tempfile::tempdir().unwrap();
    let staged = stage(GRACEFUL_SERVICE, dir.path());
    let mut supervisor = supervisor_for(&staged, GRACE);

    let mut pids = vec![supervisor.start(ServiceConfig::new("/srv/a", 9001)).unwrap().pid];
    let requests = [
        RestartRequest::folder("/srv/b"),
        RestartRequest::port(9002),
        RestartRequest {
            media_directory: Some("/srv/c".into()),
            port: Some(9003),
        },
    ];
    for request in requests {
        recorded_args(&staged);
        clear_recorded_args(&staged);
        let info = supervisor.restart(request).unwrap();
        pids.push(info.pid);

        let live: Vec<_> = pids.iter().filter(|pid| os_reports_running(**pid)).collect();
        assert_eq!(live, vec![&info.pid]);
    }

    let config = supervisor.current_config().unwrap();
    assert_eq!(config.media_directory, PathBuf::from("/srv/c"));
    assert_eq!(config.port, 9003);

    supervisor.terminate();
    assert!(pids.iter().all(|pid| !os_reports_running(*pid)));
}

#[test]
fn test_restart_spawn_failure_leaves_slot_empty() {
    let _guard = serial();
    let dir = tempfile::tempdir().unwrap();
    let staged = stage(GRACEFUL_SERVICE, dir.path());
    let mut supervisor = supervisor_for(&staged, GRACE);

    let old = supervisor.start(ServiceConfig::new("/srv/a", 8987)).unwrap();
    recorded_args(&staged);

    // Pull the binary out from under the next spawn
    std::fs::remove_file(staged.path()).unwrap();
    let result = supervisor.restart(RestartRequest::port(8443));

    assert!(result.is_err());
    assert!(!os_reports_running(old.pid));
    assert_eq!(supervisor.state(), SupervisorState::Stopped);
    assert!(supervisor.current().is_none());
}

#[test]
fn test_poll_detects_crash() {
    let _guard = serial();
    let dir = tempfile::tempdir().unwrap();
    let staged = stage(CRASHING_SERVICE, dir.path());
    let mut supervisor = supervisor_for(&staged, GRACE);

    supervisor.start(ServiceConfig::new("/srv/photos", 8987)).unwrap();

    let deadline = Instant::now() + Duration::from_secs(5);
    let status = loop {
        match supervisor.poll() {
            Health::Alive => {
                assert!(Instant::now() < deadline, "crash was never observed");
                thread::sleep(Duration::from_millis(20));
            }
            Health::Exited(status) => break status,
        }
    };
    assert_eq!(status.and_then(|s| s.code()), Some(3));

    // Terminating a dead child just releases the handle
    assert_eq!(supervisor.terminate().and_then(|s| s.code()), Some(3));
    assert_eq!(supervisor.state(), SupervisorState::Stopped);
}

#[test]
fn test_restart_after_unobserved_crash_is_refused() {
    let _guard = serial();
    let dir = tempfile::tempdir().unwrap();
    let staged = stage(CRASHING_SERVICE, dir.path());
    let mut supervisor = supervisor_for(&staged, GRACE);

    let info = supervisor.start(ServiceConfig::new("/srv/photos", 8987)).unwrap();
    // No poll in between: the restart is the first to see the crash
    thread::sleep(Duration::from_millis(500));

    let result = supervisor.restart(RestartRequest::port(8443));

    assert!(
        matches!(result, Err(StartError::AlreadyExited { code: Some(3) })),
        "{:?}",
        result
    );
    assert_eq!(supervisor.state(), SupervisorState::Stopped);
    assert!(supervisor.current().is_none());
    assert!(!os_reports_running(info.pid));
}

#[test]
fn test_launcher_state_stage_and_supervise() {
    let _guard = serial();
    let dir = tempfile::tempdir().unwrap();
    let config = LauncherConfig::default();
    let launcher = LauncherState::prepare(&config, GRACEFUL_SERVICE, dir.path()).unwrap();

    let mut supervisor = Supervisor::new(&launcher, &config.headless_token, GRACE);
    let info = supervisor
        .start(ServiceConfig::new("/srv/photos", config.port))
        .unwrap();
    assert_eq!(info.config.port, 8987);

    drop(supervisor);
    assert!(!os_reports_running(info.pid));
}
