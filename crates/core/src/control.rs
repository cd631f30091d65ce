//! Control Plane (tray state machine)
//!
//! Translates tray intents into supervisor calls on the single-threaded main
//! loop. States:
//! - `Launching`: constructed, first instance not started yet
//! - `Idle`: serving `media_directory` on `port`
//! - `AwaitingUserInput`: a folder or port picker is open; the supervisor is
//!   not touched
//! - `Exiting`: terminal; cleanup has run and every later event is ignored

use crate::browser::{service_url, UrlOpener};
use crate::cleanup::{ArtifactCleaner, CleanupReport};
use crate::error::StartError;
use crate::notifier::LaunchNotifier;
use crate::state::LauncherState;
use crate::supervisor::{Health, RestartRequest, ServiceConfig, Supervise, SupervisorState};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Longest tooltip the tray shell accepts
const STATUS_MAX_CHARS: usize = 63;

/// GUI shell collaborator: pickers, status text, dialogs, the icon itself
pub trait Shell {
    fn pick_folder(&mut self, current: &Path) -> Option<PathBuf>;
    fn pick_port(&mut self, current: u16) -> Option<u16>;
    fn set_status(&mut self, text: &str);
    fn show_error(&mut self, title: &str, message: &str);
    fn remove_icon(&mut self);
}

/// One tray menu item each, plus the health timer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlEvent {
    ChangeFolder,
    ChangePort,
    OpenBrowser,
    Exit,
    HealthTick,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlState {
    Launching,
    Idle { media_directory: PathBuf, port: u16 },
    AwaitingUserInput,
    Exiting,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    UserRequested,
    ServiceExited,
    StartFailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Exit(ExitReason),
}

/// `Media Gallery - <folder name>`, trimmed to the tooltip limit
pub fn status_text(media_directory: &Path) -> String {
    let raw = media_directory.to_string_lossy();
    let folder = raw
        .rsplit(['/', '\\'])
        .find(|part| !part.is_empty())
        .unwrap_or(raw.as_ref());
    format!("Media Gallery - {}", folder)
        .chars()
        .take(STATUS_MAX_CHARS)
        .collect()
}

pub struct ControlPlane<S, H, U, C>
where
    S: Supervise,
    H: Shell,
    U: UrlOpener,
    C: ArtifactCleaner,
{
    launcher: LauncherState,
    supervisor: S,
    shell: H,
    opener: U,
    cleaner: C,
    notifier: LaunchNotifier,
    state: ControlState,
    exit_reason: Option<ExitReason>,
    cleanup_report: Option<CleanupReport>,
    poll_interval: Duration,
    next_health_check: Option<Instant>,
}

impl<S, H, U, C> ControlPlane<S, H, U, C>
where
    S: Supervise,
    H: Shell,
    U: UrlOpener,
    C: ArtifactCleaner,
{
    pub fn new(
        launcher: LauncherState,
        supervisor: S,
        shell: H,
        opener: U,
        cleaner: C,
        notifier: LaunchNotifier,
        poll_interval: Duration,
    ) -> Self {
        Self {
            launcher,
            supervisor,
            shell,
            opener,
            cleaner,
            notifier,
            state: ControlState::Launching,
            exit_reason: None,
            cleanup_report: None,
            poll_interval,
            next_health_check: None,
        }
    }

    pub fn state(&self) -> &ControlState {
        &self.state
    }

    pub fn supervisor(&self) -> &S {
        &self.supervisor
    }

    pub fn shell(&self) -> &H {
        &self.shell
    }

    pub fn opener(&self) -> &U {
        &self.opener
    }

    pub fn cleanup_report(&self) -> Option<CleanupReport> {
        self.cleanup_report
    }

    pub fn is_exiting(&self) -> bool {
        self.state == ControlState::Exiting
    }

    /// Start the first instance. A failure tears everything down.
    pub fn launch(&mut self, config: ServiceConfig, now: Instant) -> Flow {
        match self.supervisor.start(config) {
            Ok(info) => {
                self.enter_idle(info.config, now);
                Flow::Continue
            }
            Err(e) => {
                let message = match e.os_code() {
                    Some(code) => format!("Failed to start server.\n\n{}\n\nError code: {}", e, code),
                    None => format!("Failed to start server.\n\n{}", e),
                };
                self.shell.show_error("Error", &message);
                self.shutdown(ExitReason::StartFailed)
            }
        }
    }

    /// Timer entry point: fires the launch notification and health checks
    pub fn tick(&mut self, now: Instant) -> Flow {
        if let Some(reason) = self.exit_reason {
            return Flow::Exit(reason);
        }

        if let Some(url) = self.notifier.take_due(now) {
            self.opener.open_url(&url);
        }

        match self.next_health_check {
            Some(due) if now >= due => {
                self.next_health_check = Some(now + self.poll_interval);
                self.handle(ControlEvent::HealthTick)
            }
            _ => Flow::Continue,
        }
    }

    pub fn handle(&mut self, event: ControlEvent) -> Flow {
        if let Some(reason) = self.exit_reason {
            tracing::debug!(?event, "Ignoring event while exiting");
            return Flow::Exit(reason);
        }

        let ControlState::Idle {
            media_directory,
            port,
        } = self.state.clone()
        else {
            tracing::debug!(?event, state = ?self.state, "Ignoring event outside Idle");
            return Flow::Continue;
        };

        match event {
            ControlEvent::HealthTick => match self.supervisor.poll() {
                Health::Alive => Flow::Continue,
                Health::Exited(status) => {
                    tracing::error!(?status, "Service exited unexpectedly, shutting down");
                    self.shutdown(ExitReason::ServiceExited)
                }
            },
            ControlEvent::OpenBrowser => {
                self.opener.open_url(&service_url(port));
                Flow::Continue
            }
            ControlEvent::ChangeFolder => {
                self.state = ControlState::AwaitingUserInput;
                let picked = self.shell.pick_folder(&media_directory);
                self.restore_idle(media_directory.clone(), port);
                match picked {
                    Some(folder) if folder != media_directory => {
                        self.apply_restart(RestartRequest::folder(folder))
                    }
                    _ => Flow::Continue,
                }
            }
            ControlEvent::ChangePort => {
                self.state = ControlState::AwaitingUserInput;
                let picked = self.shell.pick_port(port);
                self.restore_idle(media_directory, port);
                match picked {
                    Some(new_port) if new_port != port => {
                        self.apply_restart(RestartRequest::port(new_port))
                    }
                    _ => Flow::Continue,
                }
            }
            ControlEvent::Exit => self.shutdown(ExitReason::UserRequested),
        }
    }

    fn restore_idle(&mut self, media_directory: PathBuf, port: u16) {
        self.state = ControlState::Idle {
            media_directory,
            port,
        };
    }

    fn enter_idle(&mut self, config: ServiceConfig, now: Instant) {
        self.shell.set_status(&status_text(&config.media_directory));
        self.notifier.arm(service_url(config.port), now);
        self.next_health_check = Some(now + self.poll_interval);
        self.restore_idle(config.media_directory, config.port);
    }

    fn apply_restart(&mut self, request: RestartRequest) -> Flow {
        // The health timer is stalled while a picker is open
        if let Health::Exited(status) = self.supervisor.poll() {
            tracing::error!(?status, "Service exited while a picker was open, shutting down");
            return self.shutdown(ExitReason::ServiceExited);
        }

        match self.supervisor.restart(request) {
            Ok(info) => {
                self.enter_idle(info.config, Instant::now());
                Flow::Continue
            }
            Err(e @ StartError::AlreadyExited { .. }) => {
                tracing::error!("Service exited before restart: {}", e);
                self.shutdown(ExitReason::ServiceExited)
            }
            Err(e) if self.supervisor.state() == SupervisorState::Running => {
                // Rejected before the old instance was touched
                tracing::warn!("Restart rejected, keeping current service: {}", e);
                self.shell.show_error("Error", &format!("Could not restart server.\n\n{}", e));
                Flow::Continue
            }
            Err(e) => {
                let message = match e.os_code() {
                    Some(code) => format!(
                        "Failed to start server. The previous server was already stopped.\n\n{}\n\nError code: {}",
                        e, code
                    ),
                    None => format!(
                        "Failed to start server. The previous server was already stopped.\n\n{}",
                        e
                    ),
                };
                self.shell.show_error("Error", &message);
                self.shutdown(ExitReason::StartFailed)
            }
        }
    }

    /// Remove the icon, terminate, clean up. Runs at most once.
    fn shutdown(&mut self, reason: ExitReason) -> Flow {
        if let Some(previous) = self.exit_reason {
            return Flow::Exit(previous);
        }
        tracing::info!(?reason, "Launcher exiting");
        self.exit_reason = Some(reason);
        self.state = ControlState::Exiting;
        self.notifier.cancel();
        self.next_health_check = None;

        self.shell.remove_icon();
        self.supervisor.terminate();
        let report = self.cleaner.cleanup(
            self.launcher.staged_binary().path(),
            self.launcher.temp_root(),
        );
        if !report.is_clean() {
            tracing::warn!(?report, "Staged artifacts were not fully removed");
        }
        self.cleanup_report = Some(report);
        Flow::Exit(reason)
    }
}
