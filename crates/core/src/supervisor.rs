//! Process Supervisor
//!
//! Owns the one and only service child process. Every configuration change
//! goes through [`Supervisor::restart`], which terminates the old instance
//! (graceful, then forced, then an unconditional wait) before spawning the
//! replacement, so two instances never overlap.

use crate::error::StartError;
use crate::process_group;
use crate::state::LauncherState;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus};
use std::thread;
use std::time::{Duration, Instant};

const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

/// Everything the service is launched with
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceConfig {
    pub media_directory: PathBuf,
    pub port: u16,
    pub headless: bool,
}

impl ServiceConfig {
    pub fn new(media_directory: impl Into<PathBuf>, port: u16) -> Self {
        Self {
            media_directory: media_directory.into(),
            port,
            headless: true,
        }
    }
}

/// Partial configuration change; unset fields carry over
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RestartRequest {
    pub media_directory: Option<PathBuf>,
    pub port: Option<u16>,
}

impl RestartRequest {
    pub fn folder(media_directory: impl Into<PathBuf>) -> Self {
        Self {
            media_directory: Some(media_directory.into()),
            port: None,
        }
    }

    pub fn port(port: u16) -> Self {
        Self {
            media_directory: None,
            port: Some(port),
        }
    }

    /// Full configuration for the next instance
    pub fn merge(&self, previous: &ServiceConfig) -> ServiceConfig {
        ServiceConfig {
            media_directory: self
                .media_directory
                .clone()
                .unwrap_or_else(|| previous.media_directory.clone()),
            port: self.port.unwrap_or(previous.port),
            headless: previous.headless,
        }
    }
}

/// A live service process. Only the supervisor holds one.
#[derive(Debug)]
pub struct ServiceInstance {
    child: Child,
    config: ServiceConfig,
}

impl ServiceInstance {
    pub fn pid(&self) -> u32 {
        self.child.id()
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn media_directory(&self) -> &Path {
        &self.config.media_directory
    }

    pub fn port(&self) -> u16 {
        self.config.port
    }

    pub fn headless(&self) -> bool {
        self.config.headless
    }

    fn info(&self) -> InstanceInfo {
        InstanceInfo {
            pid: self.pid(),
            config: self.config.clone(),
        }
    }
}

/// Snapshot of a started instance handed back to callers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceInfo {
    pub pid: u32,
    pub config: ServiceConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Health {
    Alive,
    /// No live child; carries the exit status when the OS reported one
    Exited(Option<ExitStatus>),
}

/// Supervisor operations the control plane depends on
pub trait Supervise {
    fn state(&self) -> SupervisorState;
    fn current_config(&self) -> Option<ServiceConfig>;
    fn start(&mut self, config: ServiceConfig) -> Result<InstanceInfo, StartError>;
    fn restart(&mut self, request: RestartRequest) -> Result<InstanceInfo, StartError>;
    fn terminate(&mut self) -> Option<ExitStatus>;
    fn poll(&mut self) -> Health;
}

pub struct Supervisor {
    binary: PathBuf,
    headless_token: String,
    show_console: bool,
    graceful_timeout: Duration,
    state: SupervisorState,
    current: Option<ServiceInstance>,
}

impl Supervisor {
    pub fn new(
        launcher: &LauncherState,
        headless_token: impl Into<String>,
        graceful_timeout: Duration,
    ) -> Self {
        Self::for_binary(
            launcher.staged_binary().path(),
            headless_token,
            launcher.show_console(),
            graceful_timeout,
        )
    }

    pub fn for_binary(
        binary: impl Into<PathBuf>,
        headless_token: impl Into<String>,
        show_console: bool,
        graceful_timeout: Duration,
    ) -> Self {
        Self {
            binary: binary.into(),
            headless_token: headless_token.into(),
            show_console,
            graceful_timeout,
            state: SupervisorState::Stopped,
            current: None,
        }
    }

    pub fn current(&self) -> Option<&ServiceInstance> {
        self.current.as_ref()
    }

    fn build_command(&self, config: &ServiceConfig) -> Command {
        let mut command = Command::new(&self.binary);
        command
            .arg(&config.media_directory)
            .arg(config.port.to_string());
        if config.headless {
            command.arg(&self.headless_token);
        }
        process_group::configure_command(&mut command, self.show_console);
        command
    }

    fn spawn(&mut self, config: ServiceConfig) -> Result<InstanceInfo, StartError> {
        if config.port == 0 {
            return Err(StartError::InvalidPort(0));
        }

        self.state = SupervisorState::Starting;
        match self.build_command(&config).spawn() {
            Ok(child) => {
                let instance = ServiceInstance { child, config };
                tracing::info!(
                    pid = instance.pid(),
                    port = instance.port(),
                    media_directory = ?instance.media_directory(),
                    "Service started"
                );
                let info = instance.info();
                self.current = Some(instance);
                self.state = SupervisorState::Running;
                Ok(info)
            }
            Err(source) => {
                self.state = SupervisorState::Stopped;
                tracing::error!(
                    path = ?self.binary,
                    code = ?source.raw_os_error(),
                    "Failed to start service: {}",
                    source
                );
                Err(StartError::SpawnFailed {
                    path: self.binary.clone(),
                    source,
                })
            }
        }
    }
}

impl Supervise for Supervisor {
    fn state(&self) -> SupervisorState {
        self.state
    }

    fn current_config(&self) -> Option<ServiceConfig> {
        self.current.as_ref().map(|instance| instance.config.clone())
    }

    /// Spawn the service. Only valid while stopped.
    fn start(&mut self, config: ServiceConfig) -> Result<InstanceInfo, StartError> {
        if self.state != SupervisorState::Stopped {
            return Err(StartError::InvalidState {
                operation: "start",
                state: self.state,
            });
        }
        self.spawn(config)
    }

    /// Terminate the current instance, then start with the merged config.
    /// On a spawn failure the slot stays empty and the state is `Stopped`.
    /// A child that already died is reaped and reported, never replaced.
    fn restart(&mut self, request: RestartRequest) -> Result<InstanceInfo, StartError> {
        let previous = match (&self.state, &self.current) {
            (SupervisorState::Running, Some(instance)) => instance.config.clone(),
            _ => {
                return Err(StartError::InvalidState {
                    operation: "restart",
                    state: self.state,
                })
            }
        };

        if let Health::Exited(status) = self.poll() {
            let code = self.terminate().or(status).and_then(|s| s.code());
            return Err(StartError::AlreadyExited { code });
        }

        let next = request.merge(&previous);
        if next.port == 0 {
            return Err(StartError::InvalidPort(0));
        }

        tracing::info!(
            from_port = previous.port,
            to_port = next.port,
            media_directory = ?next.media_directory,
            "Restarting service"
        );
        self.terminate();
        self.spawn(next)
    }

    /// Graceful group interrupt, bounded wait, forced kill, then wait for the
    /// OS to confirm death before the handle is released. No-op when stopped.
    fn terminate(&mut self) -> Option<ExitStatus> {
        let timeout = self.graceful_timeout;
        let Some(instance) = self.current.as_mut() else {
            self.state = SupervisorState::Stopped;
            return None;
        };

        self.state = SupervisorState::Stopping;
        let pid = instance.child.id();
        let child = &mut instance.child;

        let already_exited = matches!(child.try_wait(), Ok(Some(_)));
        if !already_exited {
            tracing::info!(pid, "Sending graceful stop to service process group");
            if let Err(e) = process_group::send_graceful_stop(pid) {
                tracing::warn!(pid, "Graceful stop signal failed: {}", e);
            }

            if !wait_for_exit(child, timeout) {
                tracing::warn!(
                    pid,
                    timeout_ms = timeout.as_millis() as u64,
                    "Service ignored graceful stop, force-killing"
                );
                if let Err(e) = process_group::force_kill(child) {
                    tracing::warn!(pid, "Force kill failed: {}", e);
                }
            }
        }

        // Unbounded: the handle must not be released before the process is gone
        let status = match child.wait() {
            Ok(status) => Some(status),
            Err(e) => {
                tracing::warn!(pid, "Waiting for service exit failed: {}", e);
                None
            }
        };

        if process_group::os_reports_running(pid) {
            tracing::warn!(pid, "OS still lists the service pid after exit was confirmed");
        }

        tracing::info!(pid, status = ?status, "Service terminated");
        self.current = None;
        self.state = SupervisorState::Stopped;
        status
    }

    fn poll(&mut self) -> Health {
        let Some(instance) = self.current.as_mut() else {
            return Health::Exited(None);
        };
        match instance.child.try_wait() {
            Ok(None) => Health::Alive,
            Ok(Some(status)) => {
                tracing::warn!(pid = instance.child.id(), %status, "Service exited");
                Health::Exited(Some(status))
            }
            Err(e) => {
                tracing::warn!(pid = instance.child.id(), "Failed to poll service status: {}", e);
                Health::Exited(None)
            }
        }
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        if self.current.is_some() {
            tracing::warn!("Supervisor dropped with a live service, terminating it");
            self.terminate();
        }
    }
}

/// Poll `try_wait` until the child exits or `timeout` passes
fn wait_for_exit(child: &mut Child, timeout: Duration) -> bool {
    let start = Instant::now();
    loop {
        match child.try_wait() {
            Ok(Some(_)) => return true,
            Ok(None) => {
                if start.elapsed() >= timeout {
                    return false;
                }
                thread::sleep(EXIT_POLL_INTERVAL);
            }
            Err(_) => return false,
        }
    }
}
