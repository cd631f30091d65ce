//! Media Gallery Core Library
//!
//! Supervision and control for the bundled gallery service.
//!
//! Architecture:
//! - Runner process owns the system tray and drives the control plane
//! - The gallery service is staged from an embedded blob and run as a child
//!   in its own process group
//! - Staged artifacts are removed once, after the child is confirmed dead

pub mod browser;
pub mod cleanup;
pub mod config;
pub mod control;
pub mod error;
pub mod logging;
pub mod notifier;
pub mod process_group;
pub mod stager;
pub mod state;
pub mod supervisor;

pub use control::{ControlEvent, ControlPlane, ControlState, ExitReason, Flow, Shell};
pub use error::{ConfigError, StagingError, StartError};
pub use state::LauncherState;
pub use supervisor::{
    Health, InstanceInfo, RestartRequest, ServiceConfig, Supervise, Supervisor, SupervisorState,
};
