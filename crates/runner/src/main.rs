//! MediaGallery - System Tray Launcher
//!
//! This process manages:
//! - Staging the bundled gallery service into a private temp directory
//! - Running it as a supervised child (restart on folder/port change)
//! - System tray icon with context menu; double-click opens the browser
//! - Cleanup of staged files once the service is confirmed dead

#![windows_subsystem = "windows"]

mod dialogs;
mod tray;

use anyhow::{anyhow, Context, Result};
use crossbeam_channel::Receiver;
use std::path::Path;
use std::process::ExitCode;
use std::time::{Duration, Instant};

use media_gallery_core::browser::BrowserLauncher;
use media_gallery_core::cleanup::{ArtifactCleaner, CleanupManager};
use media_gallery_core::config::LauncherConfig;
use media_gallery_core::notifier::LaunchNotifier;
use media_gallery_core::stager::embedded_service_blob;
use media_gallery_core::{
    config, logging, ControlEvent, ControlPlane, ExitReason, Flow, LauncherState, ServiceConfig,
    StagingError, Supervisor,
};

use tray::{ClickTracker, TrayShell};
use tray_icon::menu::MenuEvent;
use tray_icon::{MouseButton, MouseButtonState, TrayIconEvent};

type Control = ControlPlane<Supervisor, TrayShell, BrowserLauncher, CleanupManager>;

fn main() -> ExitCode {
    logging::init();
    tracing::info!("MediaGallery starting...");

    match run() {
        Ok(code) => code,
        Err(e) => {
            dialogs::show_error("Error", &format!("{:#}", e));
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<ExitCode> {
    let mut app_config = config::load_config();
    app_config.apply_args(std::env::args().skip(1));
    app_config.validate().context("Invalid launcher configuration")?;

    #[cfg(target_os = "linux")]
    gtk::init().map_err(|e| anyhow!("Failed to init GTK: {e}"))?;

    // Handlers go in before the icon exists so no early click is lost
    let (tray_tx, tray_rx) = crossbeam_channel::unbounded::<TrayIconEvent>();
    let (menu_tx, menu_rx) = crossbeam_channel::unbounded::<MenuEvent>();

    TrayIconEvent::set_event_handler(Some(move |event| {
        let _ = tray_tx.send(event);
    }));
    MenuEvent::set_event_handler(Some(move |event| {
        tracing::debug!("Menu event: {:?}", event);
        let _ = menu_tx.send(event);
    }));

    let temp_parent = std::env::temp_dir();
    let (launcher, shell) =
        match prepare(&app_config, embedded_service_blob(), &temp_parent, || {
            TrayShell::new(app_config.port_presets.clone())
        }) {
            Ok(prepared) => prepared,
            Err(StartupError::Staging(e)) => {
                dialogs::show_error("Error", &dialogs::staging_failure_message(&e, &temp_parent));
                return Ok(ExitCode::FAILURE);
            }
            Err(StartupError::Shell(e)) => {
                return Err(anyhow!("Failed to create tray icon: {e:#}"));
            }
        };

    let supervisor = Supervisor::new(
        &launcher,
        app_config.headless_token.as_str(),
        app_config.graceful_stop_timeout(),
    );
    let mut control: Control = ControlPlane::new(
        launcher,
        supervisor,
        shell,
        BrowserLauncher::default(),
        CleanupManager::new(app_config.retry_policy(), app_config.cleanup_settle_delay()),
        LaunchNotifier::new(app_config.launch_delay()),
        app_config.health_poll_interval(),
    );

    let first = ServiceConfig::new(app_config.resolve_media_directory(), app_config.port);
    if let Flow::Exit(reason) = control.launch(first, Instant::now()) {
        return Ok(exit_code(reason));
    }

    tracing::info!("Entering message loop");
    let reason = run_loop(&mut control, &tray_rx, &menu_rx);
    tracing::info!(?reason, report = ?control.cleanup_report(), "MediaGallery stopped");
    Ok(exit_code(reason))
}

#[derive(Debug)]
enum StartupError {
    Staging(StagingError),
    Shell(anyhow::Error),
}

/// Stage the service, then build the shell. Nothing is shown while staging, and
/// a shell that fails to come up takes the staged files with it.
fn prepare<T>(
    app_config: &LauncherConfig,
    blob: &[u8],
    temp_parent: &Path,
    make_shell: impl FnOnce() -> Result<T>,
) -> Result<(LauncherState, T), StartupError> {
    let launcher = LauncherState::prepare(app_config, blob, temp_parent).map_err(|e| {
        tracing::error!("Staging failed: {}", e);
        StartupError::Staging(e)
    })?;
    tracing::info!(path = ?launcher.staged_binary().path(), "Service staged");

    match make_shell() {
        Ok(shell) => Ok((launcher, shell)),
        Err(e) => {
            let report = CleanupManager::new(app_config.retry_policy(), Duration::ZERO)
                .cleanup(launcher.staged_binary().path(), launcher.temp_root());
            tracing::warn!(?report, "Shell failed to start, staged files discarded");
            Err(StartupError::Shell(e))
        }
    }
}

fn run_loop(
    control: &mut Control,
    tray_rx: &Receiver<TrayIconEvent>,
    menu_rx: &Receiver<MenuEvent>,
) -> ExitReason {
    let mut clicks = ClickTracker::default();

    loop {
        if !pump_platform_events() {
            tracing::info!("Quit requested by the platform");
            if let Flow::Exit(reason) = control.handle(ControlEvent::Exit) {
                return reason;
            }
        }

        for event in tray_rx.try_iter() {
            if let TrayIconEvent::Click {
                button: MouseButton::Left,
                button_state: MouseButtonState::Up,
                ..
            } = event
            {
                if clicks.register(Instant::now()) {
                    tracing::info!("Double-click detected - opening browser");
                    if let Flow::Exit(reason) = control.handle(ControlEvent::OpenBrowser) {
                        return reason;
                    }
                }
            }
        }

        for event in menu_rx.try_iter() {
            let Some(control_event) = control.shell().event_for(&event.id) else {
                continue;
            };
            tracing::info!(?control_event, "Menu item clicked");
            if let Flow::Exit(reason) = control.handle(control_event) {
                return reason;
            }
        }

        if let Flow::Exit(reason) = control.tick(Instant::now()) {
            return reason;
        }

        // Small sleep to avoid busy-waiting
        std::thread::sleep(Duration::from_millis(10));
    }
}

fn exit_code(reason: ExitReason) -> ExitCode {
    match reason {
        ExitReason::UserRequested => ExitCode::SUCCESS,
        ExitReason::ServiceExited | ExitReason::StartFailed => ExitCode::FAILURE,
    }
}

/// Drain pending Win32 messages; false once WM_QUIT arrives
#[cfg(windows)]
fn pump_platform_events() -> bool {
    use windows::Win32::UI::WindowsAndMessaging::{
        DispatchMessageW, PeekMessageW, TranslateMessage, MSG, PM_REMOVE, WM_QUIT,
    };

    unsafe {
        let mut msg = MSG::default();
        while PeekMessageW(&mut msg, None, 0, 0, PM_REMOVE).as_bool() {
            if msg.message == WM_QUIT {
                return false;
            }
            let _ = TranslateMessage(&msg);
            DispatchMessageW(&msg);
        }
    }
    true
}

/// The tray lives on GTK, which needs its loop turned by hand
#[cfg(target_os = "linux")]
fn pump_platform_events() -> bool {
    while gtk::events_pending() {
        gtk::main_iteration_do(false);
    }
    true
}

#[cfg(not(any(windows, target_os = "linux")))]
fn pump_platform_events() -> bool {
    true
}
