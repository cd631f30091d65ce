/// System tray shell for the launcher
///
/// Owns the tray icon and its context menu and implements the control
/// plane's `Shell` seam on top of it. Pickers and error boxes are modal rfd
/// dialogs, so they run on the main loop thread.
use crate::dialogs::{self, PortChoice};
use anyhow::{anyhow, Result};
use media_gallery_core::{ControlEvent, Shell};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tray_icon::menu::{Menu, MenuId, MenuItem, PredefinedMenuItem};
use tray_icon::{Icon, TrayIcon, TrayIconBuilder};

const ICON_FILE_NAME: &str = "favicon.ico";
const ICON_SIZE: u32 = 16;
const DOUBLE_CLICK_WINDOW: Duration = Duration::from_millis(500);

/// Load the tray icon from beside the executable, falling back to a flat square
fn load_app_icon() -> Result<Icon> {
    let paths_to_try = [
        std::env::current_exe()
            .ok()
            .and_then(|p| p.parent().map(|p| p.join(ICON_FILE_NAME))),
        Some(PathBuf::from(ICON_FILE_NAME)),
    ];

    for path in paths_to_try.into_iter().flatten() {
        if !path.exists() {
            continue;
        }
        match decode_icon(&path) {
            Ok(icon) => return Ok(icon),
            Err(e) => tracing::warn!("Ignoring icon {:?}: {}", path, e),
        }
    }

    let icon_rgba: Vec<u8> = (0..ICON_SIZE * ICON_SIZE)
        .flat_map(|_| [0x1E, 0x88, 0xE5, 0xFF])
        .collect();
    Icon::from_rgba(icon_rgba, ICON_SIZE, ICON_SIZE)
        .map_err(|e| anyhow!("Failed to create fallback icon: {:?}", e))
}

fn decode_icon(path: &Path) -> Result<Icon> {
    let icon_data = std::fs::read(path).map_err(|e| anyhow!("Failed to read icon: {}", e))?;
    let img = image::load_from_memory(&icon_data)
        .map_err(|e| anyhow!("Failed to decode icon: {}", e))?;
    let rgba = img
        .resize_exact(ICON_SIZE, ICON_SIZE, image::imageops::FilterType::Lanczos3)
        .to_rgba8();
    Icon::from_rgba(rgba.into_raw(), ICON_SIZE, ICON_SIZE)
        .map_err(|e| anyhow!("Failed to create icon from image: {:?}", e))
}

/// Ports offered by the port picker, in preset order, without the current one
pub fn port_candidates(presets: &[u16], current: u16) -> Vec<u16> {
    let mut candidates = Vec::with_capacity(presets.len());
    for &port in presets {
        if port != current && !candidates.contains(&port) {
            candidates.push(port);
        }
    }
    candidates
}

/// Tells a double-click apart from two single clicks on the icon
#[derive(Debug, Default)]
pub struct ClickTracker {
    last_click: Option<Instant>,
}

impl ClickTracker {
    /// Record a left-button release; true when it completes a double-click
    pub fn register(&mut self, now: Instant) -> bool {
        match self.last_click.take() {
            Some(previous) if now.duration_since(previous) < DOUBLE_CLICK_WINDOW => true,
            _ => {
                self.last_click = Some(now);
                false
            }
        }
    }
}

pub struct TrayShell {
    tray_icon: Option<TrayIcon>,
    port_presets: Vec<u16>,
    menu_item_change_folder: MenuId,
    menu_item_change_port: MenuId,
    menu_item_open_browser: MenuId,
    menu_item_exit: MenuId,
}

impl TrayShell {
    pub fn new(port_presets: Vec<u16>) -> Result<Self> {
        tracing::info!("Creating tray icon");

        let icon = load_app_icon()?;

        let menu = Menu::new();
        let folder_item = MenuItem::new("Change Folder…", true, None);
        let port_item = MenuItem::new("Change Port…", true, None);
        let browser_item = MenuItem::new("Open in Browser", true, None);
        let separator = PredefinedMenuItem::separator();
        let exit_item = MenuItem::new("Exit", true, None);

        menu.append(&folder_item)
            .map_err(|e| anyhow!("Failed to add folder item: {}", e))?;
        menu.append(&port_item)
            .map_err(|e| anyhow!("Failed to add port item: {}", e))?;
        menu.append(&browser_item)
            .map_err(|e| anyhow!("Failed to add browser item: {}", e))?;
        menu.append(&separator)
            .map_err(|e| anyhow!("Failed to add separator: {}", e))?;
        menu.append(&exit_item)
            .map_err(|e| anyhow!("Failed to add exit item: {}", e))?;

        let tray_icon = TrayIconBuilder::new()
            .with_tooltip("Media Gallery")
            .with_icon(icon)
            .with_menu(Box::new(menu))
            .build()
            .map_err(|e| anyhow!("Failed to create tray icon: {}", e))?;

        tracing::info!("Tray icon created with context menu");

        Ok(Self {
            tray_icon: Some(tray_icon),
            port_presets,
            menu_item_change_folder: folder_item.id().clone(),
            menu_item_change_port: port_item.id().clone(),
            menu_item_open_browser: browser_item.id().clone(),
            menu_item_exit: exit_item.id().clone(),
        })
    }

    /// Map a menu click to the control event it stands for
    pub fn event_for(&self, id: &MenuId) -> Option<ControlEvent> {
        if *id == self.menu_item_change_folder {
            Some(ControlEvent::ChangeFolder)
        } else if *id == self.menu_item_change_port {
            Some(ControlEvent::ChangePort)
        } else if *id == self.menu_item_open_browser {
            Some(ControlEvent::OpenBrowser)
        } else if *id == self.menu_item_exit {
            Some(ControlEvent::Exit)
        } else {
            None
        }
    }
}

impl Shell for TrayShell {
    fn pick_folder(&mut self, current: &Path) -> Option<PathBuf> {
        let picked = dialogs::pick_folder(current);
        tracing::info!(?picked, "Folder picker closed");
        picked
    }

    fn pick_port(&mut self, current: u16) -> Option<u16> {
        for port in port_candidates(&self.port_presets, current) {
            match dialogs::offer_port(port, current) {
                PortChoice::Accept => return Some(port),
                PortChoice::Next => continue,
                PortChoice::Cancel => return None,
            }
        }
        None
    }

    fn set_status(&mut self, text: &str) {
        if let Some(tray_icon) = &self.tray_icon {
            if let Err(e) = tray_icon.set_tooltip(Some(text)) {
                tracing::warn!("Failed to update tooltip: {}", e);
            }
        }
    }

    fn show_error(&mut self, title: &str, message: &str) {
        dialogs::show_error(title, message);
    }

    fn remove_icon(&mut self) {
        if let Some(tray_icon) = self.tray_icon.take() {
            if let Err(e) = tray_icon.set_visible(false) {
                tracing::warn!("Failed to hide tray icon: {}", e);
            }
        }
    }
}
