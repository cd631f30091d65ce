//! Modal dialogs shown by the launcher

use media_gallery_core::StagingError;
use rfd::{FileDialog, MessageButtons, MessageDialog, MessageDialogResult, MessageLevel};
use std::path::{Path, PathBuf};

const ANTIVIRUS_HINT: &str = "Try running as Administrator or check antivirus settings.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortChoice {
    Accept,
    Next,
    Cancel,
}

pub fn show_error(title: &str, message: &str) {
    tracing::error!("{}: {}", title, message);
    let _ = MessageDialog::new()
        .set_level(MessageLevel::Error)
        .set_title(title)
        .set_description(message)
        .set_buttons(MessageButtons::Ok)
        .show();
}

/// Folder picker opened on the folder currently being served
pub fn pick_folder(current: &Path) -> Option<PathBuf> {
    let mut dialog = FileDialog::new().set_title("Select Media Folder");
    if current.is_dir() {
        dialog = dialog.set_directory(current);
    }
    dialog.pick_folder()
}

/// Yes uses `port`, No moves on to the next preset, Cancel keeps `current`
pub fn offer_port(port: u16, current: u16) -> PortChoice {
    let result = MessageDialog::new()
        .set_level(MessageLevel::Info)
        .set_title("Change Port")
        .set_description(format!(
            "Currently serving on port {}.\n\nSwitch to port {}?\n\n\
             Yes: use this port\nNo: show the next port\nCancel: keep the current port",
            current, port
        ))
        .set_buttons(MessageButtons::YesNoCancel)
        .show();
    match result {
        MessageDialogResult::Yes => PortChoice::Accept,
        MessageDialogResult::No => PortChoice::Next,
        _ => PortChoice::Cancel,
    }
}

/// Message for a binary that could not be written to `temp_parent`
pub fn staging_failure_message(error: &StagingError, temp_parent: &Path) -> String {
    let mut message = match error {
        StagingError::ResourceMissing => {
            return "The server binary is missing from this build of Media Gallery.".to_string();
        }
        _ => format!(
            "Failed to extract the server to:\n{}\n\n{}",
            temp_parent.display(),
            error
        ),
    };
    if let Some(code) = error.os_code() {
        message.push_str(&format!("\n\nError code: {}", code));
    }
    message.push_str("\n\n");
    message.push_str(ANTIVIRUS_HINT);
    message
}
