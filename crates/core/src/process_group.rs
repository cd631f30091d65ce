//! Platform glue for spawning the service in its own process group and
//! signalling only that group.

use std::io;
use std::process::{Child, Command, Stdio};

#[cfg(windows)]
use std::os::windows::process::CommandExt;

#[cfg(windows)]
const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;
#[cfg(windows)]
const CREATE_NEW_CONSOLE: u32 = 0x0000_0010;
#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// Put the child in a new process group and show or hide its console
pub fn configure_command(command: &mut Command, show_console: bool) {
    command.stdin(Stdio::null());

    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt as _;
        command.process_group(0);
        if !show_console {
            command.stdout(Stdio::null()).stderr(Stdio::null());
        }
    }

    #[cfg(windows)]
    {
        let console = if show_console {
            CREATE_NEW_CONSOLE
        } else {
            CREATE_NO_WINDOW
        };
        command.creation_flags(CREATE_NEW_PROCESS_GROUP | console);
    }
}

/// Interrupt the child's process group, never the launcher's own
#[cfg(unix)]
pub fn send_graceful_stop(pid: u32) -> io::Result<()> {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    let pgid = i32::try_from(pid)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "pid out of range"))?;
    killpg(Pid::from_raw(pgid), Signal::SIGINT).map_err(io::Error::from)
}

/// Deliver Ctrl+Break to the child's process group, never the launcher's own.
///
/// The launcher is a GUI-subsystem process with no console, so it borrows the
/// child's (hidden) console for the duration of the call: detach from any
/// console, attach to the child's, ignore control events locally, signal the
/// group, then detach again.
#[cfg(windows)]
pub fn send_graceful_stop(pid: u32) -> io::Result<()> {
    use windows::Win32::System::Console::{
        AttachConsole, FreeConsole, GenerateConsoleCtrlEvent, SetConsoleCtrlHandler,
        CTRL_BREAK_EVENT,
    };

    // SAFETY: console attachment is process-global state, and the supervisor
    // only calls this from the single control thread
    unsafe {
        let _ = FreeConsole();
        AttachConsole(pid).map_err(|e| {
            io::Error::other(format!("cannot attach to console of {}: {}", pid, e))
        })?;
        let _ = SetConsoleCtrlHandler(None, true);

        let sent = GenerateConsoleCtrlEvent(CTRL_BREAK_EVENT, pid);

        let _ = FreeConsole();
        let _ = SetConsoleCtrlHandler(None, false);
        sent.map_err(|e| io::Error::other(format!("Ctrl+Break to group {} failed: {}", pid, e)))
    }
}

/// Kill the child and its group outright
pub fn force_kill(child: &mut Child) -> io::Result<()> {
    let pid = child.id();

    #[cfg(unix)]
    {
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;

        if let Ok(pgid) = i32::try_from(pid) {
            if let Err(e) = killpg(Pid::from_raw(pgid), Signal::SIGKILL) {
                tracing::debug!(pid, "killpg SIGKILL failed: {}", e);
            }
        }
    }

    #[cfg(windows)]
    {
        if let Err(e) = run_taskkill(pid) {
            tracing::debug!(pid, "taskkill /F failed: {}", e);
        }
    }

    match child.kill() {
        // Already reaped or already gone
        Err(e) if e.kind() == io::ErrorKind::InvalidInput => Ok(()),
        other => other,
    }
}

/// `taskkill /F /T`: the whole tree, without asking
#[cfg(windows)]
fn run_taskkill(pid: u32) -> io::Result<()> {
    let status = Command::new("taskkill")
        .args(["/PID", &pid.to_string(), "/T", "/F"])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .creation_flags(CREATE_NO_WINDOW)
        .status()?;
    if status.success() {
        Ok(())
    } else {
        Err(io::Error::other(format!("taskkill returned {}", status)))
    }
}

/// Whether the OS still lists `pid` as a process
pub fn os_reports_running(pid: u32) -> bool {
    let mut system = sysinfo::System::new();
    system.refresh_process(sysinfo::Pid::from_u32(pid))
}
