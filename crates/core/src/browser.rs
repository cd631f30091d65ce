/// Browser launch with a self-signed-certificate fallback chain
///
/// The service serves HTTPS with a self-signed certificate. Chrome, then Edge,
/// are started with `--ignore-certificate-errors`; if neither is installed the
/// OS default handler opens the URL and the user may see a warning.
use anyhow::{Context, Result};
use std::io;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::thread::{self, JoinHandle};

const CERT_BYPASS_ARGS: [&str; 2] = ["--ignore-certificate-errors", "--new-window"];

/// Opens URLs for the control plane
pub trait UrlOpener {
    fn open_url(&mut self, url: &str);
}

/// `https://localhost:<port>/`
pub fn service_url(port: u16) -> String {
    format!("https://localhost:{}/", port)
}

#[derive(Debug, Clone)]
pub struct BrowserCandidate {
    pub name: &'static str,
    pub paths: Vec<PathBuf>,
}

impl BrowserCandidate {
    fn installed_path(&self) -> Option<&PathBuf> {
        self.paths.iter().find(|path| path.exists())
    }

    pub fn args(url: &str) -> Vec<&str> {
        let mut args = CERT_BYPASS_ARGS.to_vec();
        args.push(url);
        args
    }
}

/// Chrome first, Edge second
pub fn default_candidates() -> Vec<BrowserCandidate> {
    #[cfg(windows)]
    {
        let program_files = std::env::var("ProgramFiles").unwrap_or_else(|_| r"C:\Program Files".into());
        let program_files_x86 =
            std::env::var("ProgramFiles(x86)").unwrap_or_else(|_| r"C:\Program Files (x86)".into());
        let local_app_data = std::env::var("LOCALAPPDATA").unwrap_or_default();
        let under = |root: &str, rest: &str| PathBuf::from(root).join(rest);

        vec![
            BrowserCandidate {
                name: "Chrome",
                paths: vec![
                    under(&program_files, r"Google\Chrome\Application\chrome.exe"),
                    under(&program_files_x86, r"Google\Chrome\Application\chrome.exe"),
                    under(&local_app_data, r"Google\Chrome\Application\chrome.exe"),
                ],
            },
            BrowserCandidate {
                name: "Edge",
                paths: vec![
                    under(&program_files_x86, r"Microsoft\Edge\Application\msedge.exe"),
                    under(&program_files, r"Microsoft\Edge\Application\msedge.exe"),
                ],
            },
        ]
    }

    #[cfg(target_os = "macos")]
    {
        vec![
            BrowserCandidate {
                name: "Chrome",
                paths: vec![PathBuf::from(
                    "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
                )],
            },
            BrowserCandidate {
                name: "Edge",
                paths: vec![PathBuf::from(
                    "/Applications/Microsoft Edge.app/Contents/MacOS/Microsoft Edge",
                )],
            },
        ]
    }

    #[cfg(not(any(windows, target_os = "macos")))]
    {
        vec![
            BrowserCandidate {
                name: "Chrome",
                paths: vec![
                    PathBuf::from("/usr/bin/google-chrome"),
                    PathBuf::from("/usr/bin/google-chrome-stable"),
                    PathBuf::from("/usr/bin/chromium"),
                ],
            },
            BrowserCandidate {
                name: "Edge",
                paths: vec![PathBuf::from("/usr/bin/microsoft-edge")],
            },
        ]
    }
}

/// Tries each candidate in order, then the OS default handler
pub struct BrowserLauncher {
    candidates: Vec<BrowserCandidate>,
}

impl Default for BrowserLauncher {
    fn default() -> Self {
        Self::new(default_candidates())
    }
}

impl BrowserLauncher {
    pub fn new(candidates: Vec<BrowserCandidate>) -> Self {
        Self { candidates }
    }

    pub fn launch(&self, url: &str) -> Result<()> {
        for candidate in &self.candidates {
            let Some(path) = candidate.installed_path() else {
                continue;
            };
            match Command::new(path)
                .args(BrowserCandidate::args(url))
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .spawn()
            {
                Ok(child) => {
                    tracing::info!("Opened {} in {}", url, candidate.name);
                    if let Err(e) = reap_in_background(child) {
                        tracing::warn!("Failed to start reaper for {}: {}", candidate.name, e);
                    }
                    return Ok(());
                }
                Err(e) => tracing::warn!("Failed to start {} at {:?}: {}", candidate.name, path, e),
            }
        }

        tracing::info!("No cert-tolerant browser found, using default handler for {}", url);
        open::that(url).with_context(|| format!("Failed to open {} in default browser", url))
    }
}

/// Wait on a browser launcher off the main loop so it never lingers as a zombie.
/// A browser that hands the URL to a running instance exits immediately; one
/// that becomes the instance is waited on until the user closes it.
pub fn reap_in_background(mut child: Child) -> io::Result<JoinHandle<()>> {
    let pid = child.id();
    thread::Builder::new()
        .name(format!("browser-reaper-{}", pid))
        .spawn(move || match child.wait() {
            Ok(status) => tracing::debug!(pid, %status, "Browser process exited"),
            Err(e) => tracing::debug!(pid, "Waiting for browser process failed: {}", e),
        })
}

impl UrlOpener for BrowserLauncher {
    fn open_url(&mut self, url: &str) {
        if let Err(e) = self.launch(url) {
            tracing::error!("{:#}", e);
        }
    }
}
