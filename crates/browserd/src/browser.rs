// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Browser process profile and connection handle.

use std::path::{Path, PathBuf};

use tokio::process::Child;
use tokio::sync::broadcast;

/// Launch profile for one per-session browser process.
#[derive(Debug, Clone)]
pub struct BrowserProfile {
    pub user_data_dir: PathBuf,
    pub downloads_dir: PathBuf,
    pub display_num: u16,
    pub extensions_dir: Option<PathBuf>,
}

/// A directory only counts as an extension when it carries a manifest.
pub fn valid_extension_dir(path: &Path) -> bool {
    path.is_dir() && path.join("manifest.json").is_file()
}

/// Command-line arguments for the browser child.
///
/// Geometry is pinned to the framebuffer; sandbox and GPU flags match what
/// the shared-display container supports.
pub fn browser_args(profile: &BrowserProfile) -> Vec<String> {
    let mut args = Vec::new();

    if let Some(ref ext) = profile.extensions_dir {
        if valid_extension_dir(ext) {
            let ext = ext.display();
            args.push("--enable-extensions".to_owned());
            args.push(format!("--load-extension={ext}"));
            args.push(format!("--disable-extensions-except={ext}"));
        }
    }

    args.extend(
        [
            "--start-maximized".to_owned(),
            "--window-position=0,0".to_owned(),
            "--window-size=1600,1200".to_owned(),
            format!("--display=:{}", profile.display_num),
            format!("--user-data-dir={}", profile.user_data_dir.display()),
            "--no-sandbox".to_owned(),
            "--disable-dev-shm-usage".to_owned(),
            "--disable-gpu-sandbox".to_owned(),
            "--remote-debugging-port=0".to_owned(),
            "--disable-background-timer-throttling".to_owned(),
            "--disable-backgrounding-occluded-windows".to_owned(),
            "--disable-renderer-backgrounding".to_owned(),
            "--force-device-scale-factor=1".to_owned(),
        ],
    );
    args
}

/// Events dispatched to the browser's in-page machinery.
#[derive(Debug, Clone)]
pub enum BrowserEvent {
    /// Hand a local file to the file input at `index`.
    UploadFile { index: u64, path: PathBuf },
    /// Point the active tab at a URL.
    Navigate { url: String },
}

/// Connection handle for one running browser process.
///
/// Owned by the session record; the agent runner borrows it while running.
pub struct BrowserHandle {
    child: tokio::sync::Mutex<Option<Child>>,
    events: broadcast::Sender<BrowserEvent>,
    pub profile: BrowserProfile,
}

impl BrowserHandle {
    pub fn new(child: Option<Child>, profile: BrowserProfile) -> Self {
        let (events, _) = broadcast::channel(64);
        Self { child: tokio::sync::Mutex::new(child), events, profile }
    }

    /// Dispatch an event on the handle's bus. Returns the subscriber count.
    pub fn dispatch(&self, event: BrowserEvent) -> usize {
        self.events.send(event).unwrap_or(0)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BrowserEvent> {
        self.events.subscribe()
    }

    /// Steal the child's stdout pipe for log teeing. Only available once.
    pub async fn take_stdout(&self) -> Option<tokio::process::ChildStdout> {
        self.child.lock().await.as_mut().and_then(|c| c.stdout.take())
    }

    pub async fn pid(&self) -> Option<u32> {
        self.child.lock().await.as_ref().and_then(|c| c.id())
    }

    /// Whether the browser process is still running.
    pub async fn is_alive(&self) -> bool {
        let mut guard = self.child.lock().await;
        match guard.as_mut() {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => false,
        }
    }

    /// Stop the browser process, graceful first.
    pub async fn stop(&self, grace: std::time::Duration) -> anyhow::Result<()> {
        let child = self.child.lock().await.take();
        let Some(mut child) = child else { return Ok(()) };

        if let Some(pid) = child.id() {
            crate::supervisor::terminate_pid(pid);
        }
        match tokio::time::timeout(grace, child.wait()).await {
            Ok(status) => {
                status?;
            }
            Err(_) => {
                child.start_kill()?;
                child.wait().await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "browser_tests.rs"]
mod tests;
