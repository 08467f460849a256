// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-session process chain: virtual display, VNC server, websocket
//! proxy, browser. Start order is gated (display readiness before
//! geometry, VNC and proxy up before the browser) and every failure path
//! releases the processes it spawned.

use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use tokio::process::{Child, Command};

use crate::browser::{browser_args, BrowserHandle, BrowserProfile};
use crate::slots::Slot;

/// Framebuffer geometry shared by Xvfb, xrandr, x11vnc, and the browser.
const SCREEN_DEPTH: &str = "1600x1200x24";
const FRAMEBUFFER: &str = "1600x1200";

/// Settle time after spawning the VNC server and proxy before probing them.
const VNC_SETTLE: Duration = Duration::from_secs(2);

/// Settle time after launching the browser before declaring the attempt good.
const BROWSER_SETTLE: Duration = Duration::from_secs(3);

// -- Errors -------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartFailureKind {
    DisplayNotReady,
    VncStartFailed,
    ProxyStartFailed,
    BrowserAttachFailed,
    CleanupFailed,
}

impl StartFailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DisplayNotReady => "DISPLAY_NOT_READY",
            Self::VncStartFailed => "VNC_START_FAILED",
            Self::ProxyStartFailed => "PROXY_START_FAILED",
            Self::BrowserAttachFailed => "BROWSER_ATTACH_FAILED",
            Self::CleanupFailed => "CLEANUP_FAILED",
        }
    }
}

/// Why a session failed to start, with the step that failed.
#[derive(Debug)]
pub struct StartFailure {
    pub kind: StartFailureKind,
    pub message: String,
}

impl StartFailure {
    fn new(kind: StartFailureKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into() }
    }
}

impl fmt::Display for StartFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind.as_str(), self.message)
    }
}

impl std::error::Error for StartFailure {}

// -- Process chain ------------------------------------------------------------

/// One supervised child with a label for cleanup logging.
pub struct ManagedChild {
    pub name: &'static str,
    pub child: Child,
}

/// Children spawned for a session, in spawn order.
#[derive(Default)]
pub struct SessionProcesses {
    children: Vec<ManagedChild>,
}

impl SessionProcesses {
    fn push(&mut self, name: &'static str, child: Child) {
        self.children.push(ManagedChild { name, child });
    }

    fn alive(&mut self, name: &'static str) -> bool {
        self.children
            .iter_mut()
            .rev()
            .find(|m| m.name == name)
            .is_some_and(|m| matches!(m.child.try_wait(), Ok(None)))
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.children.iter().map(|m| m.name).collect()
    }

    pub fn pids(&self) -> Vec<u32> {
        self.children.iter().filter_map(|m| m.child.id()).collect()
    }
}

/// A fully-started session: the tool chain plus the browser connection.
pub struct StartedSession {
    pub processes: SessionProcesses,
    pub browser: Arc<BrowserHandle>,
}

/// Seam between the registry and the real process chain; tests substitute
/// a stub backend so registry logic runs without X tooling on the host.
#[async_trait]
pub trait SessionBackend: Send + Sync {
    async fn start(&self, session_id: &str, slot: &Slot) -> Result<StartedSession, StartFailure>;

    /// Idempotent teardown of everything `start` spawned for this slot.
    async fn stop(&self, session_id: &str, slot: &Slot, procs: SessionProcesses);
}

// -- Supervisor ---------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub browser_bin: String,
    pub novnc_root: PathBuf,
    pub extensions_dir: Option<PathBuf>,
    pub profile_base: PathBuf,
    pub display_ready_timeout: Duration,
    pub grace: Duration,
    pub browser_attempts: u32,
}

pub struct ProcessSupervisor {
    cfg: SupervisorConfig,
}

impl ProcessSupervisor {
    pub fn new(cfg: SupervisorConfig) -> Self {
        Self { cfg }
    }

    async fn start_chain(
        &self,
        session_id: &str,
        slot: &Slot,
    ) -> Result<StartedSession, StartFailure> {
        let display_addr = format!(":{}", slot.display_num);

        pre_clean(slot).await;

        let mut procs = SessionProcesses::default();

        // Display server first; everything else binds to it.
        let xvfb = spawn_tool(
            Command::new("Xvfb")
                .arg(&display_addr)
                .args(["-screen", "0", SCREEN_DEPTH, "+extension", "RANDR", "-ac"]),
        )
        .map_err(|e| StartFailure::new(StartFailureKind::DisplayNotReady, e.to_string()))?;
        procs.push("Xvfb", xvfb);

        if !wait_for_display(&display_addr, self.cfg.display_ready_timeout).await {
            self.stop_chain(session_id, slot, procs).await;
            return Err(StartFailure::new(
                StartFailureKind::DisplayNotReady,
                format!("X display {display_addr} not ready after {:?}", self.cfg.display_ready_timeout),
            ));
        }

        // Apply framebuffer geometry; non-blocking.
        match spawn_tool(
            Command::new("xrandr").args(["--display", display_addr.as_str(), "--fb", FRAMEBUFFER]),
        ) {
            Ok(child) => procs.push("xrandr", child),
            Err(e) => tracing::warn!(session_id, err = %e, "xrandr spawn failed"),
        }

        // VNC server and websocket proxy may start in parallel; both must be
        // up before the browser attaches.
        let vnc_port = slot.vnc_port.to_string();
        let vnc = spawn_tool(Command::new("x11vnc").args([
            "-display",
            display_addr.as_str(),
            "-nopw",
            "-forever",
            "-rfbport",
            vnc_port.as_str(),
            "-clip",
            FRAMEBUFFER,
            "-xrandr",
            "resize",
            "-shared",
        ]))
        .map_err(|e| StartFailure::new(StartFailureKind::VncStartFailed, e.to_string()));
        let vnc = match vnc {
            Ok(child) => child,
            Err(e) => {
                self.stop_chain(session_id, slot, procs).await;
                return Err(e);
            }
        };
        procs.push("x11vnc", vnc);

        let web_port = slot.web_port.to_string();
        let vnc_target = format!("localhost:{}", slot.vnc_port);
        let novnc_root = self.cfg.novnc_root.display().to_string();
        let proxy = spawn_tool(Command::new("websockify").args([
            web_port.as_str(),
            vnc_target.as_str(),
            "--web",
            novnc_root.as_str(),
            "--cert=/dev/null",
        ]))
        .map_err(|e| StartFailure::new(StartFailureKind::ProxyStartFailed, e.to_string()));
        let proxy = match proxy {
            Ok(child) => child,
            Err(e) => {
                self.stop_chain(session_id, slot, procs).await;
                return Err(e);
            }
        };
        procs.push("websockify", proxy);

        tokio::time::sleep(VNC_SETTLE).await;
        if !procs.alive("x11vnc") {
            self.stop_chain(session_id, slot, procs).await;
            return Err(StartFailure::new(
                StartFailureKind::VncStartFailed,
                format!("x11vnc exited during startup on port {}", slot.vnc_port),
            ));
        }
        if !procs.alive("websockify") {
            self.stop_chain(session_id, slot, procs).await;
            return Err(StartFailure::new(
                StartFailureKind::ProxyStartFailed,
                format!("websockify exited during startup on port {}", slot.web_port),
            ));
        }

        let profile = BrowserProfile {
            user_data_dir: Slot::user_data_dir(&self.cfg.profile_base, session_id),
            downloads_dir: Slot::downloads_dir(&self.cfg.profile_base, session_id),
            display_num: slot.display_num,
            extensions_dir: self.cfg.extensions_dir.clone(),
        };
        if let Err(e) = tokio::fs::create_dir_all(&profile.downloads_dir).await {
            self.stop_chain(session_id, slot, procs).await;
            return Err(StartFailure::new(
                StartFailureKind::BrowserAttachFailed,
                format!("profile dir: {e}"),
            ));
        }

        match self.attach_browser(session_id, &display_addr, &profile).await {
            Ok(child) => {
                tracing::info!(session_id, display_name = %display_addr, "session process chain up");
                Ok(StartedSession {
                    processes: procs,
                    browser: Arc::new(BrowserHandle::new(Some(child), profile)),
                })
            }
            Err(message) => {
                self.stop_chain(session_id, slot, procs).await;
                Err(StartFailure::new(StartFailureKind::BrowserAttachFailed, message))
            }
        }
    }

    /// Launch the browser with retry and backoff. `DISPLAY` is passed only
    /// to the child spawn; the parent environment is never mutated.
    async fn attach_browser(
        &self,
        session_id: &str,
        display_addr: &str,
        profile: &BrowserProfile,
    ) -> Result<Child, String> {
        let args = browser_args(profile);
        let mut last_error = String::new();

        for attempt in 1..=self.cfg.browser_attempts {
            tracing::info!(session_id, attempt, display_name = display_addr, "launching browser");
            let spawned = Command::new(&self.cfg.browser_bin)
                .args(&args)
                .env("DISPLAY", display_addr)
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::null())
                .kill_on_drop(true)
                .spawn();

            match spawned {
                Ok(mut child) => {
                    tokio::time::sleep(BROWSER_SETTLE).await;
                    match child.try_wait() {
                        Ok(None) => return Ok(child),
                        Ok(Some(status)) => {
                            last_error = format!("browser exited during startup: {status}");
                        }
                        Err(e) => last_error = format!("browser probe failed: {e}"),
                    }
                }
                Err(e) => last_error = format!("browser spawn failed: {e}"),
            }

            tracing::warn!(session_id, attempt, err = %last_error, "browser attach failed");
            if attempt < self.cfg.browser_attempts {
                tokio::time::sleep(Duration::from_secs(2 * u64::from(attempt))).await;
            }
        }

        Err(format!(
            "browser failed to attach to display {display_addr} after {} attempts: {last_error}",
            self.cfg.browser_attempts
        ))
    }

    async fn stop_chain(&self, session_id: &str, slot: &Slot, mut procs: SessionProcesses) {
        // Reverse spawn order: browser-adjacent processes die before the
        // display they depend on.
        while let Some(mut managed) = procs.children.pop() {
            if let Some(pid) = managed.child.id() {
                terminate_pid(pid);
            }
            match tokio::time::timeout(self.cfg.grace, managed.child.wait()).await {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => {
                    tracing::warn!(target: "cleanup", session_id, process = managed.name, err = %e, "wait failed");
                }
                Err(_) => {
                    tracing::warn!(target: "cleanup", session_id, process = managed.name, "force killing");
                    if let Err(e) = managed.child.start_kill() {
                        tracing::warn!(target: "cleanup", session_id, process = managed.name, err = %e, "kill failed");
                    }
                    let _ = managed.child.wait().await;
                }
            }
        }

        // Orphans that detached from our children (display locks, forked
        // helpers) are matched by pattern.
        for pattern in kill_patterns(slot) {
            pattern_kill(&pattern).await;
        }

        tracing::info!(target: "cleanup", session_id, "session processes released");
    }
}

#[async_trait]
impl SessionBackend for ProcessSupervisor {
    async fn start(&self, session_id: &str, slot: &Slot) -> Result<StartedSession, StartFailure> {
        self.start_chain(session_id, slot).await
    }

    async fn stop(&self, session_id: &str, slot: &Slot, procs: SessionProcesses) {
        self.stop_chain(session_id, slot, procs).await;
    }
}

// -- Helpers ------------------------------------------------------------------

/// Remove a stale display lock and kill lingering holders of this slot's
/// display and ports.
async fn pre_clean(slot: &Slot) {
    let lock_file = format!("/tmp/.X{}-lock", slot.display_num);
    if let Err(e) = tokio::fs::remove_file(&lock_file).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!(target: "cleanup", lock_file = %lock_file, err = %e, "stale lock removal failed");
        }
    }

    for pattern in kill_patterns(slot) {
        pattern_kill(&pattern).await;
    }
    tokio::time::sleep(Duration::from_secs(1)).await;
}

/// Patterns matching every external process bound to a slot.
pub fn kill_patterns(slot: &Slot) -> Vec<String> {
    vec![
        format!("x11vnc.*-rfbport.*{}", slot.vnc_port),
        format!("websockify.*{}", slot.web_port),
        format!("Xvfb.*:{}", slot.display_num),
    ]
}

async fn pattern_kill(pattern: &str) {
    let result = Command::new("pkill")
        .args(["-f", pattern])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await;
    // pkill exits 1 when nothing matched; only spawn errors are noteworthy.
    if let Err(e) = result {
        tracing::warn!(target: "cleanup", pattern, err = %e, "pkill failed");
    }
}

/// Poll the display probe until the X server answers or the timeout lapses.
async fn wait_for_display(display: &str, timeout: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let probe = Command::new("xdpyinfo")
            .args(["-display", display])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;
        if matches!(probe, Ok(status) if status.success()) {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_secs(1)).await;
    }
}

fn spawn_tool(cmd: &mut Command) -> anyhow::Result<Child> {
    Ok(cmd
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()?)
}

/// Best-effort SIGTERM by pid.
pub fn terminate_pid(pid: u32) {
    if let Ok(pid) = i32::try_from(pid) {
        let _ = kill(Pid::from_raw(pid), Signal::SIGTERM);
    }
}

/// Whether a pid is still alive (signal 0 probe).
pub fn is_process_alive(pid: u32) -> bool {
    let Ok(pid) = i32::try_from(pid) else {
        return false;
    };
    kill(Pid::from_raw(pid), None).is_ok()
}

#[cfg(test)]
#[path = "supervisor_tests.rs"]
mod tests;
