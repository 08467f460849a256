// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Process-wide session registry. Owns every SessionRecord; composes the
//! slot allocator and the process backend on create/delete so that a slot
//! is released on every failure path.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Mutex;

use crate::agent::AgentHandle;
use crate::browser::BrowserHandle;
use crate::config::SessionPolicy;
use crate::slots::{Slot, SlotPool};
use crate::supervisor::{SessionBackend, SessionProcesses, StartFailure};

// -- Errors -------------------------------------------------------------------

#[derive(Debug)]
pub enum RegistryError {
    PoolExhausted,
    AlreadyInUse,
    NotFound,
    Busy(&'static str),
    NoBrowser,
    NoAgent,
    AgentActive,
    Startup(StartFailure),
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PoolExhausted => f.write_str("No free sessions available"),
            Self::AlreadyInUse => {
                f.write_str("Session is already in use. Only one session is supported.")
            }
            Self::NotFound => f.write_str("Session not found"),
            Self::Busy(what) => write!(f, "Session is {what}"),
            Self::NoBrowser => f.write_str("No browser session found for the given session ID"),
            Self::NoAgent => f.write_str("Agent not found"),
            Self::AgentActive => f.write_str("An agent is already running for this session"),
            Self::Startup(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for RegistryError {}

// -- Records ------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Allocating,
    Ready,
    AgentRunning,
    AgentPaused,
    TearingDown,
    Dead,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Allocating => "allocating",
            Self::Ready => "ready",
            Self::AgentRunning => "agent_running",
            Self::AgentPaused => "agent_paused",
            Self::TearingDown => "tearing_down",
            Self::Dead => "dead",
        }
    }
}

/// One live session. The registry owns the record; the agent runner holds
/// only a weak handle.
pub struct SessionRecord {
    pub id: String,
    pub slot: Slot,
    pub state: SessionState,
    pub processes: Option<SessionProcesses>,
    pub browser: Option<Arc<BrowserHandle>>,
    pub agent: Weak<AgentHandle>,
}

/// Wire view of a session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub session_id: String,
    pub vnc_url: String,
    pub vnc_port: u16,
    pub web_port: u16,
    pub display_num: u16,
    pub state: &'static str,
}

// -- Registry -----------------------------------------------------------------

pub struct SessionRegistry {
    policy: SessionPolicy,
    pool: SlotPool,
    backend: Arc<dyn SessionBackend>,
    vnc_base_url: String,
    grace: Duration,
    sessions: Mutex<HashMap<String, SessionRecord>>,
}

impl SessionRegistry {
    pub fn new(
        policy: SessionPolicy,
        pool: SlotPool,
        backend: Arc<dyn SessionBackend>,
        vnc_base_url: String,
        grace: Duration,
    ) -> Self {
        Self { policy, pool, backend, vnc_base_url, grace, sessions: Mutex::new(HashMap::new()) }
    }

    /// Create a session: claim a slot, bring up the process chain, register
    /// the record. Slot and partial processes are released on any failure.
    pub async fn create(&self) -> Result<SessionInfo, RegistryError> {
        let (id, slot) = {
            let mut sessions = self.sessions.lock().await;
            if self.policy == SessionPolicy::Single && !sessions.is_empty() {
                return Err(RegistryError::AlreadyInUse);
            }
            let slot = self.pool.acquire().ok_or(RegistryError::PoolExhausted)?;
            let id = match self.policy {
                SessionPolicy::FixedPool { .. } => format!("session-{}", slot.index),
                SessionPolicy::Single => generate_session_id(),
            };
            sessions.insert(
                id.clone(),
                SessionRecord {
                    id: id.clone(),
                    slot: slot.clone(),
                    state: SessionState::Allocating,
                    processes: None,
                    browser: None,
                    agent: Weak::new(),
                },
            );
            (id, slot)
        };

        match self.backend.start(&id, &slot).await {
            Ok(started) => {
                let mut sessions = self.sessions.lock().await;
                let Some(record) = sessions.get_mut(&id) else {
                    // Record vanished while starting; tear the chain down.
                    drop(sessions);
                    self.backend.stop(&id, &slot, started.processes).await;
                    self.pool.release(&slot);
                    return Err(RegistryError::NotFound);
                };
                record.state = SessionState::Ready;
                record.processes = Some(started.processes);
                record.browser = Some(started.browser);
                tracing::info!(session_id = %id, slot = slot.index, "session created");
                Ok(self.info(record))
            }
            Err(failure) => {
                let mut sessions = self.sessions.lock().await;
                sessions.remove(&id);
                self.pool.release(&slot);
                tracing::warn!(session_id = %id, err = %failure, "session start failed");
                Err(RegistryError::Startup(failure))
            }
        }
    }

    /// Delete a session: stop agent, browser, process chain, then release
    /// the slot and drop the record.
    pub async fn delete(&self, id: &str) -> Result<(), RegistryError> {
        let (slot, procs, browser, agent) = {
            let mut sessions = self.sessions.lock().await;
            let record = sessions.get_mut(id).ok_or(RegistryError::NotFound)?;
            match record.state {
                SessionState::Allocating => return Err(RegistryError::Busy("still starting")),
                SessionState::TearingDown | SessionState::Dead => {
                    return Err(RegistryError::Busy("already tearing down"))
                }
                _ => {}
            }
            record.state = SessionState::TearingDown;
            (
                record.slot.clone(),
                record.processes.take().unwrap_or_default(),
                record.browser.take(),
                record.agent.upgrade(),
            )
        };

        if let Some(agent) = agent {
            agent.stop();
        }
        if let Some(browser) = browser {
            if let Err(e) = browser.stop(self.grace).await {
                tracing::warn!(target: "cleanup", session_id = %id, err = %e, "browser stop failed");
            }
        }
        self.backend.stop(id, &slot, procs).await;

        let mut sessions = self.sessions.lock().await;
        sessions.remove(id);
        self.pool.release(&slot);
        tracing::info!(session_id = %id, "session deleted");
        Ok(())
    }

    pub async fn get(&self, id: &str) -> Option<SessionInfo> {
        let sessions = self.sessions.lock().await;
        sessions.get(id).map(|r| self.info(r))
    }

    pub async fn list(&self) -> Vec<SessionInfo> {
        let sessions = self.sessions.lock().await;
        let mut list: Vec<SessionInfo> = sessions.values().map(|r| self.info(r)).collect();
        list.sort_by(|a, b| a.session_id.cmp(&b.session_id));
        list
    }

    /// Browser handle for a live session (agent binding).
    pub async fn browser(&self, id: &str) -> Result<Arc<BrowserHandle>, RegistryError> {
        let sessions = self.sessions.lock().await;
        let record = sessions.get(id).ok_or(RegistryError::NotFound)?;
        if matches!(record.state, SessionState::TearingDown | SessionState::Dead) {
            return Err(RegistryError::Busy("tearing down"));
        }
        record.browser.clone().ok_or(RegistryError::NoBrowser)
    }

    /// Bind a freshly-started agent to a Ready session.
    pub async fn bind_agent(&self, id: &str, handle: &Arc<AgentHandle>) -> Result<(), RegistryError> {
        let mut sessions = self.sessions.lock().await;
        let record = sessions.get_mut(id).ok_or(RegistryError::NotFound)?;
        match record.state {
            SessionState::Ready => {}
            SessionState::AgentRunning | SessionState::AgentPaused => {
                return Err(RegistryError::AgentActive)
            }
            SessionState::Allocating => return Err(RegistryError::Busy("still starting")),
            SessionState::TearingDown | SessionState::Dead => {
                return Err(RegistryError::Busy("tearing down"))
            }
        }
        record.agent = Arc::downgrade(handle);
        record.state = SessionState::AgentRunning;
        Ok(())
    }

    /// Live agent handle for a session.
    pub async fn agent(&self, id: &str) -> Result<Arc<AgentHandle>, RegistryError> {
        let sessions = self.sessions.lock().await;
        let record = sessions.get(id).ok_or(RegistryError::NotFound)?;
        record.agent.upgrade().ok_or(RegistryError::NoAgent)
    }

    /// Record a pause/resume transition. No-op outside the agent states.
    pub async fn mark_agent_paused(&self, id: &str, paused: bool) {
        let mut sessions = self.sessions.lock().await;
        if let Some(record) = sessions.get_mut(id) {
            record.state = match (record.state, paused) {
                (SessionState::AgentRunning | SessionState::AgentPaused, true) => {
                    SessionState::AgentPaused
                }
                (SessionState::AgentRunning | SessionState::AgentPaused, false) => {
                    SessionState::AgentRunning
                }
                (state, _) => state,
            };
        }
    }

    /// Drop the agent binding when a run finishes; session returns to Ready.
    pub async fn release_agent(&self, id: &str) {
        let mut sessions = self.sessions.lock().await;
        if let Some(record) = sessions.get_mut(id) {
            if matches!(record.state, SessionState::AgentRunning | SessionState::AgentPaused) {
                record.state = SessionState::Ready;
            }
            record.agent = Weak::new();
        }
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.lock().await.len()
    }

    fn info(&self, record: &SessionRecord) -> SessionInfo {
        SessionInfo {
            session_id: record.id.clone(),
            vnc_url: format!(
                "{}/sessions/{}/vnc/vnc.html?autoconnect=1",
                self.vnc_base_url, record.id
            ),
            vnc_port: record.slot.vnc_port,
            web_port: record.slot.web_port,
            display_num: record.slot.display_num,
            state: record.state.as_str(),
        }
    }
}

/// Random session id formatted `xxxx-xxxx-xxxx-xxxx` (16 hex digits).
pub fn generate_session_id() -> String {
    let bits: u64 = rand::random();
    let hex = format!("{bits:016x}");
    format!("{}-{}-{}-{}", &hex[0..4], &hex[4..8], &hex[8..12], &hex[12..16])
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;
