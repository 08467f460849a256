// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared test fixtures: a stub process backend so registry and transport
//! logic runs without X tooling on the host.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use crate::agent::tools::ToolSet;
use crate::agent::{AgentContext, AgentHandle, AgentLoop, AgentRunner, LlmConfig};
use crate::browser::{BrowserHandle, BrowserProfile};
use crate::config::SessionPolicy;
use crate::registry::SessionRegistry;
use crate::slots::{Slot, SlotPool};
use crate::supervisor::{
    SessionBackend, SessionProcesses, StartFailure, StartFailureKind, StartedSession,
};

pub struct StubBackend {
    pub fail_start: AtomicBool,
    pub started: parking_lot::Mutex<Vec<String>>,
    pub stopped: parking_lot::Mutex<Vec<String>>,
}

impl StubBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            fail_start: AtomicBool::new(false),
            started: parking_lot::Mutex::new(Vec::new()),
            stopped: parking_lot::Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl SessionBackend for StubBackend {
    async fn start(&self, session_id: &str, slot: &Slot) -> Result<StartedSession, StartFailure> {
        if self.fail_start.load(Ordering::SeqCst) {
            return Err(StartFailure {
                kind: StartFailureKind::BrowserAttachFailed,
                message: "injected start failure".to_owned(),
            });
        }
        self.started.lock().push(session_id.to_owned());
        let profile = BrowserProfile {
            user_data_dir: format!("/tmp/browser_profiles/{session_id}").into(),
            downloads_dir: format!("/tmp/browser_profiles/{session_id}/downloads").into(),
            display_num: slot.display_num,
            extensions_dir: None,
        };
        Ok(StartedSession {
            processes: SessionProcesses::default(),
            browser: Arc::new(BrowserHandle::new(None, profile)),
        })
    }

    async fn stop(&self, session_id: &str, _slot: &Slot, _procs: SessionProcesses) {
        self.stopped.lock().push(session_id.to_owned());
    }
}

pub fn test_registry(policy: SessionPolicy) -> (Arc<SessionRegistry>, Arc<StubBackend>) {
    let size = match policy {
        SessionPolicy::FixedPool { size } => size,
        SessionPolicy::Single => 1,
    };
    let backend = StubBackend::new();
    let registry = Arc::new(SessionRegistry::new(
        policy,
        SlotPool::new(size, 101, 6080, 5080),
        Arc::clone(&backend) as Arc<dyn SessionBackend>,
        "http://localhost:8080".to_owned(),
        std::time::Duration::from_millis(100),
    ));
    (registry, backend)
}

/// Agent loop that immediately returns the configured result.
pub struct StubLoop {
    pub fail: bool,
}

#[async_trait]
impl AgentLoop for StubLoop {
    async fn run(&self, ctx: AgentContext, _handle: Arc<AgentHandle>) -> anyhow::Result<String> {
        ctx.logger.info("Agent", "stub loop ran").await;
        if self.fail {
            anyhow::bail!("stub loop failure")
        }
        Ok("stub complete".to_owned())
    }
}

pub fn test_runner(
    registry: Arc<SessionRegistry>,
    agent_loop: Arc<dyn AgentLoop>,
    api_key: Option<&str>,
) -> Arc<AgentRunner> {
    crate::ensure_crypto();
    let http = reqwest::Client::new();
    Arc::new(AgentRunner::new(
        registry,
        agent_loop,
        Arc::new(crate::logs::NullSink::new("browser_use_logs")),
        LlmConfig {
            model: "gemini-2.5-pro".to_owned(),
            temperature: 0.3,
            api_key: api_key.map(str::to_owned),
        },
        ToolSet::new(Vec::new(), None, http.clone()),
        None,
        http,
    ))
}
