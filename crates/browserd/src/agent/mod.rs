// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Agent runner: binds one agent task to a started session, tees its logs
//! into the per-request log stream, and exposes pause/resume/stop/status
//! over a control handle.

pub mod driver;
pub mod logfmt;
pub mod tools;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::AsyncBufReadExt;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::browser::BrowserHandle;
use crate::logs::{AgentLogger, LogSink};
use crate::registry::{RegistryError, SessionRegistry};

// -- Control handle -----------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentPhase {
    Running,
    Paused,
    Stopping,
    Done,
    Failed,
}

impl AgentPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Stopping => "stopping",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }
}

/// Control capability over one running agent task. Held strongly by the
/// runner for the duration of `run`; the registry only keeps a weak ref.
pub struct AgentHandle {
    session_id: String,
    stop: CancellationToken,
    phase: watch::Sender<AgentPhase>,
}

/// Marker returned by [`AgentHandle::checkpoint`] when the task was asked
/// to stop.
#[derive(Debug)]
pub struct AgentStopped;

impl AgentHandle {
    pub fn new(session_id: impl Into<String>) -> Self {
        let (phase, _) = watch::channel(AgentPhase::Running);
        Self { session_id: session_id.into(), stop: CancellationToken::new(), phase }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Cooperative stop; the loop observes it at its next checkpoint.
    pub fn stop(&self) {
        let _ = self.phase.send(AgentPhase::Stopping);
        self.stop.cancel();
    }

    pub fn pause(&self) {
        self.phase.send_if_modified(|p| {
            if *p == AgentPhase::Running {
                *p = AgentPhase::Paused;
                true
            } else {
                false
            }
        });
    }

    pub fn resume(&self) {
        self.phase.send_if_modified(|p| {
            if *p == AgentPhase::Paused {
                *p = AgentPhase::Running;
                true
            } else {
                false
            }
        });
    }

    pub fn phase(&self) -> AgentPhase {
        *self.phase.borrow()
    }

    fn finish(&self, ok: bool) {
        let _ = self.phase.send(if ok { AgentPhase::Done } else { AgentPhase::Failed });
    }

    /// Suspension point for the agent loop: returns once the agent may
    /// proceed, or `Err(AgentStopped)` when stop was requested. Blocks
    /// while paused.
    pub async fn checkpoint(&self) -> Result<(), AgentStopped> {
        let mut rx = self.phase.subscribe();
        loop {
            if self.stop.is_cancelled() {
                return Err(AgentStopped);
            }
            if *rx.borrow() != AgentPhase::Paused {
                return Ok(());
            }
            tokio::select! {
                _ = self.stop.cancelled() => return Err(AgentStopped),
                changed = rx.changed() => {
                    if changed.is_err() {
                        return Err(AgentStopped);
                    }
                }
            }
        }
    }
}

// -- Errors -------------------------------------------------------------------

#[derive(Debug)]
pub enum AgentError {
    /// Missing or invalid configuration; not retried.
    Config(String),
    InvalidSession,
    NoBrowser,
    AgentActive,
    Failed(String),
}

impl fmt::Display for AgentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(msg) => f.write_str(msg),
            Self::InvalidSession => f.write_str("Invalid or inactive session ID"),
            Self::NoBrowser => f.write_str("No browser session found for the given session ID"),
            Self::AgentActive => f.write_str("An agent is already running for this session"),
            Self::Failed(msg) => write!(f, "Failed to start/run agent: {msg}"),
        }
    }
}

impl std::error::Error for AgentError {}

// -- Loop seam ----------------------------------------------------------------

/// LLM binding for the agent.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub model: String,
    pub temperature: f32,
    pub api_key: Option<String>,
}

/// Everything one agent run sees.
pub struct AgentContext {
    pub task: String,
    pub session_id: String,
    pub request_id: String,
    pub browser: Arc<BrowserHandle>,
    pub tools: tools::ToolSet,
    pub logger: AgentLogger,
    pub llm: driver::LlmClient,
    pub extend_prompt: String,
}

/// The reasoning loop itself is an external collaborator; the crate ships
/// [`driver::FormFillLoop`] as its default binding.
#[async_trait]
pub trait AgentLoop: Send + Sync {
    /// Drive the task to completion; returns a result summary.
    async fn run(&self, ctx: AgentContext, handle: Arc<AgentHandle>) -> anyhow::Result<String>;
}

// -- Runner -------------------------------------------------------------------

pub struct AgentRunner {
    registry: Arc<SessionRegistry>,
    agent_loop: Arc<dyn AgentLoop>,
    sink: Arc<dyn LogSink>,
    llm: LlmConfig,
    tools: tools::ToolSet,
    progress_url: Option<String>,
    http: reqwest::Client,
}

pub struct RunRequest {
    pub session_id: String,
    pub request_id: String,
    pub task: String,
}

impl AgentRunner {
    pub fn new(
        registry: Arc<SessionRegistry>,
        agent_loop: Arc<dyn AgentLoop>,
        sink: Arc<dyn LogSink>,
        llm: LlmConfig,
        tools: tools::ToolSet,
        progress_url: Option<String>,
        http: reqwest::Client,
    ) -> Self {
        Self { registry, agent_loop, sink, llm, tools, progress_url, http }
    }

    /// Run one agent task to completion. Blocks for the lifetime of the
    /// agent; control operations go through the session's [`AgentHandle`].
    pub async fn run(&self, req: RunRequest) -> Result<(), AgentError> {
        let api_key = self
            .llm
            .api_key
            .clone()
            .ok_or_else(|| AgentError::Config("GOOGLE_API_KEY environment variable not set".into()))?;

        let browser = self.registry.browser(&req.session_id).await.map_err(|e| match e {
            RegistryError::NotFound => AgentError::InvalidSession,
            RegistryError::NoBrowser => AgentError::NoBrowser,
            other => AgentError::Failed(other.to_string()),
        })?;

        let handle = Arc::new(AgentHandle::new(req.session_id.clone()));
        self.registry.bind_agent(&req.session_id, &handle).await.map_err(|e| match e {
            RegistryError::NotFound => AgentError::InvalidSession,
            RegistryError::AgentActive => AgentError::AgentActive,
            other => AgentError::Failed(other.to_string()),
        })?;

        let logger = AgentLogger::new(Arc::clone(&self.sink), &req.request_id);

        // Tee browser stdout lines that look like agent events into the
        // same stream the logger writes to.
        let tee = match browser.take_stdout().await {
            Some(stdout) => Some(spawn_stdout_tee(stdout, logger.clone())),
            None => None,
        };

        logger
            .info("Agent", &format!("starting task for request {}", req.request_id))
            .await;

        let ctx = AgentContext {
            task: req.task.clone(),
            session_id: req.session_id.clone(),
            request_id: req.request_id.clone(),
            browser,
            tools: self.tools.clone(),
            logger: logger.clone(),
            llm: driver::LlmClient::new(
                self.http.clone(),
                self.llm.model.clone(),
                self.llm.temperature,
                api_key,
            ),
            extend_prompt: driver::EXTEND_PROMPT.to_owned(),
        };

        let result = self.agent_loop.run(ctx, Arc::clone(&handle)).await;

        // Sink and tee are detached on every exit path.
        if let Some(tee) = tee {
            tee.abort();
        }
        self.registry.release_agent(&req.session_id).await;

        match result {
            Ok(summary) => {
                handle.finish(true);
                logger.info("Agent", &format!("completed: {summary}")).await;
                Ok(())
            }
            Err(e) => {
                handle.finish(false);
                logger.error("Agent", &format!("failed: {e}")).await;
                self.mark_request_failed(&req.request_id, &e).await;
                Err(AgentError::Failed(e.to_string()))
            }
        }
    }

    /// Best-effort progress reconciliation with the batch service.
    async fn mark_request_failed(&self, request_id: &str, err: &anyhow::Error) {
        let Some(ref base) = self.progress_url else { return };
        let url = format!("{base}/prior-auths/requests/{request_id}/status");
        let body = serde_json::json!({ "status": "failed", "remarks": err.to_string() });
        if let Err(e) = self.http.put(&url).json(&body).send().await {
            tracing::warn!(request_id, err = %e, "progress update failed");
        }
    }
}

/// Forward agent-looking stdout lines to the log stream.
fn spawn_stdout_tee(
    stdout: tokio::process::ChildStdout,
    logger: AgentLogger,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut lines = tokio::io::BufReader::new(stdout).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if logfmt::is_agent_line(&line) {
                logger.raw(&line).await;
            }
        }
    })
}

#[cfg(test)]
#[path = "agent_tests.rs"]
mod tests;
