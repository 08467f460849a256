// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Agent tool set. Tool failures are results, never crashes: the agent
//! decides what to do with a failed upload or webhook.

use std::path::{Path, PathBuf};

use crate::agent::AgentHandle;
use crate::browser::{BrowserEvent, BrowserHandle};

/// Outcome of one tool invocation, `{ok, error}` shaped.
#[derive(Debug, Clone)]
pub struct ToolResult {
    pub ok: bool,
    pub message: String,
}

impl ToolResult {
    fn success(message: impl Into<String>) -> Self {
        Self { ok: true, message: message.into() }
    }

    fn error(message: impl Into<String>) -> Self {
        Self { ok: false, message: message.into() }
    }
}

/// Capabilities exposed to the agent loop.
#[derive(Clone)]
pub struct ToolSet {
    whitelist: Vec<PathBuf>,
    webhook_url: Option<String>,
    http: reqwest::Client,
}

impl ToolSet {
    pub fn new(whitelist: Vec<PathBuf>, webhook_url: Option<String>, http: reqwest::Client) -> Self {
        Self { whitelist, webhook_url, http }
    }

    pub fn whitelist(&self) -> &[PathBuf] {
        &self.whitelist
    }

    /// Upload a whitelisted local file to the file input at `index`.
    pub async fn upload_file(
        &self,
        browser: &BrowserHandle,
        index: u64,
        path: &Path,
    ) -> ToolResult {
        if !self.whitelist.iter().any(|allowed| allowed == path) {
            return ToolResult::error(format!("File path {} is not available", path.display()));
        }
        if !path.exists() {
            return ToolResult::error(format!("File {} does not exist", path.display()));
        }

        browser.dispatch(BrowserEvent::UploadFile { index, path: path.to_path_buf() });
        ToolResult::success(format!("Successfully uploaded file to index {index}"))
    }

    /// Pause the running agent and notify the human-in-the-loop webhook.
    pub async fn human_in_the_loop(
        &self,
        handle: &AgentHandle,
        request_id: &str,
        session_id: &str,
    ) -> ToolResult {
        handle.pause();

        let Some(ref url) = self.webhook_url else {
            return ToolResult::error("HITL_WEBHOOK_URL is not set");
        };

        let body = serde_json::json!({ "request_id": request_id, "session_id": session_id });
        match self.http.post(url).json(&body).send().await {
            Ok(resp) if resp.status().is_success() => ToolResult::success(format!(
                "Agent paused for human intervention on request {request_id}; resume when ready"
            )),
            Ok(resp) => {
                ToolResult::error(format!("Failed to call HITL webhook: {}", resp.status()))
            }
            Err(e) => ToolResult::error(format!("Failed to call HITL webhook: {e}")),
        }
    }
}

#[cfg(test)]
#[path = "tools_tests.rs"]
mod tests;
