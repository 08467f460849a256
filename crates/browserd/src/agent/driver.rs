// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Default agent loop: a step-wise LLM driver over the browser event bus
//! and tool set. Each step asks the model for exactly one JSON action and
//! executes it; pause/stop are honored between steps.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;

use super::{AgentContext, AgentHandle, AgentLoop};
use crate::browser::BrowserEvent;

/// Domain rules handed to the model alongside the task.
pub const EXTEND_PROMPT: &str = "\
You are a browser agent filling prior-authorization forms on vendor portals.
Rules:
- The portals use nested iframes and load slowly; wait for pages to settle
  before interacting.
- Dropdowns populate late; select with mouse clicks, never the Enter key.
- Never open the site's embedded chat assistant.
- When a file upload field appears, use the upload_file tool with a path
  from the provided whitelist, and do not continue until the upload result
  is confirmed.
- When the portal demands something only a human can supply (MFA codes,
  account questions), use the human_in_the_loop tool and wait.
Respond to every turn with exactly one JSON object and nothing else.";

// -- LLM client ---------------------------------------------------------------

/// Thin client for the Generative Language `generateContent` endpoint.
#[derive(Clone)]
pub struct LlmClient {
    http: reqwest::Client,
    model: String,
    temperature: f32,
    api_key: String,
    base_url: String,
}

impl LlmClient {
    pub fn new(http: reqwest::Client, model: String, temperature: f32, api_key: String) -> Self {
        Self {
            http,
            model,
            temperature,
            api_key,
            base_url: "https://generativelanguage.googleapis.com/v1beta".to_owned(),
        }
    }

    /// Point the client at a different endpoint (tests).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub async fn complete(&self, system: &str, user: &str) -> anyhow::Result<String> {
        let url = format!("{}/models/{}:generateContent", self.base_url, self.model);
        let body = serde_json::json!({
            "system_instruction": { "parts": [{ "text": system }] },
            "contents": [{ "role": "user", "parts": [{ "text": user }] }],
            "generationConfig": { "temperature": self.temperature },
        });

        let resp = self
            .http
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            anyhow::bail!("LLM returned HTTP {status}");
        }

        let value: serde_json::Value = resp.json().await?;
        value["candidates"][0]["content"]["parts"][0]["text"]
            .as_str()
            .map(str::to_owned)
            .ok_or_else(|| anyhow::anyhow!("LLM response carried no text part"))
    }
}

// -- Actions ------------------------------------------------------------------

/// One model-chosen step.
#[derive(Debug, Deserialize, PartialEq)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    Navigate { url: String },
    UploadFile { index: u64, path: PathBuf },
    HumanInTheLoop,
    /// Free-form working note carried into the next prompt.
    Note { text: String },
    Done {
        #[serde(default)]
        summary: String,
    },
}

/// Parse a model reply into an action, tolerating a fenced code block.
pub fn parse_action(reply: &str) -> anyhow::Result<Action> {
    let trimmed = reply.trim();
    let body = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.strip_suffix("```"))
        .unwrap_or(trimmed)
        .trim();
    Ok(serde_json::from_str(body)?)
}

// -- Loop ---------------------------------------------------------------------

pub struct FormFillLoop {
    pub max_steps: u32,
    pub max_failures: u32,
}

impl Default for FormFillLoop {
    fn default() -> Self {
        Self { max_steps: 60, max_failures: 10 }
    }
}

#[async_trait]
impl AgentLoop for FormFillLoop {
    async fn run(&self, ctx: AgentContext, handle: Arc<AgentHandle>) -> anyhow::Result<String> {
        let whitelist = ctx
            .tools
            .whitelist()
            .iter()
            .map(|p| p.display().to_string())
            .collect::<Vec<_>>()
            .join("\n");
        let system = format!("{}\n\nUpload whitelist:\n{whitelist}", ctx.extend_prompt);

        let mut observation = "Browser session started.".to_owned();
        let mut failures = 0u32;

        for step in 1..=self.max_steps {
            if handle.checkpoint().await.is_err() {
                ctx.logger.info("Agent", "stopped by operator").await;
                return Ok("stopped by operator".to_owned());
            }

            let prompt = format!(
                "Task:\n{}\n\nLast result:\n{observation}\n\nReply with one JSON action: \
                 {{\"action\":\"navigate\",\"url\":…}} | \
                 {{\"action\":\"upload_file\",\"index\":…,\"path\":…}} | \
                 {{\"action\":\"human_in_the_loop\"}} | \
                 {{\"action\":\"note\",\"text\":…}} | \
                 {{\"action\":\"done\",\"summary\":…}}",
                ctx.task
            );

            let reply = match ctx.llm.complete(&system, &prompt).await {
                Ok(reply) => reply,
                Err(e) => {
                    failures += 1;
                    ctx.logger.warn("Agent", &format!("model call failed: {e}")).await;
                    if failures > self.max_failures {
                        anyhow::bail!("agent exceeded {} consecutive failures: {e}", self.max_failures);
                    }
                    continue;
                }
            };

            let action = match parse_action(&reply) {
                Ok(action) => action,
                Err(e) => {
                    failures += 1;
                    observation = format!("previous reply was not a valid action: {e}");
                    ctx.logger.warn("Agent", &observation).await;
                    if failures > self.max_failures {
                        anyhow::bail!("agent exceeded {} unparseable replies", self.max_failures);
                    }
                    continue;
                }
            };
            failures = 0;

            ctx.logger.info("Agent", &format!("📍 Step {step}: {action:?}")).await;
            match action {
                Action::Navigate { url } => {
                    ctx.browser.dispatch(BrowserEvent::Navigate { url: url.clone() });
                    observation = format!("navigated to {url}");
                }
                Action::UploadFile { index, path } => {
                    let result = ctx.tools.upload_file(&ctx.browser, index, &path).await;
                    observation = result.message.clone();
                    let level = if result.ok { "INFO" } else { "WARNING" };
                    ctx.logger.log(level, "tools", &result.message).await;
                }
                Action::HumanInTheLoop => {
                    let result = ctx
                        .tools
                        .human_in_the_loop(&handle, &ctx.request_id, &ctx.session_id)
                        .await;
                    observation = result.message.clone();
                    let level = if result.ok { "INFO" } else { "WARNING" };
                    ctx.logger.log(level, "tools", &result.message).await;
                }
                Action::Note { text } => observation = text,
                Action::Done { summary } => {
                    let summary =
                        if summary.is_empty() { "No result produced".to_owned() } else { summary };
                    ctx.logger.info("Agent", &format!("📄 Result: {summary}")).await;
                    return Ok(summary);
                }
            }
        }

        anyhow::bail!("agent exhausted its {} step budget", self.max_steps)
    }
}

#[cfg(test)]
#[path = "driver_tests.rs"]
mod tests;
