// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

/// Browser-session supervisor for prior-auth agent workers.
#[derive(Debug, Clone, Parser)]
#[command(name = "browserd", version, about)]
pub struct Config {
    /// Host address to bind to.
    #[arg(long, env = "BROWSERD_HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// HTTP port to listen on.
    #[arg(long, env = "BROWSERD_PORT", default_value_t = 8080)]
    pub port: u16,

    /// Session capacity policy (pool or single).
    #[arg(long, env = "BROWSERD_SESSION_POLICY", default_value = "single")]
    pub session_policy: String,

    /// Number of slots in pool mode.
    #[arg(long, env = "BROWSERD_POOL_SIZE", default_value_t = 10)]
    pub pool_size: usize,

    /// First X display number; slot i uses display base+i.
    #[arg(long, env = "BROWSERD_BASE_DISPLAY", default_value_t = 101)]
    pub base_display: u16,

    /// First VNC port; slot i uses base+i.
    #[arg(long, env = "BROWSERD_BASE_VNC_PORT", default_value_t = 6080)]
    pub base_vnc_port: u16,

    /// First websockify port; slot i uses base+i.
    #[arg(long, env = "BROWSERD_BASE_WEB_PORT", default_value_t = 5080)]
    pub base_web_port: u16,

    /// Base directory for per-session browser profiles.
    #[arg(long, env = "BROWSERD_PROFILE_DIR", default_value = "/tmp/browser_profiles")]
    pub profile_dir: PathBuf,

    /// Browser binary to launch per session.
    #[arg(long, env = "BROWSERD_BROWSER_BIN", default_value = "chromium")]
    pub browser_bin: String,

    /// Static noVNC web bundle served by websockify.
    #[arg(long, env = "BROWSERD_NOVNC_ROOT", default_value = "/usr/share/novnc")]
    pub novnc_root: PathBuf,

    /// Optional unpacked browser extension directory (must hold manifest.json).
    #[arg(long, env = "EXTENSIONS_DIR")]
    pub extensions_dir: Option<PathBuf>,

    /// Public base URL used to build per-session VNC viewer links.
    #[arg(long, env = "VNC_BASE_URL", default_value = "http://localhost:8080")]
    pub vnc_base_url: String,

    /// API key for the LLM backing the agent.
    #[arg(long, env = "GOOGLE_API_KEY")]
    pub google_api_key: Option<String>,

    /// LLM model id.
    #[arg(long, env = "BROWSERD_LLM_MODEL", default_value = "gemini-2.5-pro")]
    pub llm_model: String,

    /// LLM sampling temperature.
    #[arg(long, env = "BROWSERD_LLM_TEMPERATURE", default_value_t = 0.3)]
    pub llm_temperature: f32,

    /// Webhook notified when the agent requests human intervention.
    #[arg(long, env = "HITL_WEBHOOK_URL")]
    pub hitl_webhook_url: Option<String>,

    /// Progress endpoint PUT on terminal agent failure (batchd).
    #[arg(long, env = "PROGRESS_URL")]
    pub progress_url: Option<String>,

    /// NATS broker URL for the per-request log streams. Unset disables log relay.
    #[arg(long, env = "BROKER_URL")]
    pub broker_url: Option<String>,

    /// Logical log stream name; records land on `{stream}:{request_id}`.
    #[arg(long, env = "LOG_STREAM", default_value = "browser_use_logs")]
    pub log_stream: String,

    /// Seconds to wait for the X display to become ready.
    #[arg(long, env = "BROWSERD_DISPLAY_TIMEOUT", default_value_t = 10)]
    pub display_timeout: u64,

    /// Seconds children get to exit gracefully before SIGKILL.
    #[arg(long, env = "BROWSERD_GRACE_TIMEOUT", default_value_t = 2)]
    pub grace_timeout: u64,

    /// Browser launch attempts before giving up.
    #[arg(long, env = "BROWSERD_BROWSER_ATTEMPTS", default_value_t = 3)]
    pub browser_attempts: u32,

    /// File paths the upload tool may hand to the browser (repeatable).
    #[arg(long = "upload-whitelist", env = "BROWSERD_UPLOAD_WHITELIST", value_delimiter = ',')]
    pub upload_whitelist: Vec<PathBuf>,

    /// Log format (json or text).
    #[arg(long, env = "BROWSERD_LOG_FORMAT", default_value = "json")]
    pub log_format: String,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, env = "BROWSERD_LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

/// Session capacity policy (spec'd as one abstraction over both deployments).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPolicy {
    /// Fixed set of N sessions with first-free selection.
    FixedPool { size: usize },
    /// One session at a time with a freshly generated random id.
    Single,
}

impl Config {
    /// Validate the configuration after parsing.
    pub fn validate(&self) -> anyhow::Result<()> {
        self.policy()?;
        if self.pool_size == 0 {
            anyhow::bail!("--pool-size must be at least 1");
        }
        if self.browser_attempts == 0 {
            anyhow::bail!("--browser-attempts must be at least 1");
        }
        Ok(())
    }

    /// Parse the session policy string into an enum.
    pub fn policy(&self) -> anyhow::Result<SessionPolicy> {
        match self.session_policy.to_lowercase().as_str() {
            "pool" => Ok(SessionPolicy::FixedPool { size: self.pool_size }),
            "single" => Ok(SessionPolicy::Single),
            other => anyhow::bail!("invalid session policy: {other}"),
        }
    }

    pub fn display_ready_timeout(&self) -> Duration {
        Duration::from_secs(self.display_timeout)
    }

    pub fn grace(&self) -> Duration {
        Duration::from_secs(self.grace_timeout)
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
