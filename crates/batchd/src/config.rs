// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::time::Duration;

use clap::Parser;

/// Batch ingestion, work dispatch, and log relay for prior-auth requests.
#[derive(Debug, Clone, Parser)]
#[command(name = "batchd", version, about)]
pub struct Config {
    /// Host address to bind to.
    #[arg(long, env = "BATCHD_HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// HTTP port to listen on.
    #[arg(long, env = "BATCHD_PORT", default_value_t = 8000)]
    pub port: u16,

    /// NATS broker URL. Unset runs single-instance with in-memory
    /// topic, dedup cache, and log streams.
    #[arg(long, env = "BROKER_URL")]
    pub broker_url: Option<String>,

    /// Work topic subject carrying request messages.
    #[arg(long, env = "TOPIC_NAME", default_value = "preauth.work")]
    pub topic_name: String,

    /// Broker stream backing the work topic.
    #[arg(long, env = "WORK_STREAM", default_value = "PREAUTH_WORK")]
    pub work_stream: String,

    /// Durable consumer name for the dispatcher.
    #[arg(long, env = "WORK_SUBSCRIPTION", default_value = "dispatcher")]
    pub work_subscription: String,

    /// Planner endpoint POSTed for each dispatched request.
    #[arg(long, env = "PROCESSOR_URL", default_value = "http://localhost:8001/api/planner-preauth")]
    pub processor_url: String,

    /// HTTP connect timeout in seconds.
    #[arg(long, env = "HTTP_CONNECT_TIMEOUT", default_value_t = 5)]
    pub http_connect_timeout: u64,

    /// HTTP write timeout in seconds.
    #[arg(long, env = "HTTP_WRITE_TIMEOUT", default_value_t = 10)]
    pub http_write_timeout: u64,

    /// HTTP read timeout in seconds; the planner gets this long to answer.
    #[arg(long, env = "HTTP_READ_TIMEOUT", default_value_t = 20)]
    pub http_read_timeout: u64,

    /// Connection pool timeout in seconds.
    #[arg(long, env = "HTTP_TIMEOUT", default_value_t = 5)]
    pub http_pool_timeout: u64,

    /// Cap on concurrently handled deliveries.
    #[arg(long, env = "MAX_OUTSTANDING_MESSAGES", default_value_t = 50)]
    pub max_outstanding_messages: usize,

    /// Cap on outstanding delivery bytes.
    #[arg(long, env = "MAX_OUTSTANDING_BYTES", default_value_t = 52_428_800)]
    pub max_outstanding_bytes: u64,

    /// Lifetime of `processed:*` markers in seconds.
    #[arg(long, env = "DEDUP_TTL_SECONDS", default_value_t = 86_400)]
    pub dedup_ttl_seconds: u64,

    /// Lifetime of `inflight:*` locks in seconds.
    #[arg(long, env = "INFLIGHT_TTL_SECONDS", default_value_t = 600)]
    pub inflight_ttl_seconds: u64,

    /// Nak planner failures so the broker redelivers, instead of the
    /// default ack-and-drop.
    #[arg(long, env = "NACK_ON_PLANNER_FAILURE")]
    pub nack_on_planner_failure: bool,

    /// Logical log stream name; requests stream on `{stream}:{request_id}`.
    #[arg(long, env = "LOG_STREAM", default_value = "browser_use_logs")]
    pub log_stream: String,

    /// SSE blocking-read window in milliseconds.
    #[arg(long, env = "BATCHD_SSE_BLOCK_MS", default_value_t = 5000)]
    pub sse_block_ms: u64,

    /// Log format (json or text).
    #[arg(long, env = "BATCHD_LOG_FORMAT", default_value = "json")]
    pub log_format: String,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, env = "BATCHD_LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl Config {
    pub fn validate(&self) -> anyhow::Result<()> {
        if !self.processor_url.starts_with("http://") && !self.processor_url.starts_with("https://")
        {
            anyhow::bail!(
                "invalid PROCESSOR_URL '{}': must start with http:// or https://",
                self.processor_url
            );
        }
        if self.max_outstanding_messages == 0 {
            anyhow::bail!("--max-outstanding-messages must be at least 1");
        }
        Ok(())
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.http_connect_timeout)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.http_write_timeout)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.http_read_timeout)
    }

    pub fn pool_timeout(&self) -> Duration {
        Duration::from_secs(self.http_pool_timeout)
    }

    pub fn dedup_ttl(&self) -> Duration {
        Duration::from_secs(self.dedup_ttl_seconds)
    }

    pub fn inflight_ttl(&self) -> Duration {
        Duration::from_secs(self.inflight_ttl_seconds)
    }

    pub fn sse_block(&self) -> Duration {
        Duration::from_millis(self.sse_block_ms)
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
