// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-request log stream publisher. Records land on the broker stream
//! keyed `{stream}:{request_id}`; a sink failure never crashes the agent.

use std::sync::Arc;

use async_trait::async_trait;

use crate::agent::logfmt;

#[async_trait]
pub trait LogSink: Send + Sync {
    /// Non-blocking, best-effort append.
    async fn append(&self, request_id: &str, line: &str);

    /// Logical key of the request's stream.
    fn stream_key(&self, request_id: &str) -> String;
}

/// Sink used when no broker is configured; records only hit local tracing.
pub struct NullSink {
    stream: String,
}

impl NullSink {
    pub fn new(stream: impl Into<String>) -> Self {
        Self { stream: stream.into() }
    }
}

#[async_trait]
impl LogSink for NullSink {
    async fn append(&self, request_id: &str, line: &str) {
        tracing::debug!(target: "agent_log", request_id, "{line}");
    }

    fn stream_key(&self, request_id: &str) -> String {
        format!("{}:{}", self.stream, request_id)
    }
}

/// JetStream-backed sink; one subject per request under the log stream.
pub struct JetStreamSink {
    js: async_nats::jetstream::Context,
    stream: String,
    subject_prefix: String,
}

impl JetStreamSink {
    /// Connect and make sure the log stream exists.
    pub async fn connect(url: &str, stream: &str) -> anyhow::Result<Self> {
        let client = async_nats::connect(url).await?;
        let js = async_nats::jetstream::new(client);
        let subject_prefix = stream.replace(':', ".");
        js.get_or_create_stream(async_nats::jetstream::stream::Config {
            name: stream.to_owned(),
            subjects: vec![format!("{subject_prefix}.>")],
            ..Default::default()
        })
        .await?;
        tracing::info!(url, stream, "log sink connected");
        Ok(Self { js, stream: stream.to_owned(), subject_prefix })
    }
}

#[async_trait]
impl LogSink for JetStreamSink {
    async fn append(&self, request_id: &str, line: &str) {
        let subject = format!("{}.{}", self.subject_prefix, request_id);
        let payload = serde_json::json!({ "msg": line }).to_string();
        match self.js.publish(subject, payload.into()).await {
            Ok(ack) => {
                if let Err(e) = ack.await {
                    tracing::warn!(request_id, err = %e, "log append not acked");
                }
            }
            Err(e) => tracing::warn!(request_id, err = %e, "log append failed"),
        }
    }

    fn stream_key(&self, request_id: &str) -> String {
        format!("{}:{}", self.stream, request_id)
    }
}

/// Request-scoped logger the agent loop writes through.
#[derive(Clone)]
pub struct AgentLogger {
    sink: Arc<dyn LogSink>,
    request_id: String,
}

impl AgentLogger {
    pub fn new(sink: Arc<dyn LogSink>, request_id: impl Into<String>) -> Self {
        Self { sink, request_id: request_id.into() }
    }

    pub async fn log(&self, level: &str, source: &str, message: &str) {
        let line = logfmt::format_record(level, source, &logfmt::strip_ansi(message));
        self.sink.append(&self.request_id, &line).await;
    }

    pub async fn info(&self, source: &str, message: &str) {
        self.log("INFO", source, message).await;
    }

    pub async fn warn(&self, source: &str, message: &str) {
        self.log("WARNING", source, message).await;
    }

    pub async fn error(&self, source: &str, message: &str) {
        self.log("ERROR", source, message).await;
    }

    /// Append an already-formatted line (stdout tee path).
    pub async fn raw(&self, line: &str) {
        let cleaned = logfmt::strip_ansi(line);
        if !cleaned.trim().is_empty() {
            self.sink.append(&self.request_id, &cleaned).await;
        }
    }

    pub fn stream_key(&self) -> String {
        self.sink.stream_key(&self.request_id)
    }
}
