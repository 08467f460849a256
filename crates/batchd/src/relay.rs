// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-request log streams: append with monotonic record ids, replay from
//! an id, and blocking tails for live subscribers. One mechanism covers
//! both history and live fan-out; every subscriber owns its own cursor.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{FutureExt, StreamExt};

/// One record of a request's stream.
#[derive(Debug, Clone)]
pub struct LogRecord {
    /// Broker-assigned monotonic id.
    pub id: u64,
    /// Raw record value: plain text or a JSON object with at least `msg`.
    pub raw: String,
}

#[async_trait]
pub trait LogBroker: Send + Sync {
    /// Append a record; returns its id.
    async fn append(&self, request_id: &str, raw: &str) -> anyhow::Result<u64>;

    /// Open a cursor over records with id greater than `from_exclusive`.
    async fn tail(&self, request_id: &str, from_exclusive: u64)
        -> anyhow::Result<Box<dyn LogCursor>>;

    /// Logical key of the request's stream.
    fn stream_key(&self, request_id: &str) -> String;
}

#[async_trait]
pub trait LogCursor: Send {
    /// Records past the cursor, blocking up to `block` when none are
    /// available. An empty vec means the block window expired.
    async fn next_batch(&mut self, block: Duration) -> anyhow::Result<Vec<LogRecord>>;
}

// -- In-memory ----------------------------------------------------------------

struct StreamState {
    records: parking_lot::Mutex<Vec<LogRecord>>,
    next_id: AtomicU64,
    notify: tokio::sync::Notify,
}

impl StreamState {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            records: parking_lot::Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            notify: tokio::sync::Notify::new(),
        })
    }
}

/// Single-process log streams.
pub struct MemoryLogBroker {
    stream: String,
    streams: parking_lot::Mutex<HashMap<String, Arc<StreamState>>>,
}

impl MemoryLogBroker {
    pub fn new(stream: impl Into<String>) -> Self {
        Self { stream: stream.into(), streams: parking_lot::Mutex::new(HashMap::new()) }
    }

    fn state(&self, request_id: &str) -> Arc<StreamState> {
        let mut streams = self.streams.lock();
        Arc::clone(streams.entry(request_id.to_owned()).or_insert_with(StreamState::new))
    }
}

#[async_trait]
impl LogBroker for MemoryLogBroker {
    async fn append(&self, request_id: &str, raw: &str) -> anyhow::Result<u64> {
        let state = self.state(request_id);
        let id = state.next_id.fetch_add(1, Ordering::SeqCst);
        state.records.lock().push(LogRecord { id, raw: raw.to_owned() });
        state.notify.notify_waiters();
        Ok(id)
    }

    async fn tail(
        &self,
        request_id: &str,
        from_exclusive: u64,
    ) -> anyhow::Result<Box<dyn LogCursor>> {
        Ok(Box::new(MemoryCursor { state: self.state(request_id), pos: from_exclusive }))
    }

    fn stream_key(&self, request_id: &str) -> String {
        format!("{}:{}", self.stream, request_id)
    }
}

struct MemoryCursor {
    state: Arc<StreamState>,
    pos: u64,
}

impl MemoryCursor {
    fn drain_ready(&mut self) -> Vec<LogRecord> {
        let records = self.state.records.lock();
        let ready: Vec<LogRecord> =
            records.iter().filter(|r| r.id > self.pos).cloned().collect();
        if let Some(last) = ready.last() {
            self.pos = last.id;
        }
        ready
    }
}

#[async_trait]
impl LogCursor for MemoryCursor {
    async fn next_batch(&mut self, block: Duration) -> anyhow::Result<Vec<LogRecord>> {
        let deadline = tokio::time::Instant::now() + block;
        let state = Arc::clone(&self.state);
        loop {
            // Arm the waiter before re-checking so an append between the
            // check and the wait still wakes us.
            let notified = state.notify.notified();
            let ready = self.drain_ready();
            if !ready.is_empty() {
                return Ok(ready);
            }
            let now = tokio::time::Instant::now();
            if now >= deadline {
                return Ok(Vec::new());
            }
            if tokio::time::timeout(deadline - now, notified).await.is_err() {
                return Ok(Vec::new());
            }
        }
    }
}

// -- JetStream ----------------------------------------------------------------

/// Broker-side streams; record ids are JetStream stream sequences.
pub struct JetStreamLogBroker {
    stream_name: String,
    subject_prefix: String,
    stream: async_nats::jetstream::stream::Stream,
    js: async_nats::jetstream::Context,
}

impl JetStreamLogBroker {
    pub async fn connect(
        js: async_nats::jetstream::Context,
        stream_name: &str,
    ) -> anyhow::Result<Self> {
        let subject_prefix = stream_name.replace(':', ".");
        let stream = js
            .get_or_create_stream(async_nats::jetstream::stream::Config {
                name: stream_name.to_owned(),
                subjects: vec![format!("{subject_prefix}.>")],
                ..Default::default()
            })
            .await?;
        tracing::info!(stream = stream_name, "log stream ready");
        Ok(Self { stream_name: stream_name.to_owned(), subject_prefix, stream, js })
    }
}

#[async_trait]
impl LogBroker for JetStreamLogBroker {
    async fn append(&self, request_id: &str, raw: &str) -> anyhow::Result<u64> {
        let subject = format!("{}.{}", self.subject_prefix, request_id);
        let ack = self.js.publish(subject, raw.to_owned().into()).await?;
        let ack = ack.await?;
        Ok(ack.sequence)
    }

    async fn tail(
        &self,
        request_id: &str,
        from_exclusive: u64,
    ) -> anyhow::Result<Box<dyn LogCursor>> {
        use async_nats::jetstream::consumer::DeliverPolicy;

        let deliver_policy = if from_exclusive == 0 {
            DeliverPolicy::All
        } else {
            DeliverPolicy::ByStartSequence { start_sequence: from_exclusive + 1 }
        };
        let consumer = self
            .stream
            .create_consumer(async_nats::jetstream::consumer::pull::OrderedConfig {
                filter_subject: format!("{}.{}", self.subject_prefix, request_id),
                deliver_policy,
                ..Default::default()
            })
            .await?;
        let messages = consumer.messages().await?.map(|r| r.map_err(anyhow::Error::from)).boxed();
        Ok(Box::new(JetStreamCursor { messages }))
    }

    fn stream_key(&self, request_id: &str) -> String {
        format!("{}:{}", self.stream_name, request_id)
    }
}

struct JetStreamCursor {
    messages: futures_util::stream::BoxStream<'static, anyhow::Result<async_nats::jetstream::Message>>,
}

impl JetStreamCursor {
    fn record(msg: &async_nats::jetstream::Message) -> anyhow::Result<LogRecord> {
        let id = msg.info().map_err(|e| anyhow::anyhow!("message info: {e}"))?.stream_sequence;
        Ok(LogRecord { id, raw: String::from_utf8_lossy(&msg.payload).into_owned() })
    }
}

#[async_trait]
impl LogCursor for JetStreamCursor {
    async fn next_batch(&mut self, block: Duration) -> anyhow::Result<Vec<LogRecord>> {
        let mut batch = Vec::new();

        match tokio::time::timeout(block, self.messages.next()).await {
            Err(_) => return Ok(batch),
            Ok(None) => anyhow::bail!("log stream consumer closed"),
            Ok(Some(msg)) => batch.push(Self::record(&msg?)?),
        }

        // Drain whatever is already buffered without waiting again.
        while let Some(Some(next)) = self.messages.next().now_or_never() {
            batch.push(Self::record(&next?)?);
        }
        Ok(batch)
    }
}

#[cfg(test)]
#[path = "relay_tests.rs"]
mod tests;
