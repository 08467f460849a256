// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Work topic capability. The JetStream implementation backs multi-service
//! deployments (publish-with-ack, durable pull consumer); the in-memory
//! channel backs single-instance mode and the test suite.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use crate::model::WorkMessage;

/// One delivery handed to the dispatch consumer.
#[derive(Debug, Clone)]
pub struct WorkDelivery {
    pub req_id: String,
    pub payload: Bytes,
}

#[async_trait]
pub trait WorkTopic: Send + Sync {
    /// Publish one message and wait for the broker's acknowledgement.
    async fn publish(&self, msg: &WorkMessage) -> anyhow::Result<()>;
}

// -- In-memory ----------------------------------------------------------------

/// Channel-backed topic connecting the ingestor straight to the in-process
/// consumer. Delivery is at-most-once; there is no redelivery to tolerate.
pub struct MemoryTopic {
    tx: tokio::sync::mpsc::UnboundedSender<WorkDelivery>,
}

impl MemoryTopic {
    pub fn channel() -> (Arc<Self>, tokio::sync::mpsc::UnboundedReceiver<WorkDelivery>) {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        (Arc::new(Self { tx }), rx)
    }
}

#[async_trait]
impl WorkTopic for MemoryTopic {
    async fn publish(&self, msg: &WorkMessage) -> anyhow::Result<()> {
        let delivery = WorkDelivery {
            req_id: msg.request_id.clone(),
            payload: serde_json::to_vec(msg)?.into(),
        };
        self.tx
            .send(delivery)
            .map_err(|_| anyhow::anyhow!("work topic consumer is gone"))
    }
}

// -- JetStream ----------------------------------------------------------------

pub struct JetStreamTopic {
    js: async_nats::jetstream::Context,
    stream: async_nats::jetstream::stream::Stream,
    subject: String,
}

impl JetStreamTopic {
    /// Make sure the backing stream exists and return a publisher over it.
    pub async fn connect(
        js: async_nats::jetstream::Context,
        stream_name: &str,
        subject: &str,
    ) -> anyhow::Result<Self> {
        let stream = js
            .get_or_create_stream(async_nats::jetstream::stream::Config {
                name: stream_name.to_owned(),
                subjects: vec![subject.to_owned()],
                ..Default::default()
            })
            .await?;
        tracing::info!(stream = stream_name, subject, "work topic ready");
        Ok(Self { js, stream, subject: subject.to_owned() })
    }

    /// Durable pull consumer for the dispatcher, with explicit acks and
    /// the outstanding-message cap as its ack-pending bound.
    pub async fn pull_consumer(
        &self,
        durable: &str,
        max_ack_pending: i64,
    ) -> anyhow::Result<
        async_nats::jetstream::consumer::Consumer<async_nats::jetstream::consumer::pull::Config>,
    > {
        let consumer = self
            .stream
            .get_or_create_consumer(
                durable,
                async_nats::jetstream::consumer::pull::Config {
                    durable_name: Some(durable.to_owned()),
                    ack_policy: async_nats::jetstream::consumer::AckPolicy::Explicit,
                    max_ack_pending,
                    ..Default::default()
                },
            )
            .await?;
        Ok(consumer)
    }
}

#[async_trait]
impl WorkTopic for JetStreamTopic {
    async fn publish(&self, msg: &WorkMessage) -> anyhow::Result<()> {
        let mut headers = async_nats::HeaderMap::new();
        for (name, value) in msg.attributes() {
            headers.insert(name, value.as_str());
        }
        let payload = serde_json::to_vec(msg)?;
        let ack = self
            .js
            .publish_with_headers(self.subject.clone(), headers, payload.into())
            .await?;
        // The batch is only committed once the broker acknowledged every
        // message, so the ack is awaited here.
        ack.await?;
        Ok(())
    }
}
