// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Dispatch consumer: exactly-once planner effect over at-least-once
//! delivery, enforced with an inflight lock and a processed marker in the
//! dedup cache.

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::dedup::DedupCache;
use crate::topic::WorkDelivery;

pub struct ConsumerDeps {
    pub cache: Arc<dyn DedupCache>,
    pub http: reqwest::Client,
    pub processor_url: String,
    pub inflight_ttl: Duration,
    pub dedup_ttl: Duration,
    /// Nak planner failures for broker redelivery instead of acking them
    /// away (the source system's default is ack).
    pub nack_on_failure: bool,
}

/// What to do with a delivery after handling it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Malformed body; drop it.
    AckMalformed,
    /// Processed marker already present.
    AckDuplicate,
    /// Another worker holds the inflight lock.
    AckLocked,
    /// Planner accepted; marker written.
    AckSuccess,
    /// Planner refused or was unreachable; dropped per policy.
    AckFailure,
    /// Planner refused or was unreachable; redeliver.
    NackRetry,
}

impl Disposition {
    pub fn is_ack(&self) -> bool {
        !matches!(self, Self::NackRetry)
    }
}

/// Handle one delivery through the per-message state machine.
pub async fn handle_delivery(deps: &ConsumerDeps, req_id: &str, raw: &[u8]) -> Disposition {
    let Some(payload) = planner_payload(raw) else {
        tracing::error!(req_id, "bad JSON in delivery, ack to drop");
        return Disposition::AckMalformed;
    };

    // Fast-path dedupe: already processed → ack and skip.
    let processed_key = format!("processed:{req_id}");
    match deps.cache.exists(&processed_key).await {
        Ok(true) => {
            tracing::info!(req_id, "duplicate delivery (already processed), ack");
            return Disposition::AckDuplicate;
        }
        Ok(false) => {}
        Err(e) => tracing::warn!(req_id, err = %e, "processed lookup failed, continuing"),
    }

    // Claim the inflight lock so only one worker performs the side effect.
    let inflight_key = format!("inflight:{req_id}");
    match deps.cache.set_if_absent(&inflight_key, deps.inflight_ttl).await {
        Ok(true) => {}
        Ok(false) => {
            tracing::info!(req_id, "another worker holds the inflight lock, ack");
            return Disposition::AckLocked;
        }
        Err(e) => {
            tracing::warn!(req_id, err = %e, "inflight claim failed, ack for redelivery");
            return Disposition::AckLocked;
        }
    }

    let disposition = match call_planner(deps, &payload, req_id).await {
        Ok(status) if status.is_success() => {
            if let Err(e) = deps.cache.set(&processed_key, deps.dedup_ttl).await {
                tracing::warn!(req_id, err = %e, "failed to write processed marker");
            }
            tracing::info!(req_id, "planner success, processed + ack");
            Disposition::AckSuccess
        }
        Ok(status) => {
            tracing::warn!(req_id, %status, "planner non-success");
            if deps.nack_on_failure {
                Disposition::NackRetry
            } else {
                Disposition::AckFailure
            }
        }
        Err(e) => {
            tracing::error!(req_id, err = %e, "planner dispatch failed");
            if deps.nack_on_failure {
                Disposition::NackRetry
            } else {
                Disposition::AckFailure
            }
        }
    };

    // The lock is released on every exit from the side-effect section.
    if let Err(e) = deps.cache.delete(&inflight_key).await {
        tracing::warn!(req_id, err = %e, "failed to release inflight lock");
    }
    disposition
}

/// Decode a work message body into the planner payload
/// `{request_id, patient_data, batch_id}`. Tolerates a UTF-8 BOM.
pub(crate) fn planner_payload(raw: &[u8]) -> Option<serde_json::Value> {
    let raw = raw.strip_prefix(b"\xef\xbb\xbf").unwrap_or(raw);
    let text = std::str::from_utf8(raw).ok()?;
    let data: serde_json::Value = serde_json::from_str(text.trim()).ok()?;
    if !data.is_object() {
        return None;
    }
    Some(serde_json::json!({
        "request_id": data.get("request_id").cloned().unwrap_or(serde_json::Value::Null),
        "patient_data": data.get("payload").cloned().unwrap_or_else(|| serde_json::json!({})),
        "batch_id": data.get("batch_id").cloned().unwrap_or(serde_json::Value::Null),
    }))
}

async fn call_planner(
    deps: &ConsumerDeps,
    payload: &serde_json::Value,
    req_id: &str,
) -> anyhow::Result<reqwest::StatusCode> {
    let resp = deps.http.post(&deps.processor_url).json(payload).send().await?;
    let status = resp.status();
    tracing::info!(req_id, %status, "planner responded");
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        let preview: String = body.chars().take(500).collect();
        tracing::error!(req_id, %status, body = %preview, "planner error body");
    }
    Ok(status)
}

// -- Subscriber loops ---------------------------------------------------------

/// Long-running JetStream subscriber. Handlers run as tasks gated by the
/// outstanding-message semaphore so a slow planner never stalls the pull
/// loop's lease handling.
pub async fn run_jetstream(
    deps: Arc<ConsumerDeps>,
    consumer: async_nats::jetstream::consumer::Consumer<
        async_nats::jetstream::consumer::pull::Config,
    >,
    max_outstanding: usize,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let semaphore = Arc::new(Semaphore::new(max_outstanding));
    let mut messages = consumer.messages().await?;
    tracing::info!("dispatch consumer subscribed");

    loop {
        let msg = tokio::select! {
            _ = shutdown.cancelled() => break,
            msg = messages.next() => msg,
        };
        let Some(msg) = msg else { break };
        let msg = match msg {
            Ok(msg) => msg,
            Err(e) => {
                tracing::warn!(err = %e, "work subscription error");
                continue;
            }
        };

        let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else { break };
        let deps = Arc::clone(&deps);
        tokio::spawn(async move {
            let req_id = req_id_for(&msg);
            let disposition = handle_delivery(&deps, &req_id, &msg.payload).await;
            let result = if disposition.is_ack() {
                msg.ack().await
            } else {
                msg.ack_with(async_nats::jetstream::AckKind::Nak(None)).await
            };
            if let Err(e) = result {
                tracing::warn!(req_id = %req_id, err = %e, "ack failed");
            }
            drop(permit);
        });
    }
    Ok(())
}

/// In-process subscriber for the memory topic. There is no redelivery, so
/// dispositions are advisory.
pub async fn run_memory(
    deps: Arc<ConsumerDeps>,
    mut rx: tokio::sync::mpsc::UnboundedReceiver<WorkDelivery>,
    max_outstanding: usize,
    shutdown: CancellationToken,
) {
    let semaphore = Arc::new(Semaphore::new(max_outstanding));
    tracing::info!("in-process dispatch consumer running");

    loop {
        let delivery = tokio::select! {
            _ = shutdown.cancelled() => break,
            delivery = rx.recv() => delivery,
        };
        let Some(delivery) = delivery else { break };

        let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else { break };
        let deps = Arc::clone(&deps);
        tokio::spawn(async move {
            let _ = handle_delivery(&deps, &delivery.req_id, &delivery.payload).await;
            drop(permit);
        });
    }
}

/// Publisher-provided `req_id` attribute, else the broker's message id.
fn req_id_for(msg: &async_nats::jetstream::Message) -> String {
    if let Some(req_id) = msg.headers.as_ref().and_then(|h| h.get("req_id")) {
        return req_id.as_str().to_owned();
    }
    msg.info()
        .map(|info| info.stream_sequence.to_string())
        .unwrap_or_else(|_| uuid::Uuid::new_v4().to_string())
}

#[cfg(test)]
#[path = "consumer_tests.rs"]
mod tests;
