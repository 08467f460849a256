// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::routing::post;
use axum::{Json, Router};
use serde_json::json;

use super::{handle_delivery, planner_payload, ConsumerDeps, Disposition};
use crate::dedup::MemoryCache;

/// Local planner stub counting POSTs and capturing the last body.
struct Planner {
    pub url: String,
    pub hits: Arc<AtomicUsize>,
    pub last_body: Arc<parking_lot::Mutex<serde_json::Value>>,
}

async fn spawn_planner(status: u16) -> anyhow::Result<Planner> {
    let hits = Arc::new(AtomicUsize::new(0));
    let last_body = Arc::new(parking_lot::Mutex::new(serde_json::Value::Null));

    let app = {
        let hits = Arc::clone(&hits);
        let last_body = Arc::clone(&last_body);
        Router::new().route(
            "/api/planner-preauth",
            post(move |Json(body): Json<serde_json::Value>| {
                let hits = Arc::clone(&hits);
                let last_body = Arc::clone(&last_body);
                async move {
                    hits.fetch_add(1, Ordering::SeqCst);
                    *last_body.lock() = body;
                    (
                        axum::http::StatusCode::from_u16(status)
                            .unwrap_or(axum::http::StatusCode::OK),
                        "ok",
                    )
                }
            }),
        )
    };
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    Ok(Planner { url: format!("http://{addr}/api/planner-preauth"), hits, last_body })
}

fn deps(url: &str, nack: bool) -> ConsumerDeps {
    crate::ensure_crypto();
    ConsumerDeps {
        cache: Arc::new(MemoryCache::new()),
        http: reqwest::Client::new(),
        processor_url: url.to_owned(),
        inflight_ttl: Duration::from_secs(600),
        dedup_ttl: Duration::from_secs(86_400),
        nack_on_failure: nack,
    }
}

fn message(req_id: &str) -> Vec<u8> {
    json!({
        "batch_id": "b-1",
        "sequence_no": 1,
        "request_id": req_id,
        "total_count": 1,
        "vendor": "Evicore",
        "payload": {"patientfirstname": "Ada"},
    })
    .to_string()
    .into_bytes()
}

// ── decoding ──────────────────────────────────────────────────────────────

#[test]
fn payload_builds_planner_body_and_tolerates_bom() -> anyhow::Result<()> {
    let mut raw = b"\xef\xbb\xbf".to_vec();
    raw.extend_from_slice(&message("r-1"));
    let payload = planner_payload(&raw).ok_or_else(|| anyhow::anyhow!("no payload"))?;
    assert_eq!(payload["request_id"], "r-1");
    assert_eq!(payload["batch_id"], "b-1");
    assert_eq!(payload["patient_data"]["patientfirstname"], "Ada");
    Ok(())
}

#[test]
fn payload_rejects_garbage() {
    assert!(planner_payload(b"not json").is_none());
    assert!(planner_payload(b"[1,2,3]").is_none());
    assert!(planner_payload(b"").is_none());
}

// ── state machine ─────────────────────────────────────────────────────────

#[tokio::test]
async fn malformed_delivery_is_acked_and_dropped() -> anyhow::Result<()> {
    let planner = spawn_planner(200).await?;
    let deps = deps(&planner.url, false);

    let disposition = handle_delivery(&deps, "r-1", b"not json").await;
    assert_eq!(disposition, Disposition::AckMalformed);
    assert_eq!(planner.hits.load(Ordering::SeqCst), 0);
    Ok(())
}

#[tokio::test]
async fn duplicate_delivery_posts_the_planner_once() -> anyhow::Result<()> {
    let planner = spawn_planner(200).await?;
    let deps = deps(&planner.url, false);
    let raw = message("r-7");

    let first = handle_delivery(&deps, "r-7", &raw).await;
    assert_eq!(first, Disposition::AckSuccess);
    let second = handle_delivery(&deps, "r-7", &raw).await;
    assert_eq!(second, Disposition::AckDuplicate);

    assert_eq!(planner.hits.load(Ordering::SeqCst), 1);
    let body = planner.last_body.lock().clone();
    assert_eq!(body["request_id"], "r-7");
    assert_eq!(body["batch_id"], "b-1");
    Ok(())
}

#[tokio::test]
async fn held_inflight_lock_defers_to_the_other_worker() -> anyhow::Result<()> {
    let planner = spawn_planner(200).await?;
    let deps = deps(&planner.url, false);

    // Simulate another worker mid-flight.
    deps.cache.set_if_absent("inflight:r-3", Duration::from_secs(600)).await?;

    let disposition = handle_delivery(&deps, "r-3", &message("r-3")).await;
    assert_eq!(disposition, Disposition::AckLocked);
    assert_eq!(planner.hits.load(Ordering::SeqCst), 0);
    Ok(())
}

#[tokio::test]
async fn planner_failure_acks_by_default_without_processed_marker() -> anyhow::Result<()> {
    let planner = spawn_planner(500).await?;
    let deps = deps(&planner.url, false);

    let disposition = handle_delivery(&deps, "r-4", &message("r-4")).await;
    assert_eq!(disposition, Disposition::AckFailure);
    assert!(!deps.cache.exists("processed:r-4").await?);
    // The inflight lock was released, so a redelivery tries again.
    let disposition = handle_delivery(&deps, "r-4", &message("r-4")).await;
    assert_eq!(disposition, Disposition::AckFailure);
    assert_eq!(planner.hits.load(Ordering::SeqCst), 2);
    Ok(())
}

#[tokio::test]
async fn planner_failure_naks_when_configured() -> anyhow::Result<()> {
    let planner = spawn_planner(503).await?;
    let deps = deps(&planner.url, true);

    let disposition = handle_delivery(&deps, "r-5", &message("r-5")).await;
    assert_eq!(disposition, Disposition::NackRetry);
    assert!(!disposition.is_ack());
    Ok(())
}

#[tokio::test]
async fn unreachable_planner_is_a_failure_not_a_crash() -> anyhow::Result<()> {
    // Nothing listens on this port.
    let deps = deps("http://127.0.0.1:1/api/planner-preauth", false);
    let disposition = handle_delivery(&deps, "r-6", &message("r-6")).await;
    assert_eq!(disposition, Disposition::AckFailure);
    // Lock released on the error path too.
    assert!(deps.cache.set_if_absent("inflight:r-6", Duration::from_secs(1)).await?);
    Ok(())
}

#[tokio::test]
async fn success_after_marker_expiry_posts_again() -> anyhow::Result<()> {
    // At-least-once: once the processed marker lapses, a redelivery may
    // reach the planner a second time.
    let planner = spawn_planner(200).await?;
    let mut deps = deps(&planner.url, false);
    deps.dedup_ttl = Duration::from_millis(30);

    assert_eq!(handle_delivery(&deps, "r-8", &message("r-8")).await, Disposition::AckSuccess);
    tokio::time::sleep(Duration::from_millis(60)).await;
    assert_eq!(handle_delivery(&deps, "r-8", &message("r-8")).await, Disposition::AckSuccess);
    assert_eq!(planner.hits.load(Ordering::SeqCst), 2);
    Ok(())
}
