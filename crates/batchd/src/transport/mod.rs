// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP transport: batch intake, dashboards, and the SSE log relay.

pub mod http;
pub mod sse;

use std::sync::Arc;
use std::time::Duration;

use axum::routing::{get, post, put};
use axum::Router;
use tower_http::cors::CorsLayer;

use crate::ingest::BatchIngestor;
use crate::progress::ProgressStore;
use crate::relay::LogBroker;

/// Shared handler state.
pub struct AppState {
    pub ingestor: Arc<BatchIngestor>,
    pub progress: Arc<dyn ProgressStore>,
    pub relay: Arc<dyn LogBroker>,
    pub sse_block: Duration,
}

/// Build the axum `Router` with all batchd routes.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(http::health))
        // Batch intake and status
        .route("/prior-auths", post(http::ingest_batch))
        .route("/prior-auths/stats", get(http::dashboard_stats))
        .route("/prior-auths/requests", get(http::list_requests))
        .route("/prior-auths/requests/{id}/status", put(http::update_request_status))
        .route("/prior-auths/requests/{id}/actions", post(http::record_action))
        .route("/prior-auths/actions/{action_id}/complete", post(http::complete_action))
        .route("/prior-auths/{batch_id}", get(http::batch_status))
        // Log relay
        .route("/stream-logs/request/{request_id}", get(sse::stream_request_logs))
        .route("/logs/{request_id}", post(http::publish_log))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
