// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP transport for the session supervisor.

pub mod http;

use std::sync::Arc;

use axum::routing::{delete, get, post};
use axum::Router;
use tower_http::cors::CorsLayer;

use crate::agent::AgentRunner;
use crate::registry::SessionRegistry;

/// Shared handler state.
pub struct AppState {
    pub registry: Arc<SessionRegistry>,
    pub runner: Arc<AgentRunner>,
}

/// Build the axum `Router` with all browserd routes.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(http::health))
        // Session lifecycle
        .route("/sessions", post(http::create_session).get(http::list_sessions))
        .route("/sessions/{id}", delete(http::delete_session))
        // Agent lifecycle
        .route("/agents", post(http::create_agent))
        .route("/agents/{id}/stop", get(http::stop_agent))
        .route("/agents/{id}/pause", get(http::pause_agent))
        .route("/agents/{id}/resume", get(http::resume_agent))
        .route("/agents/{id}/status", get(http::agent_status))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
