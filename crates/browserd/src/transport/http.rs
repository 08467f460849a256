// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP handlers for sessions and agents.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::agent::{AgentError, RunRequest};
use crate::error::ApiError;
use crate::registry::{RegistryError, SessionInfo};
use crate::transport::AppState;

// -- Request/Response types ---------------------------------------------------

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub sessions: usize,
}

#[derive(Debug, Serialize)]
pub struct SessionListResponse {
    pub sessions: Vec<SessionInfo>,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct AgentCreateRequest {
    pub task: String,
    pub session_id: String,
    #[serde(default)]
    pub request_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct AgentCreateResponse {
    pub message: String,
    pub session_id: String,
    pub request_id: String,
}

#[derive(Debug, Serialize)]
pub struct AgentStatusResponse {
    pub session_id: String,
    pub status: &'static str,
}

// -- Helpers ------------------------------------------------------------------

fn registry_error_response(err: RegistryError) -> axum::response::Response {
    let api = match &err {
        RegistryError::PoolExhausted => ApiError::PoolExhausted,
        RegistryError::AlreadyInUse => ApiError::AlreadyInUse,
        RegistryError::NotFound => ApiError::SessionNotFound,
        RegistryError::Busy(_) => ApiError::SessionBusy,
        RegistryError::NoBrowser => ApiError::NoBrowser,
        RegistryError::NoAgent => ApiError::NoAgent,
        RegistryError::AgentActive => ApiError::SessionBusy,
        RegistryError::Startup(_) => ApiError::StartupFailed,
    };
    api.to_http_response(err.to_string()).into_response()
}

// -- Handlers -----------------------------------------------------------------

/// `GET /health`
pub async fn health(State(s): State<Arc<AppState>>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "running".to_owned(),
        sessions: s.registry.session_count().await,
    })
}

/// `POST /sessions` — allocate a slot and bring up the remote-desktop chain.
pub async fn create_session(State(s): State<Arc<AppState>>) -> impl IntoResponse {
    match s.registry.create().await {
        Ok(info) => Json(info).into_response(),
        Err(e) => registry_error_response(e),
    }
}

/// `DELETE /sessions/{id}`
pub async fn delete_session(
    State(s): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match s.registry.delete(&id).await {
        Ok(()) => Json(MessageResponse { message: format!("Session {id} deleted successfully") })
            .into_response(),
        Err(e) => registry_error_response(e),
    }
}

/// `GET /sessions`
pub async fn list_sessions(State(s): State<Arc<AppState>>) -> impl IntoResponse {
    Json(SessionListResponse { sessions: s.registry.list().await })
}

/// `POST /agents` — run an agent against a session. Blocks until the agent
/// terminates; lifecycle operations go through `/agents/{id}/…`.
pub async fn create_agent(
    State(s): State<Arc<AppState>>,
    Json(req): Json<AgentCreateRequest>,
) -> impl IntoResponse {
    let Some(request_id) = req.request_id.filter(|r| !r.is_empty()) else {
        return ApiError::BadRequest.to_http_response("request_id is required").into_response();
    };

    let run = RunRequest {
        session_id: req.session_id.clone(),
        request_id: request_id.clone(),
        task: req.task,
    };
    match s.runner.run(run).await {
        Ok(()) => Json(AgentCreateResponse {
            message: "Agent completed successfully".to_owned(),
            session_id: req.session_id,
            request_id,
        })
        .into_response(),
        Err(e) => {
            let api = match &e {
                AgentError::Config(_) => ApiError::Internal,
                AgentError::InvalidSession => ApiError::InvalidSession,
                AgentError::NoBrowser => ApiError::NoBrowser,
                AgentError::AgentActive => ApiError::SessionBusy,
                AgentError::Failed(_) => ApiError::AgentFailed,
            };
            api.to_http_response(e.to_string()).into_response()
        }
    }
}

/// `GET /agents/{id}/stop` — cooperative stop.
pub async fn stop_agent(
    State(s): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match agent_for(&s, &id).await {
        Ok(agent) => {
            agent.stop();
            Json(MessageResponse { message: format!("Agent for session {id} stopped successfully") })
                .into_response()
        }
        Err(resp) => resp,
    }
}

/// `GET /agents/{id}/pause`
pub async fn pause_agent(
    State(s): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match agent_for(&s, &id).await {
        Ok(agent) => {
            agent.pause();
            s.registry.mark_agent_paused(&id, true).await;
            Json(MessageResponse { message: format!("Agent for session {id} paused successfully") })
                .into_response()
        }
        Err(resp) => resp,
    }
}

/// `GET /agents/{id}/resume`
pub async fn resume_agent(
    State(s): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match agent_for(&s, &id).await {
        Ok(agent) => {
            agent.resume();
            s.registry.mark_agent_paused(&id, false).await;
            Json(MessageResponse {
                message: format!("Agent for session {id} resumed successfully"),
            })
            .into_response()
        }
        Err(resp) => resp,
    }
}

/// `GET /agents/{id}/status`
pub async fn agent_status(
    State(s): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match agent_for(&s, &id).await {
        Ok(agent) => Json(AgentStatusResponse {
            session_id: id,
            status: agent.phase().as_str(),
        })
        .into_response(),
        Err(resp) => resp,
    }
}

/// Session-then-agent lookup: an unknown session is a 400 (invalid id),
/// a session without a live agent is a 404.
async fn agent_for(
    state: &AppState,
    id: &str,
) -> Result<Arc<crate::agent::AgentHandle>, axum::response::Response> {
    match state.registry.agent(id).await {
        Ok(agent) => Ok(agent),
        Err(RegistryError::NotFound) => Err(ApiError::InvalidSession
            .to_http_response("Invalid or inactive session ID")
            .into_response()),
        Err(RegistryError::NoAgent) => {
            Err(ApiError::NoAgent.to_http_response("Agent not found").into_response())
        }
        Err(other) => Err(registry_error_response(other)),
    }
}

#[cfg(test)]
#[path = "http_tests.rs"]
mod tests;
