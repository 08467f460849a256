// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP handlers for ingest, batch status, request progress, and manual
//! actions. Status names are mapped to dashboard labels here and only
//! here.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::ingest::IngestError;
use crate::model::{
    map_status_for_ui, ActionStatus, ManualAction, RequestStatus,
};
use crate::time::{epoch_ms, iso8601_from_ms};
use crate::transport::AppState;

// -- Request/Response types ---------------------------------------------------

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
}

#[derive(Debug, Deserialize)]
pub struct IngestRequest {
    #[serde(default)]
    pub patient_records: Vec<serde_json::Value>,
}

#[derive(Debug, Serialize)]
pub struct IngestResponse {
    pub batch_id: String,
    pub total_requests: u32,
    pub requests_per_payer: BTreeMap<String, u64>,
}

#[derive(Debug, Serialize)]
pub struct BatchStatusResponse {
    pub batch_id: String,
    pub status: &'static str,
    pub request_count: u32,
    pub published_count: u32,
    pub failed_count: u32,
    pub vendor_counts: BTreeMap<String, u64>,
    pub created_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub committed_at: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RequestSummary {
    pub request_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch_id: Option<String>,
    pub patient_name: String,
    pub payer_id: String,
    pub status: String,
    pub created_at: String,
    pub last_updated: String,
    pub user_actions_pending: usize,
}

#[derive(Debug, Deserialize)]
pub struct ListRequestsQuery {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct StatsQuery {
    #[serde(default)]
    pub days: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct StatusUpdateRequest {
    pub status: String,
    #[serde(default)]
    pub remarks: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ActionCreateRequest {
    pub action_type: String,
    #[serde(default)]
    pub metadata: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ActionCompleteRequest {
    #[serde(default)]
    pub metadata: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct PublishLogResponse {
    pub status: String,
    pub stream: String,
    pub message_id: u64,
}

// -- Handlers -----------------------------------------------------------------

/// `GET /health`
pub async fn health() -> impl IntoResponse {
    Json(HealthResponse { status: "running".to_owned() })
}

/// `POST /prior-auths` — ingest a batch of prior-auth requests.
pub async fn ingest_batch(
    State(s): State<Arc<AppState>>,
    Json(req): Json<IngestRequest>,
) -> impl IntoResponse {
    match s.ingestor.ingest(req.patient_records).await {
        Ok(summary) => Json(IngestResponse {
            batch_id: summary.batch_id,
            total_requests: summary.request_count,
            requests_per_payer: summary.vendor_counts,
        })
        .into_response(),
        Err(e @ IngestError::EmptyBatch) => {
            ApiError::EmptyBatch.to_http_response(e.to_string()).into_response()
        }
        Err(e @ IngestError::Publish { .. }) => {
            ApiError::PublishFailed.to_http_response(e.to_string()).into_response()
        }
        Err(e) => ApiError::Internal.to_http_response(e.to_string()).into_response(),
    }
}

/// `GET /prior-auths/{batch_id}`
pub async fn batch_status(
    State(s): State<Arc<AppState>>,
    Path(batch_id): Path<String>,
) -> impl IntoResponse {
    match s.progress.get_batch(&batch_id).await {
        Ok(Some(batch)) => {
            let failed = match batch.status {
                crate::model::BatchStatus::Published => 0,
                _ => batch.request_count,
            };
            Json(BatchStatusResponse {
                batch_id: batch.batch_id,
                status: batch.status.as_str(),
                request_count: batch.request_count,
                published_count: batch.request_count,
                failed_count: failed,
                vendor_counts: batch.vendor_counts,
                created_at: iso8601_from_ms(batch.created_at),
                committed_at: batch.committed_at.map(iso8601_from_ms),
            })
            .into_response()
        }
        Ok(None) => ApiError::NotFound
            .to_http_response(format!("Batch {batch_id} not found"))
            .into_response(),
        Err(e) => ApiError::Internal.to_http_response(e.to_string()).into_response(),
    }
}

/// `GET /prior-auths/requests` — recent requests with dashboard statuses.
pub async fn list_requests(
    State(s): State<Arc<AppState>>,
    Query(query): Query<ListRequestsQuery>,
) -> impl IntoResponse {
    let limit = query.limit.unwrap_or(20);
    match s.progress.list_recent(query.status, limit).await {
        Ok(rows) => {
            let list: Vec<RequestSummary> = rows
                .into_iter()
                .map(|row| {
                    let (batch_id, patient_name, payer_id, created_at) = match row.request {
                        Some(r) => (
                            Some(r.batch_id),
                            r.patient_name.unwrap_or_else(|| "Unknown".to_owned()),
                            r.vendor,
                            r.created_at,
                        ),
                        None => (
                            None,
                            "Unknown".to_owned(),
                            "Unknown".to_owned(),
                            row.progress.last_updated,
                        ),
                    };
                    RequestSummary {
                        request_id: row.progress.request_id.clone(),
                        batch_id,
                        patient_name,
                        payer_id,
                        status: map_status_for_ui(row.progress.status.as_str()),
                        created_at: iso8601_from_ms(created_at),
                        last_updated: iso8601_from_ms(row.progress.last_updated),
                        user_actions_pending: row.pending_actions,
                    }
                })
                .collect();
            Json(list).into_response()
        }
        Err(e) => ApiError::Internal.to_http_response(e.to_string()).into_response(),
    }
}

/// `PUT /prior-auths/requests/{id}/status`
pub async fn update_request_status(
    State(s): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<StatusUpdateRequest>,
) -> impl IntoResponse {
    let Some(status) = RequestStatus::parse(&req.status) else {
        return ApiError::BadRequest
            .to_http_response(format!("unknown status '{}'", req.status))
            .into_response();
    };

    let known = match s.progress.get_request(&id).await {
        Ok(Some(_)) => true,
        Ok(None) => matches!(s.progress.get_progress(&id).await, Ok(Some(_))),
        Err(e) => return ApiError::Internal.to_http_response(e.to_string()).into_response(),
    };
    if !known {
        return ApiError::NotFound
            .to_http_response(format!("Request {id} not found"))
            .into_response();
    }

    match s.progress.upsert_progress(&id, status, req.remarks).await {
        Ok(row) => Json(row).into_response(),
        Err(e) => ApiError::Internal.to_http_response(e.to_string()).into_response(),
    }
}

/// `GET /prior-auths/stats`
pub async fn dashboard_stats(
    State(s): State<Arc<AppState>>,
    Query(query): Query<StatsQuery>,
) -> impl IntoResponse {
    match s.progress.aggregate_stats(query.days.unwrap_or(7)).await {
        Ok(stats) => Json(stats).into_response(),
        Err(e) => ApiError::Internal.to_http_response(e.to_string()).into_response(),
    }
}

/// `POST /prior-auths/requests/{id}/actions` — record a manual action the
/// agent surfaced for this request.
pub async fn record_action(
    State(s): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<ActionCreateRequest>,
) -> impl IntoResponse {
    match s.progress.get_request(&id).await {
        Ok(Some(_)) => {}
        Ok(None) => {
            return ApiError::NotFound
                .to_http_response(format!("Request {id} not found"))
                .into_response()
        }
        Err(e) => return ApiError::Internal.to_http_response(e.to_string()).into_response(),
    }

    let action = ManualAction {
        action_id: uuid::Uuid::new_v4().to_string(),
        request_id: id,
        action_type: req.action_type,
        action_status: ActionStatus::Pending,
        requested_at: epoch_ms(),
        actioned_at: None,
        metadata: req.metadata,
    };
    match s.progress.record_manual_action(action.clone()).await {
        Ok(()) => Json(action).into_response(),
        Err(e) => ApiError::Internal.to_http_response(e.to_string()).into_response(),
    }
}

/// `POST /prior-auths/actions/{action_id}/complete`
pub async fn complete_action(
    State(s): State<Arc<AppState>>,
    Path(action_id): Path<String>,
    Json(req): Json<ActionCompleteRequest>,
) -> impl IntoResponse {
    match s.progress.mark_action_completed(&action_id, req.metadata).await {
        Ok(Some(action)) => Json(action).into_response(),
        Ok(None) => ApiError::NotFound
            .to_http_response(format!("Action {action_id} not found"))
            .into_response(),
        Err(e) => ApiError::Internal.to_http_response(e.to_string()).into_response(),
    }
}

/// `POST /logs/{request_id}` — append a record to a request's log stream.
pub async fn publish_log(
    State(s): State<Arc<AppState>>,
    Path(request_id): Path<String>,
    Json(body): Json<serde_json::Value>,
) -> impl IntoResponse {
    let raw = body.to_string();
    match s.relay.append(&request_id, &raw).await {
        Ok(id) => Json(PublishLogResponse {
            status: "success".to_owned(),
            stream: s.relay.stream_key(&request_id),
            message_id: id,
        })
        .into_response(),
        Err(e) => ApiError::BrokerUnavailable
            .to_http_response(format!("Failed to publish message: {e}"))
            .into_response(),
    }
}

#[cfg(test)]
#[path = "http_tests.rs"]
mod tests;
