// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Server-Sent-Events endpoint over the log relay. Each client gets its
//! own replay cursor; the blocking reads run on a separate task so the
//! response stream never starves the scheduler.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::response::sse::{Event, Sse};
use axum::response::IntoResponse;
use futures_util::StreamExt;
use serde_json::json;
use tokio_stream::wrappers::ReceiverStream;

use crate::error::ApiError;
use crate::relay::{LogCursor, LogRecord};
use crate::time::{epoch_ms, iso8601_now};
use crate::transport::AppState;

/// `GET /stream-logs/request/{request_id}`
pub async fn stream_request_logs(
    State(s): State<Arc<AppState>>,
    Path(request_id): Path<String>,
) -> impl IntoResponse {
    // Replay starts at the beginning; reconnecting clients may see
    // duplicates, which the contract allows.
    let cursor = match s.relay.tail(&request_id, 0).await {
        Ok(cursor) => cursor,
        Err(e) => {
            return ApiError::BrokerUnavailable
                .to_http_response(format!("Log broker unavailable: {e}"))
                .into_response()
        }
    };
    let stream_key = s.relay.stream_key(&request_id);

    let (tx, rx) = tokio::sync::mpsc::channel::<String>(64);
    tokio::spawn(stream_events(cursor, tx, request_id, stream_key, s.sse_block));

    Sse::new(
        ReceiverStream::new(rx).map(|data| Ok::<_, Infallible>(Event::default().data(data))),
    )
    .into_response()
}

/// Pump one client: connected, then log/heartbeat events until the client
/// goes away or the stream errors.
pub(crate) async fn stream_events(
    mut cursor: Box<dyn LogCursor>,
    tx: tokio::sync::mpsc::Sender<String>,
    request_id: String,
    stream_key: String,
    block: Duration,
) {
    let connected = json!({
        "type": "connected",
        "request_id": request_id,
        "message": format!("Connected to logs for request {request_id}"),
        "timestamp": iso8601_now(),
    });
    if tx.send(connected.to_string()).await.is_err() {
        return;
    }

    loop {
        match cursor.next_batch(block).await {
            Ok(records) if !records.is_empty() => {
                for record in records {
                    let event = log_event(&record, &request_id, &stream_key);
                    if tx.send(event.to_string()).await.is_err() {
                        tracing::debug!(request_id = %request_id, "sse client disconnected");
                        return;
                    }
                }
            }
            Ok(_) => {
                let heartbeat = json!({"type": "heartbeat", "timestamp": iso8601_now()});
                if tx.send(heartbeat.to_string()).await.is_err() {
                    tracing::debug!(request_id, "sse client disconnected");
                    return;
                }
            }
            Err(e) => {
                let error = json!({
                    "type": "error",
                    "message": format!("Stream error: {e}"),
                    "timestamp": iso8601_now(),
                });
                let _ = tx.send(error.to_string()).await;
                return;
            }
        }
    }
}

/// Wrap one stream record in the SSE log envelope. Structured records map
/// field-by-field; plain text gets the text envelope.
pub(crate) fn log_event(
    record: &LogRecord,
    request_id: &str,
    stream_key: &str,
) -> serde_json::Value {
    let data = match serde_json::from_str::<serde_json::Value>(&record.raw) {
        Ok(v) if v.is_object() => json!({
            "level": v.get("level").and_then(|x| x.as_str()).unwrap_or("INFO"),
            "message": v.get("msg").cloned().unwrap_or_else(|| json!(record.raw)),
            "source": v.get("agent_name").and_then(|x| x.as_str()).unwrap_or("browser-agent"),
            "request_id": v.get("request_id").and_then(|x| x.as_str()).unwrap_or(request_id),
            "timestamp": v.get("timestamp").cloned().unwrap_or_else(|| json!(epoch_ms() / 1000)),
            "log_source": v.get("source").and_then(|x| x.as_str()).unwrap_or("logger"),
        }),
        _ => json!({
            "level": "INFO",
            "message": record.raw,
            "source": "browser-agent",
            "request_id": request_id,
            "timestamp": epoch_ms() / 1000,
            "log_source": "text",
        }),
    };
    json!({
        "type": "log",
        "data": data,
        "stream_key": stream_key,
        "message_id": record.id.to_string(),
    })
}

#[cfg(test)]
#[path = "sse_tests.rs"]
mod tests;
