// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;

use axum::http::StatusCode;
use axum_test::TestServer;

use crate::config::SessionPolicy;
use crate::test_support::{test_registry, test_runner, StubLoop};
use crate::transport::{build_router, AppState};

fn server(policy: SessionPolicy) -> anyhow::Result<(TestServer, Arc<AppState>)> {
    let (registry, _backend) = test_registry(policy);
    let runner = test_runner(Arc::clone(&registry), Arc::new(StubLoop { fail: false }), Some("key"));
    let state = Arc::new(AppState { registry, runner });
    Ok((TestServer::new(build_router(Arc::clone(&state)))?, state))
}

#[tokio::test]
async fn health_reports_running() -> anyhow::Result<()> {
    let (server, _state) = server(SessionPolicy::Single)?;
    let resp = server.get("/health").await;
    resp.assert_status(StatusCode::OK);
    let body: serde_json::Value = resp.json();
    assert_eq!(body["status"], "running");
    assert_eq!(body["sessions"], 0);
    Ok(())
}

#[tokio::test]
async fn session_lifecycle_over_http() -> anyhow::Result<()> {
    let (server, _state) = server(SessionPolicy::Single)?;

    let resp = server.post("/sessions").await;
    resp.assert_status(StatusCode::OK);
    let body: serde_json::Value = resp.json();
    let session_id =
        body["session_id"].as_str().ok_or_else(|| anyhow::anyhow!("no session_id"))?.to_owned();
    assert_eq!(body["vnc_port"], 6080);
    assert_eq!(body["web_port"], 5080);
    assert_eq!(body["display_num"], 101);
    let vnc_url = body["vnc_url"].as_str().ok_or_else(|| anyhow::anyhow!("no vnc_url"))?;
    assert!(vnc_url.ends_with(&format!("/sessions/{session_id}/vnc/vnc.html?autoconnect=1")));

    let resp = server.get("/sessions").await;
    let body: serde_json::Value = resp.json();
    assert_eq!(body["sessions"].as_array().map(Vec::len), Some(1));

    let resp = server.delete(&format!("/sessions/{session_id}")).await;
    resp.assert_status(StatusCode::OK);
    let body: serde_json::Value = resp.json();
    assert_eq!(body["message"], format!("Session {session_id} deleted successfully"));

    let resp = server.delete(&format!("/sessions/{session_id}")).await;
    resp.assert_status(StatusCode::NOT_FOUND);
    Ok(())
}

#[tokio::test]
async fn exhausted_pool_returns_503_with_exact_body() -> anyhow::Result<()> {
    let (server, _state) = server(SessionPolicy::FixedPool { size: 1 })?;

    server.post("/sessions").await.assert_status(StatusCode::OK);
    let resp = server.post("/sessions").await;
    resp.assert_status(StatusCode::SERVICE_UNAVAILABLE);
    let body: serde_json::Value = resp.json();
    assert_eq!(body, serde_json::json!({"error": "No free sessions available"}));
    Ok(())
}

#[tokio::test]
async fn second_single_session_is_refused() -> anyhow::Result<()> {
    let (server, _state) = server(SessionPolicy::Single)?;
    server.post("/sessions").await.assert_status(StatusCode::OK);
    let resp = server.post("/sessions").await;
    resp.assert_status(StatusCode::SERVICE_UNAVAILABLE);
    let body: serde_json::Value = resp.json();
    let message = body["error"].as_str().unwrap_or_default();
    assert!(message.contains("already in use"));
    Ok(())
}

#[tokio::test]
async fn agent_requires_request_id() -> anyhow::Result<()> {
    let (server, _state) = server(SessionPolicy::Single)?;
    let resp = server
        .post("/agents")
        .json(&serde_json::json!({"task": "fill form", "session_id": "sess"}))
        .await;
    resp.assert_status(StatusCode::BAD_REQUEST);
    let body: serde_json::Value = resp.json();
    assert_eq!(body["error"], "request_id is required");
    Ok(())
}

#[tokio::test]
async fn agent_run_completes_against_a_session() -> anyhow::Result<()> {
    let (server, _state) = server(SessionPolicy::Single)?;
    let resp = server.post("/sessions").await;
    let body: serde_json::Value = resp.json();
    let session_id =
        body["session_id"].as_str().ok_or_else(|| anyhow::anyhow!("no session_id"))?.to_owned();

    let resp = server
        .post("/agents")
        .json(&serde_json::json!({
            "task": "fill form",
            "session_id": session_id,
            "request_id": "req-1"
        }))
        .await;
    resp.assert_status(StatusCode::OK);
    let body: serde_json::Value = resp.json();
    assert_eq!(body["message"], "Agent completed successfully");
    assert_eq!(body["request_id"], "req-1");
    Ok(())
}

#[tokio::test]
async fn agent_ops_distinguish_bad_session_from_missing_agent() -> anyhow::Result<()> {
    let (server, _state) = server(SessionPolicy::Single)?;

    // Unknown session id → 400.
    let resp = server.get("/agents/ghost/stop").await;
    resp.assert_status(StatusCode::BAD_REQUEST);
    let body: serde_json::Value = resp.json();
    assert_eq!(body["error"], "Invalid or inactive session ID");

    // Known session, no agent bound → 404.
    let resp = server.post("/sessions").await;
    let body: serde_json::Value = resp.json();
    let session_id =
        body["session_id"].as_str().ok_or_else(|| anyhow::anyhow!("no session_id"))?.to_owned();
    let resp = server.get(&format!("/agents/{session_id}/status")).await;
    resp.assert_status(StatusCode::NOT_FOUND);
    let body: serde_json::Value = resp.json();
    assert_eq!(body["error"], "Agent not found");
    Ok(())
}
