// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use axum::routing::post;
use axum::{Json, Router};

use super::ToolSet;
use crate::agent::{AgentHandle, AgentPhase};
use crate::browser::{BrowserEvent, BrowserHandle, BrowserProfile};

fn http_client() -> reqwest::Client {
    crate::ensure_crypto();
    reqwest::Client::new()
}

fn browser() -> BrowserHandle {
    BrowserHandle::new(
        None,
        BrowserProfile {
            user_data_dir: "/tmp/browser_profiles/sess".into(),
            downloads_dir: "/tmp/browser_profiles/sess/downloads".into(),
            display_num: 101,
            extensions_dir: None,
        },
    )
}

#[tokio::test]
async fn upload_rejects_paths_outside_the_whitelist() {
    let tools = ToolSet::new(vec!["/app/tmp/doc.pdf".into()], None, http_client());
    let result = tools.upload_file(&browser(), 1, &PathBuf::from("/etc/passwd")).await;
    assert!(!result.ok);
    assert!(result.message.contains("is not available"));
}

#[tokio::test]
async fn upload_rejects_whitelisted_but_missing_files() {
    let tools = ToolSet::new(vec!["/nonexistent/doc.pdf".into()], None, http_client());
    let result = tools.upload_file(&browser(), 1, &PathBuf::from("/nonexistent/doc.pdf")).await;
    assert!(!result.ok);
    assert!(result.message.contains("does not exist"));
}

#[tokio::test]
async fn upload_dispatches_an_event_for_real_files() -> anyhow::Result<()> {
    let file = tempfile::NamedTempFile::new()?;
    let path = file.path().to_path_buf();
    let tools = ToolSet::new(vec![path.clone()], None, http_client());

    let browser = browser();
    let mut events = browser.subscribe();
    let result = tools.upload_file(&browser, 7, &path).await;
    assert!(result.ok, "unexpected failure: {}", result.message);

    match events.try_recv()? {
        BrowserEvent::UploadFile { index, path: event_path } => {
            assert_eq!(index, 7);
            assert_eq!(event_path, path);
        }
        other => anyhow::bail!("expected UploadFile, got {other:?}"),
    }
    Ok(())
}

#[tokio::test]
async fn hitl_without_webhook_still_pauses_but_reports_error() {
    let tools = ToolSet::new(Vec::new(), None, http_client());
    let handle = AgentHandle::new("sess-1");

    let result = tools.human_in_the_loop(&handle, "req-1", "sess-1").await;
    assert!(!result.ok);
    assert!(result.message.contains("HITL_WEBHOOK_URL"));
    // The pause itself is not rolled back; a human already got involved.
    assert_eq!(handle.phase(), AgentPhase::Paused);
}

#[tokio::test]
async fn hitl_posts_request_and_session_ids_to_the_webhook() -> anyhow::Result<()> {
    let hits = Arc::new(AtomicUsize::new(0));
    let seen = Arc::new(parking_lot::Mutex::new(serde_json::Value::Null));

    let app = {
        let hits = Arc::clone(&hits);
        let seen = Arc::clone(&seen);
        Router::new().route(
            "/hitl",
            post(move |Json(body): Json<serde_json::Value>| {
                let hits = Arc::clone(&hits);
                let seen = Arc::clone(&seen);
                async move {
                    hits.fetch_add(1, Ordering::SeqCst);
                    *seen.lock() = body;
                    Json(serde_json::json!({"ok": true}))
                }
            }),
        )
    };
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    let tools = ToolSet::new(
        Vec::new(),
        Some(format!("http://{addr}/hitl")),
        http_client(),
    );
    let handle = AgentHandle::new("sess-9");
    let result = tools.human_in_the_loop(&handle, "req-9", "sess-9").await;

    assert!(result.ok, "unexpected failure: {}", result.message);
    assert_eq!(hits.load(Ordering::SeqCst), 1);
    assert_eq!(handle.phase(), AgentPhase::Paused);
    let body = seen.lock().clone();
    assert_eq!(body["request_id"], "req-9");
    assert_eq!(body["session_id"], "sess-9");
    Ok(())
}
