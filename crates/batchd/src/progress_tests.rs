// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use serde_json::json;

use super::{MemoryProgressStore, ProgressStore};
use crate::model::{ActionStatus, Batch, BatchStatus, ManualAction, RequestRecord, RequestStatus};
use crate::time::epoch_ms;

fn request(id: &str, batch: &str, seq: u32) -> RequestRecord {
    RequestRecord {
        request_id: id.to_owned(),
        batch_id: batch.to_owned(),
        sequence_no: seq,
        vendor: "Evicore".to_owned(),
        patient_name: Some("Ada Lovelace".to_owned()),
        payload: json!({}),
        created_at: epoch_ms(),
    }
}

fn action(id: &str, request: &str) -> ManualAction {
    ManualAction {
        action_id: id.to_owned(),
        request_id: request.to_owned(),
        action_type: "MFA".to_owned(),
        action_status: ActionStatus::Pending,
        requested_at: epoch_ms(),
        actioned_at: None,
        metadata: None,
    }
}

#[tokio::test]
async fn upsert_overwrites_status_and_remarks() -> anyhow::Result<()> {
    let store = MemoryProgressStore::new();
    store.insert_request(request("r-1", "b-1", 1)).await?;

    let row = store.upsert_progress("r-1", RequestStatus::Created, None).await?;
    assert_eq!(row.status, RequestStatus::Created);

    let row = store
        .upsert_progress("r-1", RequestStatus::Failed, Some("browser crashed".into()))
        .await?;
    assert_eq!(row.status, RequestStatus::Failed);
    assert_eq!(row.remarks.as_deref(), Some("browser crashed"));

    let fetched = store.get_progress("r-1").await?.ok_or_else(|| anyhow::anyhow!("missing"))?;
    assert_eq!(fetched.status, RequestStatus::Failed);
    Ok(())
}

#[tokio::test]
async fn list_recent_filters_and_joins() -> anyhow::Result<()> {
    let store = MemoryProgressStore::new();
    store.insert_request(request("r-1", "b-1", 1)).await?;
    store.insert_request(request("r-2", "b-1", 2)).await?;
    store.upsert_progress("r-1", RequestStatus::InProgress, None).await?;
    store.upsert_progress("r-2", RequestStatus::Completed, None).await?;
    store.record_manual_action(action("a-1", "r-1")).await?;

    let rows = store.list_recent(None, 10).await?;
    assert_eq!(rows.len(), 2);

    let rows = store.list_recent(Some("in_progress".to_owned()), 10).await?;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].progress.request_id, "r-1");
    assert_eq!(rows[0].pending_actions, 1);
    let joined = rows[0].request.as_ref().ok_or_else(|| anyhow::anyhow!("no request"))?;
    assert_eq!(joined.vendor, "Evicore");

    let rows = store.list_recent(None, 1).await?;
    assert_eq!(rows.len(), 1);
    Ok(())
}

#[tokio::test]
async fn stats_aggregate_by_mapped_status() -> anyhow::Result<()> {
    let store = MemoryProgressStore::new();
    for (id, status) in [
        ("r-1", RequestStatus::Created),
        ("r-2", RequestStatus::InProgress),
        ("r-3", RequestStatus::Completed),
        ("r-4", RequestStatus::Failed),
        ("r-5", RequestStatus::UserActionRequired),
    ] {
        store.upsert_progress(id, status, None).await?;
    }

    let stats = store.aggregate_stats(7).await?;
    assert_eq!(stats.total_requests, 5);
    // created→queued and in_progress→running both count as pending.
    assert_eq!(stats.pending_requests, 2);
    assert_eq!(stats.completed_requests, 1);
    assert_eq!(stats.failed_requests, 1);
    assert_eq!(stats.user_action_required, 1);
    assert!((stats.success_rate - 20.0).abs() < f64::EPSILON);
    Ok(())
}

#[tokio::test]
async fn batch_status_walks_publish_lifecycle() -> anyhow::Result<()> {
    let store = MemoryProgressStore::new();
    store
        .insert_batch(Batch {
            batch_id: "b-1".to_owned(),
            created_at: epoch_ms(),
            request_count: 2,
            vendor_counts: [("Evicore".to_owned(), 2u64)].into_iter().collect(),
            status: BatchStatus::PendingPublish,
            committed_at: None,
        })
        .await?;

    store.set_batch_status("b-1", BatchStatus::Published).await?;
    let batch = store.get_batch("b-1").await?.ok_or_else(|| anyhow::anyhow!("missing"))?;
    assert_eq!(batch.status, BatchStatus::Published);

    assert!(store.set_batch_status("b-404", BatchStatus::Published).await.is_err());
    Ok(())
}

#[tokio::test]
async fn manual_actions_complete_once() -> anyhow::Result<()> {
    let store = MemoryProgressStore::new();
    store.record_manual_action(action("a-1", "r-1")).await?;

    let done = store
        .mark_action_completed("a-1", Some("otp entered".to_owned()))
        .await?
        .ok_or_else(|| anyhow::anyhow!("missing action"))?;
    assert_eq!(done.action_status, ActionStatus::Completed);
    assert!(done.actioned_at.is_some());
    assert_eq!(done.metadata.as_deref(), Some("otp entered"));

    assert!(store.mark_action_completed("a-404", None).await?.is_none());
    Ok(())
}
