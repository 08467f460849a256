// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Progress store capability over batches, requests, progress rows, and
//! manual actions. The document store itself is an external collaborator;
//! this module fixes the interface and ships the in-memory implementation.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::Serialize;

use crate::model::{
    map_status_for_ui, ActionStatus, Batch, BatchStatus, ManualAction, RequestProgress,
    RequestRecord, RequestStatus,
};
use crate::time::epoch_ms;

/// One row of the recent-requests listing before presentation mapping.
pub struct ProgressRow {
    pub progress: RequestProgress,
    pub request: Option<RequestRecord>,
    pub pending_actions: usize,
}

/// Dashboard aggregates over a trailing window.
#[derive(Debug, Clone, Serialize)]
pub struct DashboardStats {
    pub total_requests: usize,
    pub pending_requests: usize,
    pub completed_requests: usize,
    pub failed_requests: usize,
    pub user_action_required: usize,
    pub success_rate: f64,
}

#[async_trait]
pub trait ProgressStore: Send + Sync {
    async fn insert_batch(&self, batch: Batch) -> anyhow::Result<()>;
    async fn set_batch_status(&self, batch_id: &str, status: BatchStatus) -> anyhow::Result<()>;
    async fn get_batch(&self, batch_id: &str) -> anyhow::Result<Option<Batch>>;

    async fn insert_request(&self, record: RequestRecord) -> anyhow::Result<()>;
    async fn get_request(&self, request_id: &str) -> anyhow::Result<Option<RequestRecord>>;

    async fn upsert_progress(
        &self,
        request_id: &str,
        status: RequestStatus,
        remarks: Option<String>,
    ) -> anyhow::Result<RequestProgress>;
    async fn get_progress(&self, request_id: &str) -> anyhow::Result<Option<RequestProgress>>;

    /// Most recently updated rows first, optionally filtered by internal
    /// status name.
    async fn list_recent(
        &self,
        status: Option<String>,
        limit: usize,
    ) -> anyhow::Result<Vec<ProgressRow>>;

    async fn aggregate_stats(&self, window_days: u64) -> anyhow::Result<DashboardStats>;

    async fn record_manual_action(&self, action: ManualAction) -> anyhow::Result<()>;
    async fn mark_action_completed(
        &self,
        action_id: &str,
        metadata: Option<String>,
    ) -> anyhow::Result<Option<ManualAction>>;
}

// -- In-memory store ----------------------------------------------------------

#[derive(Default)]
struct Inner {
    batches: HashMap<String, Batch>,
    requests: HashMap<String, RequestRecord>,
    progress: HashMap<String, RequestProgress>,
    actions: HashMap<String, ManualAction>,
}

#[derive(Default)]
pub struct MemoryProgressStore {
    inner: parking_lot::Mutex<Inner>,
}

impl MemoryProgressStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn pending_actions(inner: &Inner, request_id: &str) -> usize {
        inner
            .actions
            .values()
            .filter(|a| a.request_id == request_id && a.action_status == ActionStatus::Pending)
            .count()
    }
}

#[async_trait]
impl ProgressStore for MemoryProgressStore {
    async fn insert_batch(&self, batch: Batch) -> anyhow::Result<()> {
        self.inner.lock().batches.insert(batch.batch_id.clone(), batch);
        Ok(())
    }

    async fn set_batch_status(&self, batch_id: &str, status: BatchStatus) -> anyhow::Result<()> {
        let mut inner = self.inner.lock();
        match inner.batches.get_mut(batch_id) {
            Some(batch) => {
                batch.status = status;
                Ok(())
            }
            None => anyhow::bail!("unknown batch {batch_id}"),
        }
    }

    async fn get_batch(&self, batch_id: &str) -> anyhow::Result<Option<Batch>> {
        Ok(self.inner.lock().batches.get(batch_id).cloned())
    }

    async fn insert_request(&self, record: RequestRecord) -> anyhow::Result<()> {
        self.inner.lock().requests.insert(record.request_id.clone(), record);
        Ok(())
    }

    async fn get_request(&self, request_id: &str) -> anyhow::Result<Option<RequestRecord>> {
        Ok(self.inner.lock().requests.get(request_id).cloned())
    }

    async fn upsert_progress(
        &self,
        request_id: &str,
        status: RequestStatus,
        remarks: Option<String>,
    ) -> anyhow::Result<RequestProgress> {
        let row = RequestProgress {
            request_id: request_id.to_owned(),
            status,
            last_updated: epoch_ms(),
            remarks,
        };
        self.inner.lock().progress.insert(request_id.to_owned(), row.clone());
        Ok(row)
    }

    async fn get_progress(&self, request_id: &str) -> anyhow::Result<Option<RequestProgress>> {
        Ok(self.inner.lock().progress.get(request_id).cloned())
    }

    async fn list_recent(
        &self,
        status: Option<String>,
        limit: usize,
    ) -> anyhow::Result<Vec<ProgressRow>> {
        let inner = self.inner.lock();
        let mut rows: Vec<&RequestProgress> = inner
            .progress
            .values()
            .filter(|p| status.as_deref().is_none_or(|s| p.status.as_str() == s))
            .collect();
        rows.sort_by(|a, b| b.last_updated.cmp(&a.last_updated));

        Ok(rows
            .into_iter()
            .take(limit)
            .map(|p| ProgressRow {
                progress: p.clone(),
                request: inner.requests.get(&p.request_id).cloned(),
                pending_actions: Self::pending_actions(&inner, &p.request_id),
            })
            .collect())
    }

    async fn aggregate_stats(&self, window_days: u64) -> anyhow::Result<DashboardStats> {
        let inner = self.inner.lock();
        let cutoff = epoch_ms().saturating_sub(window_days * 86_400_000);

        let mut counts: HashMap<String, usize> = HashMap::new();
        let mut total = 0usize;
        for progress in inner.progress.values() {
            if progress.last_updated < cutoff {
                continue;
            }
            total += 1;
            *counts.entry(map_status_for_ui(progress.status.as_str())).or_insert(0) += 1;
        }

        let completed = counts.get("completed").copied().unwrap_or(0);
        let success_rate = if total > 0 {
            (completed as f64 / total as f64 * 10_000.0).round() / 100.0
        } else {
            0.0
        };
        Ok(DashboardStats {
            total_requests: total,
            pending_requests: counts.get("running").copied().unwrap_or(0)
                + counts.get("queued").copied().unwrap_or(0),
            completed_requests: completed,
            failed_requests: counts.get("failed").copied().unwrap_or(0),
            user_action_required: counts.get("manual-action").copied().unwrap_or(0),
            success_rate,
        })
    }

    async fn record_manual_action(&self, action: ManualAction) -> anyhow::Result<()> {
        self.inner.lock().actions.insert(action.action_id.clone(), action);
        Ok(())
    }

    async fn mark_action_completed(
        &self,
        action_id: &str,
        metadata: Option<String>,
    ) -> anyhow::Result<Option<ManualAction>> {
        let mut inner = self.inner.lock();
        Ok(inner.actions.get_mut(action_id).map(|action| {
            action.action_status = ActionStatus::Completed;
            action.actioned_at = Some(epoch_ms());
            if metadata.is_some() {
                action.metadata = metadata;
            }
            action.clone()
        }))
    }
}

#[cfg(test)]
#[path = "progress_tests.rs"]
mod tests;
