// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;

use serde_json::json;

use super::{BatchIngestor, IngestError};
use crate::model::{BatchStatus, RequestStatus, WorkMessage};
use crate::progress::{MemoryProgressStore, ProgressStore};
use crate::topic::{MemoryTopic, WorkTopic};

fn ingestor() -> (
    BatchIngestor,
    Arc<MemoryProgressStore>,
    tokio::sync::mpsc::UnboundedReceiver<crate::topic::WorkDelivery>,
) {
    let progress = Arc::new(MemoryProgressStore::new());
    let (topic, rx) = MemoryTopic::channel();
    (
        BatchIngestor::new(Arc::clone(&progress) as Arc<dyn ProgressStore>, topic),
        progress,
        rx,
    )
}

#[tokio::test]
async fn empty_batch_is_rejected() {
    let (ingestor, _progress, _rx) = ingestor();
    assert!(matches!(ingestor.ingest(Vec::new()).await, Err(IngestError::EmptyBatch)));
}

#[tokio::test]
async fn ingest_assigns_sequences_and_publishes_in_order() -> anyhow::Result<()> {
    let (ingestor, progress, mut rx) = ingestor();

    let summary = ingestor
        .ingest(vec![
            json!({"vendorname": "Evicore", "patientfirstname": "Ada", "patientlastname": "Lovelace"}),
            json!({"vendorname": "Cohere", "patientfirstname": "Mary", "patientlastname": "Shelley"}),
        ])
        .await
        .map_err(|e| anyhow::anyhow!("{e}"))?;

    assert_eq!(summary.request_count, 2);
    assert_eq!(summary.vendor_counts.get("Evicore"), Some(&1));
    assert_eq!(summary.vendor_counts.get("Cohere"), Some(&1));

    // Exactly two messages, in input order, with distinct request ids.
    let first = rx.try_recv()?;
    let second = rx.try_recv()?;
    assert!(rx.try_recv().is_err());

    let first: WorkMessage = serde_json::from_slice(&first.payload)?;
    let second: WorkMessage = serde_json::from_slice(&second.payload)?;
    assert_eq!(first.sequence_no, 1);
    assert_eq!(second.sequence_no, 2);
    assert_eq!(first.total_count, 2);
    assert_eq!(first.batch_id, summary.batch_id);
    assert_ne!(first.request_id, second.request_id);
    assert_eq!(first.vendor, "Evicore");

    // Progress rows exist in Created for every returned request id.
    for request_id in [&first.request_id, &second.request_id] {
        let row = progress
            .get_progress(request_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("missing progress"))?;
        assert_eq!(row.status, RequestStatus::Created);
        let record = progress
            .get_request(request_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("missing request"))?;
        assert_eq!(record.batch_id, summary.batch_id);
    }

    // Batch committed as Published.
    let batch = progress
        .get_batch(&summary.batch_id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("missing batch"))?;
    assert_eq!(batch.status, BatchStatus::Published);
    assert_eq!(batch.request_count, 2);
    Ok(())
}

#[tokio::test]
async fn single_record_batches_publish_one_message() -> anyhow::Result<()> {
    let (ingestor, _progress, mut rx) = ingestor();
    let summary = ingestor
        .ingest(vec![json!({"vendorname": "Evicore"})])
        .await
        .map_err(|e| anyhow::anyhow!("{e}"))?;
    assert_eq!(summary.request_count, 1);

    let only: WorkMessage = serde_json::from_slice(&rx.try_recv()?.payload)?;
    assert_eq!(only.sequence_no, 1);
    assert_eq!(only.total_count, 1);
    assert!(rx.try_recv().is_err());
    Ok(())
}

#[tokio::test]
async fn publish_failure_marks_the_batch() -> anyhow::Result<()> {
    struct FailingTopic;

    #[async_trait::async_trait]
    impl WorkTopic for FailingTopic {
        async fn publish(&self, _msg: &WorkMessage) -> anyhow::Result<()> {
            anyhow::bail!("broker unreachable")
        }
    }

    let progress = Arc::new(MemoryProgressStore::new());
    let ingestor = BatchIngestor::new(
        Arc::clone(&progress) as Arc<dyn ProgressStore>,
        Arc::new(FailingTopic),
    );

    let err = ingestor
        .ingest(vec![json!({"vendorname": "Evicore"})])
        .await
        .err()
        .ok_or_else(|| anyhow::anyhow!("expected failure"))?;
    let batch_id = match err {
        IngestError::Publish { ref batch_id, .. } => batch_id.clone(),
        other => anyhow::bail!("expected Publish, got {other:?}"),
    };

    let batch =
        progress.get_batch(&batch_id).await?.ok_or_else(|| anyhow::anyhow!("missing batch"))?;
    assert_eq!(batch.status, BatchStatus::PublishFailed);
    Ok(())
}
