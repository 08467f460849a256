// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Batch ingestor: assign ids and sequence numbers, write request and
//! progress rows, then publish to the work topic in order. The batch is
//! committed only after the broker acked every message; published
//! messages are never rolled back (the consumer is idempotent).

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::model::{
    count_vendors, extract_vendor, patient_name, Batch, BatchStatus, RequestRecord, RequestStatus,
    WorkMessage,
};
use crate::progress::ProgressStore;
use crate::time::epoch_ms;
use crate::topic::WorkTopic;

#[derive(Debug)]
pub enum IngestError {
    EmptyBatch,
    Store(anyhow::Error),
    Publish { batch_id: String, source: anyhow::Error },
}

impl fmt::Display for IngestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyBatch => f.write_str("patient_records must not be empty"),
            Self::Store(e) => write!(f, "progress store error: {e}"),
            Self::Publish { batch_id, source } => {
                write!(f, "publish failed for batch {batch_id}: {source}")
            }
        }
    }
}

impl std::error::Error for IngestError {}

/// Ingest result surfaced to the operator.
#[derive(Debug, Clone)]
pub struct IngestSummary {
    pub batch_id: String,
    pub request_count: u32,
    pub vendor_counts: BTreeMap<String, u64>,
}

pub struct BatchIngestor {
    progress: Arc<dyn ProgressStore>,
    topic: Arc<dyn WorkTopic>,
}

impl BatchIngestor {
    pub fn new(progress: Arc<dyn ProgressStore>, topic: Arc<dyn WorkTopic>) -> Self {
        Self { progress, topic }
    }

    pub async fn ingest(&self, payloads: Vec<serde_json::Value>) -> Result<IngestSummary, IngestError> {
        if payloads.is_empty() {
            return Err(IngestError::EmptyBatch);
        }

        let batch_id = uuid::Uuid::new_v4().to_string();
        let total = payloads.len() as u32;
        let vendor_counts = count_vendors(&payloads);

        self.progress
            .insert_batch(Batch {
                batch_id: batch_id.clone(),
                created_at: epoch_ms(),
                request_count: total,
                vendor_counts: vendor_counts.clone(),
                status: BatchStatus::PendingPublish,
                committed_at: None,
            })
            .await
            .map_err(IngestError::Store)?;

        // Rows first, in input order; sequence numbers are 1-indexed.
        let mut messages = Vec::with_capacity(payloads.len());
        for (i, payload) in payloads.into_iter().enumerate() {
            let sequence_no = i as u32 + 1;
            let vendor = extract_vendor(&payload);
            let request_id = uuid::Uuid::new_v4().to_string();

            self.progress
                .insert_request(RequestRecord {
                    request_id: request_id.clone(),
                    batch_id: batch_id.clone(),
                    sequence_no,
                    vendor: vendor.clone(),
                    patient_name: patient_name(&payload),
                    payload: payload.clone(),
                    created_at: epoch_ms(),
                })
                .await
                .map_err(IngestError::Store)?;
            self.progress
                .upsert_progress(
                    &request_id,
                    RequestStatus::Created,
                    Some(format!("Request created in batch {batch_id}")),
                )
                .await
                .map_err(IngestError::Store)?;

            messages.push(WorkMessage {
                batch_id: batch_id.clone(),
                sequence_no,
                request_id,
                total_count: total,
                vendor,
                payload,
            });
        }

        // Sequential publishes keep batch order on the wire; each awaits
        // the broker ack before the next goes out.
        for msg in &messages {
            if let Err(e) = self.topic.publish(msg).await {
                if let Err(store_err) =
                    self.progress.set_batch_status(&batch_id, BatchStatus::PublishFailed).await
                {
                    tracing::warn!(batch_id = %batch_id, err = %store_err, "failed to record publish failure");
                }
                tracing::error!(batch_id = %batch_id, sequence_no = msg.sequence_no, err = %e, "publish failed");
                return Err(IngestError::Publish { batch_id, source: e });
            }
        }

        self.progress
            .set_batch_status(&batch_id, BatchStatus::Published)
            .await
            .map_err(IngestError::Store)?;

        tracing::info!(batch_id = %batch_id, request_count = total, "batch published");
        Ok(IngestSummary { batch_id, request_count: total, vendor_counts })
    }
}

#[cfg(test)]
#[path = "ingest_tests.rs"]
mod tests;
