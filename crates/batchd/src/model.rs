// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Batch, request, and progress data model plus the wire message carried
//! on the work topic.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Attribute stamped on every work message.
pub const AGENT_TYPE: &str = "prior_auth";

/// Vendors normalized at ingest; anything else records as UNKNOWN.
pub const KNOWN_VENDORS: &[&str] = &["Evicore", "Cohere", "Availity", "Carelon"];

pub const UNKNOWN_VENDOR: &str = "UNKNOWN";

// -- Statuses -----------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Created,
    Queued,
    InProgress,
    UserActionRequired,
    Completed,
    Failed,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Queued => "queued",
            Self::InProgress => "in_progress",
            Self::UserActionRequired => "user_action_required",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "created" => Some(Self::Created),
            "queued" => Some(Self::Queued),
            "in_progress" | "processing" => Some(Self::InProgress),
            "user_action_required" | "action_needed" => Some(Self::UserActionRequired),
            "completed" | "succeeded" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    PendingPublish,
    Published,
    PublishFailed,
    Committed,
}

impl BatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PendingPublish => "pending_publish",
            Self::Published => "published",
            Self::PublishFailed => "publish_failed",
            Self::Committed => "committed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionStatus {
    Pending,
    Completed,
}

/// Translate an internal status into its dashboard label. Applied only at
/// the HTTP read boundary; stores keep internal statuses.
pub fn map_status_for_ui(status: &str) -> String {
    match status.to_lowercase().as_str() {
        "in_progress" | "processing" => "running".to_owned(),
        "created" => "queued".to_owned(),
        "user_action_required" | "action_needed" => "manual-action".to_owned(),
        "completed" | "succeeded" => "completed".to_owned(),
        "failed" => "failed".to_owned(),
        other => other.to_owned(),
    }
}

// -- Records ------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Batch {
    pub batch_id: String,
    pub created_at: u64,
    pub request_count: u32,
    pub vendor_counts: BTreeMap<String, u64>,
    pub status: BatchStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub committed_at: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestRecord {
    pub request_id: String,
    pub batch_id: String,
    pub sequence_no: u32,
    pub vendor: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub patient_name: Option<String>,
    pub payload: serde_json::Value,
    pub created_at: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestProgress {
    pub request_id: String,
    pub status: RequestStatus,
    pub last_updated: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remarks: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManualAction {
    pub action_id: String,
    pub request_id: String,
    pub action_type: String,
    pub action_status: ActionStatus,
    pub requested_at: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actioned_at: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<String>,
}

// -- Work message -------------------------------------------------------------

/// Body of one message on the work topic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkMessage {
    pub batch_id: String,
    pub sequence_no: u32,
    pub request_id: String,
    pub total_count: u32,
    pub vendor: String,
    pub payload: serde_json::Value,
}

impl WorkMessage {
    /// Transport attributes riding next to the body.
    pub fn attributes(&self) -> Vec<(&'static str, String)> {
        vec![
            ("batch_id", self.batch_id.clone()),
            ("sequence_no", self.sequence_no.to_string()),
            ("total_count", self.total_count.to_string()),
            ("vendor", self.vendor.clone()),
            ("agent_type", AGENT_TYPE.to_owned()),
            ("req_id", self.request_id.clone()),
        ]
    }
}

// -- Vendor extraction --------------------------------------------------------

/// Extract and normalize the vendor from a request payload.
///
/// Lookup order: `vendorname` at the top level, then under the nested
/// `meta`/`details`/`info`/`request_info` objects.
pub fn extract_vendor(payload: &serde_json::Value) -> String {
    const FIELDS: &[&str] = &["vendorname"];
    const NESTED: &[&str] = &["meta", "details", "info", "request_info"];

    for field in FIELDS {
        if let Some(raw) = payload.get(field).and_then(|v| v.as_str()) {
            if !raw.trim().is_empty() {
                return normalize_vendor(raw);
            }
        }
    }
    for nested in NESTED {
        let Some(inner) = payload.get(nested).filter(|v| v.is_object()) else { continue };
        for field in FIELDS {
            if let Some(raw) = inner.get(field).and_then(|v| v.as_str()) {
                if !raw.trim().is_empty() {
                    return normalize_vendor(raw);
                }
            }
        }
    }
    UNKNOWN_VENDOR.to_owned()
}

fn normalize_vendor(raw: &str) -> String {
    let wanted = raw.trim().to_uppercase();
    KNOWN_VENDORS
        .iter()
        .find(|known| known.to_uppercase() == wanted)
        .map(|known| (*known).to_owned())
        .unwrap_or_else(|| UNKNOWN_VENDOR.to_owned())
}

/// Vendor histogram over a batch, in vendor order.
pub fn count_vendors(payloads: &[serde_json::Value]) -> BTreeMap<String, u64> {
    let mut counts = BTreeMap::new();
    for payload in payloads {
        *counts.entry(extract_vendor(payload)).or_insert(0) += 1;
    }
    counts
}

/// Patient display name assembled from the intake payload.
pub fn patient_name(payload: &serde_json::Value) -> Option<String> {
    let first = payload.get("patientfirstname").and_then(|v| v.as_str())?;
    let last = payload.get("patientlastname").and_then(|v| v.as_str())?;
    Some(format!("{first} {last}"))
}

#[cfg(test)]
#[path = "model_tests.rs"]
mod tests;
