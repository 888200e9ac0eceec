//! Candidates, delivery records and audit entries.
//!
//! Candidates are ephemeral: they are produced by a discovery call and consumed
//! within the same run cycle. Delivery records and audit entries are persisted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

use super::types::{CandidateId, JobId, Platform};

/// Number of characters kept in a message preview.
const PREVIEW_CHARS: usize = 150;

/// A prospective recipient discovered on a platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    /// Platform identity used for dedup.
    pub id: CandidateId,
    /// Handle used to address the recipient.
    pub username: String,
    /// Human-readable name, if the platform exposes one.
    #[serde(default)]
    pub display_name: Option<String>,
    /// Platform metadata (karma, follower count, subreddit, ...).
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
}

impl Candidate {
    /// Create a candidate whose id is its username.
    pub fn new(username: impl Into<String>) -> Self {
        let username = username.into();
        Self {
            id: CandidateId::new(username.clone()),
            username,
            display_name: None,
            metadata: BTreeMap::new(),
        }
    }

    /// Set the display name.
    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    /// Attach a metadata field.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Resolve a template field for this candidate.
    ///
    /// `username`, `name` and `display_name` are always known; `name` falls
    /// back to the username. Any metadata key is also a field. Null metadata
    /// values do not resolve.
    pub fn field(&self, key: &str, platform: Platform) -> Option<String> {
        match key {
            "username" => Some(self.username.clone()),
            "name" => Some(
                self.display_name
                    .clone()
                    .unwrap_or_else(|| self.username.clone()),
            ),
            "display_name" => self.display_name.clone(),
            "platform" => Some(platform.to_string()),
            _ => match self.metadata.get(key)? {
                Value::Null => None,
                Value::String(s) => Some(s.clone()),
                other => Some(other.to_string()),
            },
        }
    }
}

/// Result of a delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryOutcome {
    /// The platform accepted the message.
    Delivered,
    /// The platform refused or the call failed.
    Failed { reason: String },
}

impl DeliveryOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, DeliveryOutcome::Delivered)
    }
}

/// Dedup and audit record for one delivery attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryRecord {
    pub id: Uuid,
    pub job_id: JobId,
    pub candidate_id: CandidateId,
    pub timestamp: DateTime<Utc>,
    pub outcome: DeliveryOutcome,
    /// Leading part of the message that was sent.
    pub message_preview: Option<String>,
}

impl DeliveryRecord {
    /// Record a successful delivery.
    pub fn delivered(job_id: JobId, candidate_id: CandidateId, message: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            job_id,
            candidate_id,
            timestamp: Utc::now(),
            outcome: DeliveryOutcome::Delivered,
            message_preview: Some(preview(message)),
        }
    }

    /// Record a failed delivery.
    pub fn failed(job_id: JobId, candidate_id: CandidateId, reason: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            job_id,
            candidate_id,
            timestamp: Utc::now(),
            outcome: DeliveryOutcome::Failed {
                reason: reason.into(),
            },
            message_preview: None,
        }
    }
}

/// Kind of an audit entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditKind {
    SearchStart,
    SearchComplete,
    DiscoveryFailed,
    SendSuccess,
    SendFail,
    RenderFailed,
    ComplianceRejected,
    QuotaReset,
    QuotaExhausted,
    StatusChanged,
    InvariantViolation,
}

impl AuditKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditKind::SearchStart => "search_start",
            AuditKind::SearchComplete => "search_complete",
            AuditKind::DiscoveryFailed => "discovery_failed",
            AuditKind::SendSuccess => "send_success",
            AuditKind::SendFail => "send_fail",
            AuditKind::RenderFailed => "render_failed",
            AuditKind::ComplianceRejected => "compliance_rejected",
            AuditKind::QuotaReset => "quota_reset",
            AuditKind::QuotaExhausted => "quota_exhausted",
            AuditKind::StatusChanged => "status_changed",
            AuditKind::InvariantViolation => "invariant_violation",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "search_start" => AuditKind::SearchStart,
            "search_complete" => AuditKind::SearchComplete,
            "discovery_failed" => AuditKind::DiscoveryFailed,
            "send_success" => AuditKind::SendSuccess,
            "send_fail" => AuditKind::SendFail,
            "render_failed" => AuditKind::RenderFailed,
            "compliance_rejected" => AuditKind::ComplianceRejected,
            "quota_reset" => AuditKind::QuotaReset,
            "quota_exhausted" => AuditKind::QuotaExhausted,
            "status_changed" => AuditKind::StatusChanged,
            "invariant_violation" => AuditKind::InvariantViolation,
            _ => return None,
        })
    }
}

impl fmt::Display for AuditKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One line of a job's activity log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub job_id: JobId,
    pub timestamp: DateTime<Utc>,
    pub kind: AuditKind,
    pub candidate_id: Option<CandidateId>,
    pub detail: String,
}

impl AuditEntry {
    pub fn new(job_id: JobId, kind: AuditKind, detail: impl Into<String>) -> Self {
        Self {
            job_id,
            timestamp: Utc::now(),
            kind,
            candidate_id: None,
            detail: detail.into(),
        }
    }

    pub fn with_candidate(mut self, candidate_id: CandidateId) -> Self {
        self.candidate_id = Some(candidate_id);
        self
    }
}

fn preview(message: &str) -> String {
    if message.chars().count() <= PREVIEW_CHARS {
        return message.to_string();
    }
    let head: String = message.chars().take(PREVIEW_CHARS).collect();
    format!("{}...", head)
}
