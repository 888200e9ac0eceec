//! Lifecycle events and event handling.
//!
//! Run cycles and operator commands emit [`Event`]s on an [`EventBus`].
//! Handlers turn them into log lines, audit entries or forward them elsewhere.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use crate::core::candidate::{AuditEntry, AuditKind};
use crate::core::job::{Actor, JobStatus};
use crate::core::types::{CandidateId, JobId, RunId};

/// Why a candidate was passed over without a delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The template had unresolved placeholders.
    Render,
    /// The compliance gate did not pass the message.
    Compliance,
}

/// Lifecycle events emitted by the scheduler.
#[derive(Debug, Clone)]
pub enum Event {
    /// A run cycle began discovery for a job.
    CycleStarted {
        job_id: JobId,
        run_id: RunId,
        keywords: String,
        timestamp: DateTime<Utc>,
    },

    /// Discovery returned candidates.
    DiscoveryCompleted {
        job_id: JobId,
        run_id: RunId,
        found: usize,
        timestamp: DateTime<Utc>,
    },

    /// Discovery failed.
    DiscoveryFailed {
        job_id: JobId,
        run_id: RunId,
        error: String,
        fatal: bool,
        retry_after: Option<DateTime<Utc>>,
        timestamp: DateTime<Utc>,
    },

    /// A message reached its recipient.
    MessageDelivered {
        job_id: JobId,
        candidate_id: CandidateId,
        timestamp: DateTime<Utc>,
    },

    /// A delivery attempt failed.
    DeliveryFailed {
        job_id: JobId,
        candidate_id: CandidateId,
        reason: String,
        fatal: bool,
        timestamp: DateTime<Utc>,
    },

    /// A candidate was skipped before delivery.
    CandidateSkipped {
        job_id: JobId,
        candidate_id: CandidateId,
        reason: SkipReason,
        detail: String,
        timestamp: DateTime<Utc>,
    },

    /// The daily counter was reset at a window boundary.
    QuotaReset {
        job_id: JobId,
        window_start: DateTime<Utc>,
        timestamp: DateTime<Utc>,
    },

    /// The job had no budget left for this window.
    QuotaExhausted {
        job_id: JobId,
        daily_limit: u32,
        timestamp: DateTime<Utc>,
    },

    /// A job's status changed.
    StatusChanged {
        job_id: JobId,
        from: JobStatus,
        to: JobStatus,
        actor: Actor,
        reason: Option<String>,
        timestamp: DateTime<Utc>,
    },

    /// An internal invariant was about to be broken and the change was refused.
    InvariantViolation {
        job_id: JobId,
        detail: String,
        timestamp: DateTime<Utc>,
    },

    /// A run cycle finished.
    CycleCompleted {
        job_id: JobId,
        run_id: RunId,
        delivered: u32,
        failed: u32,
        skipped: u32,
        duration: Duration,
        timestamp: DateTime<Utc>,
    },
}

impl Event {
    /// Get the timestamp of the event.
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Event::CycleStarted { timestamp, .. }
            | Event::DiscoveryCompleted { timestamp, .. }
            | Event::DiscoveryFailed { timestamp, .. }
            | Event::MessageDelivered { timestamp, .. }
            | Event::DeliveryFailed { timestamp, .. }
            | Event::CandidateSkipped { timestamp, .. }
            | Event::QuotaReset { timestamp, .. }
            | Event::QuotaExhausted { timestamp, .. }
            | Event::StatusChanged { timestamp, .. }
            | Event::InvariantViolation { timestamp, .. }
            | Event::CycleCompleted { timestamp, .. } => *timestamp,
        }
    }

    /// The job this event concerns.
    pub fn job_id(&self) -> &JobId {
        match self {
            Event::CycleStarted { job_id, .. }
            | Event::DiscoveryCompleted { job_id, .. }
            | Event::DiscoveryFailed { job_id, .. }
            | Event::MessageDelivered { job_id, .. }
            | Event::DeliveryFailed { job_id, .. }
            | Event::CandidateSkipped { job_id, .. }
            | Event::QuotaReset { job_id, .. }
            | Event::QuotaExhausted { job_id, .. }
            | Event::StatusChanged { job_id, .. }
            | Event::InvariantViolation { job_id, .. }
            | Event::CycleCompleted { job_id, .. } => job_id,
        }
    }

    /// Create a CycleStarted event.
    pub fn cycle_started(job_id: JobId, run_id: RunId, keywords: impl Into<String>) -> Self {
        Event::CycleStarted {
            job_id,
            run_id,
            keywords: keywords.into(),
            timestamp: Utc::now(),
        }
    }

    /// Create a DiscoveryCompleted event.
    pub fn discovery_completed(job_id: JobId, run_id: RunId, found: usize) -> Self {
        Event::DiscoveryCompleted {
            job_id,
            run_id,
            found,
            timestamp: Utc::now(),
        }
    }

    /// Create a MessageDelivered event.
    pub fn message_delivered(job_id: JobId, candidate_id: CandidateId) -> Self {
        Event::MessageDelivered {
            job_id,
            candidate_id,
            timestamp: Utc::now(),
        }
    }

    /// Create a CandidateSkipped event.
    pub fn candidate_skipped(
        job_id: JobId,
        candidate_id: CandidateId,
        reason: SkipReason,
        detail: impl Into<String>,
    ) -> Self {
        Event::CandidateSkipped {
            job_id,
            candidate_id,
            reason,
            detail: detail.into(),
            timestamp: Utc::now(),
        }
    }

    /// Create a StatusChanged event.
    pub fn status_changed(
        job_id: JobId,
        from: JobStatus,
        to: JobStatus,
        actor: Actor,
        reason: Option<String>,
    ) -> Self {
        Event::StatusChanged {
            job_id,
            from,
            to,
            actor,
            reason,
            timestamp: Utc::now(),
        }
    }

    /// Create an InvariantViolation event.
    pub fn invariant_violation(job_id: JobId, detail: impl Into<String>) -> Self {
        Event::InvariantViolation {
            job_id,
            detail: detail.into(),
            timestamp: Utc::now(),
        }
    }

    /// The audit log line for this event, if it has one.
    pub fn to_audit(&self) -> Option<AuditEntry> {
        let (kind, candidate, detail) = match self {
            Event::CycleStarted { keywords, .. } => {
                (AuditKind::SearchStart, None, format!("searching for '{}'", keywords))
            }
            Event::DiscoveryCompleted { found, .. } => (
                AuditKind::SearchComplete,
                None,
                format!("found {} candidates", found),
            ),
            Event::DiscoveryFailed { error, fatal, .. } => {
                let kind = if *fatal { "fatal" } else { "transient" };
                (AuditKind::DiscoveryFailed, None, format!("{}: {}", kind, error))
            }
            Event::MessageDelivered { candidate_id, .. } => (
                AuditKind::SendSuccess,
                Some(candidate_id),
                "message delivered".to_string(),
            ),
            Event::DeliveryFailed {
                candidate_id,
                reason,
                ..
            } => (AuditKind::SendFail, Some(candidate_id), reason.clone()),
            Event::CandidateSkipped {
                candidate_id,
                reason,
                detail,
                ..
            } => {
                let kind = match reason {
                    SkipReason::Render => AuditKind::RenderFailed,
                    SkipReason::Compliance => AuditKind::ComplianceRejected,
                };
                (kind, Some(candidate_id), detail.clone())
            }
            Event::QuotaReset { window_start, .. } => (
                AuditKind::QuotaReset,
                None,
                format!("new window starts {}", window_start.to_rfc3339()),
            ),
            Event::QuotaExhausted { daily_limit, .. } => (
                AuditKind::QuotaExhausted,
                None,
                format!("daily limit of {} reached", daily_limit),
            ),
            Event::StatusChanged {
                from,
                to,
                actor,
                reason,
                ..
            } => {
                let mut detail = format!("{} -> {} by {}", from, to, actor);
                if let Some(reason) = reason {
                    detail.push_str(": ");
                    detail.push_str(reason);
                }
                (AuditKind::StatusChanged, None, detail)
            }
            Event::InvariantViolation { detail, .. } => {
                (AuditKind::InvariantViolation, None, detail.clone())
            }
            Event::CycleCompleted { .. } => return None,
        };

        let mut entry = AuditEntry::new(self.job_id().clone(), kind, detail);
        entry.timestamp = self.timestamp();
        if let Some(candidate) = candidate {
            entry = entry.with_candidate(candidate.clone());
        }
        Some(entry)
    }
}

/// Handler for receiving lifecycle events.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Handle an event.
    async fn handle(&self, event: &Event);
}

/// Event bus for distributing events to registered handlers.
pub struct EventBus {
    handlers: RwLock<Vec<Arc<dyn EventHandler>>>,
}

impl EventBus {
    /// Create a new event bus with no handlers.
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(Vec::new()),
        }
    }

    /// Add a handler before the bus is shared.
    pub fn with_handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
        self.handlers.get_mut().push(handler);
        self
    }

    /// Register an event handler.
    pub async fn register(&self, handler: Arc<dyn EventHandler>) {
        let mut handlers = self.handlers.write().await;
        handlers.push(handler);
    }

    /// Emit an event to all registered handlers.
    pub async fn emit(&self, event: Event) {
        let handlers = self.handlers.read().await;
        for handler in handlers.iter() {
            handler.handle(&event).await;
        }
    }

    /// Get the number of registered handlers.
    pub async fn handler_count(&self) -> usize {
        self.handlers.read().await.len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
