//! Scheduler type definitions.
//!
//! This module contains error types, state enums, and command types for the scheduler.

use crate::core::candidate::{AuditEntry, DeliveryRecord};
use crate::core::job::{JobError, JobSpec, JobStats, JobStatus, JobUpdate, TransitionError};
use crate::core::types::{JobId, Platform};
use crate::storage::StorageError;
use thiserror::Error;
use tokio::sync::oneshot;

/// Errors that can occur in the scheduler.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Job not found.
    #[error("job not found: {0}")]
    JobNotFound(String),

    /// A job with this id is already registered.
    #[error("job already exists: {0}")]
    JobExists(String),

    /// A run cycle is processing the job.
    #[error("job is busy: {0}")]
    JobBusy(String),

    /// The job configuration was rejected.
    #[error("invalid job: {0}")]
    InvalidJob(#[from] JobError),

    /// The requested status change is not allowed.
    #[error(transparent)]
    Transition(#[from] TransitionError),

    /// No adapter is registered for the platform.
    #[error("no adapter registered for platform {0}")]
    AdapterMissing(Platform),

    /// The platform adapter failed its connection check.
    #[error("platform {0} is unavailable")]
    PlatformUnavailable(Platform),

    /// Storage error.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Channel error.
    #[error("channel error: {0}")]
    ChannelError(String),
}

/// State of the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    /// Scheduler is stopped.
    Stopped,
    /// Scheduler is running.
    Running,
    /// Scheduler is paused; ticks start no cycles.
    Paused,
}

/// Operator actions on a single job's status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StatusAction {
    Pause,
    Resume,
    Stop,
    ClearError,
}

impl StatusAction {
    pub(crate) fn target(&self) -> JobStatus {
        match self {
            StatusAction::Pause => JobStatus::Paused,
            StatusAction::Resume | StatusAction::ClearError => JobStatus::Active,
            StatusAction::Stop => JobStatus::Stopped,
        }
    }

    /// The only status this action may start from, when narrower than the
    /// state machine allows. Resume must not clear an error without the
    /// connectivity check.
    pub(crate) fn required_source(&self) -> Option<JobStatus> {
        match self {
            StatusAction::Resume => Some(JobStatus::Paused),
            StatusAction::ClearError => Some(JobStatus::Error),
            StatusAction::Pause | StatusAction::Stop => None,
        }
    }

    pub(crate) fn name(&self) -> &'static str {
        match self {
            StatusAction::Pause => "pause",
            StatusAction::Resume => "resume",
            StatusAction::Stop => "stop",
            StatusAction::ClearError => "clear_error",
        }
    }
}

/// Commands that can be sent to the scheduler.
pub(crate) enum SchedulerCommand {
    /// Register and persist a new job.
    CreateJob {
        spec: JobSpec,
        response: oneshot::Sender<Result<JobStats, SchedulerError>>,
    },
    /// Change a job's status on behalf of an operator.
    SetStatus {
        job_id: JobId,
        action: StatusAction,
        response: oneshot::Sender<Result<JobStatus, SchedulerError>>,
    },
    /// Change a job's keywords, template or limit.
    UpdateJob {
        job_id: JobId,
        update: JobUpdate,
        response: oneshot::Sender<Result<JobStats, SchedulerError>>,
    },
    /// Statistics for one job.
    Stats {
        job_id: JobId,
        response: oneshot::Sender<Result<JobStats, SchedulerError>>,
    },
    /// Statistics for every job.
    ListJobs {
        response: oneshot::Sender<Vec<JobStats>>,
    },
    /// Delivery history of a job.
    Deliveries {
        job_id: JobId,
        response: oneshot::Sender<Result<Vec<DeliveryRecord>, SchedulerError>>,
    },
    /// Recent audit entries of a job.
    Audit {
        job_id: JobId,
        limit: usize,
        response: oneshot::Sender<Result<Vec<AuditEntry>, SchedulerError>>,
    },
    /// Run a dispatch pass immediately.
    TickNow {
        response: oneshot::Sender<usize>,
    },
    /// Pause the scheduler.
    Pause { response: oneshot::Sender<()> },
    /// Resume the scheduler.
    Resume { response: oneshot::Sender<()> },
    /// Shutdown the scheduler.
    Shutdown { response: oneshot::Sender<()> },
}
