//! Scheduler handle for controlling the scheduler.
//!
//! This module provides the `SchedulerHandle` type, the operator control
//! surface: job creation, status changes, configuration updates and
//! reporting, plus scheduler-wide pause, resume and shutdown.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{RwLock, mpsc, oneshot};

use crate::core::candidate::{AuditEntry, DeliveryRecord};
use crate::core::job::{JobSpec, JobStats, JobStatus, JobUpdate};
use crate::core::types::{JobId, Platform};
use crate::platform::PlatformRegistry;

use super::types::{SchedulerCommand, SchedulerError, SchedulerState, StatusAction};

/// Buffer size for the command channel between SchedulerHandle and Scheduler.
pub(crate) const COMMAND_CHANNEL_BUFFER: usize = 32;

/// Handle for controlling the scheduler.
#[derive(Clone)]
pub struct SchedulerHandle {
    pub(crate) command_tx: mpsc::Sender<SchedulerCommand>,
    pub(crate) state: Arc<RwLock<SchedulerState>>,
    pub(crate) platforms: Arc<PlatformRegistry>,
    pub(crate) connection_timeout: Duration,
}

impl SchedulerHandle {
    /// Helper to send a command that returns a result and wait for response.
    async fn send_result_command<T>(
        &self,
        build_command: impl FnOnce(oneshot::Sender<Result<T, SchedulerError>>) -> SchedulerCommand,
        operation: &str,
    ) -> Result<T, SchedulerError>
    where
        T: Send + 'static,
    {
        self.send_command(build_command, operation).await?
    }

    /// Helper to send a command and wait for its plain response.
    async fn send_command<T>(
        &self,
        build_command: impl FnOnce(oneshot::Sender<T>) -> SchedulerCommand,
        operation: &str,
    ) -> Result<T, SchedulerError>
    where
        T: Send + 'static,
    {
        let (response_tx, response_rx) = oneshot::channel();
        self.command_tx
            .send(build_command(response_tx))
            .await
            .map_err(|_| {
                SchedulerError::ChannelError(format!("failed to send {} command", operation))
            })?;

        response_rx.await.map_err(|_| {
            SchedulerError::ChannelError(format!("failed to receive {} response", operation))
        })
    }

    async fn set_status(
        &self,
        job_id: JobId,
        action: StatusAction,
    ) -> Result<JobStatus, SchedulerError> {
        self.send_result_command(
            |response| SchedulerCommand::SetStatus {
                job_id,
                action,
                response,
            },
            action.name(),
        )
        .await
    }

    /// Check that the platform has an adapter and that it answers in time.
    ///
    /// Runs on the caller's task, so a slow platform never holds up the
    /// scheduler loop.
    async fn check_connection(&self, platform: Platform) -> Result<(), SchedulerError> {
        let adapter = self
            .platforms
            .get(platform)
            .ok_or(SchedulerError::AdapterMissing(platform))?;
        match tokio::time::timeout(self.connection_timeout, adapter.test_connection()).await {
            Ok(true) => Ok(()),
            Ok(false) => Err(SchedulerError::PlatformUnavailable(platform)),
            Err(_) => {
                tracing::warn!(platform = %platform, timeout = ?self.connection_timeout, "Connection check timed out");
                Err(SchedulerError::PlatformUnavailable(platform))
            }
        }
    }

    /// Register a new job and start scheduling it.
    ///
    /// The spec is validated and the platform adapter's connection is
    /// checked first.
    pub async fn create_job(&self, spec: JobSpec) -> Result<JobStats, SchedulerError> {
        spec.validate()?;
        self.check_connection(spec.platform).await?;
        self.send_result_command(
            |response| SchedulerCommand::CreateJob { spec, response },
            "create_job",
        )
        .await
    }

    /// Pause an active job.
    pub async fn pause_job(&self, job_id: impl Into<JobId>) -> Result<JobStatus, SchedulerError> {
        self.set_status(job_id.into(), StatusAction::Pause).await
    }

    /// Resume a paused job.
    pub async fn resume_job(&self, job_id: impl Into<JobId>) -> Result<JobStatus, SchedulerError> {
        self.set_status(job_id.into(), StatusAction::Resume).await
    }

    /// Stop a job for good.
    pub async fn stop_job(&self, job_id: impl Into<JobId>) -> Result<JobStatus, SchedulerError> {
        self.set_status(job_id.into(), StatusAction::Stop).await
    }

    /// Return a job in `error` to `active` after re-checking its platform.
    pub async fn clear_error(&self, job_id: impl Into<JobId>) -> Result<JobStatus, SchedulerError> {
        let job_id = job_id.into();
        let stats = self.job_stats(job_id.clone()).await?;
        // Jobs in any other status are refused by the scheduler itself
        if stats.status == JobStatus::Error {
            self.check_connection(stats.platform).await?;
        }
        self.set_status(job_id, StatusAction::ClearError).await
    }

    /// Change keywords, template or daily limit.
    ///
    /// Rejected with [`SchedulerError::JobBusy`] while a run cycle holds the job.
    pub async fn update_job(
        &self,
        job_id: impl Into<JobId>,
        update: JobUpdate,
    ) -> Result<JobStats, SchedulerError> {
        let job_id = job_id.into();
        self.send_result_command(
            |response| SchedulerCommand::UpdateJob {
                job_id,
                update,
                response,
            },
            "update_job",
        )
        .await
    }

    /// Statistics for one job.
    pub async fn job_stats(&self, job_id: impl Into<JobId>) -> Result<JobStats, SchedulerError> {
        let job_id = job_id.into();
        self.send_result_command(|response| SchedulerCommand::Stats { job_id, response }, "stats")
            .await
    }

    /// Statistics for every job, ordered by id.
    pub async fn list_jobs(&self) -> Result<Vec<JobStats>, SchedulerError> {
        self.send_command(|response| SchedulerCommand::ListJobs { response }, "list_jobs")
            .await
    }

    /// Delivery records of a job, oldest first.
    pub async fn deliveries(
        &self,
        job_id: impl Into<JobId>,
    ) -> Result<Vec<DeliveryRecord>, SchedulerError> {
        let job_id = job_id.into();
        self.send_result_command(
            |response| SchedulerCommand::Deliveries { job_id, response },
            "deliveries",
        )
        .await
    }

    /// Most recent audit entries of a job, newest first.
    pub async fn audit_log(
        &self,
        job_id: impl Into<JobId>,
        limit: usize,
    ) -> Result<Vec<AuditEntry>, SchedulerError> {
        let job_id = job_id.into();
        self.send_result_command(
            |response| SchedulerCommand::Audit {
                job_id,
                limit,
                response,
            },
            "audit",
        )
        .await
    }

    /// Run a dispatch pass now. Returns the number of cycles started.
    pub async fn tick_now(&self) -> Result<usize, SchedulerError> {
        self.send_command(|response| SchedulerCommand::TickNow { response }, "tick_now")
            .await
    }

    /// Pause the scheduler.
    ///
    /// While paused, ticks start no run cycles; operator commands still work.
    pub async fn pause(&self) -> Result<(), SchedulerError> {
        self.send_command(|response| SchedulerCommand::Pause { response }, "pause")
            .await
    }

    /// Resume the scheduler after being paused.
    pub async fn resume(&self) -> Result<(), SchedulerError> {
        self.send_command(|response| SchedulerCommand::Resume { response }, "resume")
            .await
    }

    /// Shutdown the scheduler, waiting for in-flight cycles up to the
    /// configured timeout.
    pub async fn shutdown(&self) -> Result<(), SchedulerError> {
        self.send_command(
            |response| SchedulerCommand::Shutdown { response },
            "shutdown",
        )
        .await
    }

    /// Get the current scheduler state.
    pub async fn state(&self) -> SchedulerState {
        *self.state.read().await
    }

    /// Check if the scheduler is running.
    pub async fn is_running(&self) -> bool {
        *self.state.read().await == SchedulerState::Running
    }

    /// Check if the scheduler is paused.
    pub async fn is_paused(&self) -> bool {
        *self.state.read().await == SchedulerState::Paused
    }
}
