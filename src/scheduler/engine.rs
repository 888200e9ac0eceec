//! Scheduler engine implementation.
//!
//! The scheduler is responsible for:
//! - Ticking at a fixed interval and dispatching run cycles
//! - Operator commands on individual jobs
//! - Pause and resume functionality
//! - Recovery of persisted jobs
//! - Graceful shutdown

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{RwLock, mpsc};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::cycle::{CycleContext, CycleSettings};
use super::dispatch::{Dispatcher, SpawnedCycle};
use super::handle::{COMMAND_CHANNEL_BUFFER, SchedulerHandle};
use super::handlers::{AuditTrail, EventForwarder};
use super::registry::{JobRegistry, JobSlot};
use super::types::{SchedulerCommand, SchedulerError, SchedulerState, StatusAction};
use crate::core::candidate::{AuditEntry, DeliveryRecord};
use crate::core::compliance::ComplianceGate;
use crate::core::job::{
    Actor, AutomationJob, JobSpec, JobStats, JobStatus, JobUpdate, TransitionError,
};
use crate::core::retry::BackoffPolicy;
use crate::core::types::JobId;
use crate::events::{Event, EventBus};
use crate::platform::{MessageReviser, PlatformRegistry};
use crate::storage::{Storage, StorageError};

/// Main scheduler for outreach jobs.
pub struct Scheduler<S: Storage> {
    /// Registered jobs.
    registry: Arc<JobRegistry>,
    /// Everything a run cycle needs.
    ctx: CycleContext<S>,
    /// Tick interval for dispatching run cycles.
    tick_interval: Duration,
    /// Graceful shutdown timeout (default: 30 seconds).
    shutdown_timeout: Duration,
    /// Bound on a platform connection check (default: 10 seconds).
    connection_timeout: Duration,
    /// Spawned run cycles not yet reaped.
    running_cycles: RwLock<Vec<SpawnedCycle>>,
}

impl<S: Storage + 'static> Scheduler<S> {
    /// Create a new scheduler with the given storage and platform adapters.
    pub fn new(storage: S, platforms: PlatformRegistry) -> Self {
        Self::with_storage(Arc::new(storage), platforms)
    }

    /// Create a new scheduler with shared storage.
    pub fn with_storage(storage: Arc<S>, platforms: PlatformRegistry) -> Self {
        let event_bus = audited_bus(&storage, None);
        Self {
            registry: Arc::new(JobRegistry::new()),
            ctx: CycleContext::new(storage, platforms, event_bus),
            tick_interval: Duration::from_secs(60),
            shutdown_timeout: Duration::from_secs(30),
            connection_timeout: Duration::from_secs(10),
            running_cycles: RwLock::new(Vec::new()),
        }
    }

    /// Forward every event to `event_bus` once it has been audited.
    pub fn with_event_bus(mut self, event_bus: EventBus) -> Self {
        self.ctx.event_bus = audited_bus(&self.ctx.storage, Some(event_bus));
        self
    }

    /// Set the compliance gate.
    pub fn with_gate(mut self, gate: ComplianceGate) -> Self {
        self.ctx.gate = Arc::new(gate);
        self
    }

    /// Set the collaborator asked to revise messages that need revision.
    pub fn with_reviser(mut self, reviser: Arc<dyn MessageReviser>) -> Self {
        self.ctx.reviser = Some(reviser);
        self
    }

    /// Set the tick interval.
    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }

    /// Replace all run cycle tunables at once.
    pub fn with_cycle_settings(mut self, settings: CycleSettings) -> Self {
        self.ctx.settings = settings;
        self
    }

    /// Set the maximum candidates per discovery call.
    pub fn with_discovery_limit(mut self, limit: usize) -> Self {
        self.ctx.settings.discovery_limit = limit;
        self
    }

    /// Set the consecutive delivery failures that move a job to `error`.
    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.ctx.settings.failure_threshold = threshold;
        self
    }

    /// Set how many times the reviser is consulted per candidate.
    pub fn with_max_revision_rounds(mut self, rounds: u32) -> Self {
        self.ctx.settings.max_revision_rounds = rounds;
        self
    }

    /// Set the backoff applied after transient discovery failures.
    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.ctx.settings.backoff = backoff;
        self
    }

    /// Set the graceful shutdown timeout.
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Set how long a platform connection check may take.
    pub fn with_connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }

    /// Get the event bus.
    pub fn event_bus(&self) -> &EventBus {
        &self.ctx.event_bus
    }

    /// Get the job registry.
    pub fn registry(&self) -> Arc<JobRegistry> {
        Arc::clone(&self.registry)
    }

    /// Get the storage backend.
    pub fn storage(&self) -> Arc<S> {
        Arc::clone(&self.ctx.storage)
    }

    /// A dispatcher sharing this scheduler's registry and collaborators.
    pub fn dispatcher(&self) -> Dispatcher<S> {
        Dispatcher::new(self.ctx.clone(), Arc::clone(&self.registry))
    }

    /// Load persisted jobs into the registry.
    ///
    /// Statuses and counters are restored as last committed. Jobs already
    /// registered are left alone.
    pub async fn recover(&self) -> Result<Vec<JobId>, SchedulerError> {
        let recovered = self.registry.load_from(self.ctx.storage.as_ref()).await?;
        for job_id in &recovered {
            tracing::info!(job_id = %job_id, "Recovered job from storage");
        }
        Ok(recovered)
    }

    /// Start the scheduler and return a handle for controlling it.
    pub async fn start(self) -> (SchedulerHandle, JoinHandle<()>) {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_BUFFER);
        let state = Arc::new(RwLock::new(SchedulerState::Running));

        let handle = SchedulerHandle {
            command_tx,
            state: Arc::clone(&state),
            platforms: Arc::clone(&self.ctx.platforms),
            connection_timeout: self.connection_timeout,
        };

        let scheduler_task = tokio::spawn(async move {
            self.run(command_rx, state).await;
        });

        (handle, scheduler_task)
    }

    /// Main scheduler loop.
    async fn run(
        self,
        mut command_rx: mpsc::Receiver<SchedulerCommand>,
        state: Arc<RwLock<SchedulerState>>,
    ) {
        let dispatcher = self.dispatcher();
        // First tick after one full interval; callers use tick_now to start early
        let mut interval = tokio::time::interval_at(
            tokio::time::Instant::now() + self.tick_interval,
            self.tick_interval,
        );
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let current_state = *state.read().await;
                    if current_state == SchedulerState::Running {
                        self.tick(&dispatcher).await;
                    }

                    // Reap finished cycles
                    self.cleanup_finished_cycles().await;
                }

                Some(command) = command_rx.recv() => {
                    if self.handle_command(command, &dispatcher, &state).await {
                        break;
                    }
                }
            }
        }
    }

    /// Process one operator command. Returns `true` on shutdown.
    async fn handle_command(
        &self,
        command: SchedulerCommand,
        dispatcher: &Dispatcher<S>,
        state: &RwLock<SchedulerState>,
    ) -> bool {
        match command {
            SchedulerCommand::CreateJob { spec, response } => {
                let _ = response.send(self.create_job(spec).await);
            }
            SchedulerCommand::SetStatus {
                job_id,
                action,
                response,
            } => {
                let _ = response.send(self.set_status(&job_id, action).await);
            }
            SchedulerCommand::UpdateJob {
                job_id,
                update,
                response,
            } => {
                let _ = response.send(self.update_job(&job_id, update).await);
            }
            SchedulerCommand::Stats { job_id, response } => {
                let _ = response.send(self.job_stats(&job_id).await);
            }
            SchedulerCommand::ListJobs { response } => {
                let _ = response.send(self.list_jobs().await);
            }
            SchedulerCommand::Deliveries { job_id, response } => {
                let _ = response.send(self.deliveries(&job_id).await);
            }
            SchedulerCommand::Audit {
                job_id,
                limit,
                response,
            } => {
                let _ = response.send(self.audit_log(&job_id, limit).await);
            }
            SchedulerCommand::TickNow { response } => {
                // Runs even while paused, like any explicit operator request
                let _ = response.send(self.tick(dispatcher).await);
            }
            SchedulerCommand::Pause { response } => {
                let mut s = state.write().await;
                *s = SchedulerState::Paused;
                tracing::info!("Scheduler paused");
                let _ = response.send(());
            }
            SchedulerCommand::Resume { response } => {
                let mut s = state.write().await;
                *s = SchedulerState::Running;
                tracing::info!("Scheduler resumed");
                let _ = response.send(());
            }
            SchedulerCommand::Shutdown { response } => {
                let mut s = state.write().await;
                *s = SchedulerState::Stopped;
                drop(s); // Release the lock before waiting

                // Wait for in-flight cycles with timeout
                self.await_running_cycles().await;

                let _ = response.send(());
                return true;
            }
        }
        false
    }

    /// Dispatch one pass and track the spawned cycles.
    async fn tick(&self, dispatcher: &Dispatcher<S>) -> usize {
        let spawned = dispatcher.dispatch(Utc::now()).await;
        let count = spawned.len();
        if count > 0 {
            tracing::debug!(cycles = count, "Dispatched run cycles");
        }
        self.running_cycles.write().await.extend(spawned);
        count
    }

    async fn slot(&self, job_id: &JobId) -> Result<Arc<JobSlot>, SchedulerError> {
        self.registry
            .get(job_id)
            .await
            .ok_or_else(|| SchedulerError::JobNotFound(job_id.to_string()))
    }

    async fn ensure_registered(&self, job_id: &JobId) -> Result<(), SchedulerError> {
        if self.registry.contains(job_id).await {
            Ok(())
        } else {
            Err(SchedulerError::JobNotFound(job_id.to_string()))
        }
    }

    async fn create_job(&self, spec: JobSpec) -> Result<JobStats, SchedulerError> {
        let job = AutomationJob::new(spec, Utc::now())?;
        if self.registry.contains(&job.id).await {
            return Err(SchedulerError::JobExists(job.id.to_string()));
        }

        self.ctx
            .storage
            .save_job(job.clone())
            .await
            .map_err(|e| match e {
                StorageError::DuplicateKey(_) => SchedulerError::JobExists(job.id.to_string()),
                other => other.into(),
            })?;

        let stats = job.stats(false);
        tracing::info!(
            job_id = %job.id,
            platform = %job.platform,
            daily_limit = job.quota.daily_limit,
            "Job created"
        );
        self.registry.insert(job).await;
        Ok(stats)
    }

    async fn set_status(
        &self,
        job_id: &JobId,
        action: StatusAction,
    ) -> Result<JobStatus, SchedulerError> {
        let slot = self.slot(job_id).await?;
        let target = action.target();

        let current = slot.lock().await.status();
        if action.required_source().is_some_and(|s| s != current) {
            let error = TransitionError {
                from: current,
                to: target,
                actor: Actor::Operator,
            };
            return Err(self.refuse(job_id, error).await);
        }
        let result = {
            let mut job = slot.lock().await;
            let result = job.transition(target, Actor::Operator);
            if result.is_ok() {
                self.ctx.persist(&job).await;
            }
            result
        };

        match result {
            Ok(from) => {
                tracing::info!(job_id = %job_id, from = %from, to = %target, action = action.name(), "Job status changed");
                self.ctx
                    .event_bus
                    .emit(Event::status_changed(
                        job_id.clone(),
                        from,
                        target,
                        Actor::Operator,
                        None,
                    ))
                    .await;
                Ok(target)
            }
            Err(e) => Err(self.refuse(job_id, e).await),
        }
    }

    /// Log and audit a refused status change.
    async fn refuse(&self, job_id: &JobId, error: TransitionError) -> SchedulerError {
        tracing::warn!(job_id = %job_id, error = %error, "Refused status change");
        self.ctx
            .event_bus
            .emit(Event::invariant_violation(job_id.clone(), error.to_string()))
            .await;
        error.into()
    }

    async fn update_job(
        &self,
        job_id: &JobId,
        update: JobUpdate,
    ) -> Result<JobStats, SchedulerError> {
        let slot = self.slot(job_id).await?;
        // Holding the run flag keeps a cycle from starting mid-update
        let _guard = slot
            .try_acquire()
            .ok_or_else(|| SchedulerError::JobBusy(job_id.to_string()))?;

        let mut job = slot.lock().await;
        job.apply_update(&update)?;
        self.ctx.persist(&job).await;
        tracing::info!(job_id = %job_id, daily_limit = job.quota.daily_limit, "Job configuration updated");
        Ok(job.stats(false))
    }

    async fn job_stats(&self, job_id: &JobId) -> Result<JobStats, SchedulerError> {
        let slot = self.slot(job_id).await?;
        let in_flight = slot.is_in_flight();
        Ok(slot.lock().await.stats(in_flight))
    }

    async fn list_jobs(&self) -> Vec<JobStats> {
        let mut all = Vec::new();
        for (_, slot) in self.registry.slots().await {
            let in_flight = slot.is_in_flight();
            all.push(slot.lock().await.stats(in_flight));
        }
        all
    }

    async fn deliveries(&self, job_id: &JobId) -> Result<Vec<DeliveryRecord>, SchedulerError> {
        self.ensure_registered(job_id).await?;
        Ok(self.ctx.storage.list_deliveries(job_id).await?)
    }

    async fn audit_log(
        &self,
        job_id: &JobId,
        limit: usize,
    ) -> Result<Vec<AuditEntry>, SchedulerError> {
        self.ensure_registered(job_id).await?;
        Ok(self.ctx.storage.list_audit(job_id, limit).await?)
    }

    /// Reap finished cycle handles, logging any that panicked.
    ///
    /// Returns the number of cycles still running.
    async fn cleanup_finished_cycles(&self) -> usize {
        let (finished, remaining) = {
            let mut running = self.running_cycles.write().await;
            let (finished, pending): (Vec<_>, Vec<_>) =
                running.drain(..).partition(|c| c.handle.is_finished());
            *running = pending;
            (finished, running.len())
        };

        for cycle in finished {
            if let Err(e) = cycle.handle.await {
                tracing::error!(job_id = %cycle.job_id, error = %e, "Run cycle task failed");
            }
        }
        remaining
    }

    /// Wait for all in-flight cycles to complete with a timeout.
    async fn await_running_cycles(&self) {
        let running_count = self.running_cycles.read().await.len();

        if running_count == 0 {
            tracing::info!("No run cycles to wait for during shutdown");
            return;
        }

        tracing::info!(
            "Graceful shutdown: waiting for {} run cycle(s) to complete (timeout: {:?})",
            running_count,
            self.shutdown_timeout
        );

        let start = tokio::time::Instant::now();
        let deadline = start + self.shutdown_timeout;

        loop {
            let remaining = self.cleanup_finished_cycles().await;

            if remaining == 0 {
                let elapsed = start.elapsed();
                tracing::info!("All run cycles completed gracefully in {:?}", elapsed);
                break;
            }

            if tokio::time::Instant::now() >= deadline {
                tracing::warn!(
                    "Graceful shutdown timeout ({:?}) exceeded with {} cycle(s) still running",
                    self.shutdown_timeout,
                    remaining
                );
                break;
            }

            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }
}

/// Event bus whose first handler writes the audit log.
fn audited_bus<S: Storage + 'static>(storage: &Arc<S>, forward_to: Option<EventBus>) -> Arc<EventBus> {
    let mut bus = EventBus::new().with_handler(Arc::new(AuditTrail {
        storage: Arc::clone(storage),
    }));
    if let Some(target) = forward_to {
        bus = bus.with_handler(Arc::new(EventForwarder {
            target: Arc::new(target),
        }));
    }
    Arc::new(bus)
}
