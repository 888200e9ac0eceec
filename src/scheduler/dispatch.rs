//! Tick dispatch: pick eligible jobs and start their run cycles.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::cycle::{CycleContext, CycleReport, RunCycle};
use super::registry::JobRegistry;
use crate::core::job::JobStatus;
use crate::core::types::JobId;
use crate::events::Event;
use crate::storage::Storage;

/// A run cycle spawned by a dispatch pass.
pub struct SpawnedCycle {
    pub job_id: JobId,
    pub handle: JoinHandle<CycleReport>,
}

/// Starts run cycles for the jobs that are due.
pub struct Dispatcher<S: Storage> {
    ctx: CycleContext<S>,
    registry: Arc<JobRegistry>,
}

impl<S: Storage + 'static> Dispatcher<S> {
    pub fn new(ctx: CycleContext<S>, registry: Arc<JobRegistry>) -> Self {
        Self { ctx, registry }
    }

    /// One dispatch pass at `now`.
    ///
    /// Every non-stopped job first gets its quota window checked. Active jobs
    /// outside backoff then get a run cycle, unless one is still in flight.
    pub async fn dispatch(&self, now: DateTime<Utc>) -> Vec<SpawnedCycle> {
        let mut spawned = Vec::new();

        for (job_id, slot) in self.registry.slots().await {
            let (reset, eligible) = {
                let mut job = slot.lock().await;
                if job.status() == JobStatus::Stopped {
                    continue;
                }
                let reset = job.quota.reset_if_new_window(now);
                if reset {
                    self.ctx.persist(&job).await;
                }
                (reset.then_some(job.quota.window_start), job.is_eligible(now))
            };

            if let Some(window_start) = reset {
                info!(job_id = %job_id, window_start = %window_start, "Daily quota reset");
                self.ctx
                    .event_bus
                    .emit(Event::QuotaReset {
                        job_id: job_id.clone(),
                        window_start,
                        timestamp: Utc::now(),
                    })
                    .await;
            }

            if !eligible {
                continue;
            }

            let Some(guard) = slot.try_acquire() else {
                debug!(job_id = %job_id, "Previous run cycle still in progress, skipping");
                continue;
            };

            let cycle = RunCycle::new(self.ctx.clone(), Arc::clone(&slot), guard, now);
            let handle = tokio::spawn(cycle.run());
            spawned.push(SpawnedCycle { job_id, handle });
        }

        spawned
    }
}
