//! One run cycle of one job.
//!
//! A cycle discovers candidates, renders and gates a message for each, and
//! delivers within the job's remaining quota. The job lock is taken only for
//! short critical sections; adapter calls and send delays happen outside it.

use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use super::registry::{JobSlot, RunGuard};
use crate::core::candidate::{Candidate, DeliveryRecord};
use crate::core::compliance::{ComplianceGate, Verdict};
use crate::core::job::{Actor, AutomationJob, JobStatus};
use crate::core::retry::BackoffPolicy;
use crate::core::types::{CandidateId, JobId, Platform, RunId};
use crate::events::{Event, EventBus, SkipReason};
use crate::platform::{AdapterError, MessageReviser, PlatformRegistry};
use crate::storage::{Storage, StorageError};

/// Tunables shared by all run cycles.
#[derive(Debug, Clone)]
pub struct CycleSettings {
    /// Maximum candidates requested per discovery call.
    pub discovery_limit: usize,
    /// Consecutive delivery failures that move a job to `error`.
    pub failure_threshold: u32,
    /// Revision requests per candidate before giving up.
    pub max_revision_rounds: u32,
    /// Backoff after transient discovery failures.
    pub backoff: BackoffPolicy,
}

impl Default for CycleSettings {
    fn default() -> Self {
        Self {
            discovery_limit: 10,
            failure_threshold: 5,
            max_revision_rounds: 1,
            backoff: BackoffPolicy::default(),
        }
    }
}

/// Collaborators a run cycle needs.
pub struct CycleContext<S: Storage> {
    pub(crate) storage: Arc<S>,
    pub(crate) platforms: Arc<PlatformRegistry>,
    pub(crate) gate: Arc<ComplianceGate>,
    pub(crate) reviser: Option<Arc<dyn MessageReviser>>,
    pub(crate) event_bus: Arc<EventBus>,
    pub(crate) settings: CycleSettings,
}

impl<S: Storage> Clone for CycleContext<S> {
    fn clone(&self) -> Self {
        Self {
            storage: Arc::clone(&self.storage),
            platforms: Arc::clone(&self.platforms),
            gate: Arc::clone(&self.gate),
            reviser: self.reviser.clone(),
            event_bus: Arc::clone(&self.event_bus),
            settings: self.settings.clone(),
        }
    }
}

impl<S: Storage + 'static> CycleContext<S> {
    pub fn new(storage: Arc<S>, platforms: PlatformRegistry, event_bus: Arc<EventBus>) -> Self {
        Self {
            storage,
            platforms: Arc::new(platforms),
            gate: Arc::new(ComplianceGate::with_defaults()),
            reviser: None,
            event_bus,
            settings: CycleSettings::default(),
        }
    }

    /// Persist the job while holding its lock, so writes land in lock order.
    pub(crate) async fn persist(&self, job: &AutomationJob) {
        if let Err(e) = self.storage.update_job(job.clone()).await {
            warn!(job_id = %job.id, error = %e, "Failed to persist job");
        }
    }

    /// Apply a scheduler-initiated status change and report it.
    ///
    /// A refused change is emitted as an invariant violation and never applied.
    pub(crate) async fn scheduler_transition(
        &self,
        slot: &JobSlot,
        to: JobStatus,
        reason: &str,
    ) -> bool {
        let event = {
            let mut job = slot.lock().await;
            let event = match job.transition(to, Actor::Scheduler) {
                Ok(from) => {
                    job.last_error = Some(reason.to_string());
                    warn!(job_id = %job.id, from = %from, to = %to, reason, "Job status changed");
                    Event::status_changed(
                        job.id.clone(),
                        from,
                        to,
                        Actor::Scheduler,
                        Some(reason.to_string()),
                    )
                }
                Err(e) => {
                    warn!(job_id = %job.id, error = %e, "Refused status change");
                    Event::invariant_violation(job.id.clone(), e.to_string())
                }
            };
            self.persist(&job).await;
            event
        };
        let applied = matches!(event, Event::StatusChanged { .. });
        self.event_bus.emit(event).await;
        applied
    }
}

/// Summary of one run cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub job_id: JobId,
    pub run_id: RunId,
    /// Candidates left after exclusion and dedup.
    pub candidates_found: usize,
    pub delivered: u32,
    pub failed: u32,
    pub skipped_render: u32,
    pub skipped_compliance: u32,
    /// The quota ran out before the candidate list did.
    pub quota_exhausted: bool,
    /// Job status when the cycle ended.
    pub final_status: JobStatus,
}

impl CycleReport {
    fn new(job_id: JobId, run_id: RunId, status: JobStatus) -> Self {
        Self {
            job_id,
            run_id,
            candidates_found: 0,
            delivered: 0,
            failed: 0,
            skipped_render: 0,
            skipped_compliance: 0,
            quota_exhausted: false,
            final_status: status,
        }
    }

    pub fn skipped(&self) -> u32 {
        self.skipped_render + self.skipped_compliance
    }
}

/// A single run of one job, holding that job's in-flight guard.
pub struct RunCycle<S: Storage> {
    ctx: CycleContext<S>,
    slot: Arc<JobSlot>,
    _guard: RunGuard,
    now: DateTime<Utc>,
    run_id: RunId,
}

/// What the candidate loop needs from the job, copied out of the lock.
struct JobView {
    id: JobId,
    platform: Platform,
    keywords: String,
    template: String,
}

impl<S: Storage + 'static> RunCycle<S> {
    pub fn new(ctx: CycleContext<S>, slot: Arc<JobSlot>, guard: RunGuard, now: DateTime<Utc>) -> Self {
        Self {
            ctx,
            slot,
            _guard: guard,
            now,
            run_id: RunId::new(),
        }
    }

    /// Execute the cycle to completion.
    pub async fn run(self) -> CycleReport {
        let started = Instant::now();

        let (view, remaining, status) = {
            let job = self.slot.lock().await;
            let view = JobView {
                id: job.id.clone(),
                platform: job.platform,
                keywords: job.search_keywords.clone(),
                template: job.message_template.clone(),
            };
            (view, job.quota.remaining(), job.status())
        };
        let mut report = CycleReport::new(view.id.clone(), self.run_id.clone(), status);

        if status == JobStatus::Active {
            if remaining == 0 {
                self.quota_exhausted(&view.id).await;
                report.quota_exhausted = true;
            } else {
                self.process(&view, &mut report).await;
            }
        } else {
            debug!(job_id = %view.id, status = %status, "Job no longer active, skipping cycle");
        }

        {
            let mut job = self.slot.lock().await;
            job.last_run_at = Some(self.now);
            job.updated_at = Utc::now();
            report.final_status = job.status();
            self.ctx.persist(&job).await;
        }

        info!(
            job_id = %view.id,
            run_id = %self.run_id,
            delivered = report.delivered,
            failed = report.failed,
            skipped = report.skipped(),
            "Run cycle finished"
        );
        self.ctx
            .event_bus
            .emit(Event::CycleCompleted {
                job_id: view.id.clone(),
                run_id: self.run_id.clone(),
                delivered: report.delivered,
                failed: report.failed,
                skipped: report.skipped(),
                duration: started.elapsed(),
                timestamp: Utc::now(),
            })
            .await;
        report
    }

    async fn process(&self, view: &JobView, report: &mut CycleReport) {
        let Some(adapter) = self.ctx.platforms.get(view.platform) else {
            let reason = format!("no adapter registered for platform {}", view.platform);
            self.ctx
                .scheduler_transition(&self.slot, JobStatus::Error, &reason)
                .await;
            return;
        };

        let template = match crate::core::template::MessageTemplate::parse(&view.template) {
            Ok(t) => t,
            Err(e) => {
                let reason = format!("invalid template: {}", e);
                self.ctx
                    .scheduler_transition(&self.slot, JobStatus::Error, &reason)
                    .await;
                return;
            }
        };

        if let Err(e) = self.flush_unrecorded(&view.id).await {
            self.storage_failure(&view.id, e).await;
            return;
        }
        let contacted = match self.ctx.storage.contacted_candidates(&view.id).await {
            Ok(set) => set,
            Err(e) => {
                self.storage_failure(&view.id, e).await;
                return;
            }
        };

        self.ctx
            .event_bus
            .emit(Event::cycle_started(
                view.id.clone(),
                self.run_id.clone(),
                view.keywords.clone(),
            ))
            .await;

        let limit = self.ctx.settings.discovery_limit;
        let discovered = adapter.discover(&view.keywords, &contacted, limit).await;
        let candidates = match discovered {
            Ok(found) => {
                {
                    let mut job = self.slot.lock().await;
                    job.transient_failures = 0;
                    job.retry_after = None;
                }
                filter_candidates(found, &contacted, limit)
            }
            Err(e) => {
                self.discovery_failed(&view.id, e).await;
                return;
            }
        };
        report.candidates_found = candidates.len();
        debug!(job_id = %view.id, found = candidates.len(), "Discovery completed");
        self.ctx
            .event_bus
            .emit(Event::discovery_completed(
                view.id.clone(),
                self.run_id.clone(),
                candidates.len(),
            ))
            .await;

        let send_delay = self.ctx.platforms.send_delay(view.platform);
        let mut attempted = false;

        for candidate in candidates {
            let remaining = self.slot.lock().await.quota.remaining();
            if remaining == 0 {
                report.quota_exhausted = true;
                self.quota_exhausted(&view.id).await;
                break;
            }

            let message = match template.render(&candidate, view.platform) {
                Ok(m) => m,
                Err(e) => {
                    report.skipped_render += 1;
                    self.skip(&view.id, &candidate.id, SkipReason::Render, e.to_string())
                        .await;
                    continue;
                }
            };

            let message = match self.review(view.platform, message).await {
                Ok(m) => m,
                Err(reasons) => {
                    report.skipped_compliance += 1;
                    let detail = format!("compliance rejected: {}", reasons.join("; "));
                    self.skip(&view.id, &candidate.id, SkipReason::Compliance, detail)
                        .await;
                    continue;
                }
            };

            let reserved = self.slot.lock().await.quota.reserve_and_record();
            if !reserved {
                report.quota_exhausted = true;
                self.quota_exhausted(&view.id).await;
                break;
            }

            if attempted && !send_delay.is_zero() {
                tokio::time::sleep(send_delay).await;
            }
            attempted = true;

            match adapter.deliver(&candidate, &message).await {
                Ok(()) => {
                    report.delivered += 1;
                    if !self.delivered(&view.id, &candidate, &message).await {
                        break;
                    }
                }
                Err(e) => {
                    report.failed += 1;
                    if self.delivery_failed(&view.id, &candidate, e).await {
                        break;
                    }
                }
            }
        }
    }

    /// Gate a message, consulting the reviser on `needs_revision`.
    async fn review(&self, platform: Platform, message: String) -> Result<String, Vec<String>> {
        let mut current = message;
        let mut rounds = 0;
        loop {
            match self.ctx.gate.review(platform, &current) {
                Verdict::Pass => return Ok(current),
                Verdict::Fail(reasons) => return Err(reasons),
                Verdict::NeedsRevision(reasons) => {
                    let Some(reviser) = &self.ctx.reviser else {
                        return Err(reasons);
                    };
                    if rounds >= self.ctx.settings.max_revision_rounds {
                        return Err(reasons);
                    }
                    rounds += 1;
                    match reviser.revise(platform, &current, &reasons).await {
                        Some(revised) => current = revised,
                        None => return Err(reasons),
                    }
                }
            }
        }
    }

    async fn skip(&self, job_id: &JobId, candidate_id: &CandidateId, reason: SkipReason, detail: String) {
        warn!(job_id = %job_id, candidate_id = %candidate_id, reason = %detail, "Candidate skipped");
        {
            let mut job = self.slot.lock().await;
            job.error_count += 1;
            job.last_error = Some(detail.clone());
            self.ctx.persist(&job).await;
        }
        self.ctx
            .event_bus
            .emit(Event::candidate_skipped(
                job_id.clone(),
                candidate_id.clone(),
                reason,
                detail,
            ))
            .await;
    }

    /// Book a successful delivery. Returns `false` when its record could not
    /// be written, in which case the candidate loop must stop.
    async fn delivered(&self, job_id: &JobId, candidate: &Candidate, message: &str) -> bool {
        let record = DeliveryRecord::delivered(job_id.clone(), candidate.id.clone(), message);
        let unrecorded = match self.ctx.storage.record_delivery(record.clone()).await {
            Ok(()) => None,
            Err(StorageError::DuplicateKey(key)) => {
                self.ctx
                    .event_bus
                    .emit(Event::invariant_violation(
                        job_id.clone(),
                        format!("candidate delivered twice: {}", key),
                    ))
                    .await;
                None
            }
            Err(e) => {
                warn!(job_id = %job_id, candidate_id = %candidate.id, error = %e, "Failed to record delivery, holding it for the next cycle");
                Some(format!("storage: delivery to {} not recorded: {}", candidate.id, e))
            }
        };
        let recorded = unrecorded.is_none();

        {
            let mut job = self.slot.lock().await;
            job.success_count += 1;
            job.consecutive_failures = 0;
            if let Some(reason) = unrecorded {
                job.last_error = Some(reason);
                job.unrecorded.push(record);
            }
            self.ctx.persist(&job).await;
        }
        info!(job_id = %job_id, candidate_id = %candidate.id, "Message delivered");
        self.ctx
            .event_bus
            .emit(Event::message_delivered(job_id.clone(), candidate.id.clone()))
            .await;
        recorded
    }

    /// Write delivery records an earlier cycle had to hold back. Records that
    /// still cannot be written stay held.
    async fn flush_unrecorded(&self, job_id: &JobId) -> Result<(), StorageError> {
        let held = std::mem::take(&mut self.slot.lock().await.unrecorded);
        if held.is_empty() {
            return Ok(());
        }

        let mut pending = held.into_iter();
        let mut failure = None;
        for record in pending.by_ref() {
            match self.ctx.storage.record_delivery(record.clone()).await {
                Ok(()) | Err(StorageError::DuplicateKey(_)) => {
                    debug!(job_id = %job_id, candidate_id = %record.candidate_id, "Held delivery recorded");
                }
                Err(e) => {
                    failure = Some((record, e));
                    break;
                }
            }
        }

        let Some((record, error)) = failure else {
            return Ok(());
        };
        let mut job = self.slot.lock().await;
        let mut still_held = vec![record];
        still_held.extend(pending);
        still_held.append(&mut job.unrecorded);
        job.unrecorded = still_held;
        self.ctx.persist(&job).await;
        Err(error)
    }

    /// Returns `true` when the candidate loop must stop.
    async fn delivery_failed(&self, job_id: &JobId, candidate: &Candidate, error: AdapterError) -> bool {
        let reason = error.reason().to_string();
        let record = DeliveryRecord::failed(job_id.clone(), candidate.id.clone(), reason.clone());
        if let Err(e) = self.ctx.storage.record_delivery(record).await {
            warn!(job_id = %job_id, candidate_id = %candidate.id, error = %e, "Failed to record delivery failure");
        }

        let threshold_reached = {
            let mut job = self.slot.lock().await;
            job.quota.release();
            job.error_count += 1;
            job.consecutive_failures += 1;
            job.last_error = Some(reason.clone());
            self.ctx.persist(&job).await;
            job.consecutive_failures >= self.ctx.settings.failure_threshold
        };
        warn!(job_id = %job_id, candidate_id = %candidate.id, reason = %reason, fatal = error.is_fatal(), "Delivery failed");
        self.ctx
            .event_bus
            .emit(Event::DeliveryFailed {
                job_id: job_id.clone(),
                candidate_id: candidate.id.clone(),
                reason: reason.clone(),
                fatal: error.is_fatal(),
                timestamp: Utc::now(),
            })
            .await;

        if error.is_fatal() {
            self.ctx
                .scheduler_transition(&self.slot, JobStatus::Error, &reason)
                .await;
            return true;
        }
        if threshold_reached {
            let reason = format!(
                "{} consecutive delivery failures, last: {}",
                self.ctx.settings.failure_threshold, reason
            );
            self.ctx
                .scheduler_transition(&self.slot, JobStatus::Error, &reason)
                .await;
            return true;
        }
        false
    }

    async fn discovery_failed(&self, job_id: &JobId, error: AdapterError) {
        let reason = error.reason().to_string();
        if error.is_fatal() {
            self.ctx
                .event_bus
                .emit(Event::DiscoveryFailed {
                    job_id: job_id.clone(),
                    run_id: self.run_id.clone(),
                    error: reason.clone(),
                    fatal: true,
                    retry_after: None,
                    timestamp: Utc::now(),
                })
                .await;
            self.ctx
                .scheduler_transition(&self.slot, JobStatus::Error, &reason)
                .await;
            return;
        }

        let retry_after = {
            let mut job = self.slot.lock().await;
            job.transient_failures += 1;
            job.retry_after = self
                .ctx
                .settings
                .backoff
                .retry_after(job.transient_failures, self.now);
            job.last_error = Some(reason.clone());
            self.ctx.persist(&job).await;
            job.retry_after
        };
        warn!(job_id = %job_id, reason = %reason, retry_after = ?retry_after, "Transient discovery failure");
        self.ctx
            .event_bus
            .emit(Event::DiscoveryFailed {
                job_id: job_id.clone(),
                run_id: self.run_id.clone(),
                error: reason,
                fatal: false,
                retry_after,
                timestamp: Utc::now(),
            })
            .await;
    }

    async fn quota_exhausted(&self, job_id: &JobId) {
        let daily_limit = self.slot.lock().await.quota.daily_limit;
        debug!(job_id = %job_id, daily_limit, "Daily quota exhausted");
        self.ctx
            .event_bus
            .emit(Event::QuotaExhausted {
                job_id: job_id.clone(),
                daily_limit,
                timestamp: Utc::now(),
            })
            .await;
    }

    async fn storage_failure(&self, job_id: &JobId, error: StorageError) {
        warn!(job_id = %job_id, error = %error, "Delivery history unavailable, skipping cycle");
        let mut job = self.slot.lock().await;
        job.last_error = Some(format!("storage: {}", error));
    }
}

/// Drop excluded candidates and repeated ids, keeping discovery order.
fn filter_candidates(
    found: Vec<Candidate>,
    contacted: &HashSet<CandidateId>,
    limit: usize,
) -> Vec<Candidate> {
    let mut seen: HashSet<CandidateId> = HashSet::new();
    found
        .into_iter()
        .filter(|c| !contacted.contains(&c.id))
        .filter(|c| seen.insert(c.id.clone()))
        .take(limit)
        .collect()
}
