//! Testing utilities for users of the outreach library.
//!
//! This module provides helpers for exercising jobs without a real platform:
//!
//! - [`ScriptedAdapter`]: A platform adapter with scripted discovery and delivery outcomes
//! - [`StaticReviser`]: A message reviser that always answers with the same text
//! - [`RecordingHandler`]: An event handler that keeps every event it sees
//! - [`FlakyStorage`]: In-memory storage whose delivery writes can be made to fail
//! - [`wait_for_cycle`]: Polls a scheduler until a job's next run cycle has finished

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use crate::core::candidate::{AuditEntry, Candidate, DeliveryRecord};
use crate::core::job::{AutomationJob, JobStats};
use crate::core::types::{CandidateId, JobId, Platform};
use crate::events::{Event, EventHandler};
use crate::platform::{AdapterError, MessageReviser, PlatformAdapter};
use crate::scheduler::SchedulerHandle;
use crate::storage::{InMemoryStorage, Storage, StorageError};

/// Outcomes observed by a [`ScriptedAdapter`].
#[derive(Debug, Default)]
struct ScriptLog {
    delivered: Vec<(String, String)>,
    delivery_attempts: usize,
    discovery_calls: usize,
}

/// A platform adapter whose behavior is scripted up front.
///
/// Discovery returns the configured candidates minus the exclusions, capped
/// at the requested limit. Delivery succeeds unless a failure was scripted
/// for the recipient.
///
/// # Example
///
/// ```
/// use outreach::testing::ScriptedAdapter;
///
/// // Two candidates; delivering to "bob" fails with a transient error
/// let adapter = ScriptedAdapter::new()
///     .with_candidates(["alice", "bob"])
///     .fail_delivery_to("bob", "user blocks DMs");
///
/// assert_eq!(adapter.delivery_attempts(), 0);
/// ```
pub struct ScriptedAdapter {
    candidates: Vec<Candidate>,
    delivery_failures: HashMap<String, String>,
    every_delivery_fails: Option<String>,
    fatal_delivery: Option<String>,
    fatal_discovery: Option<String>,
    transient_discoveries_left: AtomicU32,
    delivery_delay: Duration,
    connection_delay: Duration,
    connected: AtomicBool,
    log: Mutex<ScriptLog>,
}

impl ScriptedAdapter {
    /// Create an adapter with no candidates that accepts every delivery.
    pub fn new() -> Self {
        Self {
            candidates: Vec::new(),
            delivery_failures: HashMap::new(),
            every_delivery_fails: None,
            fatal_delivery: None,
            fatal_discovery: None,
            transient_discoveries_left: AtomicU32::new(0),
            delivery_delay: Duration::ZERO,
            connection_delay: Duration::ZERO,
            connected: AtomicBool::new(true),
            log: Mutex::new(ScriptLog::default()),
        }
    }

    /// Add candidates by username.
    pub fn with_candidates<'a>(mut self, usernames: impl IntoIterator<Item = &'a str>) -> Self {
        self.candidates
            .extend(usernames.into_iter().map(Candidate::new));
        self
    }

    /// Add fully built candidates.
    pub fn with_candidate_list(mut self, candidates: Vec<Candidate>) -> Self {
        self.candidates.extend(candidates);
        self
    }

    /// Deliveries to `username` fail with a transient error.
    pub fn fail_delivery_to(mut self, username: &str, reason: impl Into<String>) -> Self {
        self.delivery_failures
            .insert(username.to_string(), reason.into());
        self
    }

    /// Every delivery fails with a transient error.
    pub fn fail_every_delivery(mut self, reason: impl Into<String>) -> Self {
        self.every_delivery_fails = Some(reason.into());
        self
    }

    /// Every delivery fails with a fatal error.
    pub fn fatal_delivery(mut self, reason: impl Into<String>) -> Self {
        self.fatal_delivery = Some(reason.into());
        self
    }

    /// The next `times` discovery calls fail with a transient error.
    pub fn transient_discovery(self, times: u32) -> Self {
        self.transient_discoveries_left.store(times, Ordering::SeqCst);
        self
    }

    /// Every discovery call fails with a fatal error.
    pub fn fatal_discovery(mut self, reason: impl Into<String>) -> Self {
        self.fatal_discovery = Some(reason.into());
        self
    }

    /// Each connection check takes `delay` before it answers.
    pub fn with_connection_delay(mut self, delay: Duration) -> Self {
        self.connection_delay = delay;
        self
    }

    /// Each delivery takes `delay` before it resolves.
    pub fn with_delivery_delay(mut self, delay: Duration) -> Self {
        self.delivery_delay = delay;
        self
    }

    /// Change the answer of [`PlatformAdapter::test_connection`].
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Usernames that received a message, in delivery order.
    pub fn delivered_to(&self) -> Vec<String> {
        self.log
            .lock()
            .map(|log| log.delivered.iter().map(|(u, _)| u.clone()).collect())
            .unwrap_or_default()
    }

    /// Messages that were delivered, in delivery order.
    pub fn messages(&self) -> Vec<String> {
        self.log
            .lock()
            .map(|log| log.delivered.iter().map(|(_, m)| m.clone()).collect())
            .unwrap_or_default()
    }

    /// Delivery attempts, successful or not.
    pub fn delivery_attempts(&self) -> usize {
        self.log.lock().map(|log| log.delivery_attempts).unwrap_or(0)
    }

    /// Discovery calls, successful or not.
    pub fn discovery_calls(&self) -> usize {
        self.log.lock().map(|log| log.discovery_calls).unwrap_or(0)
    }

    fn record(&self, update: impl FnOnce(&mut ScriptLog)) {
        if let Ok(mut log) = self.log.lock() {
            update(&mut log);
        }
    }
}

impl Default for ScriptedAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PlatformAdapter for ScriptedAdapter {
    async fn discover(
        &self,
        _keywords: &str,
        excluding: &HashSet<CandidateId>,
        limit: usize,
    ) -> Result<Vec<Candidate>, AdapterError> {
        self.record(|log| log.discovery_calls += 1);

        if let Some(reason) = &self.fatal_discovery {
            return Err(AdapterError::Fatal(reason.clone()));
        }
        let transient = self
            .transient_discoveries_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if transient {
            return Err(AdapterError::Transient("rate limited".to_string()));
        }

        Ok(self
            .candidates
            .iter()
            .filter(|c| !excluding.contains(&c.id))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn deliver(&self, candidate: &Candidate, message: &str) -> Result<(), AdapterError> {
        self.record(|log| log.delivery_attempts += 1);
        if !self.delivery_delay.is_zero() {
            tokio::time::sleep(self.delivery_delay).await;
        }

        if let Some(reason) = &self.fatal_delivery {
            return Err(AdapterError::Fatal(reason.clone()));
        }
        if let Some(reason) = &self.every_delivery_fails {
            return Err(AdapterError::Transient(reason.clone()));
        }
        if let Some(reason) = self.delivery_failures.get(&candidate.username) {
            return Err(AdapterError::Transient(reason.clone()));
        }

        self.record(|log| {
            log.delivered
                .push((candidate.username.clone(), message.to_string()))
        });
        Ok(())
    }

    async fn test_connection(&self) -> bool {
        if !self.connection_delay.is_zero() {
            tokio::time::sleep(self.connection_delay).await;
        }
        self.connected.load(Ordering::SeqCst)
    }
}

/// A reviser that replaces every message with a fixed text.
pub struct StaticReviser {
    text: String,
    calls: AtomicU32,
}

impl StaticReviser {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            calls: AtomicU32::new(0),
        }
    }

    /// Number of revision requests received.
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MessageReviser for StaticReviser {
    async fn revise(&self, _platform: Platform, _message: &str, _reasons: &[String]) -> Option<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Some(self.text.clone())
    }
}

/// Event handler that records every event.
#[derive(Default)]
pub struct RecordingHandler {
    events: tokio::sync::Mutex<Vec<Event>>,
}

impl RecordingHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// All events seen so far, in emission order.
    pub async fn events(&self) -> Vec<Event> {
        self.events.lock().await.clone()
    }
}

#[async_trait]
impl EventHandler for RecordingHandler {
    async fn handle(&self, event: &Event) {
        self.events.lock().await.push(event.clone());
    }
}

/// In-memory storage whose next delivery writes fail.
///
/// Everything else is served by the wrapped [`InMemoryStorage`].
#[derive(Default)]
pub struct FlakyStorage {
    inner: InMemoryStorage,
    failing_delivery_writes: AtomicU32,
}

impl FlakyStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// The next `times` calls to `record_delivery` fail without writing.
    pub fn fail_delivery_writes(&self, times: u32) {
        self.failing_delivery_writes.store(times, Ordering::SeqCst);
    }
}

#[async_trait]
impl Storage for FlakyStorage {
    async fn save_job(&self, job: AutomationJob) -> Result<(), StorageError> {
        self.inner.save_job(job).await
    }

    async fn get_job(&self, id: &JobId) -> Result<AutomationJob, StorageError> {
        self.inner.get_job(id).await
    }

    async fn list_jobs(&self) -> Result<Vec<AutomationJob>, StorageError> {
        self.inner.list_jobs().await
    }

    async fn update_job(&self, job: AutomationJob) -> Result<(), StorageError> {
        self.inner.update_job(job).await
    }

    async fn record_delivery(&self, record: DeliveryRecord) -> Result<(), StorageError> {
        let fail = self
            .failing_delivery_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if fail {
            return Err(StorageError::Other("disk full".to_string()));
        }
        self.inner.record_delivery(record).await
    }

    async fn list_deliveries(&self, job_id: &JobId) -> Result<Vec<DeliveryRecord>, StorageError> {
        self.inner.list_deliveries(job_id).await
    }

    async fn contacted_candidates(
        &self,
        job_id: &JobId,
    ) -> Result<HashSet<CandidateId>, StorageError> {
        self.inner.contacted_candidates(job_id).await
    }

    async fn append_audit(&self, entry: AuditEntry) -> Result<(), StorageError> {
        self.inner.append_audit(entry).await
    }

    async fn list_audit(
        &self,
        job_id: &JobId,
        limit: usize,
    ) -> Result<Vec<AuditEntry>, StorageError> {
        self.inner.list_audit(job_id, limit).await
    }
}

/// Wait until a run cycle of `job_id` dispatched at or after `since` has
/// finished, and return the job's statistics at that point.
///
/// Panics if that does not happen within `timeout`.
pub async fn wait_for_cycle(
    handle: &SchedulerHandle,
    job_id: &str,
    since: DateTime<Utc>,
    timeout: Duration,
) -> JobStats {
    let poll = async {
        loop {
            if let Ok(stats) = handle.job_stats(job_id).await {
                let ran = stats.last_run_at.is_some_and(|t| t >= since);
                if ran && !stats.in_flight {
                    return stats;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    };
    match tokio::time::timeout(timeout, poll).await {
        Ok(stats) => stats,
        Err(_) => panic!("no finished run cycle for job {} within {:?}", job_id, timeout),
    }
}
