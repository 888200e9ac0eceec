//! In-memory registry of jobs known to the scheduler.
//!
//! Every job lives in a [`JobSlot`]: the job record behind an async mutex plus
//! an in-flight flag. The flag guarantees that at most one run cycle works on
//! a job at a time; the mutex serializes counter updates between the cycle
//! and operator commands.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{Mutex, MutexGuard, RwLock};

use crate::core::job::AutomationJob;
use crate::core::types::JobId;
use crate::storage::{Storage, StorageError};

/// A registered job and its run flag.
#[derive(Debug)]
pub struct JobSlot {
    job: Mutex<AutomationJob>,
    in_flight: AtomicBool,
}

impl JobSlot {
    fn new(job: AutomationJob) -> Self {
        Self {
            job: Mutex::new(job),
            in_flight: AtomicBool::new(false),
        }
    }

    /// Lock the job record.
    pub async fn lock(&self) -> MutexGuard<'_, AutomationJob> {
        self.job.lock().await
    }

    /// Copy of the current job record.
    pub async fn snapshot(&self) -> AutomationJob {
        self.job.lock().await.clone()
    }

    /// Whether a run cycle currently holds this job.
    pub fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Claim the job for a run cycle. Returns `None` if a cycle already runs.
    pub fn try_acquire(self: &Arc<Self>) -> Option<RunGuard> {
        self.in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| RunGuard {
                slot: Arc::clone(self),
            })
    }
}

/// Releases the in-flight flag when dropped, including on panic.
#[derive(Debug)]
pub struct RunGuard {
    slot: Arc<JobSlot>,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.slot.in_flight.store(false, Ordering::Release);
    }
}

/// All jobs the scheduler manages.
#[derive(Debug, Default)]
pub struct JobRegistry {
    slots: RwLock<HashMap<JobId, Arc<JobSlot>>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a job. Returns `false` if the id is already registered.
    pub async fn insert(&self, job: AutomationJob) -> bool {
        let mut slots = self.slots.write().await;
        if slots.contains_key(&job.id) {
            return false;
        }
        slots.insert(job.id.clone(), Arc::new(JobSlot::new(job)));
        true
    }

    pub async fn get(&self, id: &JobId) -> Option<Arc<JobSlot>> {
        self.slots.read().await.get(id).cloned()
    }

    pub async fn contains(&self, id: &JobId) -> bool {
        self.slots.read().await.contains_key(id)
    }

    pub async fn len(&self) -> usize {
        self.slots.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.slots.read().await.is_empty()
    }

    /// All slots, ordered by job id.
    pub async fn slots(&self) -> Vec<(JobId, Arc<JobSlot>)> {
        let slots = self.slots.read().await;
        let mut all: Vec<_> = slots
            .iter()
            .map(|(id, slot)| (id.clone(), Arc::clone(slot)))
            .collect();
        all.sort_by(|a, b| a.0.cmp(&b.0));
        all
    }

    /// Load every persisted job that is not registered yet.
    ///
    /// Statuses and counters are taken as last committed; in-flight flags
    /// start cleared.
    pub async fn load_from<S: Storage + ?Sized>(
        &self,
        storage: &S,
    ) -> Result<Vec<JobId>, StorageError> {
        let jobs = storage.list_jobs().await?;
        let mut loaded = Vec::with_capacity(jobs.len());
        for job in jobs {
            let id = job.id.clone();
            if self.insert(job).await {
                loaded.push(id);
            }
        }
        Ok(loaded)
    }
}
