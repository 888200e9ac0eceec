//! In-memory storage implementation.
//!
//! Provides a thread-safe in-memory backend for testing and development.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use super::{Storage, StorageError};
use crate::core::candidate::{AuditEntry, DeliveryRecord};
use crate::core::job::AutomationJob;
use crate::core::types::{CandidateId, JobId};

/// In-memory storage backend.
///
/// Thread-safe storage using RwLock for concurrent access.
/// Data is not persisted across restarts.
pub struct InMemoryStorage {
    jobs: RwLock<HashMap<JobId, AutomationJob>>,
    deliveries: RwLock<HashMap<JobId, Vec<DeliveryRecord>>>,
    audit: RwLock<HashMap<JobId, Vec<AuditEntry>>>,
}

impl InMemoryStorage {
    /// Create a new empty in-memory storage.
    pub fn new() -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
            deliveries: RwLock::new(HashMap::new()),
            audit: RwLock::new(HashMap::new()),
        }
    }

    fn ensure_job(&self, id: &JobId) -> Result<(), StorageError> {
        let jobs = self.jobs.read().map_err(|_| StorageError::LockPoisoned)?;
        if !jobs.contains_key(id) {
            return Err(StorageError::NotFound(format!("job: {}", id)));
        }
        Ok(())
    }
}

impl Default for InMemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Storage for InMemoryStorage {
    async fn save_job(&self, job: AutomationJob) -> Result<(), StorageError> {
        let mut jobs = self.jobs.write().map_err(|_| StorageError::LockPoisoned)?;
        if jobs.contains_key(&job.id) {
            return Err(StorageError::DuplicateKey(format!("job: {}", job.id)));
        }
        jobs.insert(job.id.clone(), job);
        Ok(())
    }

    async fn get_job(&self, id: &JobId) -> Result<AutomationJob, StorageError> {
        let jobs = self.jobs.read().map_err(|_| StorageError::LockPoisoned)?;
        jobs.get(id)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(format!("job: {}", id)))
    }

    async fn list_jobs(&self) -> Result<Vec<AutomationJob>, StorageError> {
        let jobs = self.jobs.read().map_err(|_| StorageError::LockPoisoned)?;
        let mut result: Vec<_> = jobs.values().cloned().collect();
        result.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(result)
    }

    async fn update_job(&self, job: AutomationJob) -> Result<(), StorageError> {
        let mut jobs = self.jobs.write().map_err(|_| StorageError::LockPoisoned)?;
        match jobs.get_mut(&job.id) {
            Some(slot) => {
                *slot = job;
                Ok(())
            }
            None => Err(StorageError::NotFound(format!("job: {}", job.id))),
        }
    }

    async fn record_delivery(&self, record: DeliveryRecord) -> Result<(), StorageError> {
        self.ensure_job(&record.job_id)?;
        let mut deliveries = self
            .deliveries
            .write()
            .map_err(|_| StorageError::LockPoisoned)?;
        let records = deliveries.entry(record.job_id.clone()).or_default();

        if record.outcome.is_delivered()
            && records
                .iter()
                .any(|r| r.candidate_id == record.candidate_id && r.outcome.is_delivered())
        {
            return Err(StorageError::DuplicateKey(format!(
                "delivery: {}/{}",
                record.job_id, record.candidate_id
            )));
        }
        records.push(record);
        Ok(())
    }

    async fn list_deliveries(&self, job_id: &JobId) -> Result<Vec<DeliveryRecord>, StorageError> {
        let deliveries = self
            .deliveries
            .read()
            .map_err(|_| StorageError::LockPoisoned)?;
        Ok(deliveries.get(job_id).cloned().unwrap_or_default())
    }

    async fn contacted_candidates(
        &self,
        job_id: &JobId,
    ) -> Result<HashSet<CandidateId>, StorageError> {
        let deliveries = self
            .deliveries
            .read()
            .map_err(|_| StorageError::LockPoisoned)?;
        Ok(deliveries
            .get(job_id)
            .map(|records| records.iter().map(|r| r.candidate_id.clone()).collect())
            .unwrap_or_default())
    }

    async fn append_audit(&self, entry: AuditEntry) -> Result<(), StorageError> {
        self.ensure_job(&entry.job_id)?;
        let mut audit = self.audit.write().map_err(|_| StorageError::LockPoisoned)?;
        audit.entry(entry.job_id.clone()).or_default().push(entry);
        Ok(())
    }

    async fn list_audit(
        &self,
        job_id: &JobId,
        limit: usize,
    ) -> Result<Vec<AuditEntry>, StorageError> {
        let audit = self.audit.read().map_err(|_| StorageError::LockPoisoned)?;
        Ok(audit
            .get(job_id)
            .map(|entries| entries.iter().rev().take(limit).cloned().collect())
            .unwrap_or_default())
    }
}
