//! Storage abstraction for persisting jobs, delivery records and audit entries.
//!
//! This module provides a trait-based storage abstraction with
//! pluggable backends (in-memory, SQLite).

mod memory;
#[cfg(feature = "sqlite")]
mod sqlite;

pub use memory::InMemoryStorage;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStorage;

use async_trait::async_trait;
use std::collections::HashSet;
use thiserror::Error;

use crate::core::candidate::{AuditEntry, DeliveryRecord};
use crate::core::job::AutomationJob;
use crate::core::types::{CandidateId, JobId};

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The requested item was not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// A duplicate key was detected.
    #[error("duplicate key: {0}")]
    DuplicateKey(String),

    /// Storage lock was poisoned.
    #[error("storage lock poisoned")]
    LockPoisoned,

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    SerializationError(String),

    /// Generic storage error.
    #[error("storage error: {0}")]
    Other(String),
}

/// Storage trait for persisting scheduler state.
#[async_trait]
pub trait Storage: Send + Sync {
    // Job operations

    /// Save a new job.
    async fn save_job(&self, job: AutomationJob) -> Result<(), StorageError>;

    /// Get a job by ID.
    async fn get_job(&self, id: &JobId) -> Result<AutomationJob, StorageError>;

    /// List all jobs, oldest first.
    async fn list_jobs(&self) -> Result<Vec<AutomationJob>, StorageError>;

    /// Overwrite an existing job.
    ///
    /// Jobs are never removed: their delivery history keeps referencing them.
    async fn update_job(&self, job: AutomationJob) -> Result<(), StorageError>;

    // Delivery operations

    /// Append a delivery record.
    ///
    /// A second `delivered` record for the same (job, candidate) pair is
    /// rejected with [`StorageError::DuplicateKey`].
    async fn record_delivery(&self, record: DeliveryRecord) -> Result<(), StorageError>;

    /// Delivery records of a job in the order they were written.
    async fn list_deliveries(&self, job_id: &JobId) -> Result<Vec<DeliveryRecord>, StorageError>;

    /// Candidates with any delivery record for a job.
    async fn contacted_candidates(&self, job_id: &JobId)
    -> Result<HashSet<CandidateId>, StorageError>;

    // Audit operations

    /// Append an audit entry.
    async fn append_audit(&self, entry: AuditEntry) -> Result<(), StorageError>;

    /// Most recent audit entries for a job, newest first.
    /// Returns at most `limit` entries.
    async fn list_audit(&self, job_id: &JobId, limit: usize)
    -> Result<Vec<AuditEntry>, StorageError>;
}
