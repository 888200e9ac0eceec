//! SQLite storage implementation.
//!
//! Provides persistent storage using SQLite database.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::Row;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use std::collections::HashSet;
use std::path::Path;
use std::str::FromStr;

use super::{Storage, StorageError};
use crate::core::candidate::{AuditEntry, AuditKind, DeliveryOutcome, DeliveryRecord};
use crate::core::job::{AutomationJob, JobStatus};
use crate::core::quota::Quota;
use crate::core::types::{CampaignId, CandidateId, JobId, Platform};

const JOB_COLUMNS: &str = "id, campaign_id, user_id, platform, search_keywords, message_template, \
    status, daily_limit, daily_sent_count, total_sent_count, window_start, success_count, \
    error_count, consecutive_failures, transient_failures, retry_after, last_error, last_run_at, \
    created_at, updated_at";

/// SQLite storage backend.
///
/// Provides persistent storage with automatic schema migration.
pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    /// Create a new SQLite storage with the given database path.
    ///
    /// Creates the database file if it doesn't exist and runs migrations.
    pub async fn new(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path_str = path.as_ref().to_string_lossy();
        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path_str))
            .map_err(|e| StorageError::Other(e.to_string()))?
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::Other(e.to_string()))?;

        let storage = Self { pool };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Create an in-memory SQLite database (useful for testing).
    pub async fn in_memory() -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| StorageError::Other(e.to_string()))?
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::Other(e.to_string()))?;

        let storage = Self { pool };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Run database migrations.
    async fn run_migrations(&self) -> Result<(), StorageError> {
        let schema = include_str!("../../migrations/001_initial_schema.sql");
        sqlx::raw_sql(schema)
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Other(format!("migration failed: {}", e)))?;
        Ok(())
    }

    /// Close the database connection pool.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

// Helper functions for time conversion
fn to_millis(time: DateTime<Utc>) -> i64 {
    time.timestamp_millis()
}

fn from_millis(millis: i64) -> Result<DateTime<Utc>, StorageError> {
    DateTime::from_timestamp_millis(millis).ok_or_else(|| {
        StorageError::SerializationError(format!("timestamp out of range: {}", millis))
    })
}

fn db_err(e: sqlx::Error) -> StorageError {
    StorageError::Other(e.to_string())
}

fn get_err(e: sqlx::Error) -> StorageError {
    StorageError::SerializationError(e.to_string())
}

/// Read an integer column into a narrower or unsigned type.
fn counter<T: TryFrom<i64>>(row: &SqliteRow, column: &str) -> Result<T, StorageError> {
    let value: i64 = row.try_get(column).map_err(get_err)?;
    T::try_from(value).map_err(|_| {
        StorageError::SerializationError(format!("{} out of range: {}", column, value))
    })
}

fn timestamp(row: &SqliteRow, column: &str) -> Result<DateTime<Utc>, StorageError> {
    from_millis(row.try_get(column).map_err(get_err)?)
}

fn optional_timestamp(row: &SqliteRow, column: &str) -> Result<Option<DateTime<Utc>>, StorageError> {
    row.try_get::<Option<i64>, _>(column)
        .map_err(get_err)?
        .map(from_millis)
        .transpose()
}

fn row_to_job(row: &SqliteRow) -> Result<AutomationJob, StorageError> {
    let platform: String = row.try_get("platform").map_err(get_err)?;
    let platform = Platform::from_str(&platform)
        .map_err(|e| StorageError::SerializationError(e.to_string()))?;
    let status: String = row.try_get("status").map_err(get_err)?;
    let status = JobStatus::parse(&status)
        .ok_or_else(|| StorageError::SerializationError(format!("unknown status: {}", status)))?;

    let quota = Quota {
        daily_limit: counter(row, "daily_limit")?,
        daily_sent_count: counter(row, "daily_sent_count")?,
        total_sent_count: counter(row, "total_sent_count")?,
        window_start: timestamp(row, "window_start")?,
    };

    let mut job = AutomationJob::restore(
        JobId::new(row.try_get::<String, _>("id").map_err(get_err)?),
        CampaignId::new(row.try_get::<String, _>("campaign_id").map_err(get_err)?),
        row.try_get("user_id").map_err(get_err)?,
        platform,
        row.try_get("search_keywords").map_err(get_err)?,
        row.try_get("message_template").map_err(get_err)?,
        status,
        quota,
        timestamp(row, "created_at")?,
    );
    job.success_count = counter(row, "success_count")?;
    job.error_count = counter(row, "error_count")?;
    job.consecutive_failures = counter(row, "consecutive_failures")?;
    job.transient_failures = counter(row, "transient_failures")?;
    job.retry_after = optional_timestamp(row, "retry_after")?;
    job.last_error = row.try_get("last_error").map_err(get_err)?;
    job.last_run_at = optional_timestamp(row, "last_run_at")?;
    job.updated_at = timestamp(row, "updated_at")?;
    Ok(job)
}

fn row_to_delivery(row: &SqliteRow) -> Result<DeliveryRecord, StorageError> {
    let id: String = row.try_get("id").map_err(get_err)?;
    let outcome: String = row.try_get("outcome").map_err(get_err)?;
    let outcome = match outcome.as_str() {
        "delivered" => DeliveryOutcome::Delivered,
        _ => DeliveryOutcome::Failed {
            reason: row
                .try_get::<Option<String>, _>("reason")
                .map_err(get_err)?
                .unwrap_or_default(),
        },
    };

    Ok(DeliveryRecord {
        id: id
            .parse()
            .map_err(|e| StorageError::SerializationError(format!("invalid uuid: {}", e)))?,
        job_id: JobId::new(row.try_get::<String, _>("job_id").map_err(get_err)?),
        candidate_id: CandidateId::new(row.try_get::<String, _>("candidate_id").map_err(get_err)?),
        timestamp: timestamp(row, "timestamp")?,
        outcome,
        message_preview: row.try_get("message_preview").map_err(get_err)?,
    })
}

#[async_trait]
impl Storage for SqliteStorage {
    async fn save_job(&self, job: AutomationJob) -> Result<(), StorageError> {
        let result = sqlx::query(&format!(
            "INSERT INTO jobs ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            JOB_COLUMNS
        ))
        .bind(job.id.as_str())
        .bind(job.campaign_id.as_str())
        .bind(&job.user_id)
        .bind(job.platform.as_str())
        .bind(&job.search_keywords)
        .bind(&job.message_template)
        .bind(job.status().as_str())
        .bind(i64::from(job.quota.daily_limit))
        .bind(i64::from(job.quota.daily_sent_count))
        .bind(job.quota.total_sent_count as i64)
        .bind(to_millis(job.quota.window_start))
        .bind(job.success_count as i64)
        .bind(job.error_count as i64)
        .bind(i64::from(job.consecutive_failures))
        .bind(i64::from(job.transient_failures))
        .bind(job.retry_after.map(to_millis))
        .bind(&job.last_error)
        .bind(job.last_run_at.map(to_millis))
        .bind(to_millis(job.created_at))
        .bind(to_millis(job.updated_at))
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                Err(StorageError::DuplicateKey(format!("job: {}", job.id)))
            }
            Err(e) => Err(db_err(e)),
        }
    }

    async fn get_job(&self, id: &JobId) -> Result<AutomationJob, StorageError> {
        let row = sqlx::query(&format!("SELECT {} FROM jobs WHERE id = ?", JOB_COLUMNS))
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?
            .ok_or_else(|| StorageError::NotFound(format!("job: {}", id)))?;
        row_to_job(&row)
    }

    async fn list_jobs(&self) -> Result<Vec<AutomationJob>, StorageError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM jobs ORDER BY created_at, id",
            JOB_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.iter().map(row_to_job).collect()
    }

    async fn update_job(&self, job: AutomationJob) -> Result<(), StorageError> {
        let result = sqlx::query(
            r#"
            UPDATE jobs SET
                campaign_id = ?, user_id = ?, platform = ?, search_keywords = ?,
                message_template = ?, status = ?, daily_limit = ?, daily_sent_count = ?,
                total_sent_count = ?, window_start = ?, success_count = ?, error_count = ?,
                consecutive_failures = ?, transient_failures = ?, retry_after = ?,
                last_error = ?, last_run_at = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(job.campaign_id.as_str())
        .bind(&job.user_id)
        .bind(job.platform.as_str())
        .bind(&job.search_keywords)
        .bind(&job.message_template)
        .bind(job.status().as_str())
        .bind(i64::from(job.quota.daily_limit))
        .bind(i64::from(job.quota.daily_sent_count))
        .bind(job.quota.total_sent_count as i64)
        .bind(to_millis(job.quota.window_start))
        .bind(job.success_count as i64)
        .bind(job.error_count as i64)
        .bind(i64::from(job.consecutive_failures))
        .bind(i64::from(job.transient_failures))
        .bind(job.retry_after.map(to_millis))
        .bind(&job.last_error)
        .bind(job.last_run_at.map(to_millis))
        .bind(to_millis(job.updated_at))
        .bind(job.id.as_str())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound(format!("job: {}", job.id)));
        }
        Ok(())
    }

    async fn record_delivery(&self, record: DeliveryRecord) -> Result<(), StorageError> {
        let (outcome, reason) = match &record.outcome {
            DeliveryOutcome::Delivered => ("delivered", None),
            DeliveryOutcome::Failed { reason } => ("failed", Some(reason.as_str())),
        };

        let result = sqlx::query(
            r#"
            INSERT INTO deliveries (id, job_id, candidate_id, timestamp, outcome, reason, message_preview)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(record.id.to_string())
        .bind(record.job_id.as_str())
        .bind(record.candidate_id.as_str())
        .bind(to_millis(record.timestamp))
        .bind(outcome)
        .bind(reason)
        .bind(&record.message_preview)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                Err(StorageError::DuplicateKey(format!(
                    "delivery: {}/{}",
                    record.job_id, record.candidate_id
                )))
            }
            Err(sqlx::Error::Database(e)) if e.is_foreign_key_violation() => {
                Err(StorageError::NotFound(format!("job: {}", record.job_id)))
            }
            Err(e) => Err(db_err(e)),
        }
    }

    async fn list_deliveries(&self, job_id: &JobId) -> Result<Vec<DeliveryRecord>, StorageError> {
        let rows = sqlx::query(
            "SELECT id, job_id, candidate_id, timestamp, outcome, reason, message_preview \
             FROM deliveries WHERE job_id = ? ORDER BY seq",
        )
        .bind(job_id.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.iter().map(row_to_delivery).collect()
    }

    async fn contacted_candidates(
        &self,
        job_id: &JobId,
    ) -> Result<HashSet<CandidateId>, StorageError> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT DISTINCT candidate_id FROM deliveries WHERE job_id = ?")
                .bind(job_id.as_str())
                .fetch_all(&self.pool)
                .await
                .map_err(db_err)?;

        Ok(rows.into_iter().map(|r| CandidateId::new(r.0)).collect())
    }

    async fn append_audit(&self, entry: AuditEntry) -> Result<(), StorageError> {
        let result = sqlx::query(
            "INSERT INTO audit_log (job_id, timestamp, kind, candidate_id, detail) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(entry.job_id.as_str())
        .bind(to_millis(entry.timestamp))
        .bind(entry.kind.as_str())
        .bind(entry.candidate_id.as_ref().map(|c| c.as_str()))
        .bind(&entry.detail)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(e)) if e.is_foreign_key_violation() => {
                Err(StorageError::NotFound(format!("job: {}", entry.job_id)))
            }
            Err(e) => Err(db_err(e)),
        }
    }

    async fn list_audit(
        &self,
        job_id: &JobId,
        limit: usize,
    ) -> Result<Vec<AuditEntry>, StorageError> {
        let rows: Vec<(String, i64, String, Option<String>, String)> = sqlx::query_as(
            "SELECT job_id, timestamp, kind, candidate_id, detail FROM audit_log \
             WHERE job_id = ? ORDER BY seq DESC LIMIT ?",
        )
        .bind(job_id.as_str())
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.into_iter()
            .map(|row| {
                let kind = AuditKind::parse(&row.2).ok_or_else(|| {
                    StorageError::SerializationError(format!("unknown audit kind: {}", row.2))
                })?;
                Ok(AuditEntry {
                    job_id: JobId::new(row.0),
                    timestamp: from_millis(row.1)?,
                    kind,
                    candidate_id: row.3.map(CandidateId::new),
                    detail: row.4,
                })
            })
            .collect()
    }
}
