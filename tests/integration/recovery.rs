//! Recovery scenario integration tests.
//!
//! Tests that verify jobs, counters and dedup history survive a restart.

use crate::common::{run_cycle, scheduler, spec};
use outreach::testing::ScriptedAdapter;
use outreach::{InMemoryStorage, JobStatus, SchedulerError};
use std::sync::Arc;

/// Test: Recover restores jobs from shared storage with their counters.
#[tokio::test]
async fn test_recover_from_shared_storage() {
    let storage = Arc::new(InMemoryStorage::new());
    let adapter = Arc::new(ScriptedAdapter::new().with_candidates(["alice", "bob"]));

    {
        let (handle, task) = scheduler(Arc::clone(&storage), adapter.clone()).start().await;
        handle.create_job(spec("kept")).await.unwrap();
        handle.create_job(spec("paused")).await.unwrap();
        handle.pause_job("paused").await.unwrap();
        run_cycle(&handle, "kept").await;
        handle.shutdown().await.unwrap();
        let _ = task.await;
    }

    let restarted = scheduler(Arc::clone(&storage), adapter.clone());
    let recovered = restarted.recover().await.unwrap();
    assert_eq!(recovered.len(), 2);

    let (handle, task) = restarted.start().await;
    let kept = handle.job_stats("kept").await.unwrap();
    assert_eq!(kept.status, JobStatus::Active);
    assert_eq!(kept.total_sent, 2);
    assert!(!kept.in_flight);
    assert_eq!(
        handle.job_stats("paused").await.unwrap().status,
        JobStatus::Paused
    );

    // Jobs loaded from storage cannot be created a second time
    assert!(matches!(
        handle.create_job(spec("kept")).await,
        Err(SchedulerError::JobExists(_))
    ));

    handle.shutdown().await.unwrap();
    let _ = task.await;
}

#[cfg(feature = "sqlite")]
mod sqlite {
    use super::*;
    use outreach::SqliteStorage;
    use tempfile::TempDir;

    /// Test: A restarted process picks up from the database file without
    /// messaging anyone twice.
    #[tokio::test]
    async fn test_restart_from_database_file() {
        let dir = TempDir::new().unwrap();
        let db = dir.path().join("outreach.db");
        let adapter = Arc::new(ScriptedAdapter::new().with_candidates(["alice", "bob"]));

        {
            let storage = Arc::new(SqliteStorage::new(&db).await.unwrap());
            let (handle, task) = scheduler(Arc::clone(&storage), adapter.clone()).start().await;
            handle
                .create_job(spec("persisted").with_daily_limit(1))
                .await
                .unwrap();
            let stats = run_cycle(&handle, "persisted").await;
            assert_eq!(stats.total_sent, 1);
            handle.shutdown().await.unwrap();
            let _ = task.await;
            storage.close().await;
        }

        let storage = Arc::new(SqliteStorage::new(&db).await.unwrap());
        let restarted = scheduler(Arc::clone(&storage), adapter.clone());
        restarted.recover().await.unwrap();
        let (handle, task) = restarted.start().await;

        let stats = handle.job_stats("persisted").await.unwrap();
        assert_eq!(stats.total_sent, 1);
        assert_eq!(stats.daily_sent, 1);
        assert_eq!(stats.remaining_quota, 0);

        let records = handle.deliveries("persisted").await.unwrap();
        assert_eq!(records.len(), 1);
        let audit = handle.audit_log("persisted", 50).await.unwrap();
        assert!(!audit.is_empty());

        // Raise the limit; the second run must skip the candidate already messaged
        let update = outreach::JobUpdate {
            daily_limit: Some(5),
            ..Default::default()
        };
        handle.update_job("persisted", update).await.unwrap();
        let stats = run_cycle(&handle, "persisted").await;
        assert_eq!(stats.total_sent, 2);
        assert_eq!(adapter.delivered_to(), vec!["alice", "bob"]);

        handle.shutdown().await.unwrap();
        let _ = task.await;
        storage.close().await;
    }
}
