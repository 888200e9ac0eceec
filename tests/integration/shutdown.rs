//! Graceful shutdown integration tests.

use crate::common::{TEST_WAIT, scheduler, spec};
use outreach::testing::ScriptedAdapter;
use outreach::{InMemoryStorage, JobId, SchedulerError, SchedulerState, Storage};
use std::sync::Arc;
use std::time::{Duration, Instant};

async fn wait_in_flight(handle: &outreach::SchedulerHandle, job_id: &str) {
    tokio::time::timeout(TEST_WAIT, async {
        while !handle.job_stats(job_id).await.unwrap().in_flight {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
}

/// Test: Shutdown lets an in-flight cycle finish and persist its counters.
#[tokio::test]
async fn test_shutdown_waits_for_in_flight_cycle() {
    let storage = Arc::new(InMemoryStorage::new());
    let adapter = Arc::new(
        ScriptedAdapter::new()
            .with_candidates(["alice"])
            .with_delivery_delay(Duration::from_millis(200)),
    );
    let (handle, task) = scheduler(Arc::clone(&storage), adapter.clone()).start().await;

    handle.create_job(spec("slow")).await.unwrap();
    handle.tick_now().await.unwrap();
    wait_in_flight(&handle, "slow").await;

    handle.shutdown().await.unwrap();
    task.await.unwrap();

    assert_eq!(adapter.delivered_to(), vec!["alice"]);
    let job = storage.get_job(&JobId::new("slow")).await.unwrap();
    assert_eq!(job.quota.total_sent_count, 1);
    assert!(job.last_run_at.is_some());
    assert_eq!(storage.list_deliveries(&job.id).await.unwrap().len(), 1);
}

/// Test: Shutdown stops waiting once the timeout has passed.
#[tokio::test]
async fn test_shutdown_timeout_bounds_wait() {
    let adapter = Arc::new(
        ScriptedAdapter::new()
            .with_candidates(["alice"])
            .with_delivery_delay(Duration::from_secs(3)),
    );
    let scheduler = scheduler(Arc::new(InMemoryStorage::new()), adapter)
        .with_shutdown_timeout(Duration::from_millis(100));
    let (handle, task) = scheduler.start().await;

    handle.create_job(spec("stuck")).await.unwrap();
    handle.tick_now().await.unwrap();
    wait_in_flight(&handle, "stuck").await;

    let started = Instant::now();
    handle.shutdown().await.unwrap();
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(handle.state().await, SchedulerState::Stopped);
    task.await.unwrap();
}

/// Test: The handle reports a closed scheduler after shutdown.
#[tokio::test]
async fn test_commands_fail_after_shutdown() {
    let (handle, task) = scheduler(
        Arc::new(InMemoryStorage::new()),
        Arc::new(ScriptedAdapter::new()),
    )
    .start()
    .await;

    assert!(handle.is_running().await);
    handle.shutdown().await.unwrap();
    task.await.unwrap();

    assert!(matches!(
        handle.create_job(spec("late")).await,
        Err(SchedulerError::ChannelError(_))
    ));
    assert!(matches!(
        handle.list_jobs().await,
        Err(SchedulerError::ChannelError(_))
    ));
}
