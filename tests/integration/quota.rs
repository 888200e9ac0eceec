//! Daily quota integration tests.
//!
//! Tests for the rolling UTC window and for reservations racing on one job.

use crate::common::memory_scheduler;
use chrono::{DateTime, TimeZone, Utc};
use outreach::testing::ScriptedAdapter;
use outreach::{AuditKind, AutomationJob, JobId, JobSpec, Platform, Storage};
use std::sync::Arc;
use tokio::sync::Barrier;

fn at(day: u32, h: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, day, h, 0, 0).unwrap()
}

fn job(id: &str, limit: u32, created: DateTime<Utc>) -> AutomationJob {
    let spec = JobSpec::new(id, "spring", Platform::Reddit, "kw", "Hi {username}")
        .with_daily_limit(limit);
    AutomationJob::new(spec, created).unwrap()
}

/// Test: Spent budget comes back at the next UTC midnight, and only then.
#[tokio::test]
async fn test_quota_resets_at_window_boundary() {
    let adapter = Arc::new(ScriptedAdapter::new().with_candidates(["a", "b", "c"]));
    let scheduler = memory_scheduler(adapter.clone());
    let storage = scheduler.storage();
    let registry = scheduler.registry();
    let dispatcher = scheduler.dispatcher();

    let created = at(15, 8);
    storage.save_job(job("daily", 2, created)).await.unwrap();
    registry.insert(job("daily", 2, created)).await;

    let mut reports = Vec::new();
    for now in [at(15, 9), at(15, 23), at(16, 0)] {
        for cycle in dispatcher.dispatch(now).await {
            reports.push(cycle.handle.await.unwrap());
        }
    }

    assert_eq!(reports.len(), 3);
    assert_eq!(reports[0].delivered, 2);
    assert!(reports[0].quota_exhausted);
    assert_eq!(reports[1].delivered, 0);
    assert_eq!(reports[2].delivered, 1);
    assert_eq!(adapter.delivered_to(), vec!["a", "b", "c"]);

    let slot = registry.get(&JobId::new("daily")).await.unwrap();
    let snapshot = slot.snapshot().await;
    assert_eq!(snapshot.quota.window_start, at(16, 0));
    assert_eq!(snapshot.quota.daily_sent_count, 1);
    assert_eq!(snapshot.quota.total_sent_count, 3);

    let stored = storage.get_job(&JobId::new("daily")).await.unwrap();
    assert_eq!(stored.quota, snapshot.quota);

    let audit = storage.list_audit(&JobId::new("daily"), 100).await.unwrap();
    assert_eq!(
        audit.iter().filter(|e| e.kind == AuditKind::QuotaReset).count(),
        1
    );
}

/// Test: Concurrent reservations never exceed the daily limit.
#[tokio::test]
async fn test_concurrent_reservations_respect_limit() {
    let scheduler = memory_scheduler(Arc::new(ScriptedAdapter::new()));
    let registry = scheduler.registry();
    registry.insert(job("racy", 5, Utc::now())).await;
    let slot = registry.get(&JobId::new("racy")).await.unwrap();

    let mut tasks = Vec::new();
    for _ in 0..50 {
        let slot = Arc::clone(&slot);
        tasks.push(tokio::spawn(async move {
            slot.lock().await.quota.reserve_and_record()
        }));
    }

    let mut granted = 0;
    for task in tasks {
        if task.await.unwrap() {
            granted += 1;
        }
    }

    assert_eq!(granted, 5);
    let quota = slot.snapshot().await.quota;
    assert_eq!(quota.daily_sent_count, 5);
    assert_eq!(quota.remaining(), 0);
}

/// Test: Racers on worker threads get exactly one send out of a limit of one.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_parallel_reservations_against_limit_of_one() {
    let scheduler = memory_scheduler(Arc::new(ScriptedAdapter::new()));
    let registry = scheduler.registry();
    registry.insert(job("single_send", 1, Utc::now())).await;
    let slot = registry.get(&JobId::new("single_send")).await.unwrap();

    let racers = 64;
    let barrier = Arc::new(Barrier::new(racers));
    let mut tasks = Vec::new();
    for _ in 0..racers {
        let slot = Arc::clone(&slot);
        let barrier = Arc::clone(&barrier);
        tasks.push(tokio::spawn(async move {
            barrier.wait().await;
            slot.lock().await.quota.reserve_and_record()
        }));
    }

    let mut granted = 0;
    for task in tasks {
        if task.await.unwrap() {
            granted += 1;
        }
    }

    assert_eq!(granted, 1);
    let quota = slot.snapshot().await.quota;
    assert_eq!(quota.daily_sent_count, 1);
    assert_eq!(quota.total_sent_count, 1);
    assert_eq!(quota.remaining(), 0);
}

/// Test: Only one run cycle per job is started while one is in flight.
#[tokio::test]
async fn test_overlapping_dispatch_skips_busy_job() {
    let adapter = Arc::new(
        ScriptedAdapter::new()
            .with_candidates(["a"])
            .with_delivery_delay(std::time::Duration::from_millis(200)),
    );
    let scheduler = memory_scheduler(adapter.clone());
    let storage = scheduler.storage();
    let registry = scheduler.registry();
    let dispatcher = scheduler.dispatcher();

    let now = Utc::now();
    storage.save_job(job("single", 5, now)).await.unwrap();
    registry.insert(job("single", 5, now)).await;

    let first = dispatcher.dispatch(now).await;
    let second = dispatcher.dispatch(now).await;
    assert_eq!(first.len(), 1);
    assert!(second.is_empty());

    for cycle in first {
        cycle.handle.await.unwrap();
    }
    assert_eq!(adapter.delivery_attempts(), 1);
}
