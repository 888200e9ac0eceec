//! Run cycle integration tests.
//!
//! Tests that drive jobs through the scheduler handle and check deliveries,
//! dedup, failure handling and status transitions.

use crate::common::{TEST_WAIT, memory_scheduler, run_cycle, scheduler, spec};
use async_trait::async_trait;
use outreach::testing::{FlakyStorage, ScriptedAdapter};
use outreach::{
    AdapterError, AuditKind, Candidate, CandidateId, DeliveryOutcome, InMemoryStorage, JobStatus,
    JobUpdate, PlatformAdapter, Scheduler, SchedulerError,
};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

/// Adapter that ignores the exclusion set and returns everyone every time.
struct ForgetfulAdapter {
    inner: ScriptedAdapter,
}

#[async_trait]
impl PlatformAdapter for ForgetfulAdapter {
    async fn discover(
        &self,
        keywords: &str,
        _excluding: &HashSet<CandidateId>,
        limit: usize,
    ) -> Result<Vec<Candidate>, AdapterError> {
        self.inner.discover(keywords, &HashSet::new(), limit).await
    }

    async fn deliver(&self, candidate: &Candidate, message: &str) -> Result<(), AdapterError> {
        self.inner.deliver(candidate, message).await
    }

    async fn test_connection(&self) -> bool {
        true
    }
}

/// Test: Daily limit stops delivery before the candidate list runs out.
#[tokio::test]
async fn test_daily_limit_caps_deliveries() {
    let adapter = Arc::new(ScriptedAdapter::new().with_candidates(["alice", "bob", "carol"]));
    let (handle, task) = memory_scheduler(adapter.clone()).start().await;

    handle
        .create_job(spec("capped").with_daily_limit(2))
        .await
        .unwrap();
    let stats = run_cycle(&handle, "capped").await;

    assert_eq!(stats.status, JobStatus::Active);
    assert_eq!(stats.total_sent, 2);
    assert_eq!(stats.daily_sent, 2);
    assert_eq!(stats.remaining_quota, 0);
    assert_eq!(adapter.delivered_to(), vec!["alice", "bob"]);

    // Carol is untouched: no message and no record
    let records = handle.deliveries("capped").await.unwrap();
    assert_eq!(records.len(), 2);
    assert!(
        records
            .iter()
            .all(|r| r.candidate_id != CandidateId::new("carol"))
    );

    // The next cycle has no budget left
    run_cycle(&handle, "capped").await;
    assert_eq!(adapter.delivery_attempts(), 2);

    let audit = handle.audit_log("capped", 50).await.unwrap();
    assert!(audit.iter().any(|e| e.kind == AuditKind::QuotaExhausted));

    handle.shutdown().await.unwrap();
    let _ = task.await;
}

/// Test: Consecutive delivery failures move the job to error and out of dispatch.
#[tokio::test]
async fn test_repeated_failures_move_job_to_error() {
    let adapter = Arc::new(
        ScriptedAdapter::new()
            .with_candidates(["u1", "u2", "u3", "u4", "u5", "u6", "u7"])
            .fail_every_delivery("user has DMs closed"),
    );
    let (handle, task) = memory_scheduler(adapter.clone()).start().await;

    handle
        .create_job(spec("failing").with_daily_limit(10))
        .await
        .unwrap();
    let stats = run_cycle(&handle, "failing").await;

    assert_eq!(stats.status, JobStatus::Error);
    assert_eq!(stats.consecutive_failures, 5);
    assert_eq!(stats.error_count, 5);
    // Failed sends do not consume budget
    assert_eq!(stats.daily_sent, 0);
    assert_eq!(stats.total_sent, 0);
    assert_eq!(adapter.delivery_attempts(), 5);

    assert_eq!(handle.tick_now().await.unwrap(), 0);
    assert_eq!(adapter.delivery_attempts(), 5);

    let records = handle.deliveries("failing").await.unwrap();
    assert_eq!(records.len(), 5);
    assert!(
        records
            .iter()
            .all(|r| matches!(r.outcome, DeliveryOutcome::Failed { .. }))
    );

    // Resume is for paused jobs; clearing the error is an explicit action
    assert!(matches!(
        handle.resume_job("failing").await,
        Err(SchedulerError::Transition(_))
    ));
    // A job in error is only stopped after the error is cleared
    assert!(matches!(
        handle.stop_job("failing").await,
        Err(SchedulerError::Transition(_))
    ));
    assert_eq!(
        handle.clear_error("failing").await.unwrap(),
        JobStatus::Active
    );
    assert_eq!(
        handle.stop_job("failing").await.unwrap(),
        JobStatus::Stopped
    );

    handle.shutdown().await.unwrap();
    let _ = task.await;
}

/// Test: A candidate is contacted once per job across cycles.
#[tokio::test]
async fn test_candidates_are_never_contacted_twice() {
    let adapter = Arc::new(ScriptedAdapter::new().with_candidates(["alice", "bob"]));
    let (handle, task) = memory_scheduler(adapter.clone()).start().await;

    handle.create_job(spec("dedup")).await.unwrap();
    run_cycle(&handle, "dedup").await;
    let stats = run_cycle(&handle, "dedup").await;

    assert_eq!(stats.total_sent, 2);
    assert_eq!(adapter.delivered_to(), vec!["alice", "bob"]);
    assert_eq!(adapter.discovery_calls(), 2);
    assert_eq!(handle.deliveries("dedup").await.unwrap().len(), 2);

    handle.shutdown().await.unwrap();
    let _ = task.await;
}

/// Test: A delivery whose record could not be written is not repeated.
#[tokio::test]
async fn test_unrecorded_delivery_is_not_sent_again() {
    let storage = Arc::new(FlakyStorage::new());
    let adapter = Arc::new(ScriptedAdapter::new().with_candidates(["alice", "bob"]));
    let (handle, task) = scheduler(Arc::clone(&storage), adapter.clone()).start().await;

    handle.create_job(spec("flaky")).await.unwrap();
    storage.fail_delivery_writes(1);

    let stats = run_cycle(&handle, "flaky").await;
    assert_eq!(adapter.delivered_to(), vec!["alice"]);
    assert_eq!(stats.total_sent, 1);
    assert_eq!(stats.status, JobStatus::Active);
    assert!(stats.last_error.is_some());

    let stats = run_cycle(&handle, "flaky").await;
    assert_eq!(adapter.delivered_to(), vec!["alice", "bob"]);
    assert_eq!(stats.total_sent, 2);

    let records = handle.deliveries("flaky").await.unwrap();
    let names: Vec<_> = records.iter().map(|r| r.candidate_id.as_str()).collect();
    assert_eq!(names, vec!["alice", "bob"]);

    handle.shutdown().await.unwrap();
    let _ = task.await;
}

/// Test: Candidates already contacted are dropped even if the platform returns them.
#[tokio::test]
async fn test_cycle_filters_candidates_already_contacted() {
    let adapter = Arc::new(ForgetfulAdapter {
        inner: ScriptedAdapter::new().with_candidates(["alice", "bob"]),
    });
    let platforms = outreach::PlatformRegistry::new().with_adapter(
        outreach::Platform::Reddit,
        adapter.clone(),
        Duration::ZERO,
    );
    let scheduler = Scheduler::new(InMemoryStorage::new(), platforms)
        .with_tick_interval(Duration::from_secs(3600));
    let (handle, task) = scheduler.start().await;

    handle.create_job(spec("forgetful")).await.unwrap();
    run_cycle(&handle, "forgetful").await;
    let stats = run_cycle(&handle, "forgetful").await;

    assert_eq!(stats.total_sent, 2);
    assert_eq!(adapter.inner.delivered_to(), vec!["alice", "bob"]);

    handle.shutdown().await.unwrap();
    let _ = task.await;
}

/// Test: Two jobs keep separate dedup sets and quotas.
#[tokio::test]
async fn test_jobs_are_isolated() {
    let adapter = Arc::new(ScriptedAdapter::new().with_candidates(["alice"]));
    let (handle, task) = memory_scheduler(adapter.clone()).start().await;

    handle.create_job(spec("first")).await.unwrap();
    handle.create_job(spec("second")).await.unwrap();

    let before = chrono::Utc::now();
    assert_eq!(handle.tick_now().await.unwrap(), 2);
    for id in ["first", "second"] {
        outreach::testing::wait_for_cycle(&handle, id, before, TEST_WAIT).await;
    }

    assert_eq!(adapter.delivered_to(), vec!["alice", "alice"]);
    for id in ["first", "second"] {
        assert_eq!(handle.job_stats(id).await.unwrap().total_sent, 1);
    }

    handle.shutdown().await.unwrap();
    let _ = task.await;
}

/// Test: Stopped is terminal for operator actions.
#[tokio::test]
async fn test_stopped_job_cannot_be_reactivated() {
    let adapter = Arc::new(ScriptedAdapter::new().with_candidates(["alice"]));
    let (handle, task) = memory_scheduler(adapter.clone()).start().await;

    handle.create_job(spec("done")).await.unwrap();
    assert_eq!(handle.stop_job("done").await.unwrap(), JobStatus::Stopped);

    assert!(matches!(
        handle.resume_job("done").await,
        Err(SchedulerError::Transition(_))
    ));
    assert!(matches!(
        handle.clear_error("done").await,
        Err(SchedulerError::Transition(_))
    ));
    assert_eq!(handle.tick_now().await.unwrap(), 0);
    assert_eq!(adapter.discovery_calls(), 0);

    let stats = handle.job_stats("done").await.unwrap();
    assert_eq!(stats.status, JobStatus::Stopped);

    let audit = handle.audit_log("done", 10).await.unwrap();
    assert_eq!(
        audit
            .iter()
            .filter(|e| e.kind == AuditKind::InvariantViolation)
            .count(),
        2
    );

    handle.shutdown().await.unwrap();
    let _ = task.await;
}

/// Test: Configuration changes wait for the in-flight cycle.
#[tokio::test]
async fn test_update_rejected_while_cycle_in_flight() {
    let adapter = Arc::new(
        ScriptedAdapter::new()
            .with_candidates(["alice"])
            .with_delivery_delay(Duration::from_millis(300)),
    );
    let (handle, task) = memory_scheduler(adapter.clone()).start().await;
    handle.create_job(spec("busy")).await.unwrap();

    let before = chrono::Utc::now();
    handle.tick_now().await.unwrap();
    tokio::time::timeout(TEST_WAIT, async {
        while !handle.job_stats("busy").await.unwrap().in_flight {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    let update = JobUpdate {
        daily_limit: Some(5),
        ..Default::default()
    };
    let result = handle.update_job("busy", update.clone()).await;
    assert!(matches!(result, Err(SchedulerError::JobBusy(_))));

    outreach::testing::wait_for_cycle(&handle, "busy", before, TEST_WAIT).await;
    let stats = handle.update_job("busy", update).await.unwrap();
    assert_eq!(stats.daily_limit, 5);
    assert_eq!(stats.total_sent, 1);

    handle.shutdown().await.unwrap();
    let _ = task.await;
}

/// Test: Each step of a cycle leaves an audit entry.
#[tokio::test]
async fn test_cycle_writes_audit_trail() {
    let adapter = Arc::new(
        ScriptedAdapter::new()
            .with_candidates(["alice", "bob"])
            .fail_delivery_to("bob", "rate limited"),
    );
    let (handle, task) = memory_scheduler(adapter).start().await;
    handle.create_job(spec("audited")).await.unwrap();
    run_cycle(&handle, "audited").await;

    // Newest first
    let audit = handle.audit_log("audited", 50).await.unwrap();
    let kinds: Vec<AuditKind> = audit.iter().rev().map(|e| e.kind).collect();
    assert_eq!(
        kinds,
        vec![
            AuditKind::SearchStart,
            AuditKind::SearchComplete,
            AuditKind::SendSuccess,
            AuditKind::SendFail,
        ]
    );
    assert_eq!(audit[0].candidate_id, Some(CandidateId::new("bob")));
    assert_eq!(audit[0].detail, "rate limited");

    assert_eq!(handle.audit_log("audited", 1).await.unwrap().len(), 1);

    handle.shutdown().await.unwrap();
    let _ = task.await;
}

/// Test: Unknown jobs are reported as such.
#[tokio::test]
async fn test_unknown_job_lookups_fail() {
    let (handle, task) = memory_scheduler(Arc::new(ScriptedAdapter::new())).start().await;

    assert!(matches!(
        handle.job_stats("missing").await,
        Err(SchedulerError::JobNotFound(_))
    ));
    assert!(matches!(
        handle.deliveries("missing").await,
        Err(SchedulerError::JobNotFound(_))
    ));

    handle.shutdown().await.unwrap();
    let _ = task.await;
}
