//! Compliance and rendering integration tests.
//!
//! Tests that messages failing the gate or the template never reach the
//! platform and leave an audit trail instead.

use crate::common::{TEST_WAIT, memory_scheduler, run_cycle, spec};
use chrono::Utc;
use outreach::testing::{ScriptedAdapter, StaticReviser, wait_for_cycle};
use outreach::{
    AuditKind, Candidate, InMemoryStorage, JobSpec, Platform, PlatformRegistry, Scheduler,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

fn twitter_scheduler(adapter: Arc<ScriptedAdapter>) -> Scheduler<InMemoryStorage> {
    let platforms = PlatformRegistry::new().with_adapter(Platform::Twitter, adapter, Duration::ZERO);
    Scheduler::new(InMemoryStorage::new(), platforms).with_tick_interval(Duration::from_secs(3600))
}

fn long_tweet_spec(id: &str) -> JobSpec {
    let template = format!("Hi {{username}}, {}", "lots of detail here ".repeat(20));
    JobSpec::new(id, "launch", Platform::Twitter, "rust", template)
}

/// Test: A message containing a banned phrase is never sent.
#[tokio::test]
async fn test_banned_phrase_skips_candidate() {
    let adapter = Arc::new(ScriptedAdapter::new().with_candidates(["alice"]));
    let (handle, task) = memory_scheduler(adapter.clone()).start().await;

    let job = JobSpec::new(
        "promo",
        "spring",
        Platform::Reddit,
        "index funds",
        "Hi {username}, our fund has guaranteed returns",
    );
    handle.create_job(job).await.unwrap();
    let stats = run_cycle(&handle, "promo").await;

    assert_eq!(adapter.delivery_attempts(), 0);
    assert_eq!(stats.total_sent, 0);
    assert_eq!(stats.remaining_quota, stats.daily_limit);
    assert_eq!(stats.error_count, 1);
    assert!(handle.deliveries("promo").await.unwrap().is_empty());

    let audit = handle.audit_log("promo", 10).await.unwrap();
    let rejected = audit
        .iter()
        .find(|e| e.kind == AuditKind::ComplianceRejected)
        .unwrap();
    assert!(rejected.detail.contains("guaranteed returns"));

    handle.shutdown().await.unwrap();
    let _ = task.await;
}

/// Test: A candidate missing a template field is skipped, others still get messages.
#[tokio::test]
async fn test_unresolved_placeholder_skips_only_that_candidate() {
    let adapter = Arc::new(ScriptedAdapter::new().with_candidate_list(vec![
        Candidate::new("alice").with_metadata("subreddit", json!("investing")),
        Candidate::new("bob"),
    ]));
    let (handle, task) = memory_scheduler(adapter.clone()).start().await;

    let job = JobSpec::new(
        "render",
        "spring",
        Platform::Reddit,
        "index funds",
        "Hi {username}, saw your post in r/{subreddit}.",
    );
    handle.create_job(job).await.unwrap();
    let stats = run_cycle(&handle, "render").await;

    assert_eq!(stats.total_sent, 1);
    assert_eq!(adapter.messages(), vec!["Hi alice, saw your post in r/investing."]);

    let audit = handle.audit_log("render", 20).await.unwrap();
    let failed = audit
        .iter()
        .find(|e| e.kind == AuditKind::RenderFailed)
        .unwrap();
    assert_eq!(failed.candidate_id.as_ref().map(|c| c.as_str()), Some("bob"));

    handle.shutdown().await.unwrap();
    let _ = task.await;
}

/// Test: An overlong message is skipped when no reviser is configured.
#[tokio::test]
async fn test_needs_revision_without_reviser_skips() {
    let adapter = Arc::new(ScriptedAdapter::new().with_candidates(["alice"]));
    let (handle, task) = twitter_scheduler(adapter.clone()).start().await;

    handle.create_job(long_tweet_spec("tweet")).await.unwrap();
    let before = Utc::now();
    handle.tick_now().await.unwrap();
    wait_for_cycle(&handle, "tweet", before, TEST_WAIT).await;

    assert_eq!(adapter.delivery_attempts(), 0);
    let audit = handle.audit_log("tweet", 10).await.unwrap();
    assert!(audit.iter().any(|e| e.kind == AuditKind::ComplianceRejected));

    handle.shutdown().await.unwrap();
    let _ = task.await;
}

/// Test: A revised message that passes the gate is delivered in place of the original.
#[tokio::test]
async fn test_reviser_output_is_delivered() {
    let adapter = Arc::new(ScriptedAdapter::new().with_candidates(["alice"]));
    let reviser = Arc::new(StaticReviser::new("Hi alice, short version with the details."));
    let scheduler = twitter_scheduler(adapter.clone()).with_reviser(reviser.clone());
    let (handle, task) = scheduler.start().await;

    handle.create_job(long_tweet_spec("tweet")).await.unwrap();
    let before = Utc::now();
    handle.tick_now().await.unwrap();
    let stats = wait_for_cycle(&handle, "tweet", before, TEST_WAIT).await;

    assert_eq!(stats.total_sent, 1);
    assert_eq!(reviser.calls(), 1);
    assert_eq!(
        adapter.messages(),
        vec!["Hi alice, short version with the details."]
    );

    handle.shutdown().await.unwrap();
    let _ = task.await;
}

/// Test: A reviser cannot smuggle a banned phrase past the gate.
#[tokio::test]
async fn test_revised_message_is_reviewed_again() {
    let adapter = Arc::new(ScriptedAdapter::new().with_candidates(["alice"]));
    let reviser = Arc::new(StaticReviser::new("Act now for guaranteed returns"));
    let scheduler = twitter_scheduler(adapter.clone()).with_reviser(reviser);
    let (handle, task) = scheduler.start().await;

    handle.create_job(long_tweet_spec("tweet")).await.unwrap();
    let before = Utc::now();
    handle.tick_now().await.unwrap();
    let stats = wait_for_cycle(&handle, "tweet", before, TEST_WAIT).await;

    assert_eq!(stats.total_sent, 0);
    assert_eq!(adapter.delivery_attempts(), 0);

    handle.shutdown().await.unwrap();
    let _ = task.await;
}
