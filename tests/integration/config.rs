//! Configuration integration tests.
//!
//! Tests that load the bundled demo configuration and drive a scheduler built
//! from it.

use crate::common::TEST_WAIT;
use chrono::Utc;
use outreach::config::build_dry_run_platforms;
use outreach::testing::wait_for_cycle;
use outreach::{
    InMemoryStorage, JobStatus, Platform, StorageConfig, Tier, YamlLoader, build_scheduler,
    load_jobs_from_directory,
};
use std::path::PathBuf;
use std::sync::Arc;

fn demos() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("demos")
}

/// Test: The demo configuration and job files load and validate.
#[test]
fn test_demo_configuration_loads() {
    let global = YamlLoader::load_global_config(demos().join("outreach.yaml")).unwrap();
    assert_eq!(global.tick_interval_secs, 60);
    assert!(matches!(global.storage, StorageConfig::Sqlite { .. }));
    assert_eq!(global.platform(Platform::Reddit).candidates.len(), 3);

    let jobs = load_jobs_from_directory(demos().join("jobs"), &global).unwrap();
    assert_eq!(jobs.len(), 2);

    let reddit = &jobs[0];
    assert_eq!(reddit.spec.id.as_str(), "index_funds_reddit");
    assert_eq!(reddit.spec.tier, Tier::Premium);
    assert_eq!(reddit.spec.effective_daily_limit(), global.tiers.premium);
    assert!(reddit.enabled);

    let twitter = &jobs[1];
    assert_eq!(twitter.spec.platform, Platform::Twitter);
    assert_eq!(twitter.spec.effective_daily_limit(), 5);
    assert!(!twitter.enabled);
}

/// Test: A scheduler built from the demo files messages the matching dry-run candidates.
#[tokio::test]
async fn test_demo_configuration_runs_dry() {
    let mut global = YamlLoader::load_global_config(demos().join("outreach.yaml")).unwrap();
    for settings in global.platforms.values_mut() {
        settings.send_delay_secs = Some(0);
    }
    let jobs = load_jobs_from_directory(demos().join("jobs"), &global).unwrap();

    let scheduler = build_scheduler(
        &global,
        Arc::new(InMemoryStorage::new()),
        build_dry_run_platforms(&global),
    );
    let (handle, task) = scheduler.start().await;

    for job in jobs {
        let id = job.spec.id.clone();
        handle.create_job(job.spec).await.unwrap();
        if !job.enabled {
            handle.pause_job(id).await.unwrap();
        }
    }

    let before = Utc::now();
    assert_eq!(handle.tick_now().await.unwrap(), 1);
    let stats = wait_for_cycle(&handle, "index_funds_reddit", before, TEST_WAIT).await;

    // Two of the three reddit candidates talk about index funds
    assert_eq!(stats.total_sent, 2);
    assert_eq!(stats.status, JobStatus::Active);

    let twitter = handle.job_stats("rust_async_twitter").await.unwrap();
    assert_eq!(twitter.status, JobStatus::Paused);
    assert_eq!(twitter.total_sent, 0);

    handle.shutdown().await.unwrap();
    let _ = task.await;
}
