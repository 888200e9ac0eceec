//! Common test utilities shared across integration tests.

#![allow(dead_code)]

use chrono::Utc;
use outreach::testing::{ScriptedAdapter, wait_for_cycle};
use outreach::{
    InMemoryStorage, JobSpec, JobStats, Platform, PlatformRegistry, Scheduler, SchedulerHandle,
    Storage,
};
use std::sync::Arc;
use std::time::Duration;

/// Upper bound for any single wait in these tests.
pub const TEST_WAIT: Duration = Duration::from_secs(5);

/// Platform registry serving `adapter` for reddit, without send delays.
pub fn reddit(adapter: Arc<ScriptedAdapter>) -> PlatformRegistry {
    PlatformRegistry::new().with_adapter(Platform::Reddit, adapter, Duration::ZERO)
}

/// Scheduler whose interval never fires during a test; cycles are driven
/// through `tick_now`.
pub fn scheduler<S: Storage + 'static>(
    storage: Arc<S>,
    adapter: Arc<ScriptedAdapter>,
) -> Scheduler<S> {
    Scheduler::with_storage(storage, reddit(adapter)).with_tick_interval(Duration::from_secs(3600))
}

pub fn memory_scheduler(adapter: Arc<ScriptedAdapter>) -> Scheduler<InMemoryStorage> {
    scheduler(Arc::new(InMemoryStorage::new()), adapter)
}

/// A reddit job with a plain greeting template.
pub fn spec(id: &str) -> JobSpec {
    JobSpec::new(id, "spring", Platform::Reddit, "index funds", "Hi {username}")
}

/// Trigger a tick and wait for `job_id`'s cycle to finish.
pub async fn run_cycle(handle: &SchedulerHandle, job_id: &str) -> JobStats {
    let before = Utc::now();
    handle.tick_now().await.unwrap();
    wait_for_cycle(handle, job_id, before, TEST_WAIT).await
}
