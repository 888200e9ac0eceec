//! outreach - scheduler and compliance engine for recurring social outreach.
//!
//! Jobs discover candidates on a platform, render a message template for each
//! one, check it against per-platform compliance rules and deliver it, within
//! a rolling daily quota. The [`Scheduler`] ticks at a fixed interval and runs
//! at most one cycle per job at a time.

pub mod config;
pub mod core;
pub mod events;
pub mod platform;
pub mod scheduler;
pub mod storage;
pub mod testing;

pub use config::{
    ConfigError, GlobalConfig, JobConfig, JobConfigBuilder, LoadedJob, StorageConfig, YamlLoader,
    build_scheduler, load_jobs_from_directory,
};
pub use crate::core::candidate::{AuditEntry, AuditKind, Candidate, DeliveryOutcome, DeliveryRecord};
pub use crate::core::compliance::{ComplianceGate, RuleSet, Tone, Verdict};
pub use crate::core::job::{
    Actor, AutomationJob, JobError, JobSpec, JobStats, JobStatus, JobUpdate, Tier,
    TransitionError,
};
pub use crate::core::quota::Quota;
pub use crate::core::retry::BackoffPolicy;
pub use crate::core::template::{MessageTemplate, RenderError};
pub use crate::core::types::{CampaignId, CandidateId, JobId, Platform, RunId};
pub use events::{Event, EventBus, EventHandler, SkipReason};
pub use platform::{
    AdapterError, DryRunAdapter, MessageReviser, PlatformAdapter, PlatformRegistry,
};
pub use scheduler::{CycleReport, CycleSettings, Scheduler, SchedulerError, SchedulerHandle, SchedulerState};
#[cfg(feature = "sqlite")]
pub use storage::SqliteStorage;
pub use storage::{InMemoryStorage, Storage, StorageError};
