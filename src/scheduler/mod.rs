//! Scheduler engine for outreach jobs.
//!
//! This module provides the main scheduling loop that dispatches run cycles
//! on every tick, the operator handle, and recovery of persisted jobs.

mod cycle;
mod dispatch;
mod engine;
mod handle;
mod handlers;
mod registry;
mod types;

pub use cycle::{CycleContext, CycleReport, CycleSettings, RunCycle};
pub use dispatch::{Dispatcher, SpawnedCycle};
pub use engine::Scheduler;
pub use handle::SchedulerHandle;
pub use registry::{JobRegistry, JobSlot, RunGuard};
pub use types::{SchedulerError, SchedulerState};
