//! Configuration loading and parsing.
//!
//! This module provides YAML-based configuration for jobs and global settings.

mod builder;
mod error;
mod yaml;

pub use builder::{
    JobConfigBuilder, LoadedJob, build_cycle_settings, build_dry_run_platforms, build_gate,
    build_scheduler, load_jobs_from_directory,
};
pub use error::ConfigError;
pub use yaml::{
    BackoffConfig, CandidateConfig, GlobalConfig, JobConfig, PlatformConfig, StorageConfig,
    TierLimits, YamlLoader,
};
