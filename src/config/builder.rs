//! Runtime objects built from YAML configuration.
//!
//! This module converts [`JobConfig`]s into job specs and a [`GlobalConfig`]
//! into the compliance gate, platform registry and scheduler it describes.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::core::compliance::{ComplianceGate, RuleSet, default_blocked_phrases};
use crate::core::job::JobSpec;
use crate::core::types::Platform;
use crate::platform::{DryRunAdapter, PlatformRegistry, default_send_delay};
use crate::scheduler::{CycleSettings, Scheduler};
use crate::storage::Storage;

use super::error::ConfigError;
use super::yaml::{GlobalConfig, JobConfig, YamlLoader};

/// Builder for creating job specs from YAML configuration.
pub struct JobConfigBuilder;

impl JobConfigBuilder {
    /// Build a JobSpec from a JobConfig, resolving the tier default limit.
    pub fn build(config: JobConfig, global: &GlobalConfig) -> Result<JobSpec, ConfigError> {
        let daily_limit = config
            .daily_limit
            .unwrap_or_else(|| global.tiers.limit_for(config.tier));

        let mut spec = JobSpec::new(
            config.id.as_str(),
            config.campaign_id.as_str(),
            config.platform,
            config.search_keywords,
            config.message_template,
        )
        .with_tier(config.tier)
        .with_daily_limit(daily_limit);
        if let Some(user) = config.user_id {
            spec = spec.with_user(user);
        }

        spec.validate()
            .map_err(|e| ConfigError::InvalidConfig(format!("job '{}': {}", config.id, e)))?;
        Ok(spec)
    }
}

/// A job loaded from a file, with the start state it asks for.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedJob {
    pub spec: JobSpec,
    pub enabled: bool,
}

/// Load all job configurations from a directory.
///
/// Files are read in name order; two files declaring the same id are an error.
pub fn load_jobs_from_directory(
    dir: impl AsRef<Path>,
    global: &GlobalConfig,
) -> Result<Vec<LoadedJob>, ConfigError> {
    let dir = dir.as_ref();

    if !dir.is_dir() {
        return Err(ConfigError::InvalidConfig(format!(
            "'{}' is not a directory",
            dir.display()
        )));
    }

    let entries = std::fs::read_dir(dir).map_err(|source| ConfigError::DirReadError {
        path: dir.to_path_buf(),
        source,
    })?;
    let mut paths = Vec::new();
    for entry in entries {
        let path = entry
            .map_err(|source| ConfigError::DirReadError {
                path: dir.to_path_buf(),
                source,
            })?
            .path();
        let is_yaml = path
            .extension()
            .is_some_and(|ext| ext == "yaml" || ext == "yml");
        if is_yaml {
            paths.push(path);
        }
    }
    paths.sort();

    let mut seen = HashSet::new();
    let mut jobs = Vec::with_capacity(paths.len());
    for path in paths {
        let config = YamlLoader::load_job_config(&path)?;
        if !seen.insert(config.id.clone()) {
            return Err(ConfigError::DuplicateJob {
                id: config.id,
                path,
            });
        }
        let enabled = config.enabled;
        let spec = JobConfigBuilder::build(config, global)?;
        jobs.push(LoadedJob { spec, enabled });
    }

    Ok(jobs)
}

/// Compliance gate with the configured rules, built-in rules where none are set.
pub fn build_gate(config: &GlobalConfig) -> ComplianceGate {
    let blocked = config
        .blocked_phrases
        .clone()
        .unwrap_or_else(default_blocked_phrases);
    let mut gate = ComplianceGate::new().with_blocked_phrases(blocked);
    for platform in Platform::ALL {
        let rules = config
            .platform(platform)
            .rules
            .unwrap_or_else(|| default_rules(platform));
        gate = gate.with_rules(platform, rules);
    }
    gate
}

fn default_rules(platform: Platform) -> RuleSet {
    match platform {
        Platform::Reddit => RuleSet::reddit(),
        Platform::Twitter => RuleSet::twitter(),
    }
}

/// Run cycle tunables from the global configuration.
pub fn build_cycle_settings(config: &GlobalConfig) -> CycleSettings {
    CycleSettings {
        discovery_limit: config.discovery_limit,
        failure_threshold: config.failure_threshold,
        max_revision_rounds: config.max_revision_rounds,
        backoff: config.backoff.to_policy(),
    }
}

/// Dry-run adapters for every platform, serving the configured candidates.
pub fn build_dry_run_platforms(config: &GlobalConfig) -> PlatformRegistry {
    let mut registry = PlatformRegistry::new();
    for platform in Platform::ALL {
        let settings = config.platform(platform);
        let candidates = settings
            .candidates
            .iter()
            .map(|c| c.to_candidate())
            .collect();
        let delay = settings
            .send_delay_secs
            .map(Duration::from_secs)
            .unwrap_or_else(|| default_send_delay(platform));
        registry.register_with_delay(platform, Arc::new(DryRunAdapter::new(candidates)), delay);
    }
    registry
}

/// Scheduler configured from the global file.
///
/// Send delays configured for a platform override the ones `platforms` was
/// registered with.
pub fn build_scheduler<S: Storage + 'static>(
    config: &GlobalConfig,
    storage: Arc<S>,
    platforms: PlatformRegistry,
) -> Scheduler<S> {
    let mut platforms = platforms;
    for platform in platforms.platforms() {
        let configured = config.platform(platform).send_delay_secs;
        if let (Some(secs), Some(adapter)) = (configured, platforms.get(platform)) {
            platforms.register_with_delay(platform, adapter, Duration::from_secs(secs));
        }
    }

    Scheduler::with_storage(storage, platforms)
        .with_gate(build_gate(config))
        .with_cycle_settings(build_cycle_settings(config))
        .with_tick_interval(config.tick_interval())
        .with_shutdown_timeout(config.shutdown_timeout())
}
