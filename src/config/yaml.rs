//! YAML configuration parsing.
//!
//! Parses job definitions and global configuration from YAML files.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use super::error::ConfigError;
use crate::core::candidate::Candidate;
use crate::core::compliance::RuleSet;
use crate::core::job::Tier;
use crate::core::retry::BackoffPolicy;
use crate::core::template::MessageTemplate;
use crate::core::types::{CandidateId, Platform};

/// Global configuration (outreach.yaml).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GlobalConfig {
    /// Seconds between scheduler ticks.
    pub tick_interval_secs: u64,
    /// Maximum candidates requested per discovery call.
    pub discovery_limit: usize,
    /// Consecutive delivery failures that move a job to `error`.
    pub failure_threshold: u32,
    /// Revision requests per candidate.
    pub max_revision_rounds: u32,
    /// Seconds to wait for in-flight cycles on shutdown.
    pub shutdown_timeout_secs: u64,
    /// Storage configuration.
    pub storage: StorageConfig,
    /// Default daily limits per tier.
    pub tiers: TierLimits,
    /// Backoff after transient discovery failures.
    pub backoff: BackoffConfig,
    /// Phrases blocked on every platform. Built-in list when absent.
    pub blocked_phrases: Option<Vec<String>>,
    /// Per-platform settings.
    pub platforms: BTreeMap<Platform, PlatformConfig>,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: 60,
            discovery_limit: 10,
            failure_threshold: 5,
            max_revision_rounds: 1,
            shutdown_timeout_secs: 30,
            storage: StorageConfig::default(),
            tiers: TierLimits::default(),
            backoff: BackoffConfig::default(),
            blocked_phrases: None,
            platforms: BTreeMap::new(),
        }
    }
}

impl GlobalConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    /// Settings for one platform, defaults when not configured.
    pub fn platform(&self, platform: Platform) -> PlatformConfig {
        self.platforms.get(&platform).cloned().unwrap_or_default()
    }
}

/// Storage configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum StorageConfig {
    /// In-memory storage (default, non-persistent).
    #[serde(rename = "memory")]
    #[default]
    Memory,
    /// SQLite storage.
    #[serde(rename = "sqlite")]
    Sqlite {
        /// Path to the database file.
        path: String,
    },
}

/// Default daily limits per pricing tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TierLimits {
    pub free: u32,
    pub premium: u32,
}

impl Default for TierLimits {
    fn default() -> Self {
        Self {
            free: Tier::Free.default_daily_limit(),
            premium: Tier::Premium.default_daily_limit(),
        }
    }
}

impl TierLimits {
    pub fn limit_for(&self, tier: Tier) -> u32 {
        match tier {
            Tier::Free => self.free,
            Tier::Premium => self.premium,
        }
    }
}

/// Backoff configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    /// Disable to retry on the very next tick.
    pub enabled: bool,
    /// Delay after the first transient failure, in seconds.
    pub base_secs: u64,
    /// Upper bound on the delay, in seconds.
    pub max_secs: u64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_secs: 60,
            max_secs: 1800,
        }
    }
}

impl BackoffConfig {
    pub fn to_policy(&self) -> BackoffPolicy {
        if self.enabled {
            BackoffPolicy::exponential(
                Duration::from_secs(self.base_secs),
                Duration::from_secs(self.max_secs),
            )
        } else {
            BackoffPolicy::none()
        }
    }
}

/// Per-platform settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlatformConfig {
    /// Pause between deliveries of the same job, in seconds.
    pub send_delay_secs: Option<u64>,
    /// Compliance rules. Built-in rules when absent.
    pub rules: Option<RuleSet>,
    /// Candidates served by the dry-run adapter.
    pub candidates: Vec<CandidateConfig>,
}

/// A candidate listed for dry runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateConfig {
    /// Platform identity; the username when absent.
    pub id: Option<String>,
    pub username: String,
    pub display_name: Option<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
}

impl CandidateConfig {
    pub fn to_candidate(&self) -> Candidate {
        let mut candidate = Candidate::new(&self.username);
        if let Some(id) = &self.id {
            candidate.id = CandidateId::new(id.as_str());
        }
        candidate.display_name = self.display_name.clone();
        candidate.metadata = self.metadata.clone();
        candidate
    }
}

/// Job configuration from YAML.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobConfig {
    /// Job identifier.
    pub id: String,
    /// Campaign the job belongs to.
    pub campaign_id: String,
    /// Owning user, if any.
    pub user_id: Option<String>,
    /// Target platform.
    pub platform: Platform,
    /// Keywords passed to discovery.
    pub search_keywords: String,
    /// Message template with `{field}` placeholders.
    pub message_template: String,
    /// Explicit daily limit; the tier default applies when absent.
    pub daily_limit: Option<u32>,
    /// Pricing tier.
    #[serde(default)]
    pub tier: Tier,
    /// Whether the job starts active. Disabled jobs are created paused.
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

/// YAML configuration loader.
pub struct YamlLoader;

impl YamlLoader {
    /// Load global configuration from a file.
    pub fn load_global_config(path: impl AsRef<Path>) -> Result<GlobalConfig, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::FileReadError {
            path: path.to_path_buf(),
            source,
        })?;
        let config: GlobalConfig =
            serde_yaml::from_str(&content).map_err(|source| ConfigError::YamlFileError {
                path: path.to_path_buf(),
                source,
            })?;
        Self::validate_global_config(&config)?;
        Ok(config)
    }

    /// Parse global configuration from a YAML string.
    pub fn parse_global_config(yaml: &str) -> Result<GlobalConfig, ConfigError> {
        let config: GlobalConfig = serde_yaml::from_str(yaml)?;
        Self::validate_global_config(&config)?;
        Ok(config)
    }

    /// Load a job configuration from a file.
    pub fn load_job_config(path: impl AsRef<Path>) -> Result<JobConfig, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::FileReadError {
            path: path.to_path_buf(),
            source,
        })?;
        let config: JobConfig =
            serde_yaml::from_str(&content).map_err(|source| ConfigError::YamlFileError {
                path: path.to_path_buf(),
                source,
            })?;
        Self::validate_job_config(&config)?;
        Ok(config)
    }

    /// Parse a job configuration from a YAML string.
    pub fn parse_job_config(yaml: &str) -> Result<JobConfig, ConfigError> {
        let config: JobConfig = serde_yaml::from_str(yaml)?;
        Self::validate_job_config(&config)?;
        Ok(config)
    }

    fn validate_global_config(config: &GlobalConfig) -> Result<(), ConfigError> {
        if config.tick_interval_secs == 0 {
            return Err(ConfigError::InvalidConfig(
                "tick_interval_secs must be positive".into(),
            ));
        }
        if config.discovery_limit == 0 {
            return Err(ConfigError::InvalidConfig(
                "discovery_limit must be positive".into(),
            ));
        }
        if config.failure_threshold == 0 {
            return Err(ConfigError::InvalidConfig(
                "failure_threshold must be positive".into(),
            ));
        }
        if config.tiers.free == 0 || config.tiers.premium == 0 {
            return Err(ConfigError::InvalidConfig(
                "tier limits must be positive".into(),
            ));
        }
        if config.backoff.enabled && config.backoff.base_secs > config.backoff.max_secs {
            return Err(ConfigError::InvalidConfig(
                "backoff base_secs cannot exceed max_secs".into(),
            ));
        }
        if let StorageConfig::Sqlite { path } = &config.storage {
            if path.trim().is_empty() {
                return Err(ConfigError::MissingField("storage.path".into()));
            }
        }
        for (platform, settings) in &config.platforms {
            for candidate in &settings.candidates {
                if candidate.username.trim().is_empty() {
                    return Err(ConfigError::InvalidConfig(format!(
                        "{} candidate with empty username",
                        platform
                    )));
                }
            }
        }
        Ok(())
    }

    /// Validate a job configuration.
    fn validate_job_config(config: &JobConfig) -> Result<(), ConfigError> {
        if config.id.trim().is_empty() {
            return Err(ConfigError::MissingField("id".into()));
        }
        if config.campaign_id.trim().is_empty() {
            return Err(ConfigError::MissingField("campaign_id".into()));
        }
        if config.search_keywords.trim().is_empty() {
            return Err(ConfigError::MissingField("search_keywords".into()));
        }
        if config.search_keywords.chars().count() > 500 {
            return Err(ConfigError::InvalidConfig(format!(
                "job '{}': search_keywords cannot exceed 500 characters",
                config.id
            )));
        }
        if config.message_template.trim().is_empty() {
            return Err(ConfigError::MissingField("message_template".into()));
        }
        if config.daily_limit == Some(0) {
            return Err(ConfigError::InvalidConfig(format!(
                "job '{}': daily_limit cannot be zero",
                config.id
            )));
        }
        MessageTemplate::parse(&config.message_template).map_err(|e| {
            ConfigError::InvalidConfig(format!("job '{}': {}", config.id, e))
        })?;
        Ok(())
    }
}
