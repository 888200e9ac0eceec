//! Automation job definition and lifecycle state machine.
//!
//! A job couples a campaign with a platform, a search query and a message
//! template, and carries the runtime counters the scheduler maintains.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use super::candidate::DeliveryRecord;
use super::quota::Quota;
use super::template::{MessageTemplate, RenderError};
use super::types::{CampaignId, JobId, Platform};

/// Errors that can occur when building or reconfiguring a job.
#[derive(Debug, Error)]
pub enum JobError {
    /// Invalid configuration value.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The message template does not parse.
    #[error("invalid template: {0}")]
    InvalidTemplate(#[from] RenderError),
}

/// Lifecycle status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Eligible for scheduler ticks.
    Active,
    /// Skipped by the scheduler until resumed.
    Paused,
    /// Terminal.
    Stopped,
    /// Halted by the scheduler; needs an operator to clear it.
    Error,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Active => "active",
            JobStatus::Paused => "paused",
            JobStatus::Stopped => "stopped",
            JobStatus::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(JobStatus::Active),
            "paused" => Some(JobStatus::Paused),
            "stopped" => Some(JobStatus::Stopped),
            "error" => Some(JobStatus::Error),
            _ => None,
        }
    }

    /// Check whether `actor` may move a job from `self` to `to`.
    pub fn can_transition(&self, to: JobStatus, actor: Actor) -> bool {
        use JobStatus::*;
        match (self, to, actor) {
            (Active, Paused, Actor::Operator) => true,
            (Paused, Active, Actor::Operator) => true,
            (Active | Paused, Stopped, Actor::Operator) => true,
            (Active, Error, Actor::Scheduler) => true,
            (Error, Active, Actor::Operator) => true,
            _ => false,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who requested a status change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Actor {
    Operator,
    Scheduler,
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Actor::Operator => f.write_str("operator"),
            Actor::Scheduler => f.write_str("scheduler"),
        }
    }
}

/// A rejected status change.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid transition {from} -> {to} requested by {actor}")]
pub struct TransitionError {
    pub from: JobStatus,
    pub to: JobStatus,
    pub actor: Actor,
}

/// Pricing tier that determines the default daily limit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    #[default]
    Free,
    Premium,
}

impl Tier {
    /// Default daily limit for this tier.
    pub fn default_daily_limit(&self) -> u32 {
        match self {
            Tier::Free => 20,
            Tier::Premium => 40,
        }
    }
}

/// Everything needed to create a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSpec {
    pub id: JobId,
    pub campaign_id: CampaignId,
    #[serde(default)]
    pub user_id: Option<String>,
    pub platform: Platform,
    pub search_keywords: String,
    pub message_template: String,
    /// Explicit daily limit; falls back to the tier default.
    #[serde(default)]
    pub daily_limit: Option<u32>,
    #[serde(default)]
    pub tier: Tier,
}

impl JobSpec {
    pub fn new(
        id: impl Into<JobId>,
        campaign_id: impl Into<CampaignId>,
        platform: Platform,
        search_keywords: impl Into<String>,
        message_template: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            campaign_id: campaign_id.into(),
            user_id: None,
            platform,
            search_keywords: search_keywords.into(),
            message_template: message_template.into(),
            daily_limit: None,
            tier: Tier::Free,
        }
    }

    pub fn with_daily_limit(mut self, limit: u32) -> Self {
        self.daily_limit = Some(limit);
        self
    }

    pub fn with_tier(mut self, tier: Tier) -> Self {
        self.tier = tier;
        self
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Daily limit after applying the tier default.
    pub fn effective_daily_limit(&self) -> u32 {
        self.daily_limit
            .unwrap_or_else(|| self.tier.default_daily_limit())
    }

    /// Validate the fields without building a job.
    pub fn validate(&self) -> Result<(), JobError> {
        if self.id.as_str().trim().is_empty() {
            return Err(JobError::InvalidConfig("job id cannot be empty".into()));
        }
        validate_keywords(&self.search_keywords)?;
        validate_limit(self.effective_daily_limit())?;
        MessageTemplate::parse(&self.message_template)?;
        Ok(())
    }
}

/// Operator change to a job's configuration. `None` fields are left alone.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobUpdate {
    pub search_keywords: Option<String>,
    pub message_template: Option<String>,
    pub daily_limit: Option<u32>,
}

impl JobUpdate {
    pub fn is_empty(&self) -> bool {
        self.search_keywords.is_none()
            && self.message_template.is_none()
            && self.daily_limit.is_none()
    }
}

/// One recurring outreach task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutomationJob {
    pub id: JobId,
    pub campaign_id: CampaignId,
    pub user_id: Option<String>,
    pub platform: Platform,
    pub search_keywords: String,
    pub message_template: String,
    status: JobStatus,
    pub quota: Quota,
    pub success_count: u64,
    pub error_count: u64,
    /// Delivery failures since the last success.
    pub consecutive_failures: u32,
    /// Transient discovery failures since the last successful discovery.
    pub transient_failures: u32,
    /// Job is not eligible before this instant.
    pub retry_after: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub last_run_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Successful deliveries whose record could not be written yet. Their
    /// recipients count as contacted until the write goes through.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unrecorded: Vec<DeliveryRecord>,
}

impl AutomationJob {
    /// Build a new `active` job from a spec.
    pub fn new(spec: JobSpec, now: DateTime<Utc>) -> Result<Self, JobError> {
        spec.validate()?;
        let daily_limit = spec.effective_daily_limit();
        Ok(Self {
            id: spec.id,
            campaign_id: spec.campaign_id,
            user_id: spec.user_id,
            platform: spec.platform,
            search_keywords: spec.search_keywords,
            message_template: spec.message_template,
            status: JobStatus::Active,
            quota: Quota::new(daily_limit, now),
            success_count: 0,
            error_count: 0,
            consecutive_failures: 0,
            transient_failures: 0,
            retry_after: None,
            last_error: None,
            last_run_at: None,
            created_at: now,
            updated_at: now,
            unrecorded: Vec::new(),
        })
    }

    /// Rebuild a job from persisted fields without re-running creation rules.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn restore(
        id: JobId,
        campaign_id: CampaignId,
        user_id: Option<String>,
        platform: Platform,
        search_keywords: String,
        message_template: String,
        status: JobStatus,
        quota: Quota,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            campaign_id,
            user_id,
            platform,
            search_keywords,
            message_template,
            status,
            quota,
            success_count: 0,
            error_count: 0,
            consecutive_failures: 0,
            transient_failures: 0,
            retry_after: None,
            last_error: None,
            last_run_at: None,
            created_at,
            updated_at: created_at,
            unrecorded: Vec::new(),
        }
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    /// Apply a status change if the state machine allows it.
    pub fn transition(&mut self, to: JobStatus, actor: Actor) -> Result<JobStatus, TransitionError> {
        let from = self.status;
        if !from.can_transition(to, actor) {
            return Err(TransitionError { from, to, actor });
        }
        self.status = to;
        if from == JobStatus::Error && to == JobStatus::Active {
            self.consecutive_failures = 0;
            self.transient_failures = 0;
            self.retry_after = None;
            self.last_error = None;
        }
        self.updated_at = Utc::now();
        Ok(from)
    }

    /// Whether the scheduler may start a cycle for this job at `now`.
    pub fn is_eligible(&self, now: DateTime<Utc>) -> bool {
        self.status == JobStatus::Active && self.retry_after.is_none_or(|t| now >= t)
    }

    /// Parse the stored template.
    pub fn template(&self) -> Result<MessageTemplate, RenderError> {
        MessageTemplate::parse(&self.message_template)
    }

    /// Apply an operator configuration change.
    pub fn apply_update(&mut self, update: &JobUpdate) -> Result<(), JobError> {
        if let Some(keywords) = &update.search_keywords {
            validate_keywords(keywords)?;
        }
        if let Some(template) = &update.message_template {
            MessageTemplate::parse(template)?;
        }
        if let Some(limit) = update.daily_limit {
            validate_limit(limit)?;
        }

        if let Some(keywords) = &update.search_keywords {
            self.search_keywords = keywords.clone();
        }
        if let Some(template) = &update.message_template {
            self.message_template = template.clone();
        }
        if let Some(limit) = update.daily_limit {
            self.quota.set_daily_limit(limit);
        }
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Snapshot of the counters for reporting.
    pub fn stats(&self, in_flight: bool) -> JobStats {
        JobStats {
            job_id: self.id.clone(),
            platform: self.platform,
            status: self.status,
            total_sent: self.quota.total_sent_count,
            daily_sent: self.quota.daily_sent_count,
            daily_limit: self.quota.daily_limit,
            remaining_quota: self.quota.remaining(),
            success_count: self.success_count,
            error_count: self.error_count,
            consecutive_failures: self.consecutive_failures,
            last_error: self.last_error.clone(),
            last_run_at: self.last_run_at,
            retry_after: self.retry_after,
            in_flight,
        }
    }
}

/// Job statistics exposed to operators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStats {
    pub job_id: JobId,
    pub platform: Platform,
    pub status: JobStatus,
    pub total_sent: u64,
    pub daily_sent: u32,
    pub daily_limit: u32,
    pub remaining_quota: u32,
    pub success_count: u64,
    pub error_count: u64,
    pub consecutive_failures: u32,
    pub last_error: Option<String>,
    pub last_run_at: Option<DateTime<Utc>>,
    pub retry_after: Option<DateTime<Utc>>,
    /// A run cycle is processing the job right now.
    pub in_flight: bool,
}

fn validate_keywords(keywords: &str) -> Result<(), JobError> {
    if keywords.trim().is_empty() {
        return Err(JobError::InvalidConfig(
            "search keywords cannot be empty".into(),
        ));
    }
    if keywords.chars().count() > 500 {
        return Err(JobError::InvalidConfig(
            "search keywords cannot exceed 500 characters".into(),
        ));
    }
    Ok(())
}

fn validate_limit(limit: u32) -> Result<(), JobError> {
    if limit == 0 {
        return Err(JobError::InvalidConfig(
            "daily limit must be positive".into(),
        ));
    }
    Ok(())
}
