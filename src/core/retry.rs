//! Backoff policy for transient platform errors.
//!
//! A transient discovery failure leaves the job `active` but keeps it out of
//! the eligible set for a while. The wait doubles with every consecutive
//! transient failure, up to a cap.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Backoff applied after consecutive transient failures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackoffPolicy {
    /// Wait after the first transient failure.
    #[serde(with = "serde_duration")]
    pub base: Duration,

    /// Upper bound on the wait.
    #[serde(with = "serde_duration")]
    pub max: Duration,
}

impl BackoffPolicy {
    /// No backoff: retry on the next tick.
    pub fn none() -> Self {
        Self {
            base: Duration::ZERO,
            max: Duration::ZERO,
        }
    }

    /// Exponential backoff starting at `base`, capped at `max`.
    pub fn exponential(base: Duration, max: Duration) -> Self {
        Self { base, max }
    }

    /// Check if the policy ever delays a retry.
    pub fn is_enabled(&self) -> bool {
        !self.base.is_zero()
    }

    /// Wait after `failures` consecutive transient failures (1-indexed).
    pub fn delay_for(&self, failures: u32) -> Duration {
        if failures == 0 || !self.is_enabled() {
            return Duration::ZERO;
        }
        let exponent = (failures - 1).min(31);
        let factor = 1u32 << exponent;
        self.base
            .checked_mul(factor)
            .unwrap_or(self.max)
            .min(self.max.max(self.base))
    }

    /// Instant before which the job should not run again.
    pub fn retry_after(&self, failures: u32, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let delay = self.delay_for(failures);
        if delay.is_zero() {
            return None;
        }
        let delay = chrono::Duration::from_std(delay).ok()?;
        Some(now + delay)
    }
}

impl Default for BackoffPolicy {
    /// One minute, doubling, capped at thirty minutes.
    fn default() -> Self {
        Self::exponential(Duration::from_secs(60), Duration::from_secs(30 * 60))
    }
}

/// Serde helper for Duration serialization.
///
/// Serializes Duration as seconds (matching YAML config format).
pub(crate) mod serde_duration {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_none_policy_never_delays() {
        let policy = BackoffPolicy::none();
        assert!(!policy.is_enabled());
        assert_eq!(policy.delay_for(1), Duration::ZERO);
        assert_eq!(policy.retry_after(3, Utc::now()), None);
    }

    #[test]
    fn test_delay_doubles_and_caps() {
        let policy = BackoffPolicy::exponential(Duration::from_secs(60), Duration::from_secs(300));

        assert_eq!(policy.delay_for(0), Duration::ZERO);
        assert_eq!(policy.delay_for(1), Duration::from_secs(60));
        assert_eq!(policy.delay_for(2), Duration::from_secs(120));
        assert_eq!(policy.delay_for(3), Duration::from_secs(240));
        assert_eq!(policy.delay_for(4), Duration::from_secs(300));
        assert_eq!(policy.delay_for(40), Duration::from_secs(300));
    }

    #[test]
    fn test_retry_after_is_offset_from_now() {
        let now = Utc.with_ymd_and_hms(2024, 6, 15, 12, 0, 0).unwrap();
        let policy = BackoffPolicy::default();
        assert_eq!(
            policy.retry_after(2, now),
            Some(now + chrono::Duration::seconds(120))
        );
    }

    #[test]
    fn test_policy_serialization() {
        let policy = BackoffPolicy::exponential(Duration::from_secs(10), Duration::from_secs(90));
        let json = serde_json::to_string(&policy).expect("serialize");
        assert_eq!(json, r#"{"base":10,"max":90}"#);
        let back: BackoffPolicy = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(policy, back);
    }
}
