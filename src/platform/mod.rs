//! Platform adapter contract.
//!
//! Network clients for each social platform live outside this crate. The
//! scheduler talks to them through [`PlatformAdapter`], looked up by the job's
//! [`Platform`] tag in a [`PlatformRegistry`].

mod dry_run;

pub use dry_run::DryRunAdapter;

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::core::candidate::Candidate;
use crate::core::types::{CandidateId, Platform};

/// Errors reported by a platform adapter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AdapterError {
    /// Rate limited, timed out or otherwise worth retrying later.
    #[error("transient platform error: {0}")]
    Transient(String),

    /// Credentials revoked, account banned or similar.
    #[error("fatal platform error: {0}")]
    Fatal(String),
}

impl AdapterError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, AdapterError::Fatal(_))
    }

    /// The message carried by the error.
    pub fn reason(&self) -> &str {
        match self {
            AdapterError::Transient(r) | AdapterError::Fatal(r) => r,
        }
    }
}

/// Connection to one social platform.
#[async_trait]
pub trait PlatformAdapter: Send + Sync {
    /// Find up to `limit` candidates matching `keywords`.
    ///
    /// Candidates whose id is in `excluding` must not be returned; the caller
    /// filters again regardless.
    async fn discover(
        &self,
        keywords: &str,
        excluding: &HashSet<CandidateId>,
        limit: usize,
    ) -> Result<Vec<Candidate>, AdapterError>;

    /// Send `message` to `candidate`.
    async fn deliver(&self, candidate: &Candidate, message: &str) -> Result<(), AdapterError>;

    /// Check that credentials and connectivity are usable.
    async fn test_connection(&self) -> bool;
}

/// Optional copy-revision collaborator consulted on `needs_revision` verdicts.
#[async_trait]
pub trait MessageReviser: Send + Sync {
    /// Return a revised message, or `None` to give up on this candidate.
    async fn revise(&self, platform: Platform, message: &str, reasons: &[String]) -> Option<String>;
}

/// Default pause between two deliveries of the same job.
pub fn default_send_delay(platform: Platform) -> Duration {
    match platform {
        Platform::Reddit => Duration::from_secs(10),
        Platform::Twitter => Duration::from_secs(15),
    }
}

#[derive(Clone)]
struct Entry {
    adapter: Arc<dyn PlatformAdapter>,
    send_delay: Duration,
}

/// Adapters keyed by platform, with their inter-send delays.
#[derive(Clone, Default)]
pub struct PlatformRegistry {
    entries: HashMap<Platform, Entry>,
}

impl PlatformRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an adapter with the platform's default send delay.
    pub fn register(&mut self, platform: Platform, adapter: Arc<dyn PlatformAdapter>) {
        self.register_with_delay(platform, adapter, default_send_delay(platform));
    }

    /// Register an adapter with an explicit send delay.
    pub fn register_with_delay(
        &mut self,
        platform: Platform,
        adapter: Arc<dyn PlatformAdapter>,
        send_delay: Duration,
    ) {
        self.entries.insert(
            platform,
            Entry {
                adapter,
                send_delay,
            },
        );
    }

    /// Builder form of [`register_with_delay`](Self::register_with_delay).
    pub fn with_adapter(
        mut self,
        platform: Platform,
        adapter: Arc<dyn PlatformAdapter>,
        send_delay: Duration,
    ) -> Self {
        self.register_with_delay(platform, adapter, send_delay);
        self
    }

    pub fn get(&self, platform: Platform) -> Option<Arc<dyn PlatformAdapter>> {
        self.entries.get(&platform).map(|e| e.adapter.clone())
    }

    pub fn send_delay(&self, platform: Platform) -> Duration {
        self.entries
            .get(&platform)
            .map(|e| e.send_delay)
            .unwrap_or_else(|| default_send_delay(platform))
    }

    pub fn contains(&self, platform: Platform) -> bool {
        self.entries.contains_key(&platform)
    }

    /// Registered platforms in a stable order.
    pub fn platforms(&self) -> Vec<Platform> {
        let mut platforms: Vec<Platform> = self.entries.keys().copied().collect();
        platforms.sort();
        platforms
    }
}

impl std::fmt::Debug for PlatformRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlatformRegistry")
            .field("platforms", &self.platforms())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_send_delays() {
        assert_eq!(default_send_delay(Platform::Reddit), Duration::from_secs(10));
        assert_eq!(default_send_delay(Platform::Twitter), Duration::from_secs(15));
    }

    #[test]
    fn test_registry_lookup() {
        let mut registry = PlatformRegistry::new();
        assert!(registry.get(Platform::Reddit).is_none());

        registry.register_with_delay(
            Platform::Reddit,
            Arc::new(DryRunAdapter::new(Vec::new())),
            Duration::ZERO,
        );

        assert!(registry.contains(Platform::Reddit));
        assert!(!registry.contains(Platform::Twitter));
        assert_eq!(registry.send_delay(Platform::Reddit), Duration::ZERO);
        assert_eq!(registry.send_delay(Platform::Twitter), Duration::from_secs(15));
        assert_eq!(registry.platforms(), vec![Platform::Reddit]);
    }

    #[test]
    fn test_adapter_error_kind() {
        assert!(AdapterError::Fatal("banned".into()).is_fatal());
        assert!(!AdapterError::Transient("429".into()).is_fatal());
        assert_eq!(AdapterError::Transient("429".into()).reason(), "429");
    }
}
