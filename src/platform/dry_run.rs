use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Mutex;
use tracing::info;

use super::{AdapterError, PlatformAdapter};
use crate::core::candidate::Candidate;
use crate::core::types::CandidateId;

/// Adapter that discovers from a fixed list and delivers by logging.
///
/// Keywords are matched case-insensitively against the candidate's username,
/// display name and string metadata; an empty keyword list matches everyone.
pub struct DryRunAdapter {
    candidates: Vec<Candidate>,
    sent: Mutex<Vec<(CandidateId, String)>>,
}

impl DryRunAdapter {
    pub fn new(candidates: Vec<Candidate>) -> Self {
        Self {
            candidates,
            sent: Mutex::new(Vec::new()),
        }
    }

    /// Messages "delivered" so far, in order.
    pub fn sent(&self) -> Vec<(CandidateId, String)> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }

    fn matches(candidate: &Candidate, words: &[String]) -> bool {
        if words.is_empty() {
            return true;
        }
        let mut haystack = candidate.username.to_lowercase();
        if let Some(name) = &candidate.display_name {
            haystack.push(' ');
            haystack.push_str(&name.to_lowercase());
        }
        for value in candidate.metadata.values() {
            if let Some(s) = value.as_str() {
                haystack.push(' ');
                haystack.push_str(&s.to_lowercase());
            }
        }
        words.iter().any(|w| haystack.contains(w.as_str()))
    }
}

#[async_trait]
impl PlatformAdapter for DryRunAdapter {
    async fn discover(
        &self,
        keywords: &str,
        excluding: &HashSet<CandidateId>,
        limit: usize,
    ) -> Result<Vec<Candidate>, AdapterError> {
        let words: Vec<String> = keywords
            .split_whitespace()
            .map(|w| w.to_lowercase())
            .collect();

        Ok(self
            .candidates
            .iter()
            .filter(|c| !excluding.contains(&c.id))
            .filter(|c| Self::matches(c, &words))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn deliver(&self, candidate: &Candidate, message: &str) -> Result<(), AdapterError> {
        info!(
            candidate_id = %candidate.id,
            username = %candidate.username,
            "[dry-run] would send: {}",
            message
        );
        self.sent
            .lock()
            .map_err(|_| AdapterError::Transient("dry-run log poisoned".into()))?
            .push((candidate.id.clone(), message.to_string()));
        Ok(())
    }

    async fn test_connection(&self) -> bool {
        true
    }
}
