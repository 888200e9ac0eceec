//! Content compliance gate.
//!
//! Every outbound message is judged against the rule set of its platform
//! before it may be sent. The gate is pure: it performs no I/O and never
//! rewrites text, so the same message and rules always yield the same verdict.
//!
//! Severity:
//! - banned phrases, too many links and empty messages are a hard `Fail`
//! - length and tone problems ask for a revision (`NeedsRevision`)

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::types::Platform;

/// Outcome of a compliance review.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "reasons", rename_all = "snake_case")]
pub enum Verdict {
    /// The message may be sent.
    Pass,
    /// The message has fixable problems and must not be sent as-is.
    NeedsRevision(Vec<String>),
    /// The message violates policy.
    Fail(Vec<String>),
}

impl Verdict {
    pub fn is_pass(&self) -> bool {
        matches!(self, Verdict::Pass)
    }

    /// Reasons attached to a non-passing verdict.
    pub fn reasons(&self) -> &[String] {
        match self {
            Verdict::Pass => &[],
            Verdict::NeedsRevision(r) | Verdict::Fail(r) => r,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Verdict::Pass => "pass",
            Verdict::NeedsRevision(_) => "needs_revision",
            Verdict::Fail(_) => "fail",
        }
    }
}

/// Tone a platform expects from outreach copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tone {
    Conversational,
    ValueFirst,
    Friendly,
    Professional,
}

impl Tone {
    /// Most exclamation marks a message of this tone may carry.
    fn max_exclamations(&self) -> usize {
        match self {
            Tone::Professional => 1,
            Tone::ValueFirst | Tone::Conversational => 2,
            Tone::Friendly => 3,
        }
    }

    /// Whether hard-sell urgency wording breaks this tone.
    fn forbids_urgency(&self) -> bool {
        !matches!(self, Tone::Friendly)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Tone::Conversational => "conversational",
            Tone::ValueFirst => "value_first",
            Tone::Friendly => "friendly",
            Tone::Professional => "professional",
        }
    }
}

const URGENCY_MARKERS: &[&str] = &[
    "buy now",
    "don't miss out",
    "hurry",
    "last chance",
    "only today",
    "order now",
];

/// Shouted words at least this long count against the tone.
const SHOUT_MIN_LEN: usize = 4;

/// Declarative rule set for one platform.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuleSet {
    /// Maximum message length in characters.
    pub max_chars: Option<usize>,
    /// Maximum number of sentences.
    pub max_sentences: Option<usize>,
    /// Maximum number of links.
    pub max_links: Option<usize>,
    /// Required tone.
    pub tone: Option<Tone>,
    /// Phrases that must not appear (case-insensitive).
    pub banned_phrases: Vec<String>,
}

impl RuleSet {
    /// Default reddit rules.
    pub fn reddit() -> Self {
        Self {
            max_chars: None,
            max_sentences: Some(5),
            max_links: Some(1),
            tone: Some(Tone::Conversational),
            banned_phrases: vec![
                "pure self-promo".into(),
                "multi-link dumping".into(),
                "spam".into(),
            ],
        }
    }

    /// Default twitter rules.
    pub fn twitter() -> Self {
        Self {
            max_chars: Some(280),
            max_sentences: None,
            max_links: Some(1),
            tone: Some(Tone::ValueFirst),
            banned_phrases: vec![
                "financial guarantees".into(),
                "spammy urgency".into(),
                "guaranteed returns".into(),
            ],
        }
    }
}

/// Phrases blocked on every platform by default.
pub fn default_blocked_phrases() -> Vec<String> {
    [
        "guaranteed returns",
        "get rich quick",
        "limited time only",
        "act now",
        "special offer expires",
        "100% guaranteed",
        "risk-free",
        "make money fast",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

/// Rule-based validator for outbound messages.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ComplianceGate {
    rules: BTreeMap<Platform, RuleSet>,
    blocked_phrases: Vec<String>,
}

impl ComplianceGate {
    /// Create a gate with no rules at all.
    pub fn new() -> Self {
        Self::default()
    }

    /// Gate with the built-in rule sets and blocked phrases.
    pub fn with_defaults() -> Self {
        Self::new()
            .with_rules(Platform::Reddit, RuleSet::reddit())
            .with_rules(Platform::Twitter, RuleSet::twitter())
            .with_blocked_phrases(default_blocked_phrases())
    }

    /// Set the rule set for a platform.
    pub fn with_rules(mut self, platform: Platform, rules: RuleSet) -> Self {
        self.rules.insert(platform, rules);
        self
    }

    /// Set phrases blocked on every platform.
    pub fn with_blocked_phrases(mut self, phrases: Vec<String>) -> Self {
        self.blocked_phrases = phrases;
        self
    }

    /// Rules configured for a platform.
    pub fn rules(&self, platform: Platform) -> Option<&RuleSet> {
        self.rules.get(&platform)
    }

    /// Judge a rendered message.
    pub fn review(&self, platform: Platform, message: &str) -> Verdict {
        let mut failures = Vec::new();
        let mut revisions = Vec::new();
        let lowered = message.to_lowercase();

        if message.trim().is_empty() {
            failures.push("message is empty".to_string());
        }

        let rules = self.rules.get(&platform);
        let platform_banned = rules.map(|r| r.banned_phrases.as_slice()).unwrap_or(&[]);
        let mut seen: Vec<String> = Vec::new();
        for phrase in self.blocked_phrases.iter().chain(platform_banned) {
            let needle = phrase.trim().to_lowercase();
            if needle.is_empty() || seen.contains(&needle) {
                continue;
            }
            if lowered.contains(&needle) {
                failures.push(format!("contains banned phrase \"{}\"", phrase.trim()));
            }
            seen.push(needle);
        }

        if let Some(rules) = rules {
            if let Some(max) = rules.max_links {
                let links = count_links(message);
                if links > max {
                    failures.push(format!("contains {} links (max {})", links, max));
                }
            }

            if let Some(max) = rules.max_chars {
                let chars = message.chars().count();
                if chars > max {
                    revisions.push(format!("{} characters exceeds limit of {}", chars, max));
                }
            }

            if let Some(max) = rules.max_sentences {
                let sentences = count_sentences(message);
                if sentences > max {
                    revisions.push(format!("{} sentences exceeds limit of {}", sentences, max));
                }
            }

            if let Some(tone) = rules.tone {
                revisions.extend(tone_findings(tone, message, &lowered));
            }
        }

        if !failures.is_empty() {
            failures.extend(revisions);
            Verdict::Fail(failures)
        } else if !revisions.is_empty() {
            Verdict::NeedsRevision(revisions)
        } else {
            Verdict::Pass
        }
    }
}

fn tone_findings(tone: Tone, message: &str, lowered: &str) -> Vec<String> {
    let mut findings = Vec::new();

    let exclamations = message.matches('!').count();
    if exclamations > tone.max_exclamations() {
        findings.push(format!(
            "{} exclamation marks is too pushy for a {} tone",
            exclamations,
            tone.as_str()
        ));
    }

    let shouted: Vec<&str> = message
        .split_whitespace()
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()))
        .filter(|w| {
            w.chars().filter(|c| c.is_alphabetic()).count() >= SHOUT_MIN_LEN
                && w.chars().all(|c| !c.is_lowercase())
        })
        .collect();
    if !shouted.is_empty() {
        findings.push(format!(
            "shouting in capitals ({}) breaks a {} tone",
            shouted.join(", "),
            tone.as_str()
        ));
    }

    if tone.forbids_urgency() {
        for marker in URGENCY_MARKERS {
            if lowered.contains(marker) {
                findings.push(format!(
                    "urgency wording \"{}\" breaks a {} tone",
                    marker,
                    tone.as_str()
                ));
            }
        }
    }

    findings
}

/// Count links anywhere in the message, including ones glued to punctuation
/// or to other words. A `www.` host directly after a scheme is not counted
/// again.
pub fn count_links(message: &str) -> usize {
    let lowered = message.to_lowercase();
    let with_scheme = lowered.matches("http://").count() + lowered.matches("https://").count();
    let bare = lowered
        .match_indices("www.")
        .filter(|(i, _)| !lowered[..*i].ends_with("://"))
        .count();
    with_scheme + bare
}

/// Count sentences. Runs of terminators (`?!` or `...`) end one sentence, and
/// a trailing fragment without a terminator counts as a sentence.
pub fn count_sentences(message: &str) -> usize {
    let mut count = 0;
    let mut in_sentence = false;
    for c in message.chars() {
        if matches!(c, '.' | '!' | '?') {
            if in_sentence {
                count += 1;
                in_sentence = false;
            }
        } else if c.is_alphanumeric() {
            in_sentence = true;
        }
    }
    if in_sentence {
        count += 1;
    }
    count
}
