//! Keyword protect/burn rules plus the mechanical-conflict guard.

use corpus_types::ConversationPair;

use super::{Assessment, Verdict};
use crate::config::CurationConfig;
use crate::error::CurationError;
use crate::linker::IMAGE_MARKER;

/// Disjoint lowercase token sets. Membership is case-insensitive substring containment.
#[derive(Debug, Clone)]
pub struct KeywordRuleSet {
    protect: Vec<String>,
    burn: Vec<String>,
}

impl KeywordRuleSet {
    pub fn new(protect: &[String], burn: &[String]) -> Result<Self, CurationError> {
        let protect = normalise_terms(protect);
        let burn = normalise_terms(burn);
        if let Some(shared) = protect.iter().find(|term| burn.contains(term)) {
            return Err(CurationError::InvalidConfig(format!(
                "keyword {shared:?} is in both protect and burn lists"
            )));
        }
        Ok(Self { protect, burn })
    }

    /// `text` must already be lowercase.
    pub fn has_protect(&self, text: &str) -> bool {
        self.protect.iter().any(|term| text.contains(term.as_str()))
    }

    /// `text` must already be lowercase.
    pub fn has_burn(&self, text: &str) -> bool {
        self.burn.iter().any(|term| text.contains(term.as_str()))
    }
}

/// Flags text that pairs a capability with a mechanism that breaks it,
/// e.g. Eye of the Hurricane needs 50 shots per vortex while miniclip caps ammo at 1.
#[derive(Debug, Clone)]
pub struct ConflictGuard {
    capability: Vec<String>,
    mechanism: Vec<String>,
}

impl ConflictGuard {
    pub fn new(capability: &[String], mechanism: &[String]) -> Self {
        Self {
            capability: normalise_terms(capability),
            mechanism: normalise_terms(mechanism),
        }
    }

    /// `text` must already be lowercase.
    pub fn is_conflict(&self, text: &str) -> bool {
        self.capability.iter().any(|t| text.contains(t.as_str()))
            && self.mechanism.iter().any(|t| text.contains(t.as_str()))
    }
}

#[derive(Debug, Clone)]
pub struct RuleClassifier {
    keywords: KeywordRuleSet,
    guard: ConflictGuard,
    min_assistant_words: usize,
}

impl RuleClassifier {
    pub fn new(keywords: KeywordRuleSet, guard: ConflictGuard, min_assistant_words: usize) -> Self {
        Self {
            keywords,
            guard,
            min_assistant_words,
        }
    }

    pub fn from_config(config: &CurationConfig) -> Result<Self, CurationError> {
        let keywords = KeywordRuleSet::new(&config.keywords.protect, &config.keywords.burn)?;
        let guard = ConflictGuard::new(&config.conflict.capability, &config.conflict.mechanism);
        Ok(Self::new(keywords, guard, config.min_assistant_words))
    }

    pub fn classify(&self, pair: &ConversationPair) -> Assessment {
        self.classify_turns(&pair.user, &pair.assistant)
    }

    pub fn classify_turns(&self, user: &str, assistant: &str) -> Assessment {
        // The attachment marker is structural, so it never counts toward keywords or length.
        let user = user.replace(IMAGE_MARKER, " ");
        let assistant = assistant.replace(IMAGE_MARKER, " ");
        let combined = format!("{user} {assistant}").to_lowercase();

        // Checked first: protect keywords never rescue a conflict.
        if self.guard.is_conflict(&combined) {
            return Verdict::Conflict.into();
        }

        let has_protect = self.keywords.has_protect(&combined);
        let has_burn = self.keywords.has_burn(&combined);
        let too_short = assistant.split_whitespace().count() < self.min_assistant_words;

        if (has_burn || too_short) && !has_protect {
            Verdict::Trash.into()
        } else {
            Verdict::Strategy.into()
        }
    }
}

fn normalise_terms(terms: &[String]) -> Vec<String> {
    let mut out: Vec<String> = terms
        .iter()
        .map(|t| t.trim().to_lowercase())
        .filter(|t| !t.is_empty())
        .collect();
    out.dedup();
    out
}
