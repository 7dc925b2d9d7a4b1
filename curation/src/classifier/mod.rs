//! Quality classification.
//!
//! Both strategies (keyword rules and the model judge) return an
//! [`Assessment`]; downstream stages only ever look at `keep`.

pub mod judge;
pub mod rules;

use anyhow::{Context, Result};
use corpus_types::ConversationPair;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::config::{ClassifierKind, CurationConfig};
use crate::error::require_input;
use crate::jsonl::{read_pairs, write_pairs};

pub use judge::{HttpJudge, JudgeBackend};
pub use rules::{ConflictGuard, KeywordRuleSet, RuleClassifier};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Strategy,
    Conflict,
    Trash,
}

impl Verdict {
    /// Only strategy content is kept. Conflicts are always excluded.
    pub fn keep(self) -> bool {
        matches!(self, Verdict::Strategy)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Strategy => "strategy",
            Verdict::Conflict => "conflict",
            Verdict::Trash => "trash",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Assessment {
    pub verdict: Verdict,
    pub keep: bool,
}

impl From<Verdict> for Assessment {
    fn from(verdict: Verdict) -> Self {
        Self {
            verdict,
            keep: verdict.keep(),
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ClassifyStats {
    pub total: usize,
    pub kept: usize,
    pub strategy: usize,
    pub conflict: usize,
    pub trash: usize,
    /// Judge calls that failed or returned no recognisable label.
    pub failures: usize,
    pub malformed: usize,
}

impl ClassifyStats {
    fn record(&mut self, assessment: Assessment) {
        self.total += 1;
        match assessment.verdict {
            Verdict::Strategy => self.strategy += 1,
            Verdict::Conflict => self.conflict += 1,
            Verdict::Trash => self.trash += 1,
        }
        if assessment.keep {
            self.kept += 1;
        }
    }
}

/// Classifies `pairs` with the chosen strategy and returns the kept ones in input order.
pub fn classify_pairs(
    pairs: Vec<ConversationPair>,
    kind: ClassifierKind,
    config: &CurationConfig,
) -> Result<(Vec<ConversationPair>, ClassifyStats)> {
    let mut stats = ClassifyStats::default();
    let assessments = match kind {
        ClassifierKind::Rules => {
            let rules = RuleClassifier::from_config(config)?;
            pairs.iter().map(|pair| rules.classify(pair)).collect::<Vec<_>>()
        }
        ClassifierKind::Judge => {
            let backend = HttpJudge::from_config(&config.judge)?;
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .context("build judge runtime")?;
            let (assessments, failures) =
                runtime.block_on(judge::judge_pairs(&backend, &pairs, &config.judge));
            stats.failures = failures;
            assessments
        }
    };

    let mut kept = Vec::new();
    for (pair, assessment) in pairs.into_iter().zip(assessments) {
        stats.record(assessment);
        if assessment.keep {
            kept.push(pair);
        } else {
            tracing::debug!(verdict = assessment.verdict.as_str(), source = %pair.source, "pair dropped");
        }
    }

    tracing::info!(
        strategy = ?kind,
        total = stats.total,
        kept = stats.kept,
        conflict = stats.conflict,
        trash = stats.trash,
        failures = stats.failures,
        "classification complete"
    );
    Ok((kept, stats))
}

pub fn classify_file(
    input: &Path,
    output: &Path,
    kind: ClassifierKind,
    config: &CurationConfig,
) -> Result<ClassifyStats> {
    require_input(input)?;
    let (pairs, read) = read_pairs(input, "classified")?;
    let (kept, mut stats) = classify_pairs(pairs, kind, config)?;
    stats.malformed = read.malformed;
    write_pairs(output, &kept)?;
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;

    #[test]
    fn only_strategy_is_kept() {
        assert!(Assessment::from(Verdict::Strategy).keep);
        assert!(!Assessment::from(Verdict::Conflict).keep);
        assert!(!Assessment::from(Verdict::Trash).keep);
    }

    #[test]
    fn classify_file_keeps_strategy_pairs() -> Result<()> {
        let mut input = tempfile::NamedTempFile::new()?;
        writeln!(input, "{}", json!({"user": "What build is best for EoH?", "assistant": "Use MX with miniclip"}))?;
        writeln!(input, "{}", json!({"user": "Which weapon first?", "assistant": "Max the Arbalest, it scales with crit better than anything else."}))?;
        writeln!(input, "{}", json!({"user": "Any tips?", "assistant": "Just keep playing every day."}))?;
        writeln!(input, "not json")?;

        let dir = tempfile::tempdir()?;
        let output = dir.path().join("kept.jsonl");
        let stats = classify_file(input.path(), &output, ClassifierKind::Rules, &CurationConfig::default())?;

        assert_eq!(stats.total, 3);
        assert_eq!(stats.kept, 1);
        assert_eq!(stats.conflict, 1);
        assert_eq!(stats.trash, 1);
        assert_eq!(stats.malformed, 1);
        let written = std::fs::read_to_string(&output)?;
        assert_eq!(written.lines().count(), 1);
        assert!(written.contains("Arbalest"));
        Ok(())
    }
}
