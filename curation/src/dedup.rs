//! Exact-duplicate removal keyed on a content fingerprint.
//!
//! One [`Deduplicator`] lives for a whole run, so a pair seen in an earlier
//! file suppresses the same pair in a later one. The first occurrence in
//! input order survives.

use anyhow::Result;
use corpus_types::ConversationPair;
use std::collections::HashSet;
use std::path::Path;
use xxhash_rust::xxh3::xxh3_128;

use crate::error::require_input;
use crate::jsonl::{read_pairs, write_pairs};

/// Stable across processes and platforms: xxh3-128 of the length-prefixed
/// trimmed turns, so ("ab", "c") and ("a", "bc") never collide by construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint(pub u128);

impl Fingerprint {
    pub fn of(pair: &ConversationPair) -> Self {
        Self::of_turns(&pair.user, &pair.assistant)
    }

    pub fn of_turns(user: &str, assistant: &str) -> Self {
        let user = user.trim().as_bytes();
        let assistant = assistant.trim().as_bytes();
        let mut buf = Vec::with_capacity(16 + user.len() + assistant.len());
        buf.extend_from_slice(&(user.len() as u64).to_le_bytes());
        buf.extend_from_slice(user);
        buf.extend_from_slice(&(assistant.len() as u64).to_le_bytes());
        buf.extend_from_slice(assistant);
        Self(xxh3_128(&buf))
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DedupStats {
    pub input: usize,
    pub kept: usize,
    pub duplicates: usize,
    pub too_short: usize,
    pub malformed: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Accepted,
    Duplicate,
    TooShort,
}

#[derive(Debug, Clone)]
pub struct Deduplicator {
    seen: HashSet<Fingerprint>,
    min_words: usize,
}

impl Deduplicator {
    /// Pairs need strictly more than `min_words` assistant words to be accepted.
    pub fn new(min_words: usize) -> Self {
        Self {
            seen: HashSet::new(),
            min_words,
        }
    }

    /// Short pairs are rejected without recording their fingerprint.
    pub fn admit(&mut self, pair: &ConversationPair) -> Admission {
        let fp = Fingerprint::of(pair);
        if self.seen.contains(&fp) {
            return Admission::Duplicate;
        }
        if pair.assistant_word_count() <= self.min_words {
            return Admission::TooShort;
        }
        self.seen.insert(fp);
        Admission::Accepted
    }

    pub fn filter(&mut self, pairs: Vec<ConversationPair>) -> (Vec<ConversationPair>, DedupStats) {
        let mut stats = DedupStats {
            input: pairs.len(),
            ..Default::default()
        };
        let mut kept = Vec::with_capacity(pairs.len());
        for pair in pairs {
            match self.admit(&pair) {
                Admission::Accepted => kept.push(pair),
                Admission::Duplicate => stats.duplicates += 1,
                Admission::TooShort => stats.too_short += 1,
            }
        }
        stats.kept = kept.len();
        tracing::info!(
            input = stats.input,
            kept = stats.kept,
            duplicates = stats.duplicates,
            too_short = stats.too_short,
            seen = self.seen.len(),
            "dedup complete"
        );
        (kept, stats)
    }

    pub fn seen(&self) -> usize {
        self.seen.len()
    }
}

/// Deduplicates `inputs` in order with one shared fingerprint set into `output`.
pub fn dedup_files(inputs: &[&Path], output: &Path, min_words: usize) -> Result<DedupStats> {
    for input in inputs {
        require_input(input)?;
    }
    let mut dedup = Deduplicator::new(min_words);
    let mut total = DedupStats::default();
    let mut kept_all = Vec::new();
    for input in inputs {
        let (pairs, read) = read_pairs(input, "dedup")?;
        let (kept, stats) = dedup.filter(pairs);
        total.input += stats.input;
        total.kept += stats.kept;
        total.duplicates += stats.duplicates;
        total.too_short += stats.too_short;
        total.malformed += read.malformed;
        kept_all.extend(kept);
    }
    write_pairs(output, &kept_all)?;
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;

    fn pair(user: &str, assistant: &str, source: &str) -> ConversationPair {
        ConversationPair::new(user, assistant, source, Vec::new()).unwrap()
    }

    #[test]
    fn fingerprint_ignores_outer_whitespace_and_source() {
        let a = Fingerprint::of_turns("  Best hero?", "Gale Shinobi for boss waves\n");
        let b = Fingerprint::of_turns("Best hero?", "Gale Shinobi for boss waves");
        assert_eq!(a, b);
        assert_ne!(Fingerprint::of_turns("ab", "c"), Fingerprint::of_turns("a", "bc"));
        assert_ne!(
            Fingerprint::of_turns("q", "a b"),
            Fingerprint::of_turns("a b", "q")
        );
    }

    #[test]
    fn fingerprint_renders_as_fixed_width_hex() {
        let fp = Fingerprint::of_turns("q", "a");
        assert_eq!(fp, Fingerprint::of_turns("q", "a"));
        assert_eq!(fp.to_string().len(), 32);
    }

    #[test]
    fn earliest_occurrence_survives() {
        let mut dedup = Deduplicator::new(3);
        let pairs = vec![
            pair("Which hero?", "Gale Shinobi with the Voltstrike", "first"),
            pair("Which hero?", "  Gale Shinobi with the Voltstrike ", "second"),
            pair("Other?", "Penguin robot keeps frost stacks up", "third"),
        ];
        let (kept, stats) = dedup.filter(pairs);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].source, "first");
        assert_eq!(stats.duplicates, 1);
    }

    #[test]
    fn short_answers_are_not_recorded() {
        let mut dedup = Deduplicator::new(3);
        let short = pair("Q?", "yes it is", "a");
        assert_eq!(dedup.admit(&short), Admission::TooShort);
        assert_eq!(dedup.admit(&short), Admission::TooShort);
        assert_eq!(dedup.seen(), 0);
    }

    #[test]
    fn seen_set_spans_files() -> Result<()> {
        let mut first = tempfile::NamedTempFile::new()?;
        writeln!(first, "{}", json!({"user": "Best robot?", "assistant": "Skylark keeps aggro off you"}))?;
        let mut second = tempfile::NamedTempFile::new()?;
        writeln!(second, "{}", json!({"instruction": "Best robot?", "response": "Skylark keeps aggro off you"}))?;
        writeln!(second, "{}", json!({"instruction": "Best pet?", "response": "Snorf for the rocket splash"}))?;

        let dir = tempfile::tempdir()?;
        let out = dir.path().join("dedup.jsonl");
        let stats = dedup_files(&[first.path(), second.path()], &out, 3)?;
        assert_eq!(stats.input, 3);
        assert_eq!(stats.kept, 2);
        assert_eq!(stats.duplicates, 1);
        Ok(())
    }
}
