//! Weighted corpus assembly.
//!
//! Gold sources are replicated `weights.gold` times, silver `weights.silver`
//! times. Every entry gets the canonical persona as its system turn, then the
//! whole sequence is shuffled once with a seeded ChaCha RNG.

use anyhow::Result;
use corpus_types::{CorpusEntry, SourceTier};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;
use std::path::{Path, PathBuf};

use crate::config::{TierWeights, TieredSource};
use crate::error::require_input;
use crate::jsonl::{read_pairs, JsonlWriter};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceCount {
    pub path: PathBuf,
    pub tier: SourceTier,
    pub weight: usize,
    /// Distinct entries read from the file.
    pub entries: usize,
    /// Entries contributed after replication.
    pub emitted: usize,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct AssembleStats {
    pub sources: Vec<SourceCount>,
    pub total: usize,
    pub malformed: usize,
}

/// Repeats each entry `weight` times, keeping the copies adjacent.
pub fn replicate(entries: &[CorpusEntry], weight: usize) -> Vec<CorpusEntry> {
    entries
        .iter()
        .flat_map(|entry| std::iter::repeat(entry).take(weight).cloned())
        .collect()
}

/// Reads every source and returns the weighted, persona-stamped sequence before shuffling.
pub fn build_sequence(
    sources: &[TieredSource],
    weights: &TierWeights,
    persona: &str,
) -> Result<(Vec<CorpusEntry>, AssembleStats)> {
    for source in sources {
        require_input(&source.path)?;
    }

    let mut stats = AssembleStats::default();
    let mut sequence = Vec::new();
    for source in sources {
        let (pairs, read) = read_pairs(&source.path, source.tier.as_str())?;
        let entries: Vec<CorpusEntry> = pairs
            .iter()
            .map(|pair| CorpusEntry::from_pair(pair, persona))
            .collect();
        let weight = weights.weight(source.tier);
        let replicated = replicate(&entries, weight);

        tracing::info!(
            path = %source.path.display(),
            tier = source.tier.as_str(),
            weight,
            entries = entries.len(),
            emitted = replicated.len(),
            "source loaded"
        );
        stats.malformed += read.malformed;
        stats.sources.push(SourceCount {
            path: source.path.clone(),
            tier: source.tier,
            weight,
            entries: entries.len(),
            emitted: replicated.len(),
        });
        sequence.extend(replicated);
    }
    stats.total = sequence.len();
    Ok((sequence, stats))
}

pub fn shuffle_entries(entries: &mut [CorpusEntry], seed: u64) {
    let mut rng = ChaCha20Rng::seed_from_u64(seed);
    entries.shuffle(&mut rng);
}

/// Builds, shuffles and writes the final corpus. Any missing source aborts before `output` exists.
pub fn assemble(
    sources: &[TieredSource],
    output: &Path,
    weights: &TierWeights,
    persona: &str,
    seed: u64,
) -> Result<AssembleStats> {
    let (mut sequence, stats) = build_sequence(sources, weights, persona)?;
    shuffle_entries(&mut sequence, seed);

    let mut writer = JsonlWriter::create(output)?;
    for entry in &sequence {
        writer.write(&entry.to_record())?;
    }
    writer.finish()?;

    tracing::info!(
        output = %output.display(),
        sources = stats.sources.len(),
        total = stats.total,
        seed,
        "corpus assembled"
    );
    Ok(stats)
}
