//! Agreement between two classifiers' kept outputs, keyed on the user turn.

use anyhow::Result;
use std::collections::HashSet;
use std::path::Path;
use xxhash_rust::xxh3::xxh3_64;

use crate::error::require_input;
use crate::jsonl::read_pairs;
use crate::parse::truncate_chars;

const SAMPLE_COUNT: usize = 3;
const SAMPLE_CHARS: usize = 150;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Comparison {
    pub left_total: usize,
    pub right_total: usize,
    pub overlap: usize,
    pub left_only: usize,
    pub right_only: usize,
    /// Assistant turns (truncated) that only the left side kept, in file order.
    pub left_only_samples: Vec<String>,
    pub malformed: usize,
}

pub fn entry_key(user: &str) -> u64 {
    xxh3_64(user.trim().as_bytes())
}

/// Keys in first-seen order, with the assistant turn of the first occurrence.
fn load_keyed(path: &Path) -> Result<(Vec<(u64, String)>, usize)> {
    let (pairs, read) = read_pairs(path, "compare")?;
    let mut seen = HashSet::new();
    let keyed = pairs
        .into_iter()
        .filter_map(|pair| {
            let key = entry_key(&pair.user);
            seen.insert(key).then_some((key, pair.assistant))
        })
        .collect();
    Ok((keyed, read.malformed))
}

pub fn compare_files(left: &Path, right: &Path) -> Result<Comparison> {
    require_input(left)?;
    require_input(right)?;
    let (left_entries, left_bad) = load_keyed(left)?;
    let (right_entries, right_bad) = load_keyed(right)?;

    let left_keys: HashSet<u64> = left_entries.iter().map(|(k, _)| *k).collect();
    let right_keys: HashSet<u64> = right_entries.iter().map(|(k, _)| *k).collect();

    let left_only: Vec<&(u64, String)> = left_entries
        .iter()
        .filter(|(k, _)| !right_keys.contains(k))
        .collect();

    let comparison = Comparison {
        left_total: left_keys.len(),
        right_total: right_keys.len(),
        overlap: left_keys.intersection(&right_keys).count(),
        left_only: left_only.len(),
        right_only: right_keys.difference(&left_keys).count(),
        left_only_samples: left_only
            .iter()
            .take(SAMPLE_COUNT)
            .map(|(_, assistant)| truncate_chars(assistant, SAMPLE_CHARS).to_string())
            .collect(),
        malformed: left_bad + right_bad,
    };
    tracing::info!(
        left = comparison.left_total,
        right = comparison.right_total,
        overlap = comparison.overlap,
        left_only = comparison.left_only,
        right_only = comparison.right_only,
        "comparison complete"
    );
    Ok(comparison)
}
