//! Video guide transcripts → one pair per video.

use anyhow::Result;
use corpus_types::ConversationPair;
use regex::Regex;
use serde_json::Value;
use std::path::Path;
use std::sync::OnceLock;

use crate::jsonl::for_each_value;
use crate::parse::{extract_text, id_from_value, truncate_chars};

pub const SOURCE_TAG: &str = "transcript";

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TranscriptStats {
    pub videos: usize,
    pub pairs: usize,
    pub empty: usize,
    pub truncated: usize,
    pub malformed: usize,
}

fn noise() -> &'static Regex {
    static NOISE: OnceLock<Regex> = OnceLock::new();
    NOISE.get_or_init(|| {
        Regex::new(r"(?i)\[music\]|\[laughter\]|\[applause\]|\bsubscribe\b|\bhit the bell\b|\bhey guys\b")
            .unwrap()
    })
}

/// Removes caption noise and collapses whitespace.
pub fn clean_transcript(raw: &str) -> String {
    let stripped = noise().replace_all(raw, " ");
    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub fn guide_prompt(title: &str) -> String {
    format!("Based on the guide '{title}', what are the key strategies?")
}

/// Returns the pair and whether the content had to be cut to `max_chars`.
pub fn transcript_to_pair(record: &Value, max_chars: usize) -> Option<(ConversationPair, bool)> {
    let title = record
        .get("title")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .unwrap_or("Untitled guide");
    let raw = ["transcript", "text"]
        .iter()
        .find_map(|key| record.get(*key).and_then(extract_text))?;

    let cleaned = clean_transcript(&raw);
    let cut = truncate_chars(&cleaned, max_chars);
    let truncated = cut.len() < cleaned.len();
    let content = if truncated {
        format!("{}...", cut.trim_end())
    } else {
        cleaned.clone()
    };

    let origin_ids = record
        .get("video_id")
        .and_then(id_from_value)
        .into_iter()
        .collect();
    ConversationPair::new(guide_prompt(title), content, SOURCE_TAG, origin_ids)
        .map(|pair| (pair, truncated))
}

pub fn read_transcripts(path: &Path, max_chars: usize) -> Result<(Vec<ConversationPair>, TranscriptStats)> {
    let mut pairs = Vec::new();
    let mut stats = TranscriptStats::default();
    let read = for_each_value(path, |line, record| {
        stats.videos += 1;
        if !record.is_object() {
            tracing::warn!(line, "transcript record is not an object");
            stats.malformed += 1;
            return;
        }
        match transcript_to_pair(&record, max_chars) {
            Some((pair, truncated)) => {
                if truncated {
                    stats.truncated += 1;
                }
                pairs.push(pair);
            }
            None => stats.empty += 1,
        }
    })?;
    stats.malformed += read.malformed;
    stats.pairs = pairs.len();
    tracing::info!(
        path = %path.display(),
        videos = stats.videos,
        pairs = stats.pairs,
        empty = stats.empty,
        truncated = stats.truncated,
        "transcripts converted"
    );
    Ok((pairs, stats))
}
