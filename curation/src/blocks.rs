//! Conversation blocks from the cleaned chat export:
//! `{"conversations": [[["Name: text", "author"], ...], ...]}`.
//!
//! The opening message of a block is the question; the rest of the block,
//! joined by blank lines, is the answer.

use anyhow::{Context, Result};
use corpus_types::ConversationPair;
use regex::Regex;
use serde_json::Value;
use std::fs;
use std::path::Path;
use std::sync::OnceLock;

use crate::error::require_input;
use crate::redact::Redactor;

pub const SOURCE_TAG: &str = "blocks";

const MIN_USER_CHARS: usize = 15;
const MIN_ASSISTANT_CHARS: usize = 25;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BlockStats {
    pub blocks: usize,
    pub pairs: usize,
    pub too_short: usize,
    pub malformed: usize,
}

fn username_header() -> &'static Regex {
    static HEADER: OnceLock<Regex> = OnceLock::new();
    HEADER.get_or_init(|| Regex::new(r"^[A-Za-z0-9_\-.]{2,32}(#\d{4})?:\s?").unwrap())
}

/// Drops a leading `Name:` / `Name#1234:` speaker header.
pub fn strip_username(text: &str) -> String {
    username_header().replace(text.trim(), "").trim().to_string()
}

fn message_text(message: &Value) -> Option<String> {
    let raw = match message {
        Value::Array(items) => items.first()?.as_str()?,
        Value::String(s) => s.as_str(),
        _ => return None,
    };
    Some(strip_username(&raw.replace("\\n", "\n")))
}

pub fn pairs_from_blocks(
    doc: &Value,
    redactor: &Redactor,
    stats: &mut BlockStats,
) -> Vec<ConversationPair> {
    let Some(conversations) = doc.get("conversations").and_then(Value::as_array) else {
        stats.malformed += 1;
        return Vec::new();
    };

    let mut pairs = Vec::new();
    for (idx, block) in conversations.iter().enumerate() {
        stats.blocks += 1;
        let Some(messages) = block.as_array() else {
            stats.malformed += 1;
            continue;
        };
        let texts: Vec<String> = messages.iter().filter_map(message_text).collect();
        if texts.len() < 2 {
            stats.too_short += 1;
            continue;
        }

        let user = redactor.redact(&texts[0]).text;
        let assistant = redactor.redact(&texts[1..].join("\n\n")).text;
        if user.chars().count() <= MIN_USER_CHARS || assistant.chars().count() <= MIN_ASSISTANT_CHARS {
            stats.too_short += 1;
            continue;
        }

        if let Some(pair) =
            ConversationPair::new(user, assistant, SOURCE_TAG, vec![format!("block-{idx}")])
        {
            pairs.push(pair);
        }
    }
    stats.pairs = pairs.len();
    pairs
}

pub fn read_blocks(path: &Path, redactor: &Redactor) -> Result<(Vec<ConversationPair>, BlockStats)> {
    require_input(path)?;
    let raw = fs::read_to_string(path)
        .with_context(|| format!("read conversation blocks {}", path.display()))?;
    let mut stats = BlockStats::default();
    let pairs = match serde_json::from_str::<Value>(&raw) {
        Ok(doc) => pairs_from_blocks(&doc, redactor, &mut stats),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "conversation blocks are not valid JSON");
            stats.malformed += 1;
            Vec::new()
        }
    };
    tracing::info!(
        path = %path.display(),
        blocks = stats.blocks,
        pairs = stats.pairs,
        too_short = stats.too_short,
        "conversation blocks converted"
    );
    Ok((pairs, stats))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn strips_speaker_headers() {
        assert_eq!(strip_username("skyrim6291: use frost"), "use frost");
        assert_eq!(strip_username("User#1234: hello there"), "hello there");
        assert_eq!(strip_username("no header here"), "no header here");
    }

    #[test]
    fn first_message_asks_rest_answers() {
        let doc = json!({"conversations": [
            [
                ["alpha: What is the best robot for arena?", "1"],
                ["beta: Skylark, because it keeps aggro off you", "2"],
                ["gamma: and pair it with Reindeer for healing", "3"]
            ],
            [["alpha: hi", "1"], ["beta: hello", "2"]],
            [["alpha: lonely question with no answers", "1"]]
        ]});
        let mut stats = BlockStats::default();
        let pairs = pairs_from_blocks(&doc, &Redactor::new(), &mut stats);
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].user, "What is the best robot for arena?");
        assert_eq!(
            pairs[0].assistant,
            "Skylark, because it keeps aggro off you\n\nand pair it with Reindeer for healing"
        );
        assert_eq!(stats.blocks, 3);
        assert_eq!(stats.too_short, 2);
    }

    #[test]
    fn missing_conversations_key_is_malformed() {
        let mut stats = BlockStats::default();
        let pairs = pairs_from_blocks(&json!({"messages": []}), &Redactor::new(), &mut stats);
        assert!(pairs.is_empty());
        assert_eq!(stats.malformed, 1);
    }
}
