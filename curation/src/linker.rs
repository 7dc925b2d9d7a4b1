//! Reply-graph linking for threaded chat exports.
//!
//! Every message that references a resolvable parent becomes the assistant side
//! of a pair whose user side is the parent. Consecutive messages from the same
//! author that continue the same answer (replying to the same parent, or
//! carrying no reference at all) are folded into that one assistant turn.

use anyhow::{Context, Result};
use corpus_types::{ConversationPair, RawMessage};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;
use xxhash_rust::xxh3::xxh3_64;

use crate::error::{require_input, CurationError};
use crate::parse::{id_from_value, parse_timestamp_value};
use crate::redact::Redactor;
use crate::sanitiser::Blacklist;

pub const IMAGE_MARKER: &str = "[Image Attached]";
pub const SOURCE_TAG: &str = "threaded";

/// Separator between coalesced messages of one answer.
const CONTINUATION_JOIN: &str = "\n\n";

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct LinkStats {
    pub messages: usize,
    pub malformed: usize,
    pub replies: usize,
    pub pairs: usize,
    pub unresolved: usize,
    /// Pairs dropped because one side had no text (e.g. image-only messages).
    pub empty: usize,
    /// Continuation messages folded into an earlier answer.
    pub coalesced: usize,
    /// Replies skipped because they had already been used as a parent.
    pub already_parent: usize,
    pub redacted: usize,
    /// Messages dropped because their id is on the erasure blacklist.
    pub blacklisted: usize,
}

/// Parses a threaded export document (`{"messages": [...]}` or a bare array).
/// Messages without an id are counted as malformed and skipped. Blacklisted
/// messages are dropped before linking, so replies to them stay unresolved.
pub fn parse_export(
    doc: &Value,
    blacklist: &Blacklist,
    redactor: &Redactor,
    stats: &mut LinkStats,
) -> Vec<RawMessage> {
    let items = match doc {
        Value::Array(items) => items.as_slice(),
        _ => match doc.get("messages").and_then(Value::as_array) {
            Some(items) => items.as_slice(),
            None => {
                stats.malformed += 1;
                return Vec::new();
            }
        },
    };

    let mut messages = Vec::with_capacity(items.len());
    for (idx, item) in items.iter().enumerate() {
        match parse_message(item, redactor) {
            Some((message, _)) if blacklist.contains(&message.id) => {
                stats.blacklisted += 1;
            }
            Some((message, redacted)) => {
                if redacted {
                    stats.redacted += 1;
                }
                messages.push(message);
            }
            None => {
                tracing::warn!(index = idx, "skipping export message without an id");
                stats.malformed += 1;
            }
        }
    }
    stats.messages = messages.len();
    messages
}

fn parse_message(item: &Value, redactor: &Redactor) -> Option<(RawMessage, bool)> {
    let id = item.get("id").and_then(id_from_value)?;
    let content = item
        .get("content")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .replace("\r\n", "\n");
    let redaction = redactor.redact(content.trim());

    let attachments = match item.get("attachments") {
        Some(Value::Array(items)) => !items.is_empty(),
        Some(Value::Bool(flag)) => *flag,
        _ => false,
    };
    let reference_parent_id = item
        .pointer("/reference/messageId")
        .or_else(|| item.get("reference_parent_id"))
        .and_then(id_from_value);
    let author_key = item
        .pointer("/author/id")
        .or_else(|| item.get("author"))
        .and_then(id_from_value)
        .map(|author| xxh3_64(author.as_bytes()));

    let redacted = redaction.changed();
    Some((
        RawMessage {
            id,
            content: redaction.text,
            attachments,
            reference_parent_id,
            timestamp: item.get("timestamp").and_then(parse_timestamp_value),
            author_key,
        },
        redacted,
    ))
}

/// Links parsed messages into pairs. Deterministic for a given message order.
pub fn link_messages(messages: &[RawMessage], stats: &mut LinkStats) -> Vec<ConversationPair> {
    let mut index: HashMap<&str, usize> = HashMap::with_capacity(messages.len());
    for (pos, message) in messages.iter().enumerate() {
        index.entry(message.id.as_str()).or_insert(pos);
    }

    let mut pairs = Vec::new();
    let mut used_as_parent: HashSet<&str> = HashSet::new();
    let mut absorbed: HashSet<usize> = HashSet::new();

    for (pos, child) in messages.iter().enumerate() {
        if absorbed.contains(&pos) {
            continue;
        }
        let Some(parent_id) = child.reference_parent_id.as_deref() else {
            continue;
        };
        stats.replies += 1;

        if used_as_parent.contains(child.id.as_str()) {
            stats.already_parent += 1;
            continue;
        }
        let parent_pos = match index.get(parent_id) {
            Some(&p) if p != pos => p,
            _ => {
                let err = CurationError::ReferenceResolution {
                    child: child.id.clone(),
                    parent: parent_id.to_string(),
                };
                tracing::debug!(error = %err, "dropping unresolved reply");
                stats.unresolved += 1;
                continue;
            }
        };
        let parent = &messages[parent_pos];

        let mut parts = vec![child];
        for (next, candidate) in messages.iter().enumerate().skip(pos + 1) {
            if !continues_answer(child, candidate, parent) {
                break;
            }
            parts.push(candidate);
            absorbed.insert(next);
        }
        stats.coalesced += parts.len() - 1;

        let Some(pair) = build_pair(parent, &parts) else {
            stats.empty += 1;
            continue;
        };
        used_as_parent.insert(parent.id.as_str());
        pairs.push(pair);
    }

    stats.pairs = pairs.len();
    pairs
}

/// A follow-up continues `first`'s answer when the same author posts it
/// straight after, either replying to the same parent or with no reference.
fn continues_answer(first: &RawMessage, candidate: &RawMessage, parent: &RawMessage) -> bool {
    let same_author = matches!(
        (first.author_key, candidate.author_key),
        (Some(a), Some(b)) if a == b
    );
    if !same_author || candidate.id == parent.id {
        return false;
    }
    match candidate.reference_parent_id.as_deref() {
        None => true,
        Some(p) => Some(p) == first.reference_parent_id.as_deref(),
    }
}

fn build_pair(parent: &RawMessage, parts: &[&RawMessage]) -> Option<ConversationPair> {
    let question = parent.content.trim();
    let answer = parts
        .iter()
        .map(|m| m.content.trim())
        .filter(|text| !text.is_empty())
        .collect::<Vec<_>>()
        .join(CONTINUATION_JOIN);

    // Markers are added only after the emptiness check so an image alone never forms a turn.
    if question.is_empty() || answer.is_empty() {
        return None;
    }
    let user = if parent.attachments {
        format!("{IMAGE_MARKER} {question}")
    } else {
        question.to_string()
    };
    let assistant = if parts.iter().any(|m| m.attachments) {
        format!("{answer} {IMAGE_MARKER}")
    } else {
        answer
    };

    let mut origin_ids = Vec::with_capacity(parts.len() + 1);
    origin_ids.push(parent.id.clone());
    origin_ids.extend(parts.iter().map(|m| m.id.clone()));
    ConversationPair::new(user, assistant, SOURCE_TAG, origin_ids)
}

/// Reads a threaded export from disk and links it.
pub fn link_export(
    path: &Path,
    blacklist: &Blacklist,
    redactor: &Redactor,
) -> Result<(Vec<ConversationPair>, LinkStats)> {
    require_input(path)?;
    let raw = fs::read_to_string(path)
        .with_context(|| format!("read threaded export {}", path.display()))?;
    let mut stats = LinkStats::default();

    let doc: Value = match serde_json::from_str(&raw) {
        Ok(doc) => doc,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "threaded export is not valid JSON");
            stats.malformed += 1;
            return Ok((Vec::new(), stats));
        }
    };

    let messages = parse_export(&doc, blacklist, redactor, &mut stats);
    let pairs = link_messages(&messages, &mut stats);
    tracing::info!(
        path = %path.display(),
        messages = stats.messages,
        pairs = stats.pairs,
        unresolved = stats.unresolved,
        blacklisted = stats.blacklisted,
        coalesced = stats.coalesced,
        empty = stats.empty,
        malformed = stats.malformed,
        "link complete"
    );
    Ok((pairs, stats))
}
