//! Forum comment → post pairing.
//!
//! Posts are fully loaded into an id → text map before any comment is read,
//! because many comments hang off one post and arrive in no particular order.

use anyhow::Result;
use corpus_types::ConversationPair;
use std::collections::HashMap;
use std::path::Path;

use crate::error::{require_input, CurationError};
use crate::sanitiser::{read_sanitised, SanitisedRecord};

pub const SOURCE_TAG: &str = "forum";

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PairStats {
    pub posts: usize,
    pub comments: usize,
    pub pairs: usize,
    pub unresolved: usize,
    pub too_short: usize,
    pub malformed: usize,
}

/// Strips a type prefix such as `t3_` so comment parents match bare post ids.
pub fn normalise_parent_id(parent_id: &str) -> &str {
    match parent_id.split_once('_') {
        Some((_, rest)) => rest,
        None => parent_id,
    }
}

pub fn build_post_index(posts: &[SanitisedRecord]) -> HashMap<&str, &str> {
    posts
        .iter()
        .filter_map(|post| Some((post.id.as_deref()?, post.text.as_str())))
        .collect()
}

/// Pairs each comment with its parent post. Both sides must be longer than
/// `min_chars` characters.
pub fn pair_comments(
    posts: &[SanitisedRecord],
    comments: &[SanitisedRecord],
    min_chars: usize,
    stats: &mut PairStats,
) -> Vec<ConversationPair> {
    let index = build_post_index(posts);
    stats.posts = index.len();
    stats.comments = comments.len();

    let mut pairs = Vec::new();
    for comment in comments {
        let Some(raw_parent) = comment.parent_id.as_deref() else {
            stats.unresolved += 1;
            continue;
        };
        let parent = normalise_parent_id(raw_parent);
        let Some(post_text) = index.get(parent) else {
            let err = CurationError::ReferenceResolution {
                child: comment.id.clone().unwrap_or_default(),
                parent: raw_parent.to_string(),
            };
            tracing::debug!(error = %err, "comment parent is not a known post");
            stats.unresolved += 1;
            continue;
        };

        if post_text.trim().chars().count() <= min_chars
            || comment.text.trim().chars().count() <= min_chars
        {
            stats.too_short += 1;
            continue;
        }

        let mut origin_ids = vec![parent.to_string()];
        origin_ids.extend(comment.id.clone());
        if let Some(pair) = ConversationPair::new(*post_text, &comment.text, SOURCE_TAG, origin_ids) {
            pairs.push(pair);
        }
    }
    stats.pairs = pairs.len();
    pairs
}

/// Reads sanitised post and comment files and pairs them.
pub fn pair_files(
    posts_path: &Path,
    comments_path: &Path,
    min_chars: usize,
) -> Result<(Vec<ConversationPair>, PairStats)> {
    require_input(posts_path)?;
    require_input(comments_path)?;

    let (posts, bad_posts) = read_sanitised(posts_path)?;
    let (comments, bad_comments) = read_sanitised(comments_path)?;
    let mut stats = PairStats {
        malformed: bad_posts + bad_comments,
        ..Default::default()
    };
    let pairs = pair_comments(&posts, &comments, min_chars, &mut stats);

    tracing::info!(
        posts = stats.posts,
        comments = stats.comments,
        pairs = stats.pairs,
        unresolved = stats.unresolved,
        too_short = stats.too_short,
        malformed = stats.malformed,
        "pairing complete"
    );
    Ok((pairs, stats))
}
