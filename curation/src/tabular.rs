//! Tabular reference rows (one hero per row) rendered into fixed Q&A pairs.

use anyhow::Result;
use corpus_types::ConversationPair;
use serde::Deserialize;
use std::path::Path;

use crate::error::CurationError;
use crate::jsonl::for_each_value;

pub const SOURCE_TAG: &str = "reference";

/// Community names mapped to their official in-game localisation.
const GLOSSARY: &[(&str, &str)] = &[
    ("Frost Penguin", "Penguin"),
    ("Ullr", "Ullr Hatchling"),
    ("Calamity", "Calamity's Edge"),
    ("Gingerbread", "Gingerbread Man"),
    ("Bunny", "Bunny Band"),
    ("Snorf", "Snorf (Rocket Bat)"),
    ("Voltgun", "Voltstrike"),
    ("Eye of Hurricane", "Eye of the Hurricane"),
];

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReferenceRow {
    #[serde(alias = "Hero", alias = "hero")]
    pub name: Option<String>,
    #[serde(default, alias = "Tier")]
    pub tier: Option<String>,
    #[serde(default, alias = "Best Use")]
    pub best_use: Option<String>,
    #[serde(default, alias = "Traits / Key Abilities")]
    pub traits: Option<String>,
    #[serde(default, alias = "Best Weapon")]
    pub weapon: Option<String>,
    #[serde(default, alias = "Robot Pairing")]
    pub pairing: Option<String>,
    #[serde(default, alias = "Gameplay Style")]
    pub style: Option<String>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TabularStats {
    pub rows: usize,
    pub pairs: usize,
    pub malformed: usize,
}

/// Applies the glossary in order. An already localised name ("Ullr Hatchling")
/// is shielded so it is not expanded twice.
pub fn localise(text: &str) -> String {
    const SHIELD: &str = "\u{0}";
    let mut out = text.to_string();
    for (community, official) in GLOSSARY {
        if official.contains(community) {
            out = out
                .replace(official, SHIELD)
                .replace(community, official)
                .replace(SHIELD, official);
        } else {
            out = out.replace(community, official);
        }
    }
    out
}

fn field(value: &Option<String>) -> String {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(localise)
        .unwrap_or_else(|| "unknown".to_string())
}

pub fn row_to_pair(row: &ReferenceRow, line: usize) -> Result<ConversationPair, CurationError> {
    let name = row
        .name
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .ok_or_else(|| CurationError::MalformedRecord {
            line,
            reason: "row has no name".to_string(),
        })?;

    let user = format!("How should I build {name} and what is the optimal playstyle?");
    let assistant = format!(
        "{name} is a {tier}-tier hero best used for {best_use}. \
         Core Traits: {traits}. Optimal Loadout: Pair with {weapon} and robots {pairing}. \
         Strategy: This is a {style} build. Focus on maximising these specific synergies \
         to push high-level waves.",
        tier = field(&row.tier),
        best_use = field(&row.best_use),
        traits = field(&row.traits),
        weapon = field(&row.weapon),
        pairing = field(&row.pairing),
        style = field(&row.style),
    );
    ConversationPair::new(user, assistant, SOURCE_TAG, vec![format!("row-{line}")]).ok_or(
        CurationError::MalformedRecord {
            line,
            reason: "row rendered to an empty pair".to_string(),
        },
    )
}

pub fn read_rows(path: &Path) -> Result<(Vec<ConversationPair>, TabularStats)> {
    let mut pairs = Vec::new();
    let mut stats = TabularStats::default();
    let read = for_each_value(path, |line, value| {
        stats.rows += 1;
        let row = match serde_json::from_value::<ReferenceRow>(value) {
            Ok(row) => row,
            Err(e) => {
                tracing::warn!(line, error = %e, "skipping malformed reference row");
                stats.malformed += 1;
                return;
            }
        };
        match row_to_pair(&row, line) {
            Ok(pair) => pairs.push(pair),
            Err(e) => {
                tracing::warn!(error = %e, "skipping reference row");
                stats.malformed += 1;
            }
        }
    })?;
    stats.malformed += read.malformed;
    stats.pairs = pairs.len();
    tracing::info!(path = %path.display(), rows = stats.rows, pairs = stats.pairs, "reference rows converted");
    Ok((pairs, stats))
}
