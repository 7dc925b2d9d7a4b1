use anyhow::{anyhow, ensure, Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One message from a threaded export, as ingested. Never mutated after import.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMessage {
    pub id: String,
    pub content: String,
    pub attachments: bool,
    pub reference_parent_id: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
    /// Opaque per-author key used only to coalesce double replies; never serialised.
    pub author_key: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// One role-tagged turn. Also the element type of the ChatML wire record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: Role,
    pub content: String,
}

/// A user/assistant pair on its way through the pipeline.
///
/// Stages never edit a pair in place; they either drop it or derive a new one
/// (see [`ConversationPair::with_assistant`]).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationPair {
    pub user: String,
    pub assistant: String,
    /// Which converter produced the pair, e.g. "forum", "threaded", "reference".
    #[serde(default)]
    pub source: String,
    /// Ids of the raw records the pair was built from, for audit.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub origin_ids: Vec<String>,
}

impl ConversationPair {
    /// Builds a pair, or `None` when either side is blank after trimming.
    pub fn new(
        user: impl Into<String>,
        assistant: impl Into<String>,
        source: impl Into<String>,
        origin_ids: Vec<String>,
    ) -> Option<Self> {
        let user = user.into().trim().to_string();
        let assistant = assistant.into().trim().to_string();
        if user.is_empty() || assistant.is_empty() {
            return None;
        }
        Some(Self {
            user,
            assistant,
            source: source.into(),
            origin_ids,
        })
    }

    /// Derives a new pair with a rewritten assistant turn. `None` if the rewrite is blank.
    pub fn with_assistant(&self, assistant: impl Into<String>) -> Option<Self> {
        Self::new(
            self.user.clone(),
            assistant,
            self.source.clone(),
            self.origin_ids.clone(),
        )
    }

    pub fn assistant_word_count(&self) -> usize {
        self.assistant.split_whitespace().count()
    }
}

/// The terminal three-turn training example.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorpusEntry {
    pub system: String,
    pub user: String,
    pub assistant: String,
}

impl CorpusEntry {
    pub fn from_pair(pair: &ConversationPair, persona: &str) -> Self {
        Self {
            system: persona.to_string(),
            user: pair.user.clone(),
            assistant: pair.assistant.clone(),
        }
    }

    /// Returns a copy carrying `persona` as its system turn, whatever it held before.
    pub fn with_persona(&self, persona: &str) -> Self {
        Self {
            system: persona.to_string(),
            ..self.clone()
        }
    }

    pub fn to_record(&self) -> ChatRecord {
        ChatRecord {
            messages: vec![
                ChatMessage {
                    role: Role::System,
                    content: self.system.clone(),
                },
                ChatMessage {
                    role: Role::User,
                    content: self.user.clone(),
                },
                ChatMessage {
                    role: Role::Assistant,
                    content: self.assistant.clone(),
                },
            ],
        }
    }

    /// Picks the first turn of each role. A missing system turn is allowed
    /// (the assembler always overwrites it); missing user/assistant turns are not.
    pub fn from_record(record: &ChatRecord) -> Result<Self> {
        let find = |role: Role| {
            record
                .messages
                .iter()
                .find(|m| m.role == role)
                .map(|m| m.content.clone())
        };
        let user = find(Role::User).context("record has no user turn")?;
        let assistant = find(Role::Assistant).context("record has no assistant turn")?;
        Ok(Self {
            system: find(Role::System).unwrap_or_default(),
            user,
            assistant,
        })
    }
}

/// ChatML-style wire record: `{"messages": [{"role": .., "content": ..}, ..]}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatRecord {
    pub messages: Vec<ChatMessage>,
}

pub type ChatMessage = ConversationTurn;

/// Authority class of a source file; controls oversampling at assembly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceTier {
    Gold,
    Silver,
}

impl SourceTier {
    pub fn default_weight(&self) -> usize {
        match self {
            SourceTier::Gold => 5,
            SourceTier::Silver => 1,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceTier::Gold => "gold",
            SourceTier::Silver => "silver",
        }
    }
}

impl std::str::FromStr for SourceTier {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "gold" => Ok(SourceTier::Gold),
            "silver" => Ok(SourceTier::Silver),
            other => Err(anyhow!("unknown source tier '{other}' (expected gold or silver)")),
        }
    }
}

/// Structural check for one output corpus line: exactly system, user, assistant
/// in that order, each a non-empty string.
pub fn validate_record_value(value: &serde_json::Value) -> Result<()> {
    let obj = value
        .as_object()
        .context("corpus entry must be a JSON object")?;
    let messages = obj
        .get("messages")
        .and_then(|v| v.as_array())
        .context("messages missing or not an array")?;
    ensure!(
        messages.len() == 3,
        "messages must hold exactly three turns, found {}",
        messages.len()
    );

    for (message, expected) in messages.iter().zip(["system", "user", "assistant"]) {
        let message = message.as_object().context("message must be an object")?;
        let role = ensure_string(message, "role")?;
        ensure!(role == expected, "expected role {expected}, found {role}");
        ensure_string(message, "content")?;
    }
    Ok(())
}

fn ensure_string<'a>(
    map: &'a serde_json::Map<String, serde_json::Value>,
    key: &str,
) -> Result<&'a str> {
    map.get(key)
        .and_then(|v| v.as_str())
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| anyhow!("{key} missing or not a non-empty string"))
}
