use anyhow::{Context, Result};
use corpus_types::SourceTier;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

// ── Defaults ────────────────────────────────────────────────────────────

const DEFAULT_DATA_DIR: &str = "data";
// Relative to `data_dir`.
const DEFAULT_WORK_DIR: &str = "work";
const DEFAULT_OUTPUT: &str = "training_master_weighted.jsonl";

pub const DEFAULT_PERSONA: &str = "You are the Zombie Waves AI Codex, a veteran strategy engine. \
Use British English. You specialise in mechanical synergies (e.g., Reload Loops, \
Shatter-Execution) and high-efficiency camp progression. \
Provide technical, high-density advice based on 'Gold Truth' game logic. \
Avoid generic trait definitions; instead, explain how traits interact within a build. \
Stay strictly in character and only discuss Zombie Waves content.";

const DEFAULT_PROTECT: &[&str] = &[
    "tier", "rank", "vs", "priority", "stats", "build", "weapon", "gear", "voltgun",
    "arbalest", "boreas", "rpg", "meteor", "hero", "blueprint", "miniclip", "eoh",
    "windborne", "shatter", "modified xyclon", "mx",
];

const DEFAULT_BURN: &[&str] = &[
    "post", "reddit", "sub", "edit:", "tldr", "upvote", "link", "photo", "image", "thread",
    "customer support", "review", "star", "redeem code", "pity", "greedy", "scam", "quit",
    "devs", "dm me", "discord", "server", "channel", "slightly_smiling_face", "sparkles",
    "lmao", "lol", "message me",
];

const DEFAULT_CAPABILITY_TERMS: &[&str] = &["eoh", "eye of the hurricane"];
const DEFAULT_MECHANISM_TERMS: &[&str] = &["miniclip", "mini-clip", "mini clip", "single shot"];

const DEFAULT_MIN_ASSISTANT_WORDS: usize = 8;
const DEFAULT_MIN_DEDUP_WORDS: usize = 3;
const DEFAULT_MIN_PAIR_CHARS: usize = 10;
const DEFAULT_TRANSCRIPT_MAX_CHARS: usize = 3500;
const DEFAULT_SEED: u64 = 3407;

const DEFAULT_JUDGE_ENDPOINT: &str = "http://localhost:8080/v1/chat/completions";
const DEFAULT_JUDGE_MODEL: &str = "llama-3.2-3b-instruct";
const DEFAULT_JUDGE_WINDOW: usize = 4;
const DEFAULT_JUDGE_USER_BUDGET: usize = 500;
const DEFAULT_JUDGE_ASSISTANT_BUDGET: usize = 1000;
const DEFAULT_JUDGE_MAX_TOKENS: u32 = 12;
const DEFAULT_JUDGE_TIMEOUT_SECS: u64 = 60;

// ── Config structs ──────────────────────────────────────────────────────

/// Everything a run needs, built once at startup and handed to each stage by reference.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct CurationConfig {
    /// Base for relative input paths.
    pub data_dir: PathBuf,
    /// Where the orchestrator writes per-stage intermediate files. Relative to `data_dir`.
    pub work_dir: PathBuf,
    /// Relative to `data_dir`.
    pub output: PathBuf,
    /// One record id per line; matching records are dropped at sanitisation.
    pub blacklist: Option<PathBuf>,
    pub forum: Option<ForumInputs>,
    pub threaded: Vec<PathBuf>,
    pub conversation_blocks: Vec<PathBuf>,
    pub tabular: Vec<PathBuf>,
    pub transcripts: Vec<PathBuf>,
    /// Already-curated files assembled alongside the pipeline's own output.
    pub sources: Vec<TieredSource>,
    pub keywords: KeywordLists,
    pub conflict: ConflictTerms,
    pub weights: TierWeights,
    pub persona: String,
    pub min_assistant_words: usize,
    pub min_dedup_words: usize,
    pub min_pair_chars: usize,
    pub transcript_max_chars: usize,
    pub seed: u64,
    pub classifier: ClassifierKind,
    pub judge: JudgeConfig,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ForumInputs {
    pub posts: PathBuf,
    pub comments: PathBuf,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TieredSource {
    pub path: PathBuf,
    pub tier: SourceTier,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct KeywordLists {
    pub protect: Vec<String>,
    pub burn: Vec<String>,
}

/// Two term groups that must never be recommended together.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ConflictTerms {
    pub capability: Vec<String>,
    pub mechanism: Vec<String>,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct TierWeights {
    pub gold: usize,
    pub silver: usize,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClassifierKind {
    #[default]
    Rules,
    Judge,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct JudgeConfig {
    /// OpenAI-compatible chat completions URL.
    pub endpoint: String,
    pub model: String,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    /// Maximum number of in-flight judge calls.
    pub window: usize,
    pub user_budget: usize,
    pub assistant_budget: usize,
    pub max_tokens: u32,
    pub timeout_secs: u64,
}

impl Default for CurationConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            work_dir: PathBuf::from(DEFAULT_WORK_DIR),
            output: PathBuf::from(DEFAULT_OUTPUT),
            blacklist: None,
            forum: None,
            threaded: Vec::new(),
            conversation_blocks: Vec::new(),
            tabular: Vec::new(),
            transcripts: Vec::new(),
            sources: Vec::new(),
            keywords: KeywordLists::default(),
            conflict: ConflictTerms::default(),
            weights: TierWeights::default(),
            persona: DEFAULT_PERSONA.to_string(),
            min_assistant_words: DEFAULT_MIN_ASSISTANT_WORDS,
            min_dedup_words: DEFAULT_MIN_DEDUP_WORDS,
            min_pair_chars: DEFAULT_MIN_PAIR_CHARS,
            transcript_max_chars: DEFAULT_TRANSCRIPT_MAX_CHARS,
            seed: DEFAULT_SEED,
            classifier: ClassifierKind::default(),
            judge: JudgeConfig::default(),
        }
    }
}

impl Default for KeywordLists {
    fn default() -> Self {
        Self {
            protect: owned(DEFAULT_PROTECT),
            burn: owned(DEFAULT_BURN),
        }
    }
}

impl Default for ConflictTerms {
    fn default() -> Self {
        Self {
            capability: owned(DEFAULT_CAPABILITY_TERMS),
            mechanism: owned(DEFAULT_MECHANISM_TERMS),
        }
    }
}

impl Default for TierWeights {
    fn default() -> Self {
        Self {
            gold: SourceTier::Gold.default_weight(),
            silver: SourceTier::Silver.default_weight(),
        }
    }
}

impl Default for JudgeConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_JUDGE_ENDPOINT.to_string(),
            model: DEFAULT_JUDGE_MODEL.to_string(),
            api_key: None,
            window: DEFAULT_JUDGE_WINDOW,
            user_budget: DEFAULT_JUDGE_USER_BUDGET,
            assistant_budget: DEFAULT_JUDGE_ASSISTANT_BUDGET,
            max_tokens: DEFAULT_JUDGE_MAX_TOKENS,
            timeout_secs: DEFAULT_JUDGE_TIMEOUT_SECS,
        }
    }
}

impl TierWeights {
    pub fn weight(&self, tier: SourceTier) -> usize {
        match tier {
            SourceTier::Gold => self.gold,
            SourceTier::Silver => self.silver,
        }
    }
}

impl CurationConfig {
    /// Defaults, overlaid by the JSON file at `path` (if any), overlaid by `CODEX_*` env vars.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_env() -> Result<Self> {
        Self::load(None)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("read config file {}", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("parse config file {}", path.display()))
    }

    /// Applies `CODEX_*` overrides from `lookup`. Blank values are ignored.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let home = dirs::home_dir();
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("CODEX_DATA_DIR") {
            self.data_dir = expand_tilde(&v, home.as_deref());
        }
        if let Some(v) = get("CODEX_WORK_DIR") {
            self.work_dir = expand_tilde(&v, home.as_deref());
        }
        if let Some(v) = get("CODEX_OUTPUT") {
            self.output = expand_tilde(&v, home.as_deref());
        }
        if let Some(v) = get("CODEX_BLACKLIST") {
            self.blacklist = Some(expand_tilde(&v, home.as_deref()));
        }
        if let Some(v) = get("CODEX_PERSONA") {
            self.persona = v;
        }
        self.seed = env_u64(get("CODEX_SEED"), self.seed);
        self.weights.gold = env_usize(get("CODEX_GOLD_WEIGHT"), self.weights.gold);
        self.weights.silver = env_usize(get("CODEX_SILVER_WEIGHT"), self.weights.silver);
        self.min_assistant_words =
            env_usize(get("CODEX_MIN_ASSISTANT_WORDS"), self.min_assistant_words);
        self.min_dedup_words = env_usize(get("CODEX_MIN_DEDUP_WORDS"), self.min_dedup_words);
        if let Some(v) = get("CODEX_CLASSIFIER") {
            match v.to_lowercase().as_str() {
                "judge" => self.classifier = ClassifierKind::Judge,
                "rules" => self.classifier = ClassifierKind::Rules,
                other => tracing::warn!(value = other, "ignoring unknown CODEX_CLASSIFIER"),
            }
        }
        if let Some(v) = get("CODEX_JUDGE_ENDPOINT") {
            self.judge.endpoint = v;
        }
        if let Some(v) = get("CODEX_JUDGE_MODEL") {
            self.judge.model = v;
        }
        if let Some(v) = get("CODEX_JUDGE_API_KEY").or_else(|| get("OPENAI_API_KEY")) {
            self.judge.api_key = Some(v);
        }
        self.judge.window = env_usize(get("CODEX_JUDGE_WINDOW"), self.judge.window).max(1);
    }

    /// Resolves a configured path against `data_dir` unless it is already absolute.
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.data_dir.join(path)
        }
    }
}

fn owned(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn env_u64(val: Option<String>, default: u64) -> u64 {
    match val {
        Some(val) => val.trim().parse::<u64>().unwrap_or(default),
        None => default,
    }
}

fn env_usize(val: Option<String>, default: usize) -> usize {
    match val {
        Some(val) => val.trim().parse::<usize>().unwrap_or(default),
        None => default,
    }
}

fn expand_tilde(input: &str, home: Option<&Path>) -> PathBuf {
    if let (Some(rest), Some(home)) = (input.strip_prefix("~/"), home) {
        return home.join(rest);
    }
    PathBuf::from(input)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_match_documented_values() {
        let config = CurationConfig::default();
        assert_eq!(config.weights.gold, 5);
        assert_eq!(config.weights.silver, 1);
        assert_eq!(config.min_assistant_words, 8);
        assert_eq!(config.min_dedup_words, 3);
        assert_eq!(config.min_pair_chars, 10);
        assert_eq!(config.classifier, ClassifierKind::Rules);
        assert!(config.keywords.protect.contains(&"eoh".to_string()));
    }

    #[test]
    fn overrides_replace_selected_fields() {
        let mut config = CurationConfig::default();
        config.apply_overrides(lookup_from(&[
            ("CODEX_SEED", "42"),
            ("CODEX_GOLD_WEIGHT", "3"),
            ("CODEX_PERSONA", "Be terse."),
            ("CODEX_CLASSIFIER", "judge"),
            ("CODEX_JUDGE_WINDOW", "0"),
        ]));
        assert_eq!(config.seed, 42);
        assert_eq!(config.weights.gold, 3);
        assert_eq!(config.persona, "Be terse.");
        assert_eq!(config.classifier, ClassifierKind::Judge);
        assert_eq!(config.judge.window, 1);
    }

    #[test]
    fn unparseable_and_blank_overrides_keep_defaults() {
        let mut config = CurationConfig::default();
        config.apply_overrides(lookup_from(&[("CODEX_SEED", "abc"), ("CODEX_PERSONA", "  ")]));
        assert_eq!(config.seed, DEFAULT_SEED);
        assert_eq!(config.persona, DEFAULT_PERSONA);
    }

    #[test]
    fn file_config_fills_missing_fields_with_defaults() -> Result<()> {
        let mut file = NamedTempFile::new()?;
        write!(
            file,
            r#"{{"seed": 7, "sources": [{{"path": "codex.jsonl", "tier": "gold"}}], "weights": {{"gold": 2}}}}"#
        )?;
        let config = CurationConfig::from_file(file.path())?;
        assert_eq!(config.seed, 7);
        assert_eq!(config.sources.len(), 1);
        assert_eq!(config.sources[0].tier, SourceTier::Gold);
        assert_eq!(config.weights.gold, 2);
        assert_eq!(config.weights.silver, 1);
        assert_eq!(config.persona, DEFAULT_PERSONA);
        Ok(())
    }

    #[test]
    fn resolve_joins_relative_paths_only() {
        let config = CurationConfig {
            data_dir: PathBuf::from("/srv/codex"),
            ..Default::default()
        };
        assert_eq!(
            config.resolve(Path::new("posts.jsonl")),
            PathBuf::from("/srv/codex/posts.jsonl")
        );
        assert_eq!(
            config.resolve(Path::new("/abs/posts.jsonl")),
            PathBuf::from("/abs/posts.jsonl")
        );
    }

    #[test]
    fn default_outputs_land_directly_under_data_dir() {
        let config = CurationConfig::default();
        assert_eq!(
            config.resolve(&config.output),
            PathBuf::from("data/training_master_weighted.jsonl")
        );
        assert_eq!(config.resolve(&config.work_dir), PathBuf::from("data/work"));
    }

    #[test]
    fn tilde_expands_against_home() {
        let home = Path::new("/home/codex");
        assert_eq!(
            expand_tilde("~/data/out.jsonl", Some(home)),
            PathBuf::from("/home/codex/data/out.jsonl")
        );
        assert_eq!(expand_tilde("rel/out.jsonl", Some(home)), PathBuf::from("rel/out.jsonl"));
    }
}
