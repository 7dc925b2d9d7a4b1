//! Deterministic register rewrite for assistant turns.
//!
//! The rules form one ordered table. Later rules see the output of earlier
//! ones, so reordering the table changes results.

use anyhow::Result;
use corpus_types::ConversationPair;
use regex::{Captures, NoExpand, Regex};
use std::path::Path;

use crate::error::require_input;
use crate::jsonl::{read_pairs, write_pairs};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    Hedging = 1,
    Register = 2,
    Shorthand = 3,
    Spelling = 4,
    Tidy = 5,
}

#[derive(Debug, Clone)]
enum Rewrite {
    Remove(Regex),
    /// Replacement is inserted verbatim.
    Replace(Regex, &'static str),
    /// Replacement may reference capture groups.
    Expand(Regex, &'static str),
    /// Keeps the capitalisation of the first letter of the match.
    MatchCase(Regex, &'static str),
    CollapseWhitespace,
    CapitaliseFirst,
}

#[derive(Debug, Clone)]
pub struct ToneRule {
    pub name: &'static str,
    pub stage: Stage,
    rewrite: Rewrite,
}

impl ToneRule {
    fn new(name: &'static str, stage: Stage, rewrite: Rewrite) -> Self {
        Self { name, stage, rewrite }
    }

    pub fn apply(&self, text: &str) -> String {
        match &self.rewrite {
            Rewrite::Remove(re) => re.replace_all(text, "").into_owned(),
            Rewrite::Replace(re, to) => re.replace_all(text, NoExpand(to)).into_owned(),
            Rewrite::Expand(re, to) => re.replace_all(text, *to).into_owned(),
            Rewrite::MatchCase(re, to) => re
                .replace_all(text, |caps: &Captures| {
                    if caps[0].starts_with(char::is_uppercase) {
                        capitalise_first(to)
                    } else {
                        to.to_string()
                    }
                })
                .into_owned(),
            Rewrite::CollapseWhitespace => text.split_whitespace().collect::<Vec<_>>().join(" "),
            Rewrite::CapitaliseFirst => capitalise_first(text),
        }
    }
}

/// Informal phrase → authoritative phrase. Case-sensitive, whole phrase.
const REGISTER_TABLE: &[(&str, &str)] = &[
    ("I guess", "It appears"),
    ("maybe actually no", "Upon further analysis"),
    ("Probably you can", "It is recommended to"),
    ("I'm not sure but", "Evidence suggests"),
    ("I believe that", "It is established that"),
    ("i cant", "it is difficult to determine"),
    ("I recommend", "Recommended strategy:"),
    ("I like using", "Effective strategy:"),
    ("I use", "Use"),
    ("it saved me", "is effective"),
];

/// Community shorthand → canonical form. Whole word, case-insensitive.
const SHORTHAND_TABLE: &[(&str, &str)] = &[
    ("dmg", "damage"),
    ("atk", "attack"),
    ("hp", "HP"),
    ("lvl", "level"),
    ("eq", "equipment"),
    ("arba", "Arbalest"),
    ("pulv", "Pulverizer"),
];

/// US spelling → British spelling.
const SPELLING_TABLE: &[(&str, &str)] = &[
    ("armor", "armour"),
    ("specializing", "specialising"),
    ("prioritize", "prioritise"),
    ("defense", "defence"),
    ("program", "programme"),
    ("analyze", "analyse"),
    ("color", "colour"),
    ("optimized", "optimised"),
];

fn standard_rules() -> Vec<ToneRule> {
    let mut rules = vec![
        ToneRule::new(
            "sign_off",
            Stage::Hedging,
            Rewrite::Remove(
                Regex::new(r"(?i)\b(hope this helps|good luck|just my two cents|edit:).*").unwrap(),
            ),
        ),
        // "i believe that" and "i'm not sure but" are left for the register table.
        ToneRule::new(
            "hedging",
            Stage::Hedging,
            Rewrite::Remove(
                Regex::new(
                    r"(?i)\b(i think|in my opinion|to be honest|imo|imho|to me|personally|i've found that|i have found that|i noticed that|i'm not sure if|i am not sure if|i don't know if)\b,?\s*",
                )
                .unwrap(),
            ),
        ),
        ToneRule::new(
            "chatter",
            Stage::Hedging,
            Rewrite::Remove(
                Regex::new(
                    r"(?i)\b(fk|hmm+|uhh+|umm+|wait wait|yea|yeah|yep|lol|haha|hehe|basically|honestly|just|idk|asap|garbage|anyways?)\b,?",
                )
                .unwrap(),
            ),
        ),
        ToneRule::new(
            "community",
            Stage::Hedging,
            Rewrite::Remove(
                Regex::new(r"(?i)\b(hey everyone|you guys|thanks again|ingame|f2p)\b,?").unwrap(),
            ),
        ),
    ];

    for (from, to) in REGISTER_TABLE {
        let re = Regex::new(&format!(r"\b{}\b", regex::escape(from))).unwrap();
        rules.push(ToneRule::new("register", Stage::Register, Rewrite::Replace(re, *to)));
    }
    for (from, to) in SHORTHAND_TABLE {
        let re = Regex::new(&format!(r"(?i)\b{}\b", regex::escape(from))).unwrap();
        rules.push(ToneRule::new("shorthand", Stage::Shorthand, Rewrite::Replace(re, *to)));
    }
    for (from, to) in SPELLING_TABLE {
        let re = Regex::new(&format!(r"(?i)\b{}\b", regex::escape(from))).unwrap();
        rules.push(ToneRule::new("spelling", Stage::Spelling, Rewrite::MatchCase(re, *to)));
    }

    rules.extend([
        ToneRule::new(
            "escaped_newline",
            Stage::Tidy,
            Rewrite::Replace(Regex::new(r"\\n").unwrap(), " "),
        ),
        ToneRule::new(
            "placeholder",
            Stage::Tidy,
            Rewrite::Remove(Regex::new(r"\|[a-z_]+\||[;:][-)]+").unwrap()),
        ),
        ToneRule::new(
            "space_before_punctuation",
            Stage::Tidy,
            Rewrite::Expand(Regex::new(r"\s+([,.!?;:])").unwrap(), "$1"),
        ),
        ToneRule::new("whitespace", Stage::Tidy, Rewrite::CollapseWhitespace),
        ToneRule::new(
            "leading_punctuation",
            Stage::Tidy,
            Rewrite::Remove(Regex::new(r"^[,.;:!?\s]+").unwrap()),
        ),
        ToneRule::new("capitalise", Stage::Tidy, Rewrite::CapitaliseFirst),
    ]);
    rules
}

fn capitalise_first(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ToneStats {
    pub input: usize,
    pub rewritten: usize,
    pub unchanged: usize,
    /// Assistant turns that were nothing but filler.
    pub emptied: usize,
    pub malformed: usize,
}

#[derive(Debug, Clone)]
pub struct ToneNormalizer {
    rules: Vec<ToneRule>,
}

impl ToneNormalizer {
    pub fn new() -> Self {
        Self {
            rules: standard_rules(),
        }
    }

    pub fn rules(&self) -> &[ToneRule] {
        &self.rules
    }

    pub fn rewrite(&self, text: &str) -> String {
        self.rules
            .iter()
            .fold(text.to_string(), |acc, rule| rule.apply(&acc))
    }

    /// Rewrites the assistant turn only. `None` when nothing is left.
    pub fn apply(&self, pair: &ConversationPair) -> Option<ConversationPair> {
        pair.with_assistant(self.rewrite(&pair.assistant))
    }

    pub fn normalise(&self, pairs: Vec<ConversationPair>) -> (Vec<ConversationPair>, ToneStats) {
        let mut stats = ToneStats {
            input: pairs.len(),
            ..Default::default()
        };
        let mut out = Vec::with_capacity(pairs.len());
        for pair in &pairs {
            match self.apply(pair) {
                Some(next) => {
                    if next.assistant == pair.assistant {
                        stats.unchanged += 1;
                    } else {
                        stats.rewritten += 1;
                    }
                    out.push(next);
                }
                None => stats.emptied += 1,
            }
        }
        tracing::info!(
            input = stats.input,
            rewritten = stats.rewritten,
            emptied = stats.emptied,
            "tone normalisation complete"
        );
        (out, stats)
    }
}

impl Default for ToneNormalizer {
    fn default() -> Self {
        Self::new()
    }
}

pub fn tone_file(input: &Path, output: &Path) -> Result<ToneStats> {
    require_input(input)?;
    let (pairs, read) = read_pairs(input, "tone")?;
    let (out, mut stats) = ToneNormalizer::new().normalise(pairs);
    stats.malformed = read.malformed;
    write_pairs(output, &out)?;
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(name: &str) -> ToneRule {
        ToneNormalizer::new()
            .rules()
            .iter()
            .find(|r| r.name == name)
            .cloned()
            .unwrap()
    }

    fn rules_in(stage: Stage) -> Vec<ToneRule> {
        ToneNormalizer::new()
            .rules()
            .iter()
            .filter(|r| r.stage == stage)
            .cloned()
            .collect()
    }

    fn apply_all(rules: &[ToneRule], text: &str) -> String {
        rules.iter().fold(text.to_string(), |acc, r| r.apply(&acc))
    }

    #[test]
    fn table_is_ordered_by_stage() {
        let normalizer = ToneNormalizer::new();
        let stages: Vec<Stage> = normalizer.rules().iter().map(|r| r.stage).collect();
        let mut sorted = stages.clone();
        sorted.sort();
        assert_eq!(stages, sorted);
    }

    #[test]
    fn hedging_phrases_are_removed_whole() {
        let out = rule("hedging").apply("I think, the Boreas is better. In my opinion it scales");
        assert_eq!(out, "the Boreas is better. it scales");
        // "think" on its own is not a hedge.
        assert_eq!(rule("hedging").apply("think ahead"), "think ahead");
    }

    #[test]
    fn chatter_and_sign_offs_are_removed() {
        assert_eq!(rule("chatter").apply("yeah just use frost"), "  use frost");
        assert_eq!(rule("sign_off").apply("Use frost. hope this helps, gl"), "Use frost. ");
        assert_eq!(rule("community").apply("hey everyone, run frost"), " run frost");
    }

    #[test]
    fn register_table_is_literal_and_case_sensitive() {
        let register = rules_in(Stage::Register);
        assert_eq!(apply_all(&register, "I guess the Boreas works"), "It appears the Boreas works");
        assert_eq!(apply_all(&register, "i guess the Boreas works"), "i guess the Boreas works");
        assert_eq!(apply_all(&register, "I use frost"), "Use frost");
        assert_eq!(apply_all(&register, "AI user"), "AI user");
    }

    #[test]
    fn shorthand_expands_whole_words_only() {
        let shorthand = rules_in(Stage::Shorthand);
        assert_eq!(
            apply_all(&shorthand, "More DMG and hp, lvl 30 arba"),
            "More damage and HP, level 30 Arbalest"
        );
        assert_eq!(apply_all(&shorthand, "equip the ship"), "equip the ship");
    }

    #[test]
    fn spelling_keeps_leading_capital() {
        let spelling = rules_in(Stage::Spelling);
        assert_eq!(
            apply_all(&spelling, "Prioritize armor and defense color"),
            "Prioritise armour and defence colour"
        );
    }

    #[test]
    fn tidy_collapses_and_capitalises() {
        let tidy = rules_in(Stage::Tidy);
        assert_eq!(
            apply_all(&tidy, " , keep it up\\n now |joy| :) ok ."),
            "Keep it up now ok."
        );
    }

    #[test]
    fn full_chain_fixture() {
        let normalizer = ToneNormalizer::new();
        let cases = [
            (
                "I think the arba is basically the best weapon for dmg lol. Prioritize armor upgrades\\n and keep hp high. hope this helps",
                "The Arbalest is the best weapon for damage. Prioritise armour upgrades and keep HP high.",
            ),
            (
                "maybe actually no, the mx build is better",
                "Upon further analysis, the mx build is better",
            ),
            (
                "I believe that frost beats fire on stage 40",
                "It is established that frost beats fire on stage 40",
            ),
        ];
        for (input, expected) in cases {
            assert_eq!(normalizer.rewrite(input), expected, "input: {input}");
        }
    }

    #[test]
    fn user_turn_is_never_rewritten_and_filler_only_answers_drop() {
        let normalizer = ToneNormalizer::new();
        let pair = ConversationPair::new("lol dmg?", "yeah lol", "t", Vec::new()).unwrap();
        assert!(normalizer.apply(&pair).is_none());

        let pair = ConversationPair::new("lol dmg?", "more dmg", "t", Vec::new()).unwrap();
        let out = normalizer.apply(&pair).unwrap();
        assert_eq!(out.user, "lol dmg?");
        assert_eq!(out.assistant, "More damage");
    }
}
