//! Forum export sanitisation.
//!
//! Output records are built from an allow-list of fields (`id`, `parent_id`,
//! text, `score`), so author or account fields never survive no matter how the
//! export schema drifts. Ids on the erasure blacklist are dropped outright.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::fs;
use std::path::Path;

use crate::error::require_input;
use crate::jsonl::{for_each_value, JsonlWriter};
use crate::parse::id_from_value;
use crate::redact::Redactor;

/// Body markers the forum leaves behind for removed content.
const REMOVED_MARKERS: &[&str] = &["[deleted]", "[removed]"];

/// Comments carry their text under `body`, posts under `selftext`.
const BODY_KEYS: &[&str] = &["body", "selftext"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SanitisedRecord {
    pub id: Option<String>,
    pub parent_id: Option<String>,
    pub text: String,
    pub score: Option<i64>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SanitiseStats {
    pub processed: usize,
    /// Everything dropped: blacklisted plus empty/removed bodies.
    pub skipped: usize,
    pub blacklisted: usize,
    pub malformed: usize,
    pub redacted: usize,
}

/// Record ids covered by right-to-erasure requests.
#[derive(Debug, Default, Clone)]
pub struct Blacklist {
    ids: HashSet<String>,
}

impl Blacklist {
    /// Loads one id per line. A configured but absent file is a `MissingInput` error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        require_input(path)?;
        let raw = fs::read_to_string(path)
            .with_context(|| format!("read blacklist {}", path.display()))?;
        Ok(Self::from_ids(raw.lines()))
    }

    pub fn from_ids<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let ids = ids
            .into_iter()
            .map(|s| s.as_ref().trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        Self { ids }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SanitiseOutcome {
    Kept { record: SanitisedRecord, redacted: bool },
    Blacklisted,
    Empty,
}

pub fn sanitise_record(raw: &Value, blacklist: &Blacklist, redactor: &Redactor) -> SanitiseOutcome {
    let id = raw.get("id").and_then(id_from_value);
    if id.as_deref().is_some_and(|id| blacklist.contains(id)) {
        return SanitiseOutcome::Blacklisted;
    }

    let body = BODY_KEYS
        .iter()
        .filter_map(|key| raw.get(*key).and_then(Value::as_str))
        .find(|text| !text.trim().is_empty());
    let Some(body) = body else {
        return SanitiseOutcome::Empty;
    };
    if REMOVED_MARKERS.contains(&body.trim()) {
        return SanitiseOutcome::Empty;
    }

    let redaction = redactor.redact(body);
    SanitiseOutcome::Kept {
        redacted: redaction.changed(),
        record: SanitisedRecord {
            id,
            parent_id: raw.get("parent_id").and_then(id_from_value),
            text: redaction.text,
            score: raw.get("score").and_then(Value::as_i64),
        },
    }
}

/// Sanitises `input` into `output`. The output only appears once the whole file is done.
pub fn sanitise_file(
    input: &Path,
    output: &Path,
    blacklist: &Blacklist,
    redactor: &Redactor,
) -> Result<SanitiseStats> {
    require_input(input)?;
    let mut writer = JsonlWriter::create(output)?;
    let mut stats = SanitiseStats::default();
    let mut write_err = None;

    let read = for_each_value(input, |_, raw| {
        if write_err.is_some() {
            return;
        }
        match sanitise_record(&raw, blacklist, redactor) {
            SanitiseOutcome::Kept { record, redacted } => {
                if let Err(e) = writer.write(&record) {
                    write_err = Some(e);
                    return;
                }
                stats.processed += 1;
                if redacted {
                    stats.redacted += 1;
                }
            }
            SanitiseOutcome::Blacklisted => {
                stats.blacklisted += 1;
                stats.skipped += 1;
            }
            SanitiseOutcome::Empty => stats.skipped += 1,
        }
    })?;
    if let Some(e) = write_err {
        return Err(e);
    }
    stats.malformed = read.malformed;
    writer.finish()?;

    tracing::info!(
        input = %input.display(),
        processed = stats.processed,
        skipped = stats.skipped,
        blacklisted = stats.blacklisted,
        malformed = stats.malformed,
        "sanitise complete"
    );
    Ok(stats)
}

/// Reads a file written by [`sanitise_file`]. Malformed lines are skipped and counted.
pub fn read_sanitised(path: &Path) -> Result<(Vec<SanitisedRecord>, usize)> {
    let mut records = Vec::new();
    let mut rejected = 0usize;
    let read = for_each_value(path, |line, value| {
        match serde_json::from_value::<SanitisedRecord>(value) {
            Ok(record) => records.push(record),
            Err(e) => {
                tracing::warn!(line, error = %e, "skipping malformed sanitised record");
                rejected += 1;
            }
        }
    })?;
    Ok((records, read.malformed + rejected))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_events(events: &[Value]) -> NamedTempFile {
        let mut f = NamedTempFile::new().unwrap();
        for e in events {
            serde_json::to_writer(&mut f, e).unwrap();
            f.write_all(b"\n").unwrap();
        }
        f.flush().unwrap();
        f
    }

    #[test]
    fn keeps_only_allow_listed_fields() {
        let raw = json!({
            "id": "test_1",
            "parent_id": "t3_abc",
            "body": "Slot the Arbalest first.",
            "score": 12,
            "author": "someone",
            "author_fullname": "t2_someone",
            "author_flair_text": "Veteran"
        });
        let outcome = sanitise_record(&raw, &Blacklist::default(), &Redactor::new());
        let SanitiseOutcome::Kept { record, .. } = outcome else {
            panic!("expected record to be kept");
        };
        let value = serde_json::to_value(&record).unwrap();
        let keys: Vec<&String> = value.as_object().unwrap().keys().collect();
        assert_eq!(keys.len(), 4);
        assert!(value.get("author").is_none());
        assert_eq!(record.parent_id.as_deref(), Some("t3_abc"));
        assert_eq!(record.score, Some(12));
    }

    #[test]
    fn post_bodies_come_from_selftext() {
        let raw = json!({"id": "p1", "selftext": "Which hero for stage 40?"});
        let outcome = sanitise_record(&raw, &Blacklist::default(), &Redactor::new());
        assert!(matches!(outcome, SanitiseOutcome::Kept { ref record, .. } if record.text == "Which hero for stage 40?"));
    }

    #[test]
    fn drops_blacklisted_and_removed_records() {
        let blacklist = Blacklist::from_ids(["gone"]);
        let redactor = Redactor::new();
        assert_eq!(
            sanitise_record(&json!({"id": "gone", "body": "text"}), &blacklist, &redactor),
            SanitiseOutcome::Blacklisted
        );
        assert_eq!(
            sanitise_record(&json!({"id": "a", "body": "[deleted]"}), &blacklist, &redactor),
            SanitiseOutcome::Empty
        );
        assert_eq!(
            sanitise_record(&json!({"id": "b", "body": "[removed]"}), &blacklist, &redactor),
            SanitiseOutcome::Empty
        );
        assert_eq!(
            sanitise_record(&json!({"id": "c"}), &blacklist, &redactor),
            SanitiseOutcome::Empty
        );
    }

    #[test]
    fn file_pass_keeps_one_and_counts_the_rest() -> Result<()> {
        let input = write_events(&[
            json!({"id": "test_1", "body": "Real strategy text", "author": "x"}),
            json!({"id": "test_2", "body": "[deleted]", "author": "y"}),
            json!({"id": "test_3", "body": "", "author": "z"}),
            json!({"id": "erased", "body": "Please forget me", "author": "w"}),
        ]);
        let mut blacklist_file = NamedTempFile::new()?;
        writeln!(blacklist_file, "erased")?;
        writeln!(blacklist_file)?;
        let blacklist = Blacklist::load(Some(blacklist_file.path()))?;
        assert_eq!(blacklist.len(), 1);

        let dir = tempfile::tempdir()?;
        let output = dir.path().join("clean.jsonl");
        let stats = sanitise_file(input.path(), &output, &blacklist, &Redactor::new())?;
        assert_eq!(stats.processed, 1);
        assert_eq!(stats.skipped, 3);
        assert_eq!(stats.blacklisted, 1);

        let (records, malformed) = read_sanitised(&output)?;
        assert_eq!(malformed, 0);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id.as_deref(), Some("test_1"));
        assert!(!fs::read_to_string(&output)?.contains("author"));
        Ok(())
    }

    #[test]
    fn missing_input_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("clean.jsonl");
        let result = sanitise_file(
            Path::new("/no/such/raw.jsonl"),
            &output,
            &Blacklist::default(),
            &Redactor::new(),
        );
        assert!(result.is_err());
        assert!(!output.exists());
    }

    #[test]
    fn configured_blacklist_must_exist() {
        assert!(Blacklist::load(Some(Path::new("/no/such/blacklist.txt"))).is_err());
        assert!(Blacklist::load(None).unwrap().is_empty());
    }
}
