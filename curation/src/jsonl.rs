//! JSONL plumbing shared by every stage.
//!
//! Readers skip and count lines that do not parse; writers go through a
//! temp file that is renamed into place on `finish`, so a stage that fails
//! midway never leaves a partial output behind.

use anyhow::{Context, Result};
use corpus_types::{ChatRecord, ConversationPair, CorpusEntry};
use serde::Serialize;
use serde_json::Value;
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::error::{require_input, CurationError};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReadStats {
    pub read: usize,
    pub malformed: usize,
}

/// Opens `path` for buffered reading, failing with `MissingInput` if it is absent.
pub fn open_input(path: &Path) -> Result<BufReader<File>> {
    require_input(path)?;
    let file = File::open(path).with_context(|| format!("open input {}", path.display()))?;
    Ok(BufReader::new(file))
}

/// Calls `f(line_no, value)` for every non-blank line that parses as JSON.
/// Unparseable lines are logged and counted.
pub fn for_each_value<F>(path: &Path, mut f: F) -> Result<ReadStats>
where
    F: FnMut(usize, Value),
{
    let reader = open_input(path)?;
    let mut stats = ReadStats::default();

    for (idx, line) in reader.lines().enumerate() {
        let line_no = idx + 1;
        let line = match line {
            Ok(l) => l,
            Err(e) => {
                tracing::warn!(line = line_no, error = %e, "unreadable line");
                stats.malformed += 1;
                continue;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<Value>(&line) {
            Ok(value) => {
                stats.read += 1;
                f(line_no, value);
            }
            Err(e) => {
                tracing::warn!(line = line_no, error = %e, path = %path.display(), "skipping malformed line");
                stats.malformed += 1;
            }
        }
    }
    Ok(stats)
}

/// Interprets one record as a pair. Accepts a `ConversationPair`, a ChatML
/// `messages` record, or an instruction/response record.
pub fn pair_from_value(
    value: &Value,
    line: usize,
    source_hint: &str,
) -> Result<ConversationPair, CurationError> {
    let malformed = |reason: &str| CurationError::MalformedRecord {
        line,
        reason: reason.to_string(),
    };

    let (user, assistant, source, origin_ids) = if value.get("messages").is_some() {
        let record: ChatRecord =
            serde_json::from_value(value.clone()).map_err(|e| malformed(&e.to_string()))?;
        let entry = CorpusEntry::from_record(&record).map_err(|e| malformed(&e.to_string()))?;
        (entry.user, entry.assistant, String::new(), Vec::new())
    } else if value.get("user").is_some() && value.get("assistant").is_some() {
        let pair: ConversationPair =
            serde_json::from_value(value.clone()).map_err(|e| malformed(&e.to_string()))?;
        (pair.user, pair.assistant, pair.source, pair.origin_ids)
    } else {
        let pick = |keys: &[&str]| {
            keys.iter()
                .find_map(|k| value.get(*k).and_then(Value::as_str))
                .map(str::to_string)
        };
        let user = pick(&["instruction", "prompt"]).ok_or_else(|| malformed("no user turn"))?;
        let assistant = pick(&["response", "output", "content"])
            .ok_or_else(|| malformed("no assistant turn"))?;
        (user, assistant, String::new(), Vec::new())
    };

    let source = if source.is_empty() {
        source_hint.to_string()
    } else {
        source
    };
    ConversationPair::new(user, assistant, source, origin_ids)
        .ok_or_else(|| malformed("blank user or assistant turn"))
}

/// Reads every pair in `path`, skipping and counting records that are not pairs.
pub fn read_pairs(path: &Path, source_hint: &str) -> Result<(Vec<ConversationPair>, ReadStats)> {
    let mut pairs = Vec::new();
    let mut rejected = 0usize;
    let mut stats = for_each_value(path, |line, value| {
        match pair_from_value(&value, line, source_hint) {
            Ok(pair) => pairs.push(pair),
            Err(e) => {
                tracing::warn!(error = %e, path = %path.display(), "skipping record");
                rejected += 1;
            }
        }
    })?;
    stats.read -= rejected;
    stats.malformed += rejected;
    Ok((pairs, stats))
}

/// JSONL writer that only becomes visible at `path` once `finish` succeeds.
pub struct JsonlWriter {
    path: PathBuf,
    tmp: PathBuf,
    writer: Option<BufWriter<File>>,
    written: usize,
}

impl JsonlWriter {
    pub fn create(path: &Path) -> Result<Self> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir).with_context(|| format!("create dir {}", dir.display()))?;
        }
        let tmp = tmp_path(path);
        let file =
            File::create(&tmp).with_context(|| format!("create temp file {}", tmp.display()))?;
        Ok(Self {
            path: path.to_path_buf(),
            tmp,
            writer: Some(BufWriter::new(file)),
            written: 0,
        })
    }

    pub fn write<T: Serialize>(&mut self, record: &T) -> Result<()> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');
        let writer = self
            .writer
            .as_mut()
            .context("writer already finished")?;
        writer.write_all(&line)?;
        self.written += 1;
        Ok(())
    }

    /// Flushes and atomically moves the temp file into place.
    pub fn finish(mut self) -> Result<usize> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush().context("flush jsonl writer")?;
        }
        fs::rename(&self.tmp, &self.path).with_context(|| {
            format!("rename {} -> {}", self.tmp.display(), self.path.display())
        })?;
        Ok(self.written)
    }
}

impl Drop for JsonlWriter {
    fn drop(&mut self) {
        // Still holding the writer means `finish` never ran.
        if self.writer.take().is_some() {
            let _ = fs::remove_file(&self.tmp);
        }
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".tmp");
    PathBuf::from(name)
}

pub fn write_pairs(path: &Path, pairs: &[ConversationPair]) -> Result<usize> {
    let mut writer = JsonlWriter::create(path)?;
    for pair in pairs {
        writer.write(pair)?;
    }
    writer.finish()
}

/// Writes pairs as ChatML records carrying `persona` as the system turn.
pub fn write_chat_records(path: &Path, pairs: &[ConversationPair], persona: &str) -> Result<usize> {
    let mut writer = JsonlWriter::create(path)?;
    for pair in pairs {
        writer.write(&CorpusEntry::from_pair(pair, persona).to_record())?;
    }
    writer.finish()
}
