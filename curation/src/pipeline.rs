//! End-to-end run: sanitise → pair/link → classify → dedup → tone → assemble.
//!
//! All inputs are checked before anything is written. One `Deduplicator`
//! is shared by every curated stream so fingerprints are run-wide.

use anyhow::Result;
use corpus_types::{ConversationPair, SourceTier};
use std::path::{Path, PathBuf};

use crate::assembler::{assemble, AssembleStats};
use crate::blocks::{read_blocks, BlockStats};
use crate::classifier::{classify_pairs, ClassifyStats, RuleClassifier};
use crate::config::{ClassifierKind, CurationConfig, TieredSource};
use crate::dedup::{DedupStats, Deduplicator};
use crate::error::{require_input, CurationError};
use crate::jsonl::write_chat_records;
use crate::linker::{link_export, LinkStats};
use crate::pairer::{pair_files, PairStats};
use crate::redact::Redactor;
use crate::sanitiser::{sanitise_file, Blacklist, SanitiseStats};
use crate::tabular::{read_rows, TabularStats};
use crate::tone::{ToneNormalizer, ToneStats};
use crate::transcript::{read_transcripts, TranscriptStats};

pub const COMMUNITY_FILE: &str = "community_curated.jsonl";
pub const REFERENCE_FILE: &str = "reference_curated.jsonl";
pub const TRANSCRIPTS_FILE: &str = "transcripts_curated.jsonl";

const POSTS_CLEAN_FILE: &str = "forum_posts_clean.jsonl";
const COMMENTS_CLEAN_FILE: &str = "forum_comments_clean.jsonl";

#[derive(Debug, Clone)]
pub struct CuratedFile {
    pub path: PathBuf,
    pub tier: SourceTier,
    pub dedup: DedupStats,
    pub tone: Option<ToneStats>,
    pub written: usize,
}

#[derive(Debug, Default, Clone)]
pub struct PipelineReport {
    pub sanitise: Vec<SanitiseStats>,
    pub pairing: Option<PairStats>,
    pub linking: Vec<LinkStats>,
    pub blocks: Vec<BlockStats>,
    pub classify: Option<ClassifyStats>,
    pub tabular: Vec<TabularStats>,
    pub transcripts: Vec<TranscriptStats>,
    pub curated: Vec<CuratedFile>,
    pub assemble: AssembleStats,
    /// Where the corpus was written, after resolving against `data_dir`.
    pub output: PathBuf,
}

/// Every configured input, resolved against `data_dir`.
struct Inputs {
    work_dir: PathBuf,
    blacklist: Option<PathBuf>,
    forum: Option<(PathBuf, PathBuf)>,
    threaded: Vec<PathBuf>,
    blocks: Vec<PathBuf>,
    tabular: Vec<PathBuf>,
    transcripts: Vec<PathBuf>,
    sources: Vec<TieredSource>,
}

impl Inputs {
    fn resolve(config: &CurationConfig) -> Self {
        let all = |paths: &[PathBuf]| paths.iter().map(|p| config.resolve(p)).collect::<Vec<_>>();
        Self {
            work_dir: config.resolve(&config.work_dir),
            blacklist: config.blacklist.as_deref().map(|p| config.resolve(p)),
            forum: config
                .forum
                .as_ref()
                .map(|f| (config.resolve(&f.posts), config.resolve(&f.comments))),
            threaded: all(&config.threaded),
            blocks: all(&config.conversation_blocks),
            tabular: all(&config.tabular),
            transcripts: all(&config.transcripts),
            sources: config
                .sources
                .iter()
                .map(|s| TieredSource {
                    path: config.resolve(&s.path),
                    tier: s.tier,
                })
                .collect(),
        }
    }

    fn has_community(&self) -> bool {
        self.forum.is_some() || !self.threaded.is_empty() || !self.blocks.is_empty()
    }

    fn is_empty(&self) -> bool {
        !self.has_community()
            && self.tabular.is_empty()
            && self.transcripts.is_empty()
            && self.sources.is_empty()
    }

    fn check(&self) -> Result<()> {
        let forum = self.forum.iter().flat_map(|(p, c)| [p, c]);
        let files = self
            .blacklist
            .iter()
            .chain(forum)
            .chain(&self.threaded)
            .chain(&self.blocks)
            .chain(&self.tabular)
            .chain(&self.transcripts)
            .chain(self.sources.iter().map(|s| &s.path));
        for path in files {
            require_input(path)?;
        }
        Ok(())
    }
}

fn write_curated(
    config: &CurationConfig,
    work_dir: &Path,
    name: &str,
    tier: SourceTier,
    pairs: &[ConversationPair],
    dedup: DedupStats,
    tone: Option<ToneStats>,
) -> Result<CuratedFile> {
    let path = work_dir.join(name);
    let written = write_chat_records(&path, pairs, &config.persona)?;
    tracing::info!(path = %path.display(), tier = tier.as_str(), written, "curated file written");
    Ok(CuratedFile {
        path,
        tier,
        dedup,
        tone,
        written,
    })
}

pub fn run(config: &CurationConfig) -> Result<PipelineReport> {
    let inputs = Inputs::resolve(config);
    if inputs.is_empty() {
        return Err(CurationError::InvalidConfig("no inputs configured".to_string()).into());
    }
    inputs.check()?;
    if config.classifier == ClassifierKind::Rules {
        RuleClassifier::from_config(config)?;
    }

    let redactor = Redactor::new();
    let blacklist = Blacklist::load(inputs.blacklist.as_deref())?;
    let mut dedup = Deduplicator::new(config.min_dedup_words);
    let tone = ToneNormalizer::new();
    let mut report = PipelineReport::default();

    if inputs.has_community() {
        let mut community = Vec::new();
        if let Some((posts, comments)) = &inputs.forum {
            let posts_clean = inputs.work_dir.join(POSTS_CLEAN_FILE);
            let comments_clean = inputs.work_dir.join(COMMENTS_CLEAN_FILE);
            report
                .sanitise
                .push(sanitise_file(posts, &posts_clean, &blacklist, &redactor)?);
            report
                .sanitise
                .push(sanitise_file(comments, &comments_clean, &blacklist, &redactor)?);
            let (pairs, stats) = pair_files(&posts_clean, &comments_clean, config.min_pair_chars)?;
            report.pairing = Some(stats);
            community.extend(pairs);
        }
        for path in &inputs.threaded {
            let (pairs, stats) = link_export(path, &blacklist, &redactor)?;
            report.linking.push(stats);
            community.extend(pairs);
        }
        for path in &inputs.blocks {
            let (pairs, stats) = read_blocks(path, &redactor)?;
            report.blocks.push(stats);
            community.extend(pairs);
        }

        let (kept, classify_stats) = classify_pairs(community, config.classifier, config)?;
        report.classify = Some(classify_stats);
        let (unique, dedup_stats) = dedup.filter(kept);
        let (toned, tone_stats) = tone.normalise(unique);
        report.curated.push(write_curated(
            config,
            &inputs.work_dir,
            COMMUNITY_FILE,
            SourceTier::Silver,
            &toned,
            dedup_stats,
            Some(tone_stats),
        )?);
    }

    if !inputs.tabular.is_empty() {
        let mut rows = Vec::new();
        for path in &inputs.tabular {
            let (pairs, stats) = read_rows(path)?;
            report.tabular.push(stats);
            rows.extend(pairs);
        }
        // Reference rows are not tone-rewritten.
        let (unique, dedup_stats) = dedup.filter(rows);
        report.curated.push(write_curated(
            config,
            &inputs.work_dir,
            REFERENCE_FILE,
            SourceTier::Gold,
            &unique,
            dedup_stats,
            None,
        )?);
    }

    if !inputs.transcripts.is_empty() {
        let mut videos = Vec::new();
        for path in &inputs.transcripts {
            let (pairs, stats) = read_transcripts(path, config.transcript_max_chars)?;
            report.transcripts.push(stats);
            videos.extend(pairs);
        }
        let (unique, dedup_stats) = dedup.filter(videos);
        let (toned, tone_stats) = tone.normalise(unique);
        report.curated.push(write_curated(
            config,
            &inputs.work_dir,
            TRANSCRIPTS_FILE,
            SourceTier::Silver,
            &toned,
            dedup_stats,
            Some(tone_stats),
        )?);
    }

    let sources: Vec<TieredSource> = report
        .curated
        .iter()
        .map(|c| TieredSource {
            path: c.path.clone(),
            tier: c.tier,
        })
        .chain(inputs.sources.iter().cloned())
        .collect();
    let output = config.resolve(&config.output);
    report.assemble = assemble(&sources, &output, &config.weights, &config.persona, config.seed)?;
    report.output = output;

    tracing::info!(
        output = %report.output.display(),
        total = report.assemble.total,
        curated = report.curated.len(),
        "pipeline complete"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ForumInputs;
    use corpus_types::validate_record_value;
    use serde_json::{json, Value};
    use std::fs;
    use std::io::Write;

    fn write_jsonl(path: &Path, values: &[Value]) {
        let mut f = fs::File::create(path).unwrap();
        for v in values {
            writeln!(f, "{v}").unwrap();
        }
    }

    fn fixture_config(dir: &Path) -> CurationConfig {
        let posts = dir.join("posts.jsonl");
        let comments = dir.join("comments.jsonl");
        write_jsonl(
            &posts,
            &[json!({"id": "p1", "selftext": "Which weapon should I upgrade first for stage 40?", "author": "alice"})],
        );
        write_jsonl(
            &comments,
            &[json!({"id": "c1", "parent_id": "t3_p1", "body": "Max the Arbalest first, it scales with crit better than any other weapon.", "author": "bob"})],
        );

        let threaded = dir.join("threaded.json");
        let export = json!({"messages": [
            {"id": "1", "content": "What build is best for EoH?"},
            {"id": "2", "content": "Use MX with miniclip", "reference": {"messageId": "1"}},
            {"id": "3", "content": "How do I beat the stage 30 boss?"},
            {"id": "4", "content": "Kite clockwise and save the Windborne Boost dodge for the slam.", "reference": {"messageId": "3"}}
        ]});
        fs::write(&threaded, export.to_string()).unwrap();

        let tabular = dir.join("heroes.jsonl");
        write_jsonl(
            &tabular,
            &[json!({"Hero": "Gale Shinobi", "Tier": "S", "Best Use": "boss waves", "Best Weapon": "Voltgun"})],
        );

        let transcripts = dir.join("videos.jsonl");
        write_jsonl(
            &transcripts,
            &[json!({"video_id": "v1", "title": "Stage 40 guide", "transcript": "[Music] hey guys today we clear stage 40 with the frost build and two drones"})],
        );

        CurationConfig {
            data_dir: dir.to_path_buf(),
            work_dir: dir.join("work"),
            output: dir.join("out").join("corpus.jsonl"),
            forum: Some(ForumInputs { posts, comments }),
            threaded: vec![threaded],
            tabular: vec![tabular],
            transcripts: vec![transcripts],
            ..Default::default()
        }
    }

    #[test]
    fn full_run_writes_weighted_corpus_without_conflicts() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let config = fixture_config(dir.path());
        let report = run(&config)?;

        // 2 community (silver) + 1 reference x5 (gold) + 1 transcript (silver).
        assert_eq!(report.assemble.total, 8);
        assert_eq!(report.classify.as_ref().map(|c| c.conflict), Some(1));
        assert_eq!(report.curated.len(), 3);

        let corpus = fs::read_to_string(&config.output)?;
        assert_eq!(corpus.lines().count(), 8);
        assert!(!corpus.to_lowercase().contains("miniclip"));
        assert!(!corpus.contains("alice"));
        for line in corpus.lines() {
            let value: Value = serde_json::from_str(line)?;
            validate_record_value(&value)?;
            assert_eq!(value["messages"][0]["content"], config.persona.as_str());
        }
        Ok(())
    }

    #[test]
    fn blacklisted_thread_message_is_erased() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let blacklist = dir.path().join("erasure.txt");
        fs::write(&blacklist, "4\n")?;
        let config = CurationConfig {
            blacklist: Some(blacklist),
            ..fixture_config(dir.path())
        };
        let report = run(&config)?;

        assert_eq!(report.linking[0].blacklisted, 1);
        assert_eq!(report.assemble.total, 7);
        let corpus = fs::read_to_string(&config.output)?;
        assert!(!corpus.contains("Windborne"));
        Ok(())
    }

    #[test]
    fn relative_paths_resolve_against_data_dir() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let config = CurationConfig {
            work_dir: PathBuf::from("work"),
            output: PathBuf::from("corpus.jsonl"),
            ..fixture_config(dir.path())
        };
        let report = run(&config)?;

        assert_eq!(report.output, dir.path().join("corpus.jsonl"));
        assert!(report.output.exists());
        assert!(dir.path().join("work").join(COMMUNITY_FILE).exists());
        assert!(report
            .curated
            .iter()
            .all(|c| c.path.starts_with(dir.path().join("work"))));
        Ok(())
    }

    #[test]
    fn rerun_is_byte_identical() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let config = fixture_config(dir.path());
        run(&config)?;
        let first = fs::read(&config.output)?;
        run(&config)?;
        assert_eq!(first, fs::read(&config.output)?);
        Ok(())
    }

    #[test]
    fn missing_input_aborts_before_writing() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = fixture_config(dir.path());
        config.transcripts.push(dir.path().join("missing.jsonl"));

        let err = run(&config).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<CurationError>(),
            Some(CurationError::MissingInput { .. })
        ));
        assert!(!config.output.exists());
        assert!(!config.work_dir.exists());
    }

    #[test]
    fn empty_config_is_rejected() {
        let err = run(&CurationConfig::default()).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<CurationError>(),
            Some(CurationError::InvalidConfig(_))
        ));
    }
}
