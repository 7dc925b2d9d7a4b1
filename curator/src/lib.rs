use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use corpus_types::SourceTier;
use curation::assembler;
use curation::blocks;
use curation::classifier;
use curation::compare;
use curation::config::{ClassifierKind, CurationConfig, TieredSource};
use curation::dedup;
use curation::error::CurationError;
use curation::jsonl::write_pairs;
use curation::linker;
use curation::pairer;
use curation::pipeline;
use curation::redact::Redactor;
use curation::sanitiser::{self, Blacklist};
use curation::tabular;
use curation::tone;
use curation::transcript;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(
    name = "curator",
    about = "Curate chat, forum, reference and transcript exports into a weighted fine-tuning corpus"
)]
struct Cli {
    /// JSON config file; CODEX_* environment variables override it.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Strategy {
    Rules,
    Judge,
}

impl From<Strategy> for ClassifierKind {
    fn from(s: Strategy) -> Self {
        match s {
            Strategy::Rules => ClassifierKind::Rules,
            Strategy::Judge => ClassifierKind::Judge,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Strip identity fields from a raw forum export and honour the erasure blacklist.
    Sanitise {
        input: PathBuf,
        output: PathBuf,
        /// One record id per line; overrides the configured blacklist.
        #[arg(long)]
        blacklist: Option<PathBuf>,
    },

    /// Link a threaded chat export into question/answer pairs.
    Link {
        input: PathBuf,
        output: PathBuf,
        /// One message id per line; overrides the configured blacklist.
        #[arg(long)]
        blacklist: Option<PathBuf>,
    },

    /// Convert a cleaned `{"conversations": [...]}` export into pairs.
    Blocks { input: PathBuf, output: PathBuf },

    /// Pair sanitised forum comments with their parent posts.
    Pair {
        posts: PathBuf,
        comments: PathBuf,
        output: PathBuf,
        /// Both sides must be longer than this many characters.
        #[arg(long)]
        min_chars: Option<usize>,
    },

    /// Render tabular reference rows through the fixed Q&A template.
    Tabular { input: PathBuf, output: PathBuf },

    /// Turn video transcripts into guide pairs.
    Transcripts {
        input: PathBuf,
        output: PathBuf,
        #[arg(long)]
        max_chars: Option<usize>,
    },

    /// Keep only pairs classified as strategy.
    Classify {
        input: PathBuf,
        output: PathBuf,
        /// Defaults to the configured classifier.
        #[arg(long, value_enum)]
        strategy: Option<Strategy>,
    },

    /// Remove exact duplicates across one or more files, first occurrence wins.
    Dedup {
        #[arg(required = true)]
        inputs: Vec<PathBuf>,
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Rewrite assistant turns into the canonical register.
    Tone { input: PathBuf, output: PathBuf },

    /// Weight, stamp with the persona, shuffle and write the final corpus.
    Assemble {
        #[arg(long)]
        gold: Vec<PathBuf>,
        #[arg(long)]
        silver: Vec<PathBuf>,
        /// Defaults to the configured output path.
        #[arg(short, long)]
        output: Option<PathBuf>,
        #[arg(long)]
        seed: Option<u64>,
    },

    /// Compare the kept outputs of two classifiers.
    Compare { left: PathBuf, right: PathBuf },

    /// Run the whole pipeline from the config.
    Run,
}

/// Exit status for a failed run: 2 for bad inputs or configuration, 1 otherwise.
pub fn exit_code(err: &anyhow::Error) -> u8 {
    match err.downcast_ref::<CurationError>() {
        Some(e) if e.is_fatal() => 2,
        _ => 1,
    }
}

pub fn run() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = CurationConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Sanitise {
            input,
            output,
            blacklist,
        } => run_sanitise(&config, &input, &output, blacklist),
        Commands::Link {
            input,
            output,
            blacklist,
        } => run_link(&config, &input, &output, blacklist),
        Commands::Blocks { input, output } => run_blocks(&input, &output),
        Commands::Pair {
            posts,
            comments,
            output,
            min_chars,
        } => run_pair(&config, &posts, &comments, &output, min_chars),
        Commands::Tabular { input, output } => run_tabular(&input, &output),
        Commands::Transcripts {
            input,
            output,
            max_chars,
        } => run_transcripts(&config, &input, &output, max_chars),
        Commands::Classify {
            input,
            output,
            strategy,
        } => run_classify(&config, &input, &output, strategy),
        Commands::Dedup { inputs, output } => run_dedup(&config, &inputs, &output),
        Commands::Tone { input, output } => run_tone(&input, &output),
        Commands::Assemble {
            gold,
            silver,
            output,
            seed,
        } => run_assemble(&config, gold, silver, output, seed),
        Commands::Compare { left, right } => run_compare(&left, &right),
        Commands::Run => run_pipeline(&config),
    }
}

/// The `--blacklist` flag wins over the configured file, which resolves against `data_dir`.
fn load_blacklist(config: &CurationConfig, flag: Option<PathBuf>) -> Result<Blacklist> {
    let path = flag.or_else(|| config.blacklist.as_deref().map(|p| config.resolve(p)));
    Blacklist::load(path.as_deref())
}

fn run_sanitise(
    config: &CurationConfig,
    input: &Path,
    output: &Path,
    blacklist: Option<PathBuf>,
) -> Result<()> {
    let blacklist = load_blacklist(config, blacklist)?;
    let stats = sanitiser::sanitise_file(input, output, &blacklist, &Redactor::new())?;
    println!(
        "Sanitised {}: processed={} skipped={} blacklisted={} redacted={} malformed={}",
        input.display(),
        stats.processed,
        stats.skipped,
        stats.blacklisted,
        stats.redacted,
        stats.malformed,
    );
    Ok(())
}

fn run_link(
    config: &CurationConfig,
    input: &Path,
    output: &Path,
    blacklist: Option<PathBuf>,
) -> Result<()> {
    let blacklist = load_blacklist(config, blacklist)?;
    let (pairs, stats) = linker::link_export(input, &blacklist, &Redactor::new())?;
    write_pairs(output, &pairs)?;
    println!(
        "Linked {} messages: pairs={} coalesced={} unresolved={} blacklisted={} empty={} malformed={}",
        stats.messages,
        stats.pairs,
        stats.coalesced,
        stats.unresolved,
        stats.blacklisted,
        stats.empty,
        stats.malformed,
    );
    Ok(())
}

fn run_blocks(input: &Path, output: &Path) -> Result<()> {
    let (pairs, stats) = blocks::read_blocks(input, &Redactor::new())?;
    write_pairs(output, &pairs)?;
    println!(
        "Converted {} blocks: pairs={} too_short={} malformed={}",
        stats.blocks, stats.pairs, stats.too_short, stats.malformed,
    );
    Ok(())
}

fn run_pair(
    config: &CurationConfig,
    posts: &Path,
    comments: &Path,
    output: &Path,
    min_chars: Option<usize>,
) -> Result<()> {
    let min_chars = min_chars.unwrap_or(config.min_pair_chars);
    let (pairs, stats) = pairer::pair_files(posts, comments, min_chars)?;
    write_pairs(output, &pairs)?;
    println!(
        "Paired {} comments against {} posts: pairs={} unresolved={} too_short={} malformed={}",
        stats.comments, stats.posts, stats.pairs, stats.unresolved, stats.too_short, stats.malformed,
    );
    Ok(())
}

fn run_tabular(input: &Path, output: &Path) -> Result<()> {
    let (pairs, stats) = tabular::read_rows(input)?;
    write_pairs(output, &pairs)?;
    println!(
        "Converted {} rows: pairs={} malformed={}",
        stats.rows, stats.pairs, stats.malformed
    );
    Ok(())
}

fn run_transcripts(
    config: &CurationConfig,
    input: &Path,
    output: &Path,
    max_chars: Option<usize>,
) -> Result<()> {
    let max_chars = max_chars.unwrap_or(config.transcript_max_chars);
    let (pairs, stats) = transcript::read_transcripts(input, max_chars)?;
    write_pairs(output, &pairs)?;
    println!(
        "Converted {} videos: pairs={} empty={} truncated={} malformed={}",
        stats.videos, stats.pairs, stats.empty, stats.truncated, stats.malformed,
    );
    Ok(())
}

fn run_classify(
    config: &CurationConfig,
    input: &Path,
    output: &Path,
    strategy: Option<Strategy>,
) -> Result<()> {
    let kind = strategy.map(ClassifierKind::from).unwrap_or(config.classifier);
    let stats = classifier::classify_file(input, output, kind, config)?;
    println!(
        "Classified {} pairs ({:?}): kept={} conflict={} trash={} failures={} malformed={}",
        stats.total, kind, stats.kept, stats.conflict, stats.trash, stats.failures, stats.malformed,
    );
    Ok(())
}

fn run_dedup(config: &CurationConfig, inputs: &[PathBuf], output: &Path) -> Result<()> {
    let inputs: Vec<&Path> = inputs.iter().map(PathBuf::as_path).collect();
    let stats = dedup::dedup_files(&inputs, output, config.min_dedup_words)?;
    println!(
        "Deduplicated {} pairs: kept={} duplicates={} too_short={} malformed={}",
        stats.input, stats.kept, stats.duplicates, stats.too_short, stats.malformed,
    );
    Ok(())
}

fn run_tone(input: &Path, output: &Path) -> Result<()> {
    let stats = tone::tone_file(input, output)?;
    println!(
        "Normalised {} pairs: rewritten={} unchanged={} emptied={} malformed={}",
        stats.input, stats.rewritten, stats.unchanged, stats.emptied, stats.malformed,
    );
    Ok(())
}

fn tiered_sources(gold: Vec<PathBuf>, silver: Vec<PathBuf>) -> Vec<TieredSource> {
    let gold = gold.into_iter().map(|path| TieredSource {
        path,
        tier: SourceTier::Gold,
    });
    let silver = silver.into_iter().map(|path| TieredSource {
        path,
        tier: SourceTier::Silver,
    });
    gold.chain(silver).collect()
}

fn run_assemble(
    config: &CurationConfig,
    gold: Vec<PathBuf>,
    silver: Vec<PathBuf>,
    output: Option<PathBuf>,
    seed: Option<u64>,
) -> Result<()> {
    let mut sources = tiered_sources(gold, silver);
    if sources.is_empty() {
        sources = config.sources.clone();
    }
    if sources.is_empty() {
        anyhow::bail!("no sources: pass --gold/--silver or configure `sources`");
    }
    let output = output.unwrap_or_else(|| config.output.clone());
    let seed = seed.unwrap_or(config.seed);

    let stats = assembler::assemble(&sources, &output, &config.weights, &config.persona, seed)?;
    for source in &stats.sources {
        println!(
            "  {} [{} x{}]: entries={} emitted={}",
            source.path.display(),
            source.tier.as_str(),
            source.weight,
            source.entries,
            source.emitted,
        );
    }
    println!(
        "Assembled {} entries into {} (seed={}, malformed={})",
        stats.total,
        output.display(),
        seed,
        stats.malformed,
    );
    Ok(())
}

fn run_compare(left: &Path, right: &Path) -> Result<()> {
    let cmp = compare::compare_files(left, right)?;
    println!(
        "Left={} Right={} Overlap={} LeftOnly={} RightOnly={}",
        cmp.left_total, cmp.right_total, cmp.overlap, cmp.left_only, cmp.right_only,
    );
    for (i, sample) in cmp.left_only_samples.iter().enumerate() {
        println!("  sample {}: {}...", i + 1, sample);
    }
    Ok(())
}

fn run_pipeline(config: &CurationConfig) -> Result<()> {
    let report = pipeline::run(config)?;
    for curated in &report.curated {
        println!(
            "  {} [{}]: written={} duplicates={}",
            curated.path.display(),
            curated.tier.as_str(),
            curated.written,
            curated.dedup.duplicates,
        );
    }
    if let Some(classify) = &report.classify {
        println!(
            "  classified={} kept={} conflict={} trash={} failures={}",
            classify.total, classify.kept, classify.conflict, classify.trash, classify.failures,
        );
    }
    println!(
        "Pipeline complete: {} entries from {} sources into {}",
        report.assemble.total,
        report.assemble.sources.len(),
        report.output.display(),
    );
    Ok(())
}
