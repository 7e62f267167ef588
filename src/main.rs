//! story-digest: binary entrypoint
//! Batch CLI: read a JSONL item file, run the pipeline, write the digest JSON.
//!
//! See `README.md` for quickstart and `config/pipeline.toml` for the knobs.

use anyhow::{bail, Context};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use story_digest::analyze::{build_cache, build_generator, JsonlCache};
use story_digest::ingest::reader::read_items_path;
use story_digest::ledger::Ledger;
use story_digest::metrics::Metrics;
use story_digest::{Pipeline, PipelineConfig, PipelineOutput};

#[derive(Parser)]
#[command(name = "story-digest", version, about = "Cluster, rank and annotate news items")]
struct Cli {
    /// Pipeline config (defaults to $PIPELINE_CONFIG_PATH, then config/pipeline.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Process one batch of JSONL items
    Run {
        #[arg(long)]
        input: PathBuf,
        /// Output file for the digest JSON; stdout when omitted
        #[arg(long)]
        out: Option<PathBuf>,
        /// Append scored items and stories to this ledger directory
        #[arg(long, env = "PIPELINE_LEDGER_DIR")]
        ledger_dir: Option<PathBuf>,
        /// Reference time (RFC3339) for recency scoring; now when omitted
        #[arg(long)]
        as_of: Option<String>,
        /// Write Prometheus exposition text here after the run
        #[arg(long)]
        metrics_out: Option<PathBuf>,
    },
    /// Re-cluster, select and annotate a run stored in the ledger
    Replay {
        #[arg(long, env = "PIPELINE_LEDGER_DIR")]
        ledger_dir: PathBuf,
        /// Run to replay (RFC3339); latest when omitted
        #[arg(long)]
        as_of: Option<String>,
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Delete analysis cache partitions older than the retention window
    CacheSweep {
        #[arg(long)]
        keep_days: Option<u32>,
    },
}

/// Human-readable logs by default; `LOG_FORMAT=json` switches to JSON lines.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(fmt::layer().compact().with_writer(std::io::stderr))
            .init();
    }
}

fn parse_as_of(raw: Option<&str>) -> anyhow::Result<Option<DateTime<Utc>>> {
    raw.map(|s| {
        DateTime::parse_from_rfc3339(s)
            .map(|t| t.with_timezone(&Utc))
            .with_context(|| format!("--as-of must be RFC3339, got {s:?}"))
    })
    .transpose()
}

fn load_config(path: Option<&Path>) -> anyhow::Result<PipelineConfig> {
    match path {
        Some(p) => PipelineConfig::load_from(p),
        None => PipelineConfig::load_default(),
    }
}

fn build_pipeline(cfg: PipelineConfig) -> anyhow::Result<Pipeline> {
    let cache = build_cache(&cfg.analysis)?;
    let generator = build_generator(&cfg.analysis)?;
    info!(target: "pipeline", generator = generator.name(), "generator ready");
    Ok(Pipeline::new(cfg, cache, generator)?)
}

fn write_output(out: &PipelineOutput, path: Option<&Path>) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(out)?;
    match path {
        Some(p) => {
            std::fs::write(p, json).with_context(|| format!("writing digest to {}", p.display()))?
        }
        None => {
            let mut stdout = std::io::stdout().lock();
            writeln!(stdout, "{json}")?;
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env in local/dev; no-op when absent.
    let _ = dotenvy::dotenv();
    init_tracing();

    let cli = Cli::parse();
    let cfg = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Run {
            input,
            out,
            ledger_dir,
            as_of,
            metrics_out,
        } => {
            let metrics = match &metrics_out {
                Some(_) => Some(Metrics::init()?),
                None => None,
            };
            let as_of = parse_as_of(as_of.as_deref())?.unwrap_or_else(Utc::now);
            let pipeline = build_pipeline(cfg)?;

            let read = read_items_path(&input)
                .with_context(|| format!("reading items from {}", input.display()))?;
            let output = pipeline.run_read(read, as_of).await;

            if let Some(dir) = ledger_dir {
                let ledger = Ledger::new(dir)?;
                ledger.append_scored(as_of, &output.scored)?;
                ledger.append_stories(as_of, &output.stories)?;
            }
            write_output(&output, out.as_deref())?;
            if let (Some(m), Some(path)) = (metrics, metrics_out) {
                m.render_to_file(&path)?;
            }
        }
        Commands::Replay {
            ledger_dir,
            as_of,
            out,
        } => {
            let ledger = Ledger::new(ledger_dir)?;
            let replay = ledger.read_scored(parse_as_of(as_of.as_deref())?)?;
            let Some(run_at) = replay.as_of else {
                bail!("no matching run in ledger {}", ledger.dir().display());
            };
            if replay.items.is_empty() {
                warn!(target: "pipeline", "ledger run has no readable items");
            }
            let pipeline = build_pipeline(cfg)?;
            let output = pipeline
                .run_from_scored(replay.items, &replay.skipped, run_at)
                .await;
            write_output(&output, out.as_deref())?;
        }
        Commands::CacheSweep { keep_days } => {
            let Some(dir) = &cfg.analysis.cache_dir else {
                bail!("analysis.cache_dir is not set; nothing to sweep");
            };
            let keep = keep_days.unwrap_or(cfg.analysis.retention_days);
            let cache = JsonlCache::new(dir, cfg.analysis.retention_days)?;
            let removed = cache.sweep(keep, Utc::now().date_naive()).await?;
            info!(target: "analysis", removed, keep, "cache sweep done");
        }
    }
    Ok(())
}
