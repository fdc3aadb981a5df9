use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use debias::cluster::Metric;
use debias::config::Settings;
use debias::embed::HashingEmbedder;
use debias::pipeline::{JobLayout, JobState, JobStatus, Pipeline};
use debias::report::Summary;

/// Cluster a text table and produce a debiased split
#[derive(Parser)]
#[command(name = "debias", version = env!("CARGO_PKG_VERSION"), about)]
struct Cli {
    /// Path to a settings file (default: ./debias.toml)
    #[arg(short, long, global = true, env = "DEBIAS_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a job on a CSV file
    Run {
        /// Input CSV with a header row
        input: PathBuf,

        /// Job id (default: a fresh UUID)
        #[arg(long)]
        job_id: Option<String>,

        /// Use precomputed vectors (.npy, one row per input row) instead of embedding
        #[arg(long)]
        vectors: Option<PathBuf>,

        /// Column holding the text (overrides config)
        #[arg(long)]
        text_column: Option<String>,

        /// Distance metric (overrides config)
        #[arg(long, value_parser = parse_metric)]
        metric: Option<Metric>,

        #[arg(long)]
        min_cluster_size: Option<usize>,

        #[arg(long)]
        min_samples: Option<usize>,

        /// Sampling seed (overrides config)
        #[arg(long)]
        seed: Option<u64>,
    },

    /// Print a job's status
    Status { job_id: String },

    /// Print a job's summary report
    Summary {
        job_id: String,

        /// Print the JSON summary instead of the text report
        #[arg(long)]
        json: bool,
    },

    /// Print the effective settings
    Config,
}

fn parse_metric(s: &str) -> Result<Metric, String> {
    match s.to_ascii_lowercase().as_str() {
        "euclidean" => Ok(Metric::Euclidean),
        "cosine" => Ok(Metric::Cosine),
        other => Err(format!("unknown metric {other:?} (expected euclidean or cosine)")),
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut settings = Settings::load(cli.config.as_deref()).context("loading settings")?;
    debias::logging::init_with_config(&settings.logging);

    match cli.command {
        Commands::Run {
            input,
            job_id,
            vectors,
            text_column,
            metric,
            min_cluster_size,
            min_samples,
            seed,
        } => {
            if let Some(col) = text_column {
                settings.text_column = col;
            }
            if let Some(m) = metric {
                settings.clustering.metric = m;
            }
            if let Some(mcs) = min_cluster_size {
                settings.clustering.min_cluster_size = mcs;
            }
            if min_samples.is_some() {
                settings.clustering.min_samples = min_samples;
            }
            if let Some(s) = seed {
                settings.partition.seed = s;
            }

            let job_id = job_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
            let config = settings.job_config(&job_id);
            let embedder = HashingEmbedder::new(settings.embedding.dim)?;
            let mut pipeline = Pipeline::new(config, Box::new(embedder));

            let result = match &vectors {
                Some(v) => pipeline.run_with_vectors(&input, v),
                None => pipeline.run(&input),
            };
            match result {
                Ok(summary) => {
                    println!("job {job_id}: {}", JobState::Done);
                    println!(
                        "kept {} / removed {} of {} records",
                        summary.partition.kept, summary.partition.removed, summary.n_records
                    );
                    println!("artifacts in {}", pipeline.layout().root().display());
                }
                Err(e) => {
                    let stage = pipeline.status().stage;
                    return Err(anyhow::Error::new(e))
                        .with_context(|| format!("job {job_id} failed during {stage}"));
                }
            }
        }

        Commands::Status { job_id } => {
            let dir = settings.jobs_root.join(&job_id);
            let status = JobStatus::load(&dir).with_context(|| format!("job {job_id}"))?;
            println!("{}", serde_json::to_string_pretty(&status)?);
            if status.state == JobState::Failed {
                std::process::exit(1);
            }
        }

        Commands::Summary { job_id, json } => {
            let layout = JobLayout::new(settings.jobs_root.join(&job_id));
            if json {
                let summary = Summary::load(&layout.summary_json())
                    .with_context(|| format!("job {job_id} has no summary"))?;
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                let path = layout.summary_txt();
                if !path.exists() {
                    bail!("job {job_id} has no summary at {}", path.display());
                }
                print!("{}", std::fs::read_to_string(&path)?);
            }
        }

        Commands::Config => {
            println!("{}", serde_json::to_string_pretty(&settings)?);
        }
    }
    Ok(())
}
