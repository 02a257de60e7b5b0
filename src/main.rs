use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use memeval::cli;
use memeval::config::{parse_k_values, EvalConfig};
use memeval::evaluation::semantic::SWEEP_THRESHOLDS;

#[derive(Parser)]
#[command(name = "memeval")]
#[command(about = "Evaluate a memory/search service on conversational QA and BEIR retrieval", long_about = None)]
#[command(version)]
struct Cli {
    /// JSON config file (overridden by environment variables and flags)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Output directory for reports and run files
    #[arg(long, global = true)]
    output_dir: Option<PathBuf>,

    /// Maximum in-flight requests
    #[arg(long, global = true)]
    concurrency: Option<usize>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate answers on the LoCoMo conversational QA dataset
    Qa {
        /// LoCoMo JSON file
        #[arg(short, long)]
        data: PathBuf,

        /// Only evaluate one category (multi-hop, single-hop, open-domain, temporal, adversarial)
        #[arg(short, long)]
        category: Option<String>,

        /// Only evaluate the first N conversations
        #[arg(short, long)]
        limit: Option<usize>,

        /// Semantic similarity threshold
        #[arg(short, long)]
        threshold: Option<f64>,

        /// Results per search
        #[arg(long)]
        search_limit: Option<usize>,

        /// Skip embedding-based scoring
        #[arg(long)]
        no_semantic: bool,

        /// Embedding backend: openai, token, or mock
        #[arg(long, default_value = "openai")]
        embedder: String,

        /// SQLite file for persisting embeddings across runs
        #[arg(long)]
        embedding_cache: Option<PathBuf>,
    },

    /// Search every query of a BEIR dataset and save the run
    BeirSearch {
        /// Dataset name (directory under the BEIR data directory)
        #[arg(short, long)]
        dataset: String,

        /// BEIR data directory
        #[arg(long)]
        data_dir: Option<PathBuf>,

        /// Results per search
        #[arg(long)]
        search_limit: Option<usize>,
    },

    /// Evaluate a saved BEIR run
    BeirEval {
        /// Dataset name
        #[arg(short, long)]
        dataset: String,

        /// Run file from beir-search
        #[arg(short, long)]
        run: PathBuf,

        /// Qrels file (defaults to the dataset's qrels.json)
        #[arg(long)]
        qrels: Option<PathBuf>,

        /// Evaluate with the metrics service instead of locally
        #[arg(long)]
        remote: bool,

        /// Comma-separated cutoffs
        #[arg(short, long)]
        k_values: Option<String>,

        /// BEIR data directory
        #[arg(long)]
        data_dir: Option<PathBuf>,
    },

    /// Search and evaluate a BEIR dataset in one pass
    Beir {
        /// Dataset name
        #[arg(short, long)]
        dataset: String,

        /// Qrels file (defaults to the dataset's qrels.json)
        #[arg(long)]
        qrels: Option<PathBuf>,

        /// Evaluate with the metrics service instead of locally
        #[arg(long)]
        remote: bool,

        /// Comma-separated cutoffs
        #[arg(short, long)]
        k_values: Option<String>,

        /// BEIR data directory
        #[arg(long)]
        data_dir: Option<PathBuf>,

        /// Results per search
        #[arg(long)]
        search_limit: Option<usize>,
    },

    /// Add a BEIR corpus to the memory service
    IngestBeir {
        /// Dataset name
        #[arg(short, long)]
        dataset: String,

        /// BEIR data directory
        #[arg(long)]
        data_dir: Option<PathBuf>,

        /// Documents per batch
        #[arg(long, default_value = "10")]
        batch_size: usize,

        /// Only ingest the first N documents
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Add LoCoMo dialog turns, observations and summaries to the memory service
    IngestLocomo {
        /// LoCoMo JSON file
        #[arg(short, long)]
        data: PathBuf,

        /// Memories per batch
        #[arg(long, default_value = "10")]
        batch_size: usize,

        /// Only ingest the first N conversations
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Re-score a saved QA details file at several semantic thresholds
    Sweep {
        /// qa_details_<timestamp>.json from a qa run
        #[arg(short, long)]
        details: PathBuf,

        /// Comma-separated thresholds
        #[arg(short, long)]
        thresholds: Option<String>,

        /// Embedding backend: openai, token, or mock
        #[arg(long, default_value = "openai")]
        embedder: String,

        /// SQLite file for persisting embeddings across runs
        #[arg(long)]
        embedding_cache: Option<PathBuf>,
    },

    /// Check the metrics service and API keys
    Status,
}

fn parse_thresholds(raw: &str) -> anyhow::Result<Vec<f64>> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<f64>()
                .map_err(|e| anyhow::anyhow!("Invalid threshold {:?}: {}", s, e))
        })
        .collect()
}

fn apply_beir_flags(
    config: EvalConfig,
    data_dir: Option<PathBuf>,
    k_values: Option<String>,
    search_limit: Option<usize>,
) -> anyhow::Result<EvalConfig> {
    let mut config = config.with_search_limit(None, search_limit);
    if let Some(dir) = data_dir {
        config = config.with_beir_data_dir(dir);
    }
    if let Some(raw) = k_values {
        config = config.with_k_values(parse_k_values(&raw)?);
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing subscriber for logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "memeval=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let mut config = EvalConfig::resolve(cli.config.as_deref())?;
    if let Some(dir) = cli.output_dir {
        config = config.with_results_dir(dir);
    }
    if let Some(max) = cli.concurrency {
        config = config.with_max_concurrency(max);
    }

    match cli.command {
        Commands::Qa {
            data,
            category,
            limit,
            threshold,
            search_limit,
            no_semantic,
            embedder,
            embedding_cache,
        } => {
            let mut config = config.with_search_limit(search_limit, None);
            if let Some(threshold) = threshold {
                config = config.with_semantic_threshold(threshold);
            }
            cli::qa(
                &config,
                cli::QaOptions {
                    data,
                    category,
                    limit,
                    semantic: !no_semantic,
                    embedder,
                    embedding_cache,
                },
            )
            .await?;
        }

        Commands::BeirSearch {
            dataset,
            data_dir,
            search_limit,
        } => {
            let config = apply_beir_flags(config, data_dir, None, search_limit)?;
            cli::beir_search(&config, &dataset).await?;
        }

        Commands::BeirEval {
            dataset,
            run,
            qrels,
            remote,
            k_values,
            data_dir,
        } => {
            let config = apply_beir_flags(config, data_dir, k_values, None)?;
            cli::beir_eval(&config, &dataset, &run, qrels, remote).await?;
        }

        Commands::Beir {
            dataset,
            qrels,
            remote,
            k_values,
            data_dir,
            search_limit,
        } => {
            let config = apply_beir_flags(config, data_dir, k_values, search_limit)?;
            cli::beir(&config, &dataset, qrels, remote).await?;
        }

        Commands::IngestBeir {
            dataset,
            data_dir,
            batch_size,
            limit,
        } => {
            let config = apply_beir_flags(config, data_dir, None, None)?;
            cli::ingest_beir(&config, &dataset, batch_size, limit).await?;
        }

        Commands::IngestLocomo {
            data,
            batch_size,
            limit,
        } => {
            cli::ingest_locomo(&config, &data, batch_size, limit).await?;
        }

        Commands::Sweep {
            details,
            thresholds,
            embedder,
            embedding_cache,
        } => {
            let thresholds = match thresholds {
                Some(raw) => parse_thresholds(&raw)?,
                None => SWEEP_THRESHOLDS.to_vec(),
            };
            cli::sweep(
                &config,
                &details,
                &thresholds,
                &embedder,
                embedding_cache.as_deref(),
            )
            .await?;
        }

        Commands::Status => {
            cli::status(&config).await?;
        }
    }

    Ok(())
}
