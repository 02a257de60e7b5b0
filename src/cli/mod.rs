//! Command-line interface
//!
//! Provides CLI commands for QA evaluation, BEIR search/evaluation/ingestion,
//! threshold sweeps and a service status check.

use crate::answer::{AnswerGenerator, OpenAIGenerator};
use crate::config::EvalConfig;
use crate::data::{load_corpus, load_locomo, load_queries, load_transcripts, BeirDataset, Category};
use crate::embedding::{create_embedder, Embedder, EmbeddingCache, EmbeddingConfig, EmbeddingStore};
use crate::evaluation::report::export_csv;
use crate::evaluation::retrieval::{
    BeirEvaluator, BeirMetrics, LocalBeirEvaluator, RemoteBeirEvaluator, RunFile,
};
use crate::evaluation::semantic::{analyze_thresholds, SemanticClassifier, SimilarityMetrics};
use crate::memory::{MemoryClient, SupermemoryClient};
use crate::pipeline::{
    evaluate_answers, ingest_corpus, ingest_transcripts, AnswerScorer, BeirSearchRunner, QaConfig,
    QaDetailsFile, QaRunner, TracingObserver, TranscriptIngestStats,
};
use crate::utils::{ensure_dir, now_rfc3339, stamped_path};
use anyhow::{Context, Result};
use chrono::Utc;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Dimension of the offline (token/mock) embedders
const LOCAL_EMBEDDING_DIM: usize = 384;

/// Options of the `qa` command
#[derive(Debug, Clone)]
pub struct QaOptions {
    pub data: PathBuf,
    pub category: Option<String>,
    pub limit: Option<usize>,
    pub semantic: bool,
    pub embedder: String,
    pub embedding_cache: Option<PathBuf>,
}

fn memory_client(config: &EvalConfig) -> Result<Arc<dyn MemoryClient>> {
    let key = config.validate_memory()?;
    Ok(Arc::new(SupermemoryClient::new(
        config.memory_base_url.clone(),
        key,
        config.request_timeout_secs,
    )?))
}

fn embedder_for(config: &EvalConfig, backend: &str) -> Result<Arc<dyn Embedder>> {
    if backend == "openai" {
        config.validate_openai()?;
    }
    let embedding_config = EmbeddingConfig {
        model_name: config.embedding_model.clone(),
        batch_size: config.embedding_batch_size,
        ..Default::default()
    };
    create_embedder(
        backend,
        embedding_config,
        LOCAL_EMBEDDING_DIM,
        config.openai_endpoint(),
    )
}

fn embedding_cache(
    config: &EvalConfig,
    embedder: &Arc<dyn Embedder>,
    store_path: Option<&Path>,
) -> Result<EmbeddingCache> {
    let cache = EmbeddingCache::new(config.embedding_batch_size, config.max_concurrency);
    match store_path {
        Some(path) => {
            let store = EmbeddingStore::open(path, embedder.model_name())?;
            tracing::info!("  Embedding store: {:?}", path);
            Ok(cache.with_store(store))
        }
        None => Ok(cache),
    }
}

/// Execute the qa command
pub async fn qa(config: &EvalConfig, options: QaOptions) -> Result<()> {
    tracing::info!("Starting QA evaluation");
    tracing::info!("  Data: {:?}", options.data);
    tracing::info!("  Generation model: {}", config.generation_model);
    tracing::info!("  Search limit: {}", config.qa_search_limit);
    tracing::info!("  Semantic scoring: {}", options.semantic);

    config.validate()?;
    let memory = memory_client(config)?;
    config.validate_openai()?;
    let endpoint = config
        .openai_endpoint()
        .context("OpenAI endpoint is not configured")?;
    let generator: Arc<dyn AnswerGenerator> =
        Arc::new(OpenAIGenerator::new(endpoint, config.generation_model.clone())?);
    let embedder = if options.semantic {
        Some(embedder_for(config, &options.embedder)?)
    } else {
        None
    };

    let mut conversations = load_locomo(&options.data)?;
    if let Some(name) = &options.category {
        let category = Category::from_cli_name(name)?;
        tracing::info!("  Category: {}", category);
        for conversation in &mut conversations {
            conversation.retain_category(category);
        }
        conversations.retain(|c| !c.qa.is_empty());
    }
    if let Some(limit) = options.limit {
        conversations.truncate(limit);
    }
    let question_count: usize = conversations.iter().map(|c| c.qa.len()).sum();
    tracing::info!(
        "Loaded {} conversations with {} questions",
        conversations.len(),
        question_count
    );

    let runner = QaRunner::new(
        memory,
        Arc::clone(&generator),
        QaConfig {
            search_limit: config.qa_search_limit,
            max_concurrency: config.max_concurrency,
        },
    );
    let answers = runner.answer_all(&conversations).await?;

    let scorer = AnswerScorer::new(
        SemanticClassifier::new(config.semantic_threshold),
        config.thresholds,
        options.semantic,
    );
    let mut cache = match &embedder {
        Some(embedder) => embedding_cache(config, embedder, options.embedding_cache.as_deref())?,
        None => EmbeddingCache::new(config.embedding_batch_size, config.max_concurrency),
    };
    let mut observer = TracingObserver::default();
    let evaluation =
        evaluate_answers(answers, &scorer, embedder.as_ref(), &mut cache, &mut observer).await?;

    let results_dir = ensure_dir(&config.results_dir)?;
    export_csv(&evaluation.report, &results_dir.join("metrics_by_category.csv"))?;

    let details = QaDetailsFile {
        timestamp: now_rfc3339(),
        generation_model: generator.model_name().to_string(),
        embedding_model: embedder.as_ref().map(|e| e.model_name().to_string()),
        semantic_threshold: config.semantic_threshold,
        evaluation,
    };
    let details_path = stamped_path(&results_dir, "qa_details", Utc::now());
    details.save(&details_path)?;
    tracing::info!("Details written to {:?}", details_path);

    println!("\n{}", details.evaluation.report);
    if let Some(metrics) = &details.evaluation.semantic_metrics {
        println!("{}", metrics);
    }

    Ok(())
}

/// Execute the beir-search command, returning the saved run file path
pub async fn beir_search(config: &EvalConfig, dataset: &str) -> Result<PathBuf> {
    tracing::info!("Starting BEIR search");
    tracing::info!("  Dataset: {}", dataset);
    tracing::info!("  Search limit: {}", config.beir_search_limit);

    config.validate()?;
    let memory = memory_client(config)?;
    let paths = BeirDataset::new(&config.beir_data_dir, dataset);
    let queries = load_queries(&paths.queries_path())?;
    tracing::info!("Loaded {} queries", queries.len());

    let runner = BeirSearchRunner::new(memory, config.beir_search_limit, config.max_concurrency);
    let run_file = runner.search_to_file(dataset, &queries).await?;

    let results_dir = ensure_dir(&config.results_dir)?;
    let run_path = stamped_path(&results_dir, &format!("search_results_{}", dataset), Utc::now());
    run_file.save(&run_path)?;

    println!("\nSearch Summary:");
    println!("  Queries: {}", run_file.query_count);
    println!("  Successful: {}", run_file.successful_query_count);
    println!("  Run file: {:?}", run_path);

    Ok(run_path)
}

#[derive(Debug, Serialize)]
struct EvaluationFile<'a> {
    dataset: &'a str,
    timestamp: String,
    run_file: &'a Path,
    k_values: &'a [usize],
    evaluator: &'a str,
    metrics: &'a BeirMetrics,
}

/// Execute the beir-eval command
pub async fn beir_eval(
    config: &EvalConfig,
    dataset: &str,
    run_path: &Path,
    qrels: Option<PathBuf>,
    remote: bool,
) -> Result<BeirMetrics> {
    tracing::info!("Starting BEIR evaluation");
    tracing::info!("  Dataset: {}", dataset);
    tracing::info!("  Run file: {:?}", run_path);
    tracing::info!("  k values: {:?}", config.k_values);

    config.validate()?;
    let run_file = RunFile::load(run_path)?;
    if run_file.dataset != dataset {
        tracing::warn!(
            "Run file was produced for {} but is evaluated as {}",
            run_file.dataset,
            dataset
        );
    }

    let (evaluator, label): (Box<dyn BeirEvaluator>, &str) = if remote {
        tracing::info!("  Evaluator: {}", config.metrics_url);
        (
            Box::new(RemoteBeirEvaluator::new(
                config.metrics_url.clone(),
                config.request_timeout_secs,
            )?),
            "remote",
        )
    } else {
        let qrels_path =
            qrels.unwrap_or_else(|| BeirDataset::new(&config.beir_data_dir, dataset).qrels_path());
        tracing::info!("  Qrels: {:?}", qrels_path);
        (Box::new(LocalBeirEvaluator::from_path(&qrels_path)?), "local")
    };

    let metrics = evaluator
        .evaluate(dataset, &run_file.results, run_path, &config.k_values)
        .await?;

    let results_dir = ensure_dir(&config.results_dir)?;
    let eval_path = stamped_path(&results_dir, &format!("beir_eval_{}", dataset), Utc::now());
    crate::utils::write_json(
        &eval_path,
        &EvaluationFile {
            dataset,
            timestamp: now_rfc3339(),
            run_file: run_path,
            k_values: &config.k_values,
            evaluator: label,
            metrics: &metrics,
        },
    )?;

    println!("\nBEIR Evaluation ({}, {} queries searched)", dataset, run_file.successful_query_count);
    println!("{}", metrics);
    println!("Evaluation written to {:?}", eval_path);

    Ok(metrics)
}

/// Execute the beir command: search then evaluate
pub async fn beir(
    config: &EvalConfig,
    dataset: &str,
    qrels: Option<PathBuf>,
    remote: bool,
) -> Result<BeirMetrics> {
    let run_path = beir_search(config, dataset).await?;
    beir_eval(config, dataset, &run_path, qrels, remote).await
}

/// Execute the ingest-beir command
pub async fn ingest_beir(
    config: &EvalConfig,
    dataset: &str,
    batch_size: usize,
    limit: Option<usize>,
) -> Result<()> {
    tracing::info!("Starting BEIR ingestion");
    tracing::info!("  Dataset: {}", dataset);
    tracing::info!("  Batch size: {}", batch_size);

    let memory = memory_client(config)?;
    let paths = BeirDataset::new(&config.beir_data_dir, dataset);
    let corpus = load_corpus(&paths.corpus_path())?;
    tracing::info!("Loaded {} documents", corpus.len());

    let stats = ingest_corpus(memory, &corpus, batch_size, limit).await?;

    println!("\nIngestion Summary:");
    println!("  Documents added: {}", stats.succeeded);
    println!("  Failures: {}", stats.failed);

    Ok(())
}

/// Execute the ingest-locomo command
pub async fn ingest_locomo(
    config: &EvalConfig,
    data: &Path,
    batch_size: usize,
    limit: Option<usize>,
) -> Result<TranscriptIngestStats> {
    tracing::info!("Loading LoCoMo transcripts into the memory service");
    tracing::info!("  Data: {:?}", data);
    tracing::info!("  Batch size: {}", batch_size);

    let memory = memory_client(config)?;
    let mut transcripts = load_transcripts(data)?;
    if let Some(limit) = limit {
        transcripts.truncate(limit);
    }
    tracing::info!("Found {} conversations", transcripts.len());

    let stats = ingest_transcripts(memory, &transcripts, batch_size).await?;
    let total = stats.total();

    println!("\nUpload Summary:");
    println!("  Dialog turns: {} ({} failed)", stats.turns.succeeded, stats.turns.failed);
    println!(
        "  Observations: {} ({} failed)",
        stats.observations.succeeded, stats.observations.failed
    );
    println!(
        "  Session summaries: {} ({} failed)",
        stats.summaries.succeeded, stats.summaries.failed
    );
    println!("  Total memories: {} ({} failed)", total.succeeded, total.failed);

    Ok(stats)
}

/// Execute the sweep command over a saved details file
pub async fn sweep(
    config: &EvalConfig,
    details_path: &Path,
    thresholds: &[f64],
    backend: &str,
    embedding_cache_path: Option<&Path>,
) -> Result<Vec<SimilarityMetrics>> {
    tracing::info!("Starting threshold sweep");
    tracing::info!("  Details: {:?}", details_path);
    tracing::info!("  Thresholds: {:?}", thresholds);

    let details = QaDetailsFile::load(details_path)?;
    let (generated, truths) = details.answer_pairs();

    let embedder = embedder_for(config, backend)?;
    let mut cache = embedding_cache(config, &embedder, embedding_cache_path)?;
    let classifier = SemanticClassifier::new(config.semantic_threshold);
    cache
        .prime(&embedder, classifier.texts_to_embed(&generated, &truths))
        .await?;

    let rows = analyze_thresholds(&generated, &truths, &cache, &classifier, thresholds)?;

    println!(
        "\n{:<10} {:>10} {:>10} {:>10} {:>10} {:>12}",
        "Threshold", "Precision", "Recall", "F1", "Accuracy", "Avg Sim"
    );
    for row in &rows {
        println!(
            "{:<10.2} {:>9.2}% {:>9.2}% {:>9.2}% {:>9.2}% {:>11.2}%",
            row.threshold,
            row.precision * 100.0,
            row.recall * 100.0,
            row.f1 * 100.0,
            row.accuracy * 100.0,
            row.average_similarity * 100.0
        );
    }

    let results_dir = ensure_dir(&config.results_dir)?;
    let sweep_path = stamped_path(&results_dir, "threshold_sweep", Utc::now());
    crate::utils::write_json(&sweep_path, &rows)?;
    tracing::info!("Sweep written to {:?}", sweep_path);

    Ok(rows)
}

/// Execute the status command
pub async fn status(config: &EvalConfig) -> Result<()> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.request_timeout_secs.min(10)))
        .build()
        .context("Failed to build HTTP client")?;

    let url = format!("{}/", config.metrics_url.trim_end_matches('/'));
    let metrics_status = match client.get(&url).send().await {
        Ok(response) if response.status().is_success() => "reachable".to_string(),
        Ok(response) => format!("responded with {}", response.status()),
        Err(e) => {
            tracing::debug!("Metrics service check failed: {:#}", e);
            "unreachable".to_string()
        }
    };

    let key_status = |key: &Option<String>| if key.is_some() { "set" } else { "missing" };

    println!("\nStatus:");
    println!("  Metrics service ({}): {}", config.metrics_url, metrics_status);
    println!("  Memory service: {}", config.memory_base_url);
    println!("  SUPERMEMORY_API_KEY: {}", key_status(&config.memory_api_key));
    println!("  OPENAI_API_KEY: {}", key_status(&config.openai_api_key));

    Ok(())
}
