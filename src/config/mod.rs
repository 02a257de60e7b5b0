//! Evaluation configuration
//!
//! Values are resolved in order: defaults, an optional JSON file, environment
//! variables, then explicit command-line flags (applied by the caller through
//! the `with_*` methods).

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::embedding::ApiEndpoint;
use crate::evaluation::GradeThresholds;

/// Memory service API key
pub const MEMORY_API_KEY_ENV: &str = "SUPERMEMORY_API_KEY";
/// OpenAI-compatible API key
pub const OPENAI_API_KEY_ENV: &str = "OPENAI_API_KEY";
/// Metrics service base URL
pub const METRICS_URL_ENV: &str = "PYMETRICS_API_URL";

/// Configuration shared by every command
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvalConfig {
    /// Memory service base URL
    pub memory_base_url: String,
    /// Memory service API key
    #[serde(skip_serializing)]
    pub memory_api_key: Option<String>,
    /// OpenAI-compatible API base URL
    pub openai_base_url: String,
    /// OpenAI-compatible API key
    #[serde(skip_serializing)]
    pub openai_api_key: Option<String>,
    /// Chat model used for answer generation
    pub generation_model: String,
    /// Embedding model used for semantic scoring
    pub embedding_model: String,
    /// Metrics service base URL
    pub metrics_url: String,
    /// Results per QA search
    pub qa_search_limit: usize,
    /// Results per BEIR search
    pub beir_search_limit: usize,
    /// Cutoffs for retrieval metrics
    pub k_values: Vec<usize>,
    /// Semantic classifier threshold
    pub semantic_threshold: f64,
    /// Grade cut-offs
    pub thresholds: GradeThresholds,
    /// Maximum in-flight requests
    pub max_concurrency: usize,
    /// Texts per embedding request
    pub embedding_batch_size: usize,
    /// Per-request timeout in seconds
    pub request_timeout_secs: u64,
    /// Output directory for reports and run files
    pub results_dir: PathBuf,
    /// Root of the BEIR dataset directories
    pub beir_data_dir: PathBuf,
}

impl Default for EvalConfig {
    fn default() -> Self {
        let thresholds = GradeThresholds::default();
        Self {
            memory_base_url: "https://api.supermemory.ai".to_string(),
            memory_api_key: None,
            openai_base_url: "https://api.openai.com/v1".to_string(),
            openai_api_key: None,
            generation_model: "o4-mini-2025-04-16".to_string(),
            embedding_model: "text-embedding-3-small".to_string(),
            metrics_url: "http://0.0.0.0:8000".to_string(),
            qa_search_limit: 3,
            beir_search_limit: 100,
            k_values: vec![1, 3, 5],
            semantic_threshold: thresholds.semantic_correct,
            thresholds,
            max_concurrency: 5,
            embedding_batch_size: 100,
            request_timeout_secs: 60,
            results_dir: PathBuf::from("results"),
            beir_data_dir: PathBuf::from("beir_data"),
        }
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

impl EvalConfig {
    /// Defaults, optionally overlaid with a JSON file, then the environment
    pub fn resolve(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => Self::load(path)?,
            None => Self::default(),
        };
        Ok(config.with_env())
    }

    /// Load from a JSON file; missing fields take their defaults
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {:?}", path))
    }

    /// Apply environment variable overrides
    pub fn with_env(mut self) -> Self {
        if let Some(key) = non_empty_env(MEMORY_API_KEY_ENV) {
            self.memory_api_key = Some(key);
        }
        if let Some(key) = non_empty_env(OPENAI_API_KEY_ENV) {
            self.openai_api_key = Some(key);
        }
        if let Some(url) = non_empty_env(METRICS_URL_ENV) {
            self.metrics_url = url;
        }
        self
    }

    pub fn with_results_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.results_dir = dir.into();
        self
    }

    pub fn with_beir_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.beir_data_dir = dir.into();
        self
    }

    pub fn with_semantic_threshold(mut self, threshold: f64) -> Self {
        self.semantic_threshold = threshold;
        self
    }

    pub fn with_k_values(mut self, k_values: Vec<usize>) -> Self {
        self.k_values = k_values;
        self
    }

    pub fn with_search_limit(mut self, qa: Option<usize>, beir: Option<usize>) -> Self {
        if let Some(limit) = qa {
            self.qa_search_limit = limit;
        }
        if let Some(limit) = beir {
            self.beir_search_limit = limit;
        }
        self
    }

    pub fn with_max_concurrency(mut self, max: usize) -> Self {
        self.max_concurrency = max;
        self
    }

    pub fn with_metrics_url(mut self, url: impl Into<String>) -> Self {
        self.metrics_url = url.into();
        self
    }

    /// Memory service key, or an error naming the variable to set
    pub fn validate_memory(&self) -> Result<&str> {
        if self.memory_base_url.trim().is_empty() {
            anyhow::bail!("Memory service base URL is not configured");
        }
        self.memory_api_key
            .as_deref()
            .with_context(|| format!("{} is not set", MEMORY_API_KEY_ENV))
    }

    /// OpenAI-compatible key, or an error naming the variable to set
    pub fn validate_openai(&self) -> Result<&str> {
        if self.openai_base_url.trim().is_empty() {
            anyhow::bail!("OpenAI base URL is not configured");
        }
        self.openai_api_key
            .as_deref()
            .with_context(|| format!("{} is not set", OPENAI_API_KEY_ENV))
    }

    /// OpenAI-compatible endpoint, when a key is configured
    pub fn openai_endpoint(&self) -> Option<ApiEndpoint> {
        self.openai_api_key.as_ref().map(|key| {
            ApiEndpoint::new(
                self.openai_base_url.clone(),
                key.clone(),
                self.request_timeout_secs,
            )
        })
    }

    /// Check value ranges
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrency == 0 {
            anyhow::bail!("max_concurrency must be at least 1");
        }
        if self.embedding_batch_size == 0 {
            anyhow::bail!("embedding_batch_size must be at least 1");
        }
        if self.k_values.is_empty() || self.k_values.contains(&0) {
            anyhow::bail!("k_values must be non-empty and positive, got {:?}", self.k_values);
        }
        if !(0.0..=1.0).contains(&self.semantic_threshold) {
            anyhow::bail!(
                "semantic_threshold must be within [0, 1], got {}",
                self.semantic_threshold
            );
        }
        Ok(())
    }
}

/// Parse a comma-separated cutoff list such as `1,3,5`
pub fn parse_k_values(raw: &str) -> Result<Vec<usize>> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<usize>()
                .with_context(|| format!("Invalid k value: {:?}", s))
        })
        .collect()
}
