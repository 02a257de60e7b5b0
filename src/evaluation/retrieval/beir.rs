//! BEIR run files and evaluators
//!
//! A run is built from ranked search results, saved as a [`RunFile`], then
//! scored either locally against a qrels file or by the metrics service.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::{evaluate_run, BeirMetrics, Qrels, Run};
use crate::memory::SearchResult;

/// Run entry for one query: `doc_id -> score`
///
/// Results without a source document id are skipped; a missing score counts
/// as 1.0. When the same document appears more than once the last result's
/// score is kept.
pub fn run_entry_from_results(results: &[SearchResult]) -> BTreeMap<String, f64> {
    let mut entry = BTreeMap::new();
    for result in results {
        if let Some(doc_id) = result.doc_id() {
            entry.insert(doc_id, result.score.unwrap_or(1.0));
        }
    }
    entry
}

/// Saved search run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunFile {
    pub dataset: String,
    pub timestamp: String,
    pub results: Run,
    pub query_count: usize,
    pub successful_query_count: usize,
}

impl RunFile {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read run file: {:?}", path))?;
        serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse run file: {:?}", path))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        crate::utils::write_json(path, self)
    }
}

/// Trait for BEIR evaluators
#[async_trait]
pub trait BeirEvaluator: Send + Sync {
    /// Score a run
    ///
    /// `run_path` is where `run` was saved; evaluators that read from disk
    /// use it instead of the in-memory run.
    async fn evaluate(
        &self,
        dataset: &str,
        run: &Run,
        run_path: &Path,
        k_values: &[usize],
    ) -> Result<BeirMetrics>;
}

/// In-process evaluator over a qrels file
pub struct LocalBeirEvaluator {
    qrels: Qrels,
}

impl LocalBeirEvaluator {
    pub fn new(qrels: Qrels) -> Self {
        Self { qrels }
    }

    pub fn from_path(qrels_path: &Path) -> Result<Self> {
        Ok(Self::new(crate::data::load_qrels(qrels_path)?))
    }

    pub fn evaluate_run(&self, run: &Run, k_values: &[usize]) -> BeirMetrics {
        match evaluate_run(run, &self.qrels, k_values) {
            Some((metrics, evaluated)) => {
                tracing::info!(
                    "Evaluated {} of {} queries against {} judged queries",
                    evaluated,
                    run.len(),
                    self.qrels.len()
                );
                metrics
            }
            None => {
                tracing::error!("No queries in common between run and qrels, returning zero metrics");
                BeirMetrics::empty(k_values)
            }
        }
    }
}

#[async_trait]
impl BeirEvaluator for LocalBeirEvaluator {
    async fn evaluate(
        &self,
        _dataset: &str,
        run: &Run,
        _run_path: &Path,
        k_values: &[usize],
    ) -> Result<BeirMetrics> {
        Ok(self.evaluate_run(run, k_values))
    }
}

#[derive(Debug, Serialize)]
struct EvaluateFromFileRequest<'a> {
    file_path: String,
    k_values: &'a [usize],
}

#[derive(Debug, Deserialize)]
struct EvaluateFromFileResponse {
    #[serde(default)]
    metrics: Option<BeirMetrics>,
    #[serde(default)]
    error: Option<String>,
}

/// Evaluator backed by the metrics service
pub struct RemoteBeirEvaluator {
    http: Client,
    base_url: String,
}

impl RemoteBeirEvaluator {
    pub fn new(base_url: impl Into<String>, timeout_secs: u64) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn endpoint(&self, dataset: &str) -> String {
        format!("{}/beir/evaluate-from-file/{}", self.base_url, dataset)
    }
}

#[async_trait]
impl BeirEvaluator for RemoteBeirEvaluator {
    async fn evaluate(
        &self,
        dataset: &str,
        _run: &Run,
        run_path: &Path,
        k_values: &[usize],
    ) -> Result<BeirMetrics> {
        // The service resolves the path on its own filesystem
        let file_path: PathBuf = std::fs::canonicalize(run_path).unwrap_or_else(|_| run_path.to_path_buf());
        let body = EvaluateFromFileRequest {
            file_path: file_path.to_string_lossy().into_owned(),
            k_values,
        };

        let url = self.endpoint(dataset);
        let response = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("Request to {} failed", url))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            anyhow::bail!("Metrics service returned {}: {}", status, text);
        }

        let parsed: EvaluateFromFileResponse = response
            .json()
            .await
            .context("Failed to parse metrics service response")?;

        if let Some(error) = &parsed.error {
            tracing::error!("Metrics service reported an error for {}: {}", dataset, error);
        }

        Ok(parsed.metrics.unwrap_or_else(|| BeirMetrics::empty(k_values)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluation::retrieval::CutoffMetric;
    use serde_json::json;
    use tempfile::TempDir;

    fn result(value: serde_json::Value) -> SearchResult {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_run_entry_from_results() {
        let results = vec![
            result(json!({"chunks": [], "metadata": {"doc_id": "d1"}, "score": 0.8})),
            result(json!({"chunks": [], "metadata": {"doc_id": "d2"}})),
            result(json!({"chunks": [], "metadata": {"source": "beir"}, "score": 0.5})),
            result(json!({"chunks": [], "metadata": {"doc_id": "d1"}, "score": 0.3})),
        ];

        let entry = run_entry_from_results(&results);
        assert_eq!(entry.len(), 2);
        // Repeated document: the later chunk's score replaces the earlier one
        assert_eq!(entry["d1"], 0.3);
        assert_eq!(entry["d2"], 1.0);
    }

    #[test]
    fn test_run_file_round_trip_on_disk() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("run.json");

        let mut results = Run::new();
        results.insert("q1".to_string(), BTreeMap::from([("d1".to_string(), 0.5)]));
        let run_file = RunFile {
            dataset: "scifact".to_string(),
            timestamp: "2025-01-01T00:00:00Z".to_string(),
            results,
            query_count: 2,
            successful_query_count: 1,
        };
        run_file.save(&path).unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["successful_query_count"], 1);
        assert_eq!(raw["results"]["q1"]["d1"], 0.5);
        assert_eq!(RunFile::load(&path).unwrap(), run_file);
    }

    #[test]
    fn test_remote_response_with_numeric_cutoffs() {
        let parsed: EvaluateFromFileResponse = serde_json::from_value(json!({
            "metrics": {
                "ndcg": {"1": 0.0, "3": 0.0},
                "map": {"1": 0.0},
                "recall": {},
                "precision": {}
            },
            "dataset_name": "scifact"
        }))
        .unwrap();
        let metrics = parsed.metrics.unwrap();
        assert_eq!(metrics.value(CutoffMetric::Ndcg, 3), 0.0);
        assert!(parsed.error.is_none());
    }

    #[test]
    fn test_remote_response_with_null_metrics() {
        let parsed: EvaluateFromFileResponse = serde_json::from_value(json!({
            "metrics": {
                "ndcg": {"NDCG@1": null, "NDCG@3": 0.5},
                "map": null
            }
        }))
        .unwrap();
        let metrics = parsed.metrics.unwrap();
        assert_eq!(metrics.value(CutoffMetric::Ndcg, 1), 0.0);
        assert_eq!(metrics.value(CutoffMetric::Ndcg, 3), 0.5);
        assert_eq!(metrics.value(CutoffMetric::Map, 1), 0.0);
        assert!(metrics.map.is_empty());
        assert!(!metrics.ndcg.contains_key("NDCG@1"));

        let parsed: EvaluateFromFileResponse =
            serde_json::from_value(json!({"metrics": null, "error": "no qrels"})).unwrap();
        assert!(parsed.metrics.is_none());
        assert_eq!(parsed.error.as_deref(), Some("no qrels"));
    }

    #[tokio::test]
    async fn test_local_evaluator_without_common_queries() {
        let evaluator = LocalBeirEvaluator::new(Qrels::new());
        let mut run = Run::new();
        run.insert("q1".to_string(), BTreeMap::from([("d1".to_string(), 1.0)]));

        let metrics = evaluator
            .evaluate("scifact", &run, Path::new("unused.json"), &[1, 3])
            .await
            .unwrap();
        assert_eq!(metrics, BeirMetrics::empty(&[1, 3]));
    }

    #[tokio::test]
    async fn test_local_evaluator_scores_run() {
        let mut qrels = Qrels::new();
        qrels.insert("q1".to_string(), BTreeMap::from([("d1".to_string(), 1)]));
        let evaluator = LocalBeirEvaluator::new(qrels);

        let mut run = Run::new();
        run.insert(
            "q1".to_string(),
            BTreeMap::from([("d1".to_string(), 0.9), ("d2".to_string(), 0.1)]),
        );

        let metrics = evaluator
            .evaluate("scifact", &run, Path::new("unused.json"), &[1, 3])
            .await
            .unwrap();
        assert_eq!(metrics.value(CutoffMetric::Ndcg, 1), 1.0);
        assert_eq!(metrics.value(CutoffMetric::Recall, 3), 1.0);
        assert_eq!(metrics.value(CutoffMetric::Precision, 3), 0.33333);
    }

    #[tokio::test]
    async fn test_remote_evaluator_unreachable() {
        let evaluator = RemoteBeirEvaluator::new("http://127.0.0.1:9/", 2).unwrap();
        assert_eq!(
            evaluator.endpoint("scifact"),
            "http://127.0.0.1:9/beir/evaluate-from-file/scifact"
        );
        let result = evaluator
            .evaluate("scifact", &Run::new(), Path::new("run.json"), &[1])
            .await;
        assert!(result.is_err());
    }
}
