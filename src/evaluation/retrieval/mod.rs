//! Retrieval evaluation over graded relevance judgments
//!
//! Provides the BEIR cutoff metrics:
//! - NDCG@K: graded gain `rel / log2(rank + 1)` against the ideal ordering
//! - MAP@K: precision at each relevant hit within the top K, over all relevant docs
//! - Recall@K: relevant docs in the top K, over all relevant docs
//! - P@K: relevant docs in the top K, over K
//!
//! A document is relevant when its judged relevance is above 0; documents
//! without a judgment are not relevant.

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;

pub mod beir;

pub use beir::{
    run_entry_from_results, BeirEvaluator, LocalBeirEvaluator, RemoteBeirEvaluator, RunFile,
};

/// query_id -> doc_id -> retrieval score
pub type Run = BTreeMap<String, BTreeMap<String, f64>>;

/// query_id -> doc_id -> judged relevance
pub type Qrels = BTreeMap<String, BTreeMap<String, i64>>;

/// Decimal places metric values are rounded to
const METRIC_DECIMALS: i32 = 5;

/// One query's ranking together with its judgments
#[derive(Debug, Clone)]
pub struct RankedQuery {
    /// Query identifier
    pub query_id: String,
    /// Retrieved document IDs in ranked order
    pub retrieved: Vec<String>,
    /// Judged relevance per document
    pub judgments: BTreeMap<String, i64>,
}

impl RankedQuery {
    /// Create from an explicit ranking
    pub fn new(
        query_id: impl Into<String>,
        retrieved: Vec<String>,
        judgments: BTreeMap<String, i64>,
    ) -> Self {
        Self {
            query_id: query_id.into(),
            retrieved,
            judgments,
        }
    }

    /// Rank a run entry
    ///
    /// Orders by score descending, ties broken by document id descending.
    /// A document whose id equals the query id is dropped.
    pub fn from_scores(
        query_id: &str,
        scores: &BTreeMap<String, f64>,
        judgments: &BTreeMap<String, i64>,
    ) -> Self {
        let mut ranked: Vec<(&String, f64)> = scores
            .iter()
            .filter(|(doc_id, _)| doc_id.as_str() != query_id)
            .map(|(doc_id, &score)| (doc_id, score))
            .collect();

        ranked.sort_by(|(a_id, a), (b_id, b)| b.total_cmp(a).then_with(|| b_id.cmp(a_id)));

        Self::new(
            query_id,
            ranked.into_iter().map(|(id, _)| id.clone()).collect(),
            judgments.clone(),
        )
    }

    fn relevance(&self, doc_id: &str) -> i64 {
        self.judgments.get(doc_id).copied().unwrap_or(0)
    }

    fn is_relevant(&self, doc_id: &str) -> bool {
        self.relevance(doc_id) > 0
    }

    /// Number of judged-relevant documents
    pub fn num_relevant(&self) -> usize {
        self.judgments.values().filter(|&&rel| rel > 0).count()
    }

    fn hits_at_k(&self, k: usize) -> usize {
        self.retrieved
            .iter()
            .take(k)
            .filter(|doc| self.is_relevant(doc))
            .count()
    }

    /// Recall@K = |relevant ∩ retrieved@K| / |relevant|
    pub fn recall_at_k(&self, k: usize) -> f64 {
        let num_relevant = self.num_relevant();
        if num_relevant == 0 {
            return 0.0;
        }
        self.hits_at_k(k) as f64 / num_relevant as f64
    }

    /// Precision@K = |relevant ∩ retrieved@K| / K
    pub fn precision_at_k(&self, k: usize) -> f64 {
        if k == 0 {
            return 0.0;
        }
        self.hits_at_k(k) as f64 / k as f64
    }

    /// DCG@K with graded gain
    pub fn dcg_at_k(&self, k: usize) -> f64 {
        self.retrieved
            .iter()
            .take(k)
            .enumerate()
            .map(|(i, doc)| {
                let rel = self.relevance(doc).max(0) as f64;
                rel / (i as f64 + 2.0).log2()
            })
            .sum()
    }

    /// DCG@K of the judged relevances in descending order
    pub fn idcg_at_k(&self, k: usize) -> f64 {
        let mut gains: Vec<i64> = self.judgments.values().copied().filter(|&r| r > 0).collect();
        gains.sort_unstable_by(|a, b| b.cmp(a));
        gains
            .into_iter()
            .take(k)
            .enumerate()
            .map(|(i, rel)| rel as f64 / (i as f64 + 2.0).log2())
            .sum()
    }

    /// NDCG@K = DCG@K / IDCG@K
    pub fn ndcg_at_k(&self, k: usize) -> f64 {
        let idcg = self.idcg_at_k(k);
        if idcg == 0.0 {
            return 0.0;
        }
        self.dcg_at_k(k) / idcg
    }

    /// Average precision truncated at K
    ///
    /// AP@K = (1/|relevant|) * Σ Precision@i for each relevant hit at rank i <= K
    pub fn average_precision_at_k(&self, k: usize) -> f64 {
        let num_relevant = self.num_relevant();
        if num_relevant == 0 {
            return 0.0;
        }

        let mut sum = 0.0;
        let mut hits = 0;
        for (i, doc) in self.retrieved.iter().take(k).enumerate() {
            if self.is_relevant(doc) {
                hits += 1;
                sum += hits as f64 / (i + 1) as f64;
            }
        }

        sum / num_relevant as f64
    }
}

/// Which cutoff metric to read from [`BeirMetrics`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CutoffMetric {
    Ndcg,
    Map,
    Recall,
    Precision,
}

impl CutoffMetric {
    pub const ALL: [CutoffMetric; 4] = [Self::Ndcg, Self::Map, Self::Recall, Self::Precision];

    /// Label prefix, as in `NDCG@10`
    pub fn prefix(self) -> &'static str {
        match self {
            Self::Ndcg => "NDCG",
            Self::Map => "MAP",
            Self::Recall => "Recall",
            Self::Precision => "P",
        }
    }

    pub fn label(self, k: usize) -> String {
        format!("{}@{}", self.prefix(), k)
    }
}

/// Cutoff metrics, each a map from label (e.g. `NDCG@10`) to value
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BeirMetrics {
    #[serde(default, deserialize_with = "metric_table")]
    pub ndcg: BTreeMap<String, f64>,
    #[serde(default, deserialize_with = "metric_table")]
    pub map: BTreeMap<String, f64>,
    #[serde(default, deserialize_with = "metric_table")]
    pub recall: BTreeMap<String, f64>,
    #[serde(default, deserialize_with = "metric_table")]
    pub precision: BTreeMap<String, f64>,
}

/// A null table or a null value reads as absent
fn metric_table<'de, D>(deserializer: D) -> Result<BTreeMap<String, f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<BTreeMap<String, Option<f64>>> = Option::deserialize(deserializer)?;
    Ok(raw
        .unwrap_or_default()
        .into_iter()
        .filter_map(|(label, value)| value.map(|v| (label, v)))
        .collect())
}

impl BeirMetrics {
    /// All-zero metrics for the given cutoffs
    pub fn empty(k_values: &[usize]) -> Self {
        let mut metrics = Self::default();
        for metric in CutoffMetric::ALL {
            let table = metrics.table_mut(metric);
            for &k in k_values {
                table.insert(metric.label(k), 0.0);
            }
        }
        metrics
    }

    pub fn table(&self, metric: CutoffMetric) -> &BTreeMap<String, f64> {
        match metric {
            CutoffMetric::Ndcg => &self.ndcg,
            CutoffMetric::Map => &self.map,
            CutoffMetric::Recall => &self.recall,
            CutoffMetric::Precision => &self.precision,
        }
    }

    fn table_mut(&mut self, metric: CutoffMetric) -> &mut BTreeMap<String, f64> {
        match metric {
            CutoffMetric::Ndcg => &mut self.ndcg,
            CutoffMetric::Map => &mut self.map,
            CutoffMetric::Recall => &mut self.recall,
            CutoffMetric::Precision => &mut self.precision,
        }
    }

    /// Value of `metric` at cutoff `k`, 0 when absent
    ///
    /// Accepts the canonical label, any label with a `@k` suffix (`ndcg_cut@10`,
    /// `Precision@10`), or the bare cutoff (`10`).
    pub fn value(&self, metric: CutoffMetric, k: usize) -> f64 {
        let table = self.table(metric);

        if let Some(&v) = table.get(&metric.label(k)) {
            return v;
        }

        let suffix = format!("@{}", k);
        let bare = k.to_string();
        table
            .iter()
            .find(|(key, _)| key.ends_with(&suffix) || key.trim() == bare)
            .map(|(_, &v)| v)
            .unwrap_or(0.0)
    }
}

impl std::fmt::Display for BeirMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut cutoffs: Vec<usize> = CutoffMetric::ALL
            .iter()
            .flat_map(|&m| self.table(m).keys())
            .filter_map(|key| key.rsplit('@').next()?.trim().parse().ok())
            .collect();
        cutoffs.sort_unstable();
        cutoffs.dedup();

        writeln!(f, "{:<8} {:>10} {:>10} {:>10} {:>10}", "k", "NDCG", "MAP", "Recall", "P")?;
        for k in cutoffs {
            writeln!(
                f,
                "{:<8} {:>10.5} {:>10.5} {:>10.5} {:>10.5}",
                k,
                self.value(CutoffMetric::Ndcg, k),
                self.value(CutoffMetric::Map, k),
                self.value(CutoffMetric::Recall, k),
                self.value(CutoffMetric::Precision, k)
            )?;
        }
        Ok(())
    }
}

/// Mean over queries, rounded
fn mean_metric(queries: &[RankedQuery], metric: impl Fn(&RankedQuery) -> f64) -> f64 {
    let sum: f64 = queries.iter().map(metric).sum();
    round_metric(sum / queries.len() as f64)
}

fn round_metric(value: f64) -> f64 {
    let scale = 10f64.powi(METRIC_DECIMALS);
    (value * scale).round() / scale
}

/// Compute cutoff metrics for a run against qrels
///
/// Only queries present in both are evaluated. Returns `None` when there are
/// no such queries.
pub fn evaluate_run(run: &Run, qrels: &Qrels, k_values: &[usize]) -> Option<(BeirMetrics, usize)> {
    let queries: Vec<RankedQuery> = run
        .iter()
        .filter_map(|(query_id, scores)| {
            let judgments = qrels.get(query_id)?;
            Some(RankedQuery::from_scores(query_id, scores, judgments))
        })
        .collect();

    if queries.is_empty() {
        return None;
    }

    let mut metrics = BeirMetrics::default();
    for &k in k_values {
        metrics
            .ndcg
            .insert(CutoffMetric::Ndcg.label(k), mean_metric(&queries, |q| q.ndcg_at_k(k)));
        metrics.map.insert(
            CutoffMetric::Map.label(k),
            mean_metric(&queries, |q| q.average_precision_at_k(k)),
        );
        metrics
            .recall
            .insert(CutoffMetric::Recall.label(k), mean_metric(&queries, |q| q.recall_at_k(k)));
        metrics.precision.insert(
            CutoffMetric::Precision.label(k),
            mean_metric(&queries, |q| q.precision_at_k(k)),
        );
    }

    Some((metrics, queries.len()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn judgments(pairs: &[(&str, i64)]) -> BTreeMap<String, i64> {
        pairs.iter().map(|(d, r)| (d.to_string(), *r)).collect()
    }

    fn ranking(docs: &[&str]) -> Vec<String> {
        docs.iter().map(|d| d.to_string()).collect()
    }

    #[test]
    fn test_recall_at_k() {
        let query = RankedQuery::new(
            "q1",
            ranking(&["d1", "d2", "d3", "d4", "d5"]),
            judgments(&[("d1", 1), ("d3", 1), ("d6", 1), ("d7", 1), ("d2", 0)]),
        );

        // d1, d3 are relevant and in top-5, d6, d7 are not retrieved
        assert!((query.recall_at_k(5) - 0.5).abs() < 0.001); // 2/4
        assert!((query.recall_at_k(3) - 0.5).abs() < 0.001); // 2/4
        assert!((query.recall_at_k(1) - 0.25).abs() < 0.001); // 1/4
    }

    #[test]
    fn test_precision_at_k() {
        let query = RankedQuery::new(
            "q1",
            ranking(&["d1", "d2", "d3"]),
            judgments(&[("d1", 1), ("d3", 2)]),
        );

        assert!((query.precision_at_k(3) - 2.0 / 3.0).abs() < 0.001);
        assert!((query.precision_at_k(1) - 1.0).abs() < 0.001);
        // Divides by k even when fewer documents were retrieved
        assert!((query.precision_at_k(5) - 0.4).abs() < 0.001);
    }

    #[test]
    fn test_graded_ndcg() {
        let query = RankedQuery::new(
            "q1",
            ranking(&["d2", "d1"]),
            judgments(&[("d1", 2), ("d2", 1)]),
        );

        // DCG = 1/log2(2) + 2/log2(3), IDCG = 2/log2(2) + 1/log2(3)
        let dcg = 1.0 + 2.0 / 3f64.log2();
        let idcg = 2.0 + 1.0 / 3f64.log2();
        assert!((query.ndcg_at_k(2) - dcg / idcg).abs() < 1e-12);

        let perfect = RankedQuery::new(
            "q1",
            ranking(&["d1", "d2"]),
            judgments(&[("d1", 2), ("d2", 1)]),
        );
        assert!((perfect.ndcg_at_k(2) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_average_precision_at_k() {
        let query = RankedQuery::new(
            "q1",
            ranking(&["d1", "d2", "d3"]),
            judgments(&[("d1", 1), ("d3", 1), ("d9", 1)]),
        );

        // (1/1 + 2/3) / 3
        assert!((query.average_precision_at_k(3) - (1.0 + 2.0 / 3.0) / 3.0).abs() < 1e-12);
        // Only the first hit is inside the cutoff
        assert!((query.average_precision_at_k(1) - 1.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_from_scores_ordering() {
        let scores: BTreeMap<String, f64> = [("a", 0.5), ("b", 0.9), ("c", 0.5), ("q1", 1.0)]
            .into_iter()
            .map(|(d, s)| (d.to_string(), s))
            .collect();
        let query = RankedQuery::from_scores("q1", &scores, &BTreeMap::new());

        // Query id dropped; tie between a and c broken by id descending
        assert_eq!(query.retrieved, ranking(&["b", "c", "a"]));
    }

    #[test]
    fn test_evaluate_run() {
        let mut run = Run::new();
        run.insert(
            "q1".to_string(),
            [("d1", 2.0), ("d2", 1.0)].into_iter().map(|(d, s)| (d.to_string(), s)).collect(),
        );
        run.insert(
            "q2".to_string(),
            [("d3", 1.0)].into_iter().map(|(d, s)| (d.to_string(), s)).collect(),
        );
        // Not judged: ignored
        run.insert("q3".to_string(), BTreeMap::new());

        let mut qrels = Qrels::new();
        qrels.insert("q1".to_string(), judgments(&[("d1", 1)]));
        qrels.insert("q2".to_string(), judgments(&[("d4", 1)]));

        let (metrics, evaluated) = evaluate_run(&run, &qrels, &[1, 3]).unwrap();
        assert_eq!(evaluated, 2);
        assert_eq!(metrics.value(CutoffMetric::Ndcg, 1), 0.5);
        assert_eq!(metrics.value(CutoffMetric::Recall, 3), 0.5);
        assert_eq!(metrics.value(CutoffMetric::Precision, 1), 0.5);
        // q1: 1/3 at k=3, q2: 0 -> 0.16667 after rounding
        assert_eq!(metrics.value(CutoffMetric::Precision, 3), 0.16667);
    }

    #[test]
    fn test_evaluate_run_without_common_queries() {
        let mut run = Run::new();
        run.insert("q1".to_string(), BTreeMap::new());
        assert!(evaluate_run(&run, &Qrels::new(), &[1]).is_none());
    }

    #[test]
    fn test_tolerant_lookup() {
        let mut metrics = BeirMetrics::default();
        metrics.ndcg.insert("NDCG@10".to_string(), 0.4);
        metrics.map.insert("map_cut@10".to_string(), 0.3);
        metrics.recall.insert("10".to_string(), 0.2);

        assert_eq!(metrics.value(CutoffMetric::Ndcg, 10), 0.4);
        assert_eq!(metrics.value(CutoffMetric::Map, 10), 0.3);
        assert_eq!(metrics.value(CutoffMetric::Recall, 10), 0.2);
        assert_eq!(metrics.value(CutoffMetric::Precision, 10), 0.0);
        assert_eq!(metrics.value(CutoffMetric::Ndcg, 5), 0.0);
        // "NDCG@100" must not satisfy a lookup for k = 10 via the suffix rule
        metrics.ndcg.clear();
        metrics.ndcg.insert("NDCG@100".to_string(), 0.9);
        assert_eq!(metrics.value(CutoffMetric::Ndcg, 10), 0.0);
    }

    #[test]
    fn test_empty_metrics() {
        let metrics = BeirMetrics::empty(&[1, 3, 5]);
        assert_eq!(metrics.ndcg.len(), 3);
        assert_eq!(metrics.precision.get("P@5"), Some(&0.0));
    }
}
