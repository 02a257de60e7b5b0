//! Embedding-based answer classification
//!
//! Each (generated, ground truth) pair lands in exactly one confusion-matrix
//! cell, with the no-answer sentinel driving the negative side:
//!
//! | ground truth | generated  | outcome                           | similarity |
//! |--------------|------------|-----------------------------------|------------|
//! | no answer    | no answer  | true negative                     | 1.0        |
//! | no answer    | answer     | false positive                    | 0.0        |
//! | answer       | no answer  | false negative                    | 0.0        |
//! | answer       | answer     | true positive if cosine >= threshold, else false negative | cosine |
//!
//! A wrong but present answer is a miss, never a false positive.

use crate::embedding::{Embedder, EmbeddingCache};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Default cosine similarity a pair needs to count as a true positive
pub const DEFAULT_SEMANTIC_THRESHOLD: f64 = 0.85;

/// Thresholds tried by the threshold sweep
pub const SWEEP_THRESHOLDS: [f64; 5] = [0.7, 0.8, 0.85, 0.9, 0.95];

/// Confusion-matrix cell of one classified pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfusionOutcome {
    TruePositive,
    FalsePositive,
    TrueNegative,
    FalseNegative,
}

impl std::fmt::Display for ConfusionOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::TruePositive => "TP",
            Self::FalsePositive => "FP",
            Self::TrueNegative => "TN",
            Self::FalseNegative => "FN",
        };
        write!(f, "{}", label)
    }
}

/// One classified pair
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub outcome: ConfusionOutcome,
    pub similarity: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfusionCounts {
    pub true_positives: usize,
    pub false_positives: usize,
    pub true_negatives: usize,
    pub false_negatives: usize,
}

impl ConfusionCounts {
    pub fn record(&mut self, outcome: ConfusionOutcome) {
        match outcome {
            ConfusionOutcome::TruePositive => self.true_positives += 1,
            ConfusionOutcome::FalsePositive => self.false_positives += 1,
            ConfusionOutcome::TrueNegative => self.true_negatives += 1,
            ConfusionOutcome::FalseNegative => self.false_negatives += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.true_positives + self.false_positives + self.true_negatives + self.false_negatives
    }

    /// TP / (TP + FP), 0 without true positives
    pub fn precision(&self) -> f64 {
        if self.true_positives == 0 {
            return 0.0;
        }
        self.true_positives as f64 / (self.true_positives + self.false_positives) as f64
    }

    /// TP / (TP + FN), 0 without true positives
    pub fn recall(&self) -> f64 {
        if self.true_positives == 0 {
            return 0.0;
        }
        self.true_positives as f64 / (self.true_positives + self.false_negatives) as f64
    }

    pub fn f1(&self) -> f64 {
        let (p, r) = (self.precision(), self.recall());
        if p == 0.0 || r == 0.0 {
            0.0
        } else {
            2.0 * p * r / (p + r)
        }
    }

    /// (TP + TN) / total, 0 for an empty batch
    pub fn accuracy(&self) -> f64 {
        let total = self.total();
        if total == 0 {
            return 0.0;
        }
        (self.true_positives + self.true_negatives) as f64 / total as f64
    }
}

/// Aggregate semantic metrics over a batch of pairs
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimilarityMetrics {
    pub threshold: f64,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub accuracy: f64,
    pub average_similarity: f64,
    pub counts: ConfusionCounts,
}

impl SimilarityMetrics {
    /// Build from summed counts and the sum of per-pair similarities
    pub fn from_counts(threshold: f64, counts: ConfusionCounts, similarity_sum: f64) -> Self {
        let total = counts.total();
        Self {
            threshold,
            precision: counts.precision(),
            recall: counts.recall(),
            f1: counts.f1(),
            accuracy: counts.accuracy(),
            average_similarity: if total == 0 {
                0.0
            } else {
                similarity_sum / total as f64
            },
            counts,
        }
    }
}

impl std::fmt::Display for SimilarityMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Semantic Metrics (threshold {:.2}):", self.threshold)?;
        writeln!(f, "  Precision:      {:.2}%", self.precision * 100.0)?;
        writeln!(f, "  Recall:         {:.2}%", self.recall * 100.0)?;
        writeln!(f, "  F1:             {:.2}%", self.f1 * 100.0)?;
        writeln!(f, "  Accuracy:       {:.2}%", self.accuracy * 100.0)?;
        writeln!(f, "  Avg similarity: {:.4}", self.average_similarity)?;
        writeln!(
            f,
            "  TP/FP/TN/FN:    {}/{}/{}/{}",
            self.counts.true_positives,
            self.counts.false_positives,
            self.counts.true_negatives,
            self.counts.false_negatives
        )?;
        Ok(())
    }
}

/// Classifies answer pairs against a no-answer sentinel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SemanticClassifier {
    pub threshold: f64,
    pub empty_token: String,
}

impl Default for SemanticClassifier {
    fn default() -> Self {
        Self::new(DEFAULT_SEMANTIC_THRESHOLD)
    }
}

impl SemanticClassifier {
    pub fn new(threshold: f64) -> Self {
        Self {
            threshold,
            empty_token: crate::answer::NO_ANSWER.to_string(),
        }
    }

    pub fn with_empty_token(mut self, token: impl Into<String>) -> Self {
        self.empty_token = token.into();
        self
    }

    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    /// Whether `text` is the no-answer sentinel
    ///
    /// A whitespace sentinel also matches any whitespace-only text, including
    /// the empty string.
    pub fn is_no_answer(&self, text: &str) -> bool {
        if self.empty_token.trim().is_empty() {
            text.trim().is_empty()
        } else {
            text == self.empty_token
        }
    }

    /// Classify one pair, reading embeddings from a primed cache
    ///
    /// A missing or failed embedding gives similarity 0.
    pub fn classify(&self, generated: &str, ground_truth: &str, cache: &EmbeddingCache) -> Classification {
        let truth_empty = self.is_no_answer(ground_truth);
        let gen_empty = self.is_no_answer(generated);

        let (outcome, similarity) = match (truth_empty, gen_empty) {
            (true, true) => (ConfusionOutcome::TrueNegative, 1.0),
            (true, false) => (ConfusionOutcome::FalsePositive, 0.0),
            (false, true) => (ConfusionOutcome::FalseNegative, 0.0),
            (false, false) => {
                let similarity = cache.similarity(generated, ground_truth).unwrap_or(0.0);
                if similarity >= self.threshold {
                    (ConfusionOutcome::TruePositive, similarity)
                } else {
                    (ConfusionOutcome::FalseNegative, similarity)
                }
            }
        };

        Classification { outcome, similarity }
    }

    /// Texts that need an embedding to classify the given pairs
    ///
    /// Only pairs with an answer on both sides are compared by embedding.
    pub fn texts_to_embed<S: AsRef<str>>(&self, generated: &[S], ground_truth: &[S]) -> Vec<String> {
        generated
            .iter()
            .zip(ground_truth.iter())
            .filter(|(g, t)| !self.is_no_answer(g.as_ref()) && !self.is_no_answer(t.as_ref()))
            .flat_map(|(g, t)| [g.as_ref().trim().to_string(), t.as_ref().trim().to_string()])
            .collect()
    }

    /// Classify every pair of a primed batch
    pub fn classify_batch<S: AsRef<str>>(
        &self,
        generated: &[S],
        ground_truth: &[S],
        cache: &EmbeddingCache,
    ) -> Result<Vec<Classification>> {
        ensure_same_length(generated.len(), ground_truth.len())?;
        Ok(generated
            .iter()
            .zip(ground_truth.iter())
            .map(|(g, t)| self.classify(g.as_ref(), t.as_ref(), cache))
            .collect())
    }

    /// Aggregate metrics over a primed batch
    pub fn evaluate<S: AsRef<str>>(
        &self,
        generated: &[S],
        ground_truth: &[S],
        cache: &EmbeddingCache,
    ) -> Result<SimilarityMetrics> {
        let classifications = self.classify_batch(generated, ground_truth, cache)?;

        let mut counts = ConfusionCounts::default();
        let mut similarity_sum = 0.0;
        for c in &classifications {
            counts.record(c.outcome);
            similarity_sum += c.similarity;
        }

        Ok(SimilarityMetrics::from_counts(self.threshold, counts, similarity_sum))
    }
}

fn ensure_same_length(generated: usize, ground_truth: usize) -> Result<()> {
    if generated != ground_truth {
        anyhow::bail!(
            "Generated answers ({}) and ground truths ({}) must have the same length",
            generated,
            ground_truth
        );
    }
    Ok(())
}

/// Prime the cache for a batch and compute its semantic metrics
pub async fn calculate_semantic_metrics<S: AsRef<str>>(
    generated: &[S],
    ground_truth: &[S],
    embedder: &Arc<dyn Embedder>,
    cache: &mut EmbeddingCache,
    classifier: &SemanticClassifier,
) -> Result<SimilarityMetrics> {
    ensure_same_length(generated.len(), ground_truth.len())?;

    let texts = classifier.texts_to_embed(generated, ground_truth);
    let stats = cache.prime(embedder, &texts).await?;
    if stats.failed > 0 {
        tracing::warn!("{} of {} texts failed to embed", stats.failed, stats.requested);
    }

    classifier.evaluate(generated, ground_truth, cache)
}

/// Recompute metrics at several thresholds from an already primed cache
pub fn analyze_thresholds<S: AsRef<str>>(
    generated: &[S],
    ground_truth: &[S],
    cache: &EmbeddingCache,
    classifier: &SemanticClassifier,
    thresholds: &[f64],
) -> Result<Vec<SimilarityMetrics>> {
    thresholds
        .iter()
        .map(|&t| {
            classifier
                .clone()
                .with_threshold(t)
                .evaluate(generated, ground_truth, cache)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::Embedding;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Fixed vectors per text, counting how often each text is embedded
    #[derive(Default)]
    struct TableEmbedder {
        vectors: HashMap<String, Embedding>,
        calls: Mutex<HashMap<String, usize>>,
    }

    impl TableEmbedder {
        fn with(mut self, text: &str, vector: Embedding) -> Self {
            self.vectors.insert(text.to_string(), vector);
            self
        }

        fn calls(&self, text: &str) -> usize {
            self.calls.lock().unwrap().get(text).copied().unwrap_or(0)
        }
    }

    #[async_trait]
    impl Embedder for TableEmbedder {
        async fn embed(&self, text: &str) -> anyhow::Result<Embedding> {
            *self.calls.lock().unwrap().entry(text.to_string()).or_insert(0) += 1;
            Ok(self.vectors.get(text).cloned().unwrap_or_else(|| vec![1.0, 0.0]))
        }

        async fn embed_batch(&self, texts: &[String]) -> anyhow::Result<Vec<Option<Embedding>>> {
            let mut out = Vec::with_capacity(texts.len());
            for text in texts {
                out.push(Some(self.embed(text).await?));
            }
            Ok(out)
        }

        fn dimension(&self) -> usize {
            2
        }

        fn model_name(&self) -> &str {
            "table"
        }
    }

    /// Unit vector at angle `acos(cos)` from [1, 0]
    fn at_cosine(cos: f32) -> Embedding {
        vec![cos, (1.0 - cos * cos).sqrt()]
    }

    #[test]
    fn test_sentinel_cases() {
        let classifier = SemanticClassifier::default();
        let cache = EmbeddingCache::default();

        let tn = classifier.classify(" ", " ", &cache);
        assert_eq!(tn, Classification { outcome: ConfusionOutcome::TrueNegative, similarity: 1.0 });

        let fp = classifier.classify("Paris", " ", &cache);
        assert_eq!(fp, Classification { outcome: ConfusionOutcome::FalsePositive, similarity: 0.0 });

        let fn_ = classifier.classify(" ", "42", &cache);
        assert_eq!(fn_, Classification { outcome: ConfusionOutcome::FalseNegative, similarity: 0.0 });
    }

    #[test]
    fn test_whitespace_only_text_is_no_answer() {
        let classifier = SemanticClassifier::default();
        assert!(classifier.is_no_answer(" "));
        assert!(classifier.is_no_answer(""));
        assert!(classifier.is_no_answer(" \n"));
        assert!(!classifier.is_no_answer("x"));

        let custom = SemanticClassifier::default().with_empty_token("N/A");
        assert!(custom.is_no_answer("N/A"));
        assert!(!custom.is_no_answer(" "));
    }

    #[test]
    fn test_unembedded_pair_is_a_miss() {
        let classifier = SemanticClassifier::default();
        let cache = EmbeddingCache::default();
        let c = classifier.classify("Paris", "Paris", &cache);
        assert_eq!(c.outcome, ConfusionOutcome::FalseNegative);
        assert_eq!(c.similarity, 0.0);
    }

    #[tokio::test]
    async fn test_identical_answers_are_true_positive() {
        let embedder: Arc<dyn Embedder> = Arc::new(TableEmbedder::default());
        let mut cache = EmbeddingCache::default();
        let classifier = SemanticClassifier::default();

        let metrics = calculate_semantic_metrics(&["Paris"], &["Paris"], &embedder, &mut cache, &classifier)
            .await
            .unwrap();

        assert_eq!(metrics.counts.true_positives, 1);
        assert!((metrics.average_similarity - 1.0).abs() < 1e-6);
        assert_eq!(metrics.precision, 1.0);
        assert_eq!(metrics.recall, 1.0);
        assert_eq!(metrics.accuracy, 1.0);
    }

    #[tokio::test]
    async fn test_fixed_cosine_below_threshold_is_false_negative() {
        let table = TableEmbedder::default()
            .with("may 7, 2023", vec![1.0, 0.0])
            .with("last tuesday", at_cosine(0.78));
        let embedder: Arc<dyn Embedder> = Arc::new(table);
        let mut cache = EmbeddingCache::default();
        let classifier = SemanticClassifier::new(0.85);

        // Cache keys are the trimmed texts as given
        let generated = ["last tuesday"];
        let truth = ["may 7, 2023"];
        let metrics = calculate_semantic_metrics(&generated, &truth, &embedder, &mut cache, &classifier)
            .await
            .unwrap();

        assert_eq!(metrics.counts.false_negatives, 1);
        assert!((metrics.average_similarity - 0.78).abs() < 1e-4);
        assert_eq!(metrics.precision, 0.0);
        assert_eq!(metrics.f1, 0.0);
    }

    #[tokio::test]
    async fn test_counts_cover_every_pair_and_cache_dedupes() {
        let table = Arc::new(TableEmbedder::default().with("wrong", vec![0.0, 1.0]));
        let embedder: Arc<dyn Embedder> = table.clone();
        let mut cache = EmbeddingCache::new(3, 2);
        let classifier = SemanticClassifier::default();

        let generated = ["Paris", "Paris", " ", "Paris", "wrong", " ", "Paris"];
        let truth = ["Paris", "Paris", "42", " ", "Paris", " ", "Paris"];

        let metrics = calculate_semantic_metrics(&generated, &truth, &embedder, &mut cache, &classifier)
            .await
            .unwrap();

        let counts = metrics.counts;
        assert_eq!(counts.total(), generated.len());
        assert_eq!(counts.true_positives, 3);
        assert_eq!(counts.false_negatives, 2);
        assert_eq!(counts.false_positives, 1);
        assert_eq!(counts.true_negatives, 1);

        assert_eq!(table.calls("Paris"), 1);
        assert_eq!(table.calls("wrong"), 1);
        assert_eq!(table.calls("42"), 0);

        // (3 * 1.0 + 0 + 0 + 0 + 1.0) / 7
        assert!((metrics.average_similarity - 4.0 / 7.0).abs() < 1e-6);
        assert!((metrics.precision - 0.75).abs() < 1e-12);
        assert!((metrics.recall - 0.6).abs() < 1e-12);
        assert!((metrics.accuracy - 4.0 / 7.0).abs() < 1e-12);
    }

    #[test]
    fn test_length_mismatch_is_an_error() {
        let classifier = SemanticClassifier::default();
        let cache = EmbeddingCache::default();
        assert!(classifier.evaluate(&["a", "b"], &["a"], &cache).is_err());
    }

    #[test]
    fn test_empty_batch() {
        let classifier = SemanticClassifier::default();
        let cache = EmbeddingCache::default();
        let empty: [&str; 0] = [];
        let metrics = classifier.evaluate(&empty, &empty, &cache).unwrap();
        assert_eq!(metrics.counts.total(), 0);
        assert_eq!(metrics.accuracy, 0.0);
        assert_eq!(metrics.average_similarity, 0.0);
    }

    #[tokio::test]
    async fn test_threshold_sweep_reuses_cache() {
        let table = Arc::new(
            TableEmbedder::default()
                .with("a", vec![1.0, 0.0])
                .with("b", at_cosine(0.82)),
        );
        let embedder: Arc<dyn Embedder> = table.clone();
        let mut cache = EmbeddingCache::default();
        let classifier = SemanticClassifier::default();

        let generated = ["b"];
        let truth = ["a"];
        cache
            .prime(&embedder, classifier.texts_to_embed(&generated, &truth))
            .await
            .unwrap();

        let rows = analyze_thresholds(&generated, &truth, &cache, &classifier, &SWEEP_THRESHOLDS).unwrap();
        assert_eq!(rows.len(), 5);
        assert_eq!(rows[0].counts.true_positives, 1); // 0.7
        assert_eq!(rows[1].counts.true_positives, 1); // 0.8
        assert_eq!(rows[2].counts.true_positives, 0); // 0.85
        assert_eq!(table.calls("a"), 1);
    }
}
