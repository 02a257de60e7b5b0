//! Answer-quality metrics for generated text
//!
//! Provides the per-pair lexical metrics used to score a generated answer
//! against its ground truth:
//! - Fuzzy token precision / recall (see [`lexical`])
//! - F1: harmonic mean of the two
//! - BLEU-1: clipped unigram precision with brevity penalty

use std::collections::HashMap;

use anyhow::Result;
use serde::{Deserialize, Serialize};

pub mod lexical;

pub use lexical::{lexical_match, MatchResult};

/// Lexical scores for one (generated, ground truth) pair
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct AnswerScores {
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub bleu1: f64,
}

impl AnswerScores {
    /// Compute all lexical metrics for a single pair
    ///
    /// `similarity_hint` feeds the adaptive fuzzy-match threshold.
    pub fn compute(generated: &str, ground_truth: &str, similarity_hint: f64) -> Self {
        let MatchResult { precision, recall } =
            lexical_match(generated, ground_truth, similarity_hint);

        Self {
            precision,
            recall,
            f1: f1_score(precision, recall),
            bleu1: bleu1(generated, ground_truth),
        }
    }

    /// Compute average scores over multiple pairs
    pub fn average(scores: &[Self]) -> Self {
        if scores.is_empty() {
            return Self::default();
        }

        let n = scores.len() as f64;

        Self {
            precision: scores.iter().map(|s| s.precision).sum::<f64>() / n,
            recall: scores.iter().map(|s| s.recall).sum::<f64>() / n,
            f1: scores.iter().map(|s| s.f1).sum::<f64>() / n,
            bleu1: scores.iter().map(|s| s.bleu1).sum::<f64>() / n,
        }
    }
}

impl std::fmt::Display for AnswerScores {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Answer Scores:")?;
        writeln!(f, "  Precision: {:.2}%", self.precision * 100.0)?;
        writeln!(f, "  Recall:    {:.2}%", self.recall * 100.0)?;
        writeln!(f, "  F1:        {:.2}%", self.f1 * 100.0)?;
        writeln!(f, "  BLEU-1:    {:.2}%", self.bleu1 * 100.0)?;
        Ok(())
    }
}

/// Normalize text for comparison (lowercase, collapse whitespace)
pub fn normalize_text(text: &str) -> String {
    text.to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Tokenize text into lowercase whitespace-separated words
pub fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split_whitespace()
        .map(|s| s.to_string())
        .collect()
}

/// Harmonic mean of precision and recall, 0 when both are 0
pub fn f1_score(precision: f64, recall: f64) -> f64 {
    if precision + recall == 0.0 {
        0.0
    } else {
        2.0 * precision * recall / (precision + recall)
    }
}

/// BLEU-1 of a generated text against a single reference
///
/// Clipped unigram precision times `exp(1 - |ref| / |gen|)` when the generated
/// text is shorter than the reference. Empty generated text scores 0.
pub fn bleu1(generated: &str, reference: &str) -> f64 {
    let gen_tokens = tokenize(generated);
    if gen_tokens.is_empty() {
        return 0.0;
    }
    let ref_tokens = tokenize(reference);

    let gen_counts = token_counts(&gen_tokens);
    let ref_counts = token_counts(&ref_tokens);

    let clipped: usize = gen_counts
        .iter()
        .map(|(token, &count)| count.min(ref_counts.get(token).copied().unwrap_or(0)))
        .sum();

    let precision = clipped as f64 / gen_tokens.len() as f64;
    precision * brevity_penalty(gen_tokens.len(), ref_tokens.len())
}

fn brevity_penalty(gen_len: usize, ref_len: usize) -> f64 {
    if gen_len >= ref_len {
        1.0
    } else {
        (1.0 - ref_len as f64 / gen_len as f64).exp()
    }
}

fn token_counts(tokens: &[String]) -> HashMap<&str, usize> {
    let mut counts = HashMap::new();
    for token in tokens {
        *counts.entry(token.as_str()).or_insert(0) += 1;
    }
    counts
}

/// Score a batch of generated answers against their ground truths
///
/// Hints are optional; a missing hint list uses 0 for every pair.
pub fn evaluate_answer_batch(
    generated: &[&str],
    ground_truth: &[&str],
    similarity_hints: Option<&[f64]>,
) -> Result<Vec<AnswerScores>> {
    if generated.len() != ground_truth.len() {
        anyhow::bail!(
            "Generated answers ({}) and ground truths ({}) must have the same length",
            generated.len(),
            ground_truth.len()
        );
    }
    if let Some(hints) = similarity_hints {
        if hints.len() != generated.len() {
            anyhow::bail!(
                "Similarity hints ({}) must match the number of answers ({})",
                hints.len(),
                generated.len()
            );
        }
    }

    Ok(generated
        .iter()
        .zip(ground_truth.iter())
        .enumerate()
        .map(|(i, (gen, truth))| {
            let hint = similarity_hints.map(|h| h[i]).unwrap_or(0.0);
            AnswerScores::compute(gen, truth, hint)
        })
        .collect())
}
