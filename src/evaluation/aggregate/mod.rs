//! Per-category roll-up of per-question scores
//!
//! Accumulators hold sums only. Division happens once, when the aggregator is
//! consumed by [`CategoryAggregator::finish`], and the Overall row divides the
//! summed raw fields of every category by the summed question counts. That
//! makes Overall a question-weighted average, not a mean of category means.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::data::Category;
use crate::evaluation::generation::AnswerScores;
use crate::evaluation::semantic::{ConfusionCounts, ConfusionOutcome};

/// Three-way grade of one answer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AnswerGrade {
    Correct,
    Partial,
    Incorrect,
}

impl std::fmt::Display for AnswerGrade {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Correct => "CORRECT",
            Self::Partial => "PARTIAL",
            Self::Incorrect => "INCORRECT",
        };
        write!(f, "{}", label)
    }
}

/// Cut-offs for lexical and semantic grades
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GradeThresholds {
    /// F1 strictly above this is correct
    pub lexical_correct: f64,
    /// F1 strictly above this (and not correct) is partial
    pub lexical_partial: f64,
    /// Similarity at or above this is correct
    pub semantic_correct: f64,
    /// Similarity at or above this (and not correct) is partial
    pub semantic_partial: f64,
}

impl Default for GradeThresholds {
    fn default() -> Self {
        Self {
            lexical_correct: 0.8,
            lexical_partial: 0.3,
            semantic_correct: 0.85,
            semantic_partial: 0.70,
        }
    }
}

impl GradeThresholds {
    pub fn lexical_grade(&self, f1: f64) -> AnswerGrade {
        if f1 > self.lexical_correct {
            AnswerGrade::Correct
        } else if f1 > self.lexical_partial {
            AnswerGrade::Partial
        } else {
            AnswerGrade::Incorrect
        }
    }

    pub fn semantic_grade(&self, exact_match: bool, similarity: f64) -> AnswerGrade {
        if exact_match || similarity >= self.semantic_correct {
            AnswerGrade::Correct
        } else if similarity >= self.semantic_partial {
            AnswerGrade::Partial
        } else {
            AnswerGrade::Incorrect
        }
    }
}

/// Semantic part of a question's score
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SemanticScore {
    pub similarity: f64,
    pub exact_match: bool,
    pub outcome: ConfusionOutcome,
}

/// Everything the aggregator needs to know about one question
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QuestionScore {
    pub category: Category,
    pub lexical: AnswerScores,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub semantic: Option<SemanticScore>,
}

/// Summed semantic fields; `questions` counts only semantically scored questions
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SemanticTotals {
    pub questions: usize,
    pub correct: usize,
    pub partial: usize,
    pub incorrect: usize,
    pub similarity_sum: f64,
    pub counts: ConfusionCounts,
}

impl SemanticTotals {
    fn merge(&mut self, other: &Self) {
        self.questions += other.questions;
        self.correct += other.correct;
        self.partial += other.partial;
        self.incorrect += other.incorrect;
        self.similarity_sum += other.similarity_sum;
        self.counts.true_positives += other.counts.true_positives;
        self.counts.false_positives += other.counts.false_positives;
        self.counts.true_negatives += other.counts.true_negatives;
        self.counts.false_negatives += other.counts.false_negatives;
    }

    fn finalize(&self) -> SemanticCategoryMetrics {
        let n = self.questions as f64;
        let rate = |count: usize| if self.questions == 0 { 0.0 } else { count as f64 / n };

        SemanticCategoryMetrics {
            questions: self.questions,
            correct_rate: rate(self.correct),
            partial_rate: rate(self.partial),
            incorrect_rate: rate(self.incorrect),
            average_similarity: if self.questions == 0 {
                0.0
            } else {
                self.similarity_sum / n
            },
            precision: self.counts.precision(),
            recall: self.counts.recall(),
            f1: self.counts.f1(),
            accuracy: self.counts.accuracy(),
        }
    }
}

/// Running sums for one category
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CategoryTotals {
    pub total_questions: usize,
    pub correct: usize,
    pub partial: usize,
    pub incorrect: usize,
    pub f1_sum: f64,
    pub precision_sum: f64,
    pub recall_sum: f64,
    pub bleu1_sum: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub semantic: Option<SemanticTotals>,
}

impl CategoryTotals {
    fn record(&mut self, score: &QuestionScore, thresholds: &GradeThresholds) {
        self.total_questions += 1;
        self.f1_sum += score.lexical.f1;
        self.precision_sum += score.lexical.precision;
        self.recall_sum += score.lexical.recall;
        self.bleu1_sum += score.lexical.bleu1;

        match thresholds.lexical_grade(score.lexical.f1) {
            AnswerGrade::Correct => self.correct += 1,
            AnswerGrade::Partial => self.partial += 1,
            AnswerGrade::Incorrect => self.incorrect += 1,
        }

        if let Some(sem) = &score.semantic {
            let totals = self.semantic.get_or_insert_with(SemanticTotals::default);
            totals.questions += 1;
            totals.similarity_sum += sem.similarity;
            totals.counts.record(sem.outcome);
            match thresholds.semantic_grade(sem.exact_match, sem.similarity) {
                AnswerGrade::Correct => totals.correct += 1,
                AnswerGrade::Partial => totals.partial += 1,
                AnswerGrade::Incorrect => totals.incorrect += 1,
            }
        }
    }

    fn merge(&mut self, other: &Self) {
        self.total_questions += other.total_questions;
        self.correct += other.correct;
        self.partial += other.partial;
        self.incorrect += other.incorrect;
        self.f1_sum += other.f1_sum;
        self.precision_sum += other.precision_sum;
        self.recall_sum += other.recall_sum;
        self.bleu1_sum += other.bleu1_sum;

        if let Some(other_sem) = &other.semantic {
            self.semantic
                .get_or_insert_with(SemanticTotals::default)
                .merge(other_sem);
        }
    }

    fn finalize(&self, name: &str) -> CategoryMetrics {
        let n = self.total_questions as f64;
        let avg = |sum: f64| if self.total_questions == 0 { 0.0 } else { sum / n };
        let rate = |count: usize| avg(count as f64);

        CategoryMetrics {
            name: name.to_string(),
            total_questions: self.total_questions,
            f1: avg(self.f1_sum),
            bleu1: avg(self.bleu1_sum),
            precision: avg(self.precision_sum),
            recall: avg(self.recall_sum),
            correct_rate: rate(self.correct),
            partial_rate: rate(self.partial),
            incorrect_rate: rate(self.incorrect),
            semantic: self.semantic.as_ref().map(SemanticTotals::finalize),
        }
    }
}

/// Finalized semantic metrics of a category
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SemanticCategoryMetrics {
    pub questions: usize,
    pub correct_rate: f64,
    pub partial_rate: f64,
    pub incorrect_rate: f64,
    pub average_similarity: f64,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub accuracy: f64,
}

/// Finalized metrics of a category (or of the Overall row)
///
/// Every field is an average or a fraction in [0, 1].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryMetrics {
    pub name: String,
    pub total_questions: usize,
    pub f1: f64,
    pub bleu1: f64,
    pub precision: f64,
    pub recall: f64,
    pub correct_rate: f64,
    pub partial_rate: f64,
    pub incorrect_rate: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub semantic: Option<SemanticCategoryMetrics>,
}

/// Finalized report: one row per observed category, plus Overall
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationReport {
    pub categories: Vec<CategoryMetrics>,
    pub overall: CategoryMetrics,
}

/// Accumulates question scores by category
#[derive(Debug, Clone, Default)]
pub struct CategoryAggregator {
    thresholds: GradeThresholds,
    totals: BTreeMap<Category, CategoryTotals>,
}

impl CategoryAggregator {
    pub fn new(thresholds: GradeThresholds) -> Self {
        Self {
            thresholds,
            totals: BTreeMap::new(),
        }
    }

    pub fn thresholds(&self) -> &GradeThresholds {
        &self.thresholds
    }

    /// Add one question's scores to its category
    pub fn record(&mut self, score: &QuestionScore) {
        self.totals
            .entry(score.category)
            .or_default()
            .record(score, &self.thresholds);
    }

    /// Raw sums of one category
    pub fn totals(&self, category: Category) -> Option<&CategoryTotals> {
        self.totals.get(&category)
    }

    pub fn total_questions(&self) -> usize {
        self.totals.values().map(|t| t.total_questions).sum()
    }

    /// Finalize every category and the weighted Overall row
    pub fn finish(self) -> EvaluationReport {
        let mut overall = CategoryTotals::default();
        for totals in self.totals.values() {
            overall.merge(totals);
        }

        EvaluationReport {
            categories: self
                .totals
                .iter()
                .map(|(category, totals)| totals.finalize(category.name()))
                .collect(),
            overall: overall.finalize("Overall"),
        }
    }
}
