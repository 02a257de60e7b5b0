//! Evaluation metrics
//!
//! Answer scoring (lexical overlap, BLEU-1, semantic similarity), per-category
//! aggregation and reporting, and BEIR-style retrieval metrics.

pub mod aggregate;
pub mod generation;
pub mod report;
pub mod retrieval;
pub mod semantic;

// Re-exports
pub use aggregate::{AnswerGrade, CategoryAggregator, EvaluationReport, GradeThresholds, QuestionScore};
pub use generation::AnswerScores;
pub use retrieval::{BeirMetrics, CutoffMetric, Qrels, Run};
pub use semantic::{ConfusionOutcome, SemanticClassifier, SimilarityMetrics};
