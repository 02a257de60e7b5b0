//! Benchmark datasets
//!
//! Loaders for the two benchmarks the evaluator runs against:
//! - LoCoMo conversational QA (questions grouped by conversation, with a
//!   question category)
//! - BEIR retrieval (corpus, queries and relevance judgments)

pub mod beir;
pub mod locomo;

// Re-exports for convenience
pub use beir::{load_corpus, load_qrels, load_queries, BeirCorpus, BeirDataset, BeirDocument, BeirQuery};
pub use locomo::{load_locomo, load_transcripts, Category, Conversation, DialogTurn, QaItem, Transcript};
