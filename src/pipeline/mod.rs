//! Evaluation pipelines
//!
//! Orchestrates the network-facing half of an evaluation: answering LoCoMo
//! questions through the memory service and a generator, searching BEIR
//! datasets, and ingesting either benchmark's source material.

pub mod beir;
pub mod ingest;
pub mod qa;

pub use beir::{ingest_corpus, BeirSearchRunner};
pub use ingest::{add_in_batches, ingest_transcripts, IngestStats, TranscriptIngestStats};
pub use qa::{
    evaluate_answers, AnswerScorer, GeneratedAnswer, QaConfig, QaDetailsFile, QaEvaluation, QaRunner,
    QuestionDetail, ScoringObserver, TracingObserver,
};
