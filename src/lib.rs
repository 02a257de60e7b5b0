//! # memeval
//!
//! Evaluation harness for memory/search services.
//!
//! ## Overview
//!
//! memeval queries a memory service with benchmark questions, generates
//! answers from the retrieved context, and scores them against ground truth:
//!
//! - Token overlap precision/recall/F1 with fuzzy token matching
//! - BLEU-1
//! - Embedding-based semantic classification against a no-answer sentinel
//! - Per-category and weighted overall reports (console and CSV)
//! - BEIR retrieval metrics (NDCG, MAP, Recall, Precision at cutoffs)
//!
//! ## Architecture
//!
//! - `data` - LoCoMo and BEIR dataset loaders
//! - `memory` - Memory service client
//! - `answer` - Answer generation from retrieved context
//! - `embedding` - Embedders and the run-scoped embedding cache
//! - `evaluation` - Answer scoring, aggregation, reporting and retrieval metrics
//! - `pipeline` - QA and BEIR runners
//! - `config` - Evaluation configuration
//! - `cli` - Command-line interface
//! - `utils` - Common utilities

// Core modules
pub mod answer;
pub mod config;
pub mod data;
pub mod embedding;
pub mod evaluation;
pub mod memory;
pub mod pipeline;

// Outer surface
pub mod cli;
pub mod utils;

// Re-export commonly used types
pub use anyhow::{Error, Result};
