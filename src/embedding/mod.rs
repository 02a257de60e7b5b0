//! Embedding generation and caching
//!
//! Provides an async trait-based embedding interface with multiple backends
//! (OpenAI-compatible HTTP, token hashing, mock) plus a run-scoped
//! deduplicating cache and an optional persistent SQLite store.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub mod backends;
pub mod cache;

// Re-exports
pub use backends::*;
pub use cache::*;

/// Represents an embedding vector
pub type Embedding = Vec<f32>;

/// Configuration for embedding generation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Model name sent to the embedding service
    pub model_name: String,
    /// Whether to L2-normalize local embeddings
    pub normalize: bool,
    /// Texts per embedding request
    pub batch_size: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model_name: "text-embedding-3-small".to_string(),
            normalize: true,
            batch_size: 100,
        }
    }
}

/// Trait for embedding models
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed a single text
    async fn embed(&self, text: &str) -> Result<Embedding>;

    /// Embed multiple texts in one call
    ///
    /// The output is aligned with `texts`; `None` marks a text that failed to
    /// embed without failing its neighbours.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Option<Embedding>>>;

    /// Get the embedding dimension (0 when not known up front)
    fn dimension(&self) -> usize;

    /// Get the model name
    fn model_name(&self) -> &str;
}

/// Normalize an embedding vector (L2 normalization)
pub fn normalize_embedding(embedding: &mut Embedding) {
    let norm: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm > 0.0 {
        for val in embedding.iter_mut() {
            *val /= norm;
        }
    }
}

/// Cosine similarity between two embeddings
///
/// Not clamped: opposed vectors give negative values. Mismatched dimensions or
/// zero vectors give 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0_f64;
    let mut norm_a = 0.0_f64;
    let mut norm_b = 0.0_f64;
    for (&x, &y) in a.iter().zip(b.iter()) {
        let (x, y) = (x as f64, y as f64);
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a > 0.0 && norm_b > 0.0 {
        dot / (norm_a.sqrt() * norm_b.sqrt())
    } else {
        0.0
    }
}
