//! Embedding backend implementations
//!
//! The OpenAI-compatible HTTP backend is the one used for real evaluation runs.
//! The token and mock backends are deterministic and work offline.

use crate::embedding::{normalize_embedding, Embedder, Embedding, EmbeddingConfig};
use anyhow::Result;
use async_trait::async_trait;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

pub mod openai;

pub use openai::{ApiEndpoint, OpenAIEmbedder};

/// Mock embedder for testing (generates random but deterministic embeddings)
pub struct MockEmbedder {
    config: EmbeddingConfig,
    dimension: usize,
}

impl MockEmbedder {
    /// Create a new mock embedder
    pub fn new(config: EmbeddingConfig, dimension: usize) -> Self {
        Self { config, dimension }
    }

    /// Generate a deterministic embedding based on text hash
    fn generate_embedding(&self, text: &str) -> Embedding {
        let mut hasher = DefaultHasher::new();
        text.hash(&mut hasher);
        let mut state = hasher.finish();

        let mut embedding: Embedding = (0..self.dimension)
            .map(|_| {
                state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
                ((state >> 33) % 10000) as f32 / 10000.0 - 0.5
            })
            .collect();

        if self.config.normalize {
            normalize_embedding(&mut embedding);
        }
        embedding
    }
}

#[async_trait]
impl Embedder for MockEmbedder {
    async fn embed(&self, text: &str) -> Result<Embedding> {
        Ok(self.generate_embedding(text))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Option<Embedding>>> {
        Ok(texts.iter().map(|text| Some(self.generate_embedding(text))).collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        &self.config.model_name
    }
}

/// Hashed bag-of-words embedder
///
/// Texts sharing words land close together, which makes it a usable offline
/// stand-in for a semantic model when comparing short answers.
pub struct TokenEmbedder {
    config: EmbeddingConfig,
    dimension: usize,
}

impl TokenEmbedder {
    /// Create a new token-based embedder
    pub fn new(config: EmbeddingConfig, dimension: usize) -> Self {
        Self { config, dimension }
    }

    fn generate_embedding(&self, text: &str) -> Embedding {
        let mut embedding = vec![0.0; self.dimension];

        let tokens: Vec<String> = text
            .split(|c: char| c.is_whitespace() || c.is_ascii_punctuation())
            .filter(|s| !s.is_empty())
            .map(str::to_lowercase)
            .collect();

        if tokens.is_empty() || self.dimension == 0 {
            return embedding;
        }

        for token in &tokens {
            let mut hasher = DefaultHasher::new();
            token.hash(&mut hasher);
            let idx = (hasher.finish() as usize) % self.dimension;
            embedding[idx] += 1.0;
        }

        let total = tokens.len() as f32;
        for val in embedding.iter_mut() {
            *val /= total;
        }

        if self.config.normalize {
            normalize_embedding(&mut embedding);
        }

        embedding
    }
}

#[async_trait]
impl Embedder for TokenEmbedder {
    async fn embed(&self, text: &str) -> Result<Embedding> {
        Ok(self.generate_embedding(text))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Option<Embedding>>> {
        Ok(texts.iter().map(|text| Some(self.generate_embedding(text))).collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        &self.config.model_name
    }
}

/// Create an embedder based on backend name
///
/// `api` is required for the `openai` backend and ignored otherwise.
pub fn create_embedder(
    backend: &str,
    config: EmbeddingConfig,
    dimension: usize,
    api: Option<ApiEndpoint>,
) -> Result<Arc<dyn Embedder>> {
    match backend {
        "mock" => Ok(Arc::new(MockEmbedder::new(config, dimension))),
        "token" => Ok(Arc::new(TokenEmbedder::new(config, dimension))),
        "openai" => {
            let Some(api) = api else {
                anyhow::bail!("OpenAI embedding backend requires an API key (set OPENAI_API_KEY)");
            };
            Ok(Arc::new(OpenAIEmbedder::new(api, config)?))
        }
        _ => {
            tracing::warn!("Unknown backend '{}', using token-based embedder", backend);
            Ok(Arc::new(TokenEmbedder::new(config, dimension)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::cosine_similarity;

    #[tokio::test]
    async fn test_mock_embedder() {
        let config = EmbeddingConfig {
            model_name: "test-model".to_string(),
            normalize: true,
            ..Default::default()
        };
        let embedder = MockEmbedder::new(config, 128);

        let emb = embedder.embed("Hello, world!").await.unwrap();
        assert_eq!(emb.len(), 128);

        // Should be deterministic
        let emb2 = embedder.embed("Hello, world!").await.unwrap();
        assert_eq!(emb, emb2);

        let emb3 = embedder.embed("Different text").await.unwrap();
        assert_ne!(emb, emb3);
    }

    #[tokio::test]
    async fn test_token_embedder_similarity() {
        let embedder = TokenEmbedder::new(EmbeddingConfig::default(), 256);

        let a = embedder.embed("The quick brown fox jumps over the lazy dog").await.unwrap();
        let b = embedder.embed("the quick brown fox").await.unwrap();
        assert_eq!(a.len(), 256);
        assert!(cosine_similarity(&a, &b) > 0.1);

        let same = embedder.embed("PARIS").await.unwrap();
        let same2 = embedder.embed("paris.").await.unwrap();
        assert!((cosine_similarity(&same, &same2) - 1.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_embedder_batch() {
        let embedder = MockEmbedder::new(EmbeddingConfig::default(), 64);

        let texts: Vec<String> = vec!["text1", "text2", "text3"]
            .into_iter()
            .map(String::from)
            .collect();
        let embeddings = embedder.embed_batch(&texts).await.unwrap();

        assert_eq!(embeddings.len(), 3);
        assert!(embeddings.iter().all(|e| e.as_ref().map(Vec::len) == Some(64)));
    }

    #[test]
    fn test_create_embedder() {
        let token = create_embedder("token", EmbeddingConfig::default(), 32, None).unwrap();
        assert_eq!(token.dimension(), 32);

        // Unknown backends fall back to the token embedder
        let fallback = create_embedder("nope", EmbeddingConfig::default(), 16, None).unwrap();
        assert_eq!(fallback.dimension(), 16);

        assert!(create_embedder("openai", EmbeddingConfig::default(), 0, None).is_err());
    }
}
