//! OpenAI-compatible `/embeddings` backend

use crate::embedding::{Embedder, Embedding, EmbeddingConfig};
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Base URL, key and timeout of an OpenAI-compatible API
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiEndpoint {
    pub base_url: String,
    pub api_key: String,
    pub timeout_secs: u64,
}

impl ApiEndpoint {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>, timeout_secs: u64) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            timeout_secs,
        }
    }

    /// Join a path onto the base URL
    pub fn url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    /// Build an HTTP client carrying this endpoint's request timeout
    pub fn client(&self) -> Result<Client> {
        Client::builder()
            .timeout(Duration::from_secs(self.timeout_secs))
            .build()
            .context("Failed to build HTTP client")
    }
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Embedding,
    index: usize,
}

/// Embedder backed by an OpenAI-compatible embeddings endpoint
pub struct OpenAIEmbedder {
    http: Client,
    endpoint: ApiEndpoint,
    config: EmbeddingConfig,
}

impl OpenAIEmbedder {
    pub fn new(endpoint: ApiEndpoint, config: EmbeddingConfig) -> Result<Self> {
        let http = endpoint.client()?;
        Ok(Self {
            http,
            endpoint,
            config,
        })
    }

    /// Send one request for `texts`, returning vectors in input order
    async fn request(&self, texts: &[String]) -> Result<Vec<Embedding>> {
        let body = serde_json::json!({
            "model": self.config.model_name,
            "input": texts,
        });

        let response = self
            .http
            .post(self.endpoint.url("embeddings"))
            .header("Authorization", format!("Bearer {}", self.endpoint.api_key))
            .json(&body)
            .send()
            .await
            .context("Embedding request failed")?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            anyhow::bail!("Embedding API returned {}: {}", status, text);
        }

        let parsed: EmbeddingResponse = response
            .json()
            .await
            .context("Failed to parse embedding response")?;

        let mut ordered: Vec<Option<Embedding>> = vec![None; texts.len()];
        for item in parsed.data {
            if let Some(slot) = ordered.get_mut(item.index) {
                *slot = Some(item.embedding);
            }
        }

        ordered
            .into_iter()
            .enumerate()
            .map(|(i, e)| e.with_context(|| format!("Embedding response is missing index {}", i)))
            .collect()
    }
}

#[async_trait]
impl Embedder for OpenAIEmbedder {
    async fn embed(&self, text: &str) -> Result<Embedding> {
        let mut embeddings = self.request(&[text.to_string()]).await?;
        embeddings
            .pop()
            .context("Embedding response was empty")
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Option<Embedding>>> {
        let batch_size = self.config.batch_size.max(1);
        let mut out = Vec::with_capacity(texts.len());

        for chunk in texts.chunks(batch_size) {
            match self.request(chunk).await {
                Ok(embeddings) => out.extend(embeddings.into_iter().map(Some)),
                Err(e) => {
                    tracing::warn!("Embedding batch of {} texts failed: {:#}", chunk.len(), e);
                    out.extend(std::iter::repeat(None).take(chunk.len()));
                }
            }
        }

        Ok(out)
    }

    fn dimension(&self) -> usize {
        0
    }

    fn model_name(&self) -> &str {
        &self.config.model_name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_url_join() {
        let endpoint = ApiEndpoint::new("https://api.openai.com/v1/", "key", 60);
        assert_eq!(endpoint.url("/embeddings"), "https://api.openai.com/v1/embeddings");
        assert_eq!(endpoint.url("chat/completions"), "https://api.openai.com/v1/chat/completions");
    }

    #[tokio::test]
    async fn test_unreachable_batch_degrades_to_none() {
        // Port 9 on loopback refuses connections
        let endpoint = ApiEndpoint::new("http://127.0.0.1:9", "key", 2);
        let config = EmbeddingConfig {
            batch_size: 2,
            ..Default::default()
        };
        let embedder = OpenAIEmbedder::new(endpoint, config).unwrap();

        let texts: Vec<String> = vec!["a", "b", "c"].into_iter().map(String::from).collect();
        let out = embedder.embed_batch(&texts).await.unwrap();
        assert_eq!(out, vec![None, None, None]);
    }
}
