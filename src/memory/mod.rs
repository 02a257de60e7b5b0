//! Memory/search service client
//!
//! The evaluator only needs two calls: `search` (ranked chunks for a query)
//! and `add` (ingest one memory). Both go through the [`MemoryClient`] trait so
//! the pipelines can run against scripted clients in tests.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;

/// Body of `POST /search`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchRequest {
    pub q: String,
    pub limit: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<Map<String, Value>>,
}

impl SearchRequest {
    pub fn new(q: impl Into<String>, limit: usize) -> Self {
        Self {
            q: q.into(),
            limit,
            filter: None,
        }
    }

    /// Add one equality filter on a metadata field
    pub fn with_filter(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter
            .get_or_insert_with(Map::new)
            .insert(key.into(), value.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchChunk {
    pub content: String,
    #[serde(default, rename = "isRelevant", skip_serializing_if = "Option::is_none")]
    pub is_relevant: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
}

/// One ranked hit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    #[serde(default, rename = "documentId", skip_serializing_if = "Option::is_none")]
    pub document_id: Option<String>,
    #[serde(default)]
    pub chunks: Vec<SearchChunk>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

impl SearchResult {
    /// Source document id from `metadata.doc_id` (string or number)
    pub fn doc_id(&self) -> Option<String> {
        match self.metadata.as_ref()?.get("doc_id")? {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    /// Content of the best chunk
    pub fn first_chunk(&self) -> Option<&str> {
        self.chunks.first().map(|c| c.content.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchResponse {
    #[serde(default)]
    pub results: Vec<SearchResult>,
    #[serde(default)]
    pub total: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timing: Option<f64>,
}

impl SearchResponse {
    /// First chunk of every result, in rank order
    pub fn context_passages(&self) -> Vec<String> {
        self.results
            .iter()
            .filter_map(SearchResult::first_chunk)
            .map(str::to_string)
            .collect()
    }
}

/// Body of `POST /add`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddMemoryRequest {
    pub content: String,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddMemoryResponse {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub status: String,
}

/// Trait for memory services
#[async_trait]
pub trait MemoryClient: Send + Sync {
    async fn search(&self, request: &SearchRequest) -> Result<SearchResponse>;

    async fn add(&self, request: &AddMemoryRequest) -> Result<AddMemoryResponse>;
}

/// HTTP client for the Supermemory API
pub struct SupermemoryClient {
    http: Client,
    base_url: String,
    api_key: String,
}

impl SupermemoryClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>, timeout_secs: u64) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        })
    }

    async fn post<B, R>(&self, path: &str, body: &B) -> Result<R>
    where
        B: Serialize + Sync,
        R: serde::de::DeserializeOwned,
    {
        let url = format!("{}/{}", self.base_url, path);
        let response = self
            .http
            .post(&url)
            .header("x-api-key", self.api_key.as_str())
            .json(body)
            .send()
            .await
            .with_context(|| format!("Request to {} failed", url))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            anyhow::bail!("Memory API {} returned {}: {}", path, status, text);
        }

        response
            .json()
            .await
            .with_context(|| format!("Failed to parse response from {}", url))
    }
}

#[async_trait]
impl MemoryClient for SupermemoryClient {
    async fn search(&self, request: &SearchRequest) -> Result<SearchResponse> {
        self.post("search", request).await
    }

    async fn add(&self, request: &AddMemoryRequest) -> Result<AddMemoryResponse> {
        self.post("add", request).await
    }
}
