//! Run-scoped embedding cache
//!
//! Every text is embedded at most once per run. Callers prime the cache with
//! all the texts a scoring pass needs, then read it without touching the
//! network. Failed embeddings are remembered as failures so they are neither
//! retried nor mistaken for misses.

use crate::embedding::{cosine_similarity, Embedder, Embedding};
use anyhow::{Context, Result};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::task::JoinSet;

pub mod store;

pub use store::EmbeddingStore;

/// Outcome of one priming pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PrimeStats {
    /// Distinct, non-empty texts not already cached
    pub requested: usize,
    /// Texts served by the persistent store
    pub from_store: usize,
    /// Texts embedded by the embedder
    pub embedded: usize,
    /// Texts that failed to embed
    pub failed: usize,
}

/// Deduplicating text -> embedding cache
pub struct EmbeddingCache {
    entries: HashMap<String, Option<Embedding>>,
    store: Option<EmbeddingStore>,
    batch_size: usize,
    concurrency: usize,
}

impl Default for EmbeddingCache {
    fn default() -> Self {
        Self::new(100, 5)
    }
}

impl EmbeddingCache {
    /// Create an empty cache
    ///
    /// `batch_size` texts go into each embedder call and at most
    /// `concurrency` calls are in flight at once.
    pub fn new(batch_size: usize, concurrency: usize) -> Self {
        Self {
            entries: HashMap::new(),
            store: None,
            batch_size: batch_size.max(1),
            concurrency: concurrency.max(1),
        }
    }

    /// Back the cache with a persistent store
    pub fn with_store(mut self, store: EmbeddingStore) -> Self {
        self.store = Some(store);
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether the text (trimmed) has been looked up, successfully or not
    pub fn contains(&self, text: &str) -> bool {
        self.entries.contains_key(text.trim())
    }

    /// Embedding of a text (trimmed); `None` when missing or failed
    pub fn get(&self, text: &str) -> Option<&Embedding> {
        self.entries.get(text.trim()).and_then(Option::as_ref)
    }

    /// Whether the text (trimmed) was attempted and failed
    pub fn is_failed(&self, text: &str) -> bool {
        matches!(self.entries.get(text.trim()), Some(None))
    }

    /// Cosine similarity of two cached texts
    ///
    /// `None` when either side is empty after trimming, or has no embedding.
    pub fn similarity(&self, a: &str, b: &str) -> Option<f64> {
        let (a, b) = (a.trim(), b.trim());
        if a.is_empty() || b.is_empty() {
            return None;
        }
        Some(cosine_similarity(self.get(a)?, self.get(b)?))
    }

    /// Embed every text not yet cached
    ///
    /// Texts are trimmed and deduplicated; empty texts are skipped. A failed
    /// embedder call marks all of its texts as failed and never aborts the pass.
    pub async fn prime<I, S>(&mut self, embedder: &Arc<dyn Embedder>, texts: I) -> Result<PrimeStats>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut seen = HashSet::new();
        let pending: Vec<String> = texts
            .into_iter()
            .map(|t| t.as_ref().trim().to_string())
            .filter(|t| !t.is_empty() && !self.entries.contains_key(t))
            .filter(|t| seen.insert(t.clone()))
            .collect();

        let mut stats = PrimeStats {
            requested: pending.len(),
            ..Default::default()
        };
        if pending.is_empty() {
            return Ok(stats);
        }

        let pending = match &self.store {
            Some(store) => {
                let hits = store.get_many(&pending)?;
                stats.from_store = hits.len();
                let remaining = pending
                    .into_iter()
                    .filter(|t| !hits.contains_key(t))
                    .collect();
                self.entries
                    .extend(hits.into_iter().map(|(text, emb)| (text, Some(emb))));
                remaining
            }
            None => pending,
        };

        tracing::debug!(
            "Embedding {} texts ({} from store) in batches of {}",
            pending.len(),
            stats.from_store,
            self.batch_size
        );

        let mut chunks = pending
            .chunks(self.batch_size)
            .map(<[String]>::to_vec)
            .collect::<Vec<_>>()
            .into_iter();
        let mut join_set = JoinSet::new();
        let mut fresh: Vec<(String, Embedding)> = Vec::new();

        loop {
            while join_set.len() < self.concurrency {
                let Some(chunk) = chunks.next() else { break };
                let embedder = Arc::clone(embedder);
                join_set.spawn(async move {
                    let result = embedder.embed_batch(&chunk).await;
                    (chunk, result)
                });
            }

            let Some(joined) = join_set.join_next().await else {
                break;
            };
            let (chunk, result) = joined.context("Embedding task panicked")?;

            let embeddings = match result {
                Ok(embeddings) if embeddings.len() == chunk.len() => embeddings,
                Ok(embeddings) => {
                    tracing::warn!(
                        "Embedder returned {} vectors for {} texts, marking batch as failed",
                        embeddings.len(),
                        chunk.len()
                    );
                    vec![None; chunk.len()]
                }
                Err(e) => {
                    tracing::warn!("Embedding batch of {} texts failed: {:#}", chunk.len(), e);
                    vec![None; chunk.len()]
                }
            };

            for (text, embedding) in chunk.into_iter().zip(embeddings) {
                match &embedding {
                    Some(emb) => {
                        stats.embedded += 1;
                        fresh.push((text.clone(), emb.clone()));
                    }
                    None => stats.failed += 1,
                }
                self.entries.insert(text, embedding);
            }
        }

        if let Some(store) = self.store.as_mut() {
            if !fresh.is_empty() {
                let written = store
                    .put_many(fresh.iter().map(|(t, e)| (t.as_str(), e.as_slice())))
                    .context("Failed to persist embeddings")?;
                tracing::debug!("Persisted {} embeddings", written);
            }
        }

        Ok(stats)
    }
}
