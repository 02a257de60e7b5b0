//! BEIR search and ingestion runners

use anyhow::{Context, Result};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::task::JoinSet;

use super::ingest::{add_in_batches, IngestStats};
use crate::data::{BeirCorpus, BeirDocument, BeirQuery};
use crate::evaluation::retrieval::{run_entry_from_results, Run, RunFile};
use crate::memory::{AddMemoryRequest, MemoryClient, SearchRequest};

/// Searches every query and collects a run
pub struct BeirSearchRunner {
    memory: Arc<dyn MemoryClient>,
    search_limit: usize,
    max_concurrency: usize,
}

impl BeirSearchRunner {
    pub fn new(memory: Arc<dyn MemoryClient>, search_limit: usize, max_concurrency: usize) -> Self {
        Self {
            memory,
            search_limit,
            max_concurrency: max_concurrency.max(1),
        }
    }

    /// Search every query
    ///
    /// Failed searches are logged and left out of the run.
    pub async fn search(&self, queries: &BTreeMap<String, BeirQuery>) -> Result<Run> {
        let mut run = Run::new();
        let mut pending = queries.values();
        let mut join_set = JoinSet::new();
        let mut failed = 0;

        loop {
            while join_set.len() < self.max_concurrency {
                let Some(query) = pending.next() else { break };
                let memory = Arc::clone(&self.memory);
                let request = SearchRequest::new(query.text.as_str(), self.search_limit);
                let query_id = query.id.clone();
                join_set.spawn(async move {
                    let result = memory.search(&request).await;
                    (query_id, result)
                });
            }

            let Some(joined) = join_set.join_next().await else {
                break;
            };
            let (query_id, result) = joined.context("Search task panicked")?;

            match result {
                Ok(response) => {
                    run.insert(query_id, run_entry_from_results(&response.results));
                }
                Err(e) => {
                    failed += 1;
                    tracing::warn!("Search failed for query {}: {:#}", query_id, e);
                }
            }

            let done = run.len() + failed;
            if done % 50 == 0 {
                tracing::info!("Searched {}/{} queries", done, queries.len());
            }
        }

        tracing::info!(
            "Search complete: {} succeeded, {} failed",
            run.len(),
            failed
        );
        Ok(run)
    }

    /// Search every query and package the run for saving
    pub async fn search_to_file(
        &self,
        dataset: &str,
        queries: &BTreeMap<String, BeirQuery>,
    ) -> Result<RunFile> {
        let results = self.search(queries).await?;
        Ok(RunFile {
            dataset: dataset.to_string(),
            timestamp: crate::utils::now_rfc3339(),
            successful_query_count: results.len(),
            query_count: queries.len(),
            results,
        })
    }
}

/// Memory request for one corpus document
pub fn memory_request(doc: &BeirDocument) -> AddMemoryRequest {
    let mut metadata = Map::new();
    metadata.insert("source".to_string(), Value::from("beir"));
    metadata.insert("doc_id".to_string(), Value::from(doc.id.as_str()));
    if let Some(title) = doc.title.as_deref().filter(|t| !t.trim().is_empty()) {
        metadata.insert("title".to_string(), Value::from(title));
    }

    AddMemoryRequest {
        content: doc.content(),
        metadata,
    }
}

/// Push a corpus into the memory service
///
/// Documents go out in batches of `batch_size`, each batch fully concurrent.
/// `limit` caps how many documents are sent.
pub async fn ingest_corpus(
    memory: Arc<dyn MemoryClient>,
    corpus: &BeirCorpus,
    batch_size: usize,
    limit: Option<usize>,
) -> Result<IngestStats> {
    let requests = corpus
        .values()
        .take(limit.unwrap_or(usize::MAX))
        .map(|doc| (doc.id.clone(), memory_request(doc)))
        .collect();
    add_in_batches(memory, requests, batch_size, "documents").await
}
