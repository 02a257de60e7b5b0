//! Memory ingestion
//!
//! Both benchmarks load their source material the same way: build one
//! [`AddMemoryRequest`] per item and push them through
//! [`MemoryClient::add`] in concurrent batches.

use anyhow::{Context, Result};
use serde_json::{Map, Value};
use std::sync::Arc;
use tokio::task::JoinSet;

use crate::data::{DialogTurn, Transcript};
use crate::memory::{AddMemoryRequest, MemoryClient};

/// Outcome of an ingestion pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestStats {
    pub succeeded: usize,
    pub failed: usize,
}

impl IngestStats {
    pub fn total(&self) -> usize {
        self.succeeded + self.failed
    }

    pub fn merge(&mut self, other: IngestStats) {
        self.succeeded += other.succeeded;
        self.failed += other.failed;
    }
}

/// Add labelled requests in batches of `batch_size`
///
/// Each batch runs fully concurrent and finishes before the next starts.
/// A failed add is logged under its label and counted, never fatal.
pub async fn add_in_batches(
    memory: Arc<dyn MemoryClient>,
    requests: Vec<(String, AddMemoryRequest)>,
    batch_size: usize,
    kind: &str,
) -> Result<IngestStats> {
    let total = requests.len();
    let mut stats = IngestStats::default();
    let mut pending = requests.into_iter().peekable();
    let mut batch_index = 0;

    while pending.peek().is_some() {
        batch_index += 1;
        let mut join_set = JoinSet::new();
        for (label, request) in pending.by_ref().take(batch_size.max(1)) {
            let memory = Arc::clone(&memory);
            join_set.spawn(async move { (label, memory.add(&request).await) });
        }

        while let Some(joined) = join_set.join_next().await {
            let (label, result) = joined.context("Ingest task panicked")?;
            match result {
                Ok(_) => stats.succeeded += 1,
                Err(e) => {
                    stats.failed += 1;
                    tracing::warn!("Failed to add {} {}: {:#}", kind, label, e);
                }
            }
        }

        tracing::info!(
            "Batch {}: {}/{} {} processed",
            batch_index,
            stats.total(),
            total,
            kind
        );
    }

    Ok(stats)
}

/// Memory request for one dialog turn
///
/// Image fields are only attached when the turn has them.
pub fn turn_request(turn: &DialogTurn, sample_id: &str) -> AddMemoryRequest {
    let mut metadata = Map::new();
    metadata.insert("speaker".to_string(), Value::from(turn.speaker.as_str()));
    metadata.insert("dialog_id".to_string(), Value::from(turn.dia_id.as_str()));
    metadata.insert("sample_id".to_string(), Value::from(sample_id));
    if let Some(url) = turn.img_url.as_ref().filter(|url| has_content(url)) {
        metadata.insert("img_url".to_string(), url.clone());
    }
    if let Some(caption) = turn.blip_caption.as_deref().filter(|c| !c.is_empty()) {
        metadata.insert("img_caption".to_string(), Value::from(caption));
    }

    AddMemoryRequest {
        content: turn.text.clone(),
        metadata,
    }
}

fn has_content(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        _ => true,
    }
}

/// Memory request for a session observation or summary
pub fn text_request(text: &str, kind: &str, sample_id: &str) -> AddMemoryRequest {
    let mut metadata = Map::new();
    metadata.insert("type".to_string(), Value::from(kind));
    metadata.insert("sample_id".to_string(), Value::from(sample_id));

    AddMemoryRequest {
        content: text.to_string(),
        metadata,
    }
}

/// Per-kind outcome of a LoCoMo ingestion
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TranscriptIngestStats {
    pub turns: IngestStats,
    pub observations: IngestStats,
    pub summaries: IngestStats,
}

impl TranscriptIngestStats {
    pub fn total(&self) -> IngestStats {
        let mut total = self.turns;
        total.merge(self.observations);
        total.merge(self.summaries);
        total
    }
}

/// Push LoCoMo transcripts into the memory service
///
/// For each conversation the dialog turns go first, then the session
/// observations, then the session summaries.
pub async fn ingest_transcripts(
    memory: Arc<dyn MemoryClient>,
    transcripts: &[Transcript],
    batch_size: usize,
) -> Result<TranscriptIngestStats> {
    let mut stats = TranscriptIngestStats::default();

    for (i, transcript) in transcripts.iter().enumerate() {
        let sample_id = transcript.sample_id.as_str();
        tracing::info!(
            "Processing conversation {}/{} ({})",
            i + 1,
            transcripts.len(),
            sample_id
        );

        let turns = transcript
            .turns
            .iter()
            .map(|turn| (turn.dia_id.clone(), turn_request(turn, sample_id)))
            .collect();
        stats
            .turns
            .merge(add_in_batches(Arc::clone(&memory), turns, batch_size, "dialog turns").await?);

        let observations = labelled_texts(&transcript.observations, "observation", sample_id);
        stats
            .observations
            .merge(add_in_batches(Arc::clone(&memory), observations, batch_size, "observations").await?);

        let summaries = labelled_texts(&transcript.summaries, "summary", sample_id);
        stats
            .summaries
            .merge(add_in_batches(Arc::clone(&memory), summaries, batch_size, "session summaries").await?);
    }

    Ok(stats)
}

fn labelled_texts(texts: &[String], kind: &str, sample_id: &str) -> Vec<(String, AddMemoryRequest)> {
    texts
        .iter()
        .enumerate()
        .map(|(i, text)| {
            (
                format!("{} {} {}", sample_id, kind, i + 1),
                text_request(text, kind, sample_id),
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{AddMemoryResponse, SearchRequest, SearchResponse};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;

    /// Records every add; rejects content containing "reject"
    #[derive(Default)]
    struct RecordingMemory {
        added: Mutex<Vec<AddMemoryRequest>>,
    }

    #[async_trait]
    impl MemoryClient for RecordingMemory {
        async fn search(&self, _request: &SearchRequest) -> Result<SearchResponse> {
            anyhow::bail!("search not expected during ingestion")
        }

        async fn add(&self, request: &AddMemoryRequest) -> Result<AddMemoryResponse> {
            if request.content.contains("reject") {
                anyhow::bail!("rejected");
            }
            self.added.lock().unwrap().push(request.clone());
            Ok(AddMemoryResponse {
                id: "m".to_string(),
                status: "queued".to_string(),
            })
        }
    }

    fn turn(speaker: &str, dia_id: &str, text: &str) -> DialogTurn {
        DialogTurn {
            speaker: speaker.to_string(),
            dia_id: dia_id.to_string(),
            text: text.to_string(),
            img_url: None,
            blip_caption: None,
        }
    }

    #[test]
    fn test_turn_request_metadata() {
        let plain = turn_request(&turn("Caroline", "D1:1", "Hey Mel!"), "conv-7");
        assert_eq!(plain.content, "Hey Mel!");
        assert_eq!(plain.metadata["speaker"], "Caroline");
        assert_eq!(plain.metadata["dialog_id"], "D1:1");
        assert_eq!(plain.metadata["sample_id"], "conv-7");
        assert!(!plain.metadata.contains_key("img_url"));
        assert!(!plain.metadata.contains_key("img_caption"));

        let mut with_image = turn("Melanie", "D1:2", "Look");
        with_image.img_url = Some(json!(["https://example.com/a.jpg"]));
        with_image.blip_caption = Some("a dog on a beach".to_string());
        let request = turn_request(&with_image, "conv-7");
        assert_eq!(request.metadata["img_url"], json!(["https://example.com/a.jpg"]));
        assert_eq!(request.metadata["img_caption"], "a dog on a beach");

        let mut empty_image = turn("Melanie", "D1:3", "None");
        empty_image.img_url = Some(json!([]));
        empty_image.blip_caption = Some(String::new());
        let request = turn_request(&empty_image, "conv-7");
        assert!(!request.metadata.contains_key("img_url"));
        assert!(!request.metadata.contains_key("img_caption"));
    }

    #[test]
    fn test_text_request_metadata() {
        let request = text_request("They catch up.", "summary", "conv-7");
        assert_eq!(request.content, "They catch up.");
        assert_eq!(request.metadata.len(), 2);
        assert_eq!(request.metadata["type"], "summary");
        assert_eq!(request.metadata["sample_id"], "conv-7");
    }

    #[tokio::test]
    async fn test_add_in_batches_counts_failures() {
        let memory = Arc::new(RecordingMemory::default());
        let requests: Vec<(String, AddMemoryRequest)> = ["one", "reject two", "three", "four", "five"]
            .iter()
            .enumerate()
            .map(|(i, text)| (i.to_string(), text_request(text, "observation", "c")))
            .collect();

        let stats = add_in_batches(memory.clone(), requests, 2, "observations")
            .await
            .unwrap();
        assert_eq!(stats, IngestStats { succeeded: 4, failed: 1 });
        assert_eq!(memory.added.lock().unwrap().len(), 4);

        let empty = add_in_batches(memory, Vec::new(), 0, "observations").await.unwrap();
        assert_eq!(empty, IngestStats::default());
    }

    #[tokio::test]
    async fn test_ingest_transcripts() {
        let memory = Arc::new(RecordingMemory::default());
        let transcripts = vec![
            Transcript {
                sample_id: "conv-1".to_string(),
                turns: vec![
                    turn("A", "D1:1", "hello"),
                    turn("B", "D1:2", "reject this turn"),
                ],
                observations: vec!["A said hello.".to_string()],
                summaries: vec!["A greets B.".to_string()],
            },
            Transcript {
                sample_id: "conv-2".to_string(),
                turns: vec![turn("C", "D1:1", "hi")],
                observations: vec![],
                summaries: vec!["C says hi.".to_string(), "reject summary".to_string()],
            },
        ];

        let stats = ingest_transcripts(memory.clone(), &transcripts, 10).await.unwrap();
        assert_eq!(stats.turns, IngestStats { succeeded: 2, failed: 1 });
        assert_eq!(stats.observations, IngestStats { succeeded: 1, failed: 0 });
        assert_eq!(stats.summaries, IngestStats { succeeded: 2, failed: 1 });
        assert_eq!(stats.total(), IngestStats { succeeded: 5, failed: 2 });

        let added = memory.added.lock().unwrap();
        let kinds: Vec<(&str, Option<&str>)> = added
            .iter()
            .map(|r| {
                (
                    r.metadata["sample_id"].as_str().unwrap(),
                    r.metadata.get("type").and_then(Value::as_str),
                )
            })
            .collect();
        assert_eq!(
            kinds,
            vec![
                ("conv-1", None),
                ("conv-1", Some("observation")),
                ("conv-1", Some("summary")),
                ("conv-2", None),
                ("conv-2", Some("summary")),
            ]
        );
    }
}
