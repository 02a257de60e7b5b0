//! BEIR retrieval datasets
//!
//! A dataset directory holds three JSON files:
//! - `corpus.json`: `{doc_id: {_id, text, title?}}`
//! - `queries.json`: `{query_id: {_id, text}}`
//! - `qrels.json`: `{query_id: {doc_id: relevance}}`

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use crate::evaluation::retrieval::Qrels;

/// A corpus document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BeirDocument {
    #[serde(rename = "_id")]
    pub id: String,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

impl BeirDocument {
    /// Memory content for this document: `title\n\ntext`, or the text alone
    pub fn content(&self) -> String {
        match self.title.as_deref().map(str::trim) {
            Some(title) if !title.is_empty() => format!("{}\n\n{}", title, self.text),
            _ => self.text.clone(),
        }
    }
}

/// A query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BeirQuery {
    #[serde(rename = "_id")]
    pub id: String,
    pub text: String,
}

pub type BeirCorpus = BTreeMap<String, BeirDocument>;

/// Paths of one dataset under the BEIR data directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BeirDataset {
    pub name: String,
    pub dir: PathBuf,
}

impl BeirDataset {
    /// `<data_dir>/<name>`
    pub fn new(data_dir: &Path, name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            dir: data_dir.join(&name),
            name,
        }
    }

    pub fn corpus_path(&self) -> PathBuf {
        self.dir.join("corpus.json")
    }

    pub fn queries_path(&self) -> PathBuf {
        self.dir.join("queries.json")
    }

    pub fn qrels_path(&self) -> PathBuf {
        self.dir.join("qrels.json")
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path, what: &str) -> Result<T> {
    let file = File::open(path).with_context(|| format!("Failed to open BEIR {} file: {:?}", what, path))?;
    serde_json::from_reader(BufReader::new(file))
        .with_context(|| format!("Failed to parse BEIR {} file: {:?}", what, path))
}

/// Load `corpus.json`
pub fn load_corpus(path: &Path) -> Result<BeirCorpus> {
    read_json(path, "corpus")
}

/// Load `queries.json`
pub fn load_queries(path: &Path) -> Result<BTreeMap<String, BeirQuery>> {
    read_json(path, "queries")
}

/// Load `qrels.json`
///
/// Relevance values that are not integers (or integral floats / numeric
/// strings) are skipped with a warning.
pub fn load_qrels(path: &Path) -> Result<Qrels> {
    let raw: BTreeMap<String, BTreeMap<String, Value>> = read_json(path, "qrels")?;

    let mut qrels = Qrels::new();
    for (query_id, docs) in raw {
        let judged = qrels.entry(query_id.clone()).or_default();
        for (doc_id, value) in docs {
            match relevance_value(&value) {
                Some(rel) => {
                    judged.insert(doc_id, rel);
                }
                None => tracing::warn!(
                    "Skipping invalid relevance '{}' for query {}, doc {}",
                    value,
                    query_id,
                    doc_id
                ),
            }
        }
    }

    Ok(qrels)
}

fn relevance_value(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        Value::Bool(b) => Some(i64::from(*b)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn dataset_dir() -> (TempDir, BeirDataset) {
        let temp = TempDir::new().unwrap();
        let dataset = BeirDataset::new(temp.path(), "scifact");
        fs::create_dir_all(&dataset.dir).unwrap();

        fs::write(
            dataset.corpus_path(),
            r#"{"d1": {"_id": "d1", "text": "Body one", "title": "Title"},
                "d2": {"_id": "d2", "text": "Body two"}}"#,
        )
        .unwrap();
        fs::write(
            dataset.queries_path(),
            r#"{"q1": {"_id": "q1", "text": "first query"}}"#,
        )
        .unwrap();
        fs::write(
            dataset.qrels_path(),
            r#"{"q1": {"d1": 1, "d2": "2", "d3": 0.0, "d4": "high"}}"#,
        )
        .unwrap();

        (temp, dataset)
    }

    #[test]
    fn test_load_dataset_files() {
        let (_temp, dataset) = dataset_dir();

        let corpus = load_corpus(&dataset.corpus_path()).unwrap();
        assert_eq!(corpus.len(), 2);
        assert_eq!(corpus["d1"].content(), "Title\n\nBody one");
        assert_eq!(corpus["d2"].content(), "Body two");

        let queries = load_queries(&dataset.queries_path()).unwrap();
        assert_eq!(queries["q1"].text, "first query");

        let qrels = load_qrels(&dataset.qrels_path()).unwrap();
        let judged = &qrels["q1"];
        assert_eq!(judged.get("d1"), Some(&1));
        assert_eq!(judged.get("d2"), Some(&2));
        assert_eq!(judged.get("d3"), Some(&0));
        assert!(!judged.contains_key("d4"));
    }

    #[test]
    fn test_dataset_paths() {
        let dataset = BeirDataset::new(Path::new("beir_data"), "nfcorpus");
        assert_eq!(dataset.qrels_path(), PathBuf::from("beir_data/nfcorpus/qrels.json"));
    }

    #[test]
    fn test_missing_file_is_an_error() {
        assert!(load_queries(Path::new("/nonexistent/queries.json")).is_err());
    }
}
