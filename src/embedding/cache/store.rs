//! Persistent embedding store
//!
//! SQLite file keyed by (text hash, model name). Only successful embeddings are
//! written; a text that failed to embed is retried on the next run.

use crate::embedding::Embedding;
use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::Path;

/// Embedding store backed by SQLite
pub struct EmbeddingStore {
    conn: Connection,
    model_name: String,
}

impl EmbeddingStore {
    /// Open (or create) a store at the given path
    pub fn open(db_path: &Path, model_name: impl Into<String>) -> Result<Self> {
        let conn = Connection::open(db_path)
            .context(format!("Failed to open embedding store: {:?}", db_path))?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS embeddings (
                id INTEGER PRIMARY KEY,
                text_hash TEXT NOT NULL,
                model_name TEXT NOT NULL,
                text TEXT NOT NULL,
                embedding BLOB NOT NULL,
                dimension INTEGER NOT NULL,
                created_at INTEGER NOT NULL,
                UNIQUE(text_hash, model_name)
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_text_hash_model
             ON embeddings(text_hash, model_name)",
            [],
        )?;

        Ok(Self {
            conn,
            model_name: model_name.into(),
        })
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    /// SHA-256 of the text, stable across runs and toolchains
    fn hash_text(text: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(text.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    fn serialize_embedding(embedding: &[f32]) -> Vec<u8> {
        embedding.iter().flat_map(|&f| f.to_le_bytes()).collect()
    }

    fn deserialize_embedding(bytes: &[u8]) -> Result<Embedding> {
        if bytes.len() % 4 != 0 {
            anyhow::bail!("Invalid embedding bytes length: {}", bytes.len());
        }

        bytes
            .chunks_exact(4)
            .map(|chunk| {
                let raw: [u8; 4] = chunk.try_into()?;
                Ok(f32::from_le_bytes(raw))
            })
            .collect()
    }

    /// Look up one text
    pub fn get(&self, text: &str) -> Result<Option<Embedding>> {
        let bytes: Option<(String, Vec<u8>)> = self
            .conn
            .query_row(
                "SELECT text, embedding FROM embeddings
                 WHERE text_hash = ?1 AND model_name = ?2",
                params![Self::hash_text(text), self.model_name],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        match bytes {
            // Hash collisions are treated as misses
            Some((stored, bytes)) if stored == text => Ok(Some(Self::deserialize_embedding(&bytes)?)),
            _ => Ok(None),
        }
    }

    /// Look up several texts, returning only the hits
    pub fn get_many(&self, texts: &[String]) -> Result<HashMap<String, Embedding>> {
        let mut hits = HashMap::new();
        for text in texts {
            if let Some(embedding) = self.get(text)? {
                hits.insert(text.clone(), embedding);
            }
        }
        Ok(hits)
    }

    /// Store one embedding
    pub fn put(&self, text: &str, embedding: &[f32]) -> Result<()> {
        let created_at = chrono::Utc::now().timestamp();

        self.conn.execute(
            "INSERT OR REPLACE INTO embeddings
             (text_hash, model_name, text, embedding, dimension, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                Self::hash_text(text),
                self.model_name,
                text,
                Self::serialize_embedding(embedding),
                embedding.len() as i64,
                created_at
            ],
        )?;

        Ok(())
    }

    /// Store several embeddings in one transaction
    pub fn put_many<'a, I>(&mut self, entries: I) -> Result<usize>
    where
        I: IntoIterator<Item = (&'a str, &'a [f32])>,
    {
        let created_at = chrono::Utc::now().timestamp();
        let tx = self.conn.transaction()?;
        let mut written = 0;
        {
            let mut stmt = tx.prepare(
                "INSERT OR REPLACE INTO embeddings
                 (text_hash, model_name, text, embedding, dimension, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            for (text, embedding) in entries {
                stmt.execute(params![
                    Self::hash_text(text),
                    self.model_name,
                    text,
                    Self::serialize_embedding(embedding),
                    embedding.len() as i64,
                    created_at
                ])?;
                written += 1;
            }
        }
        tx.commit()?;
        Ok(written)
    }

    /// Number of stored embeddings for the current model
    pub fn len(&self) -> Result<usize> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM embeddings WHERE model_name = ?1",
            params![self.model_name],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Clear all stored embeddings for the current model
    pub fn clear_model(&self) -> Result<usize> {
        let deleted = self.conn.execute(
            "DELETE FROM embeddings WHERE model_name = ?1",
            params![self.model_name],
        )?;
        Ok(deleted)
    }
}
