use anyhow::{Context, Result};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::models::Passage;

/// A stored vector entry
#[derive(Debug, Clone, Serialize, Deserialize)]
struct VectorEntry {
    id: Uuid,
    text: String,
    #[serde(default)]
    metadata: serde_json::Value,
    embedding: Vec<f32>,
}

/// In-memory vector store with disk persistence and cosine similarity search.
pub struct VectorStore {
    entries: RwLock<Vec<VectorEntry>>,
    persist_path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct VectorHit {
    pub passage: Passage,
    pub score: f32,
}

impl VectorStore {
    pub fn open_or_create(vector_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(vector_dir)?;
        let persist_path = vector_dir.join("passages.json");

        let entries = if persist_path.exists() {
            let data = std::fs::read_to_string(&persist_path)
                .context("Failed to read vector store")?;
            serde_json::from_str(&data).context("Vector store file is corrupt")?
        } else {
            Vec::new()
        };

        Ok(Self {
            entries: RwLock::new(entries),
            persist_path,
        })
    }

    /// Add passages with their embeddings. `embeddings` must be parallel with `passages`.
    pub fn add_passages(&self, passages: &[Passage], embeddings: Vec<Vec<f32>>) -> Result<usize> {
        if passages.len() != embeddings.len() {
            anyhow::bail!(
                "Got {} embeddings for {} passages",
                embeddings.len(),
                passages.len()
            );
        }

        let mut entries = self.entries.write();
        let mut updated = entries.clone();
        updated.extend(
            passages
                .iter()
                .zip(embeddings)
                .map(|(passage, embedding)| VectorEntry {
                    id: Uuid::new_v4(),
                    text: passage.text.clone(),
                    metadata: passage.metadata.clone(),
                    embedding,
                }),
        );

        // Memory only changes once the file on disk does
        self.persist(&updated)?;
        *entries = updated;
        Ok(passages.len())
    }

    /// Remove every stored passage.
    pub fn clear(&self) -> Result<()> {
        let mut entries = self.entries.write();
        self.persist(&[])?;
        entries.clear();
        Ok(())
    }

    /// Search by cosine similarity against a query embedding, best first.
    pub fn search(&self, query_embedding: &[f32], limit: usize) -> Vec<VectorHit> {
        let entries = self.entries.read();

        let mut scored: Vec<(f32, &VectorEntry)> = entries
            .iter()
            .map(|e| (cosine_similarity(query_embedding, &e.embedding), e))
            .collect();

        // Sort descending by score
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(limit);

        scored
            .into_iter()
            .map(|(score, e)| VectorHit {
                passage: Passage {
                    text: e.text.clone(),
                    metadata: e.metadata.clone(),
                },
                score,
            })
            .collect()
    }

    pub fn entry_count(&self) -> usize {
        self.entries.read().len()
    }

    /// Atomic write via temp file + rename.
    fn persist(&self, entries: &[VectorEntry]) -> Result<()> {
        let data = serde_json::to_string(entries)?;
        let tmp_path = self.persist_path.with_extension("json.tmp");
        std::fs::write(&tmp_path, data)?;
        std::fs::rename(&tmp_path, &self.persist_path)?;
        Ok(())
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom == 0.0 {
        0.0
    } else {
        dot / denom
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn passage(text: &str, source: &str) -> Passage {
        Passage {
            text: text.to_string(),
            metadata: json!({ "source": source }),
        }
    }

    #[test]
    fn test_cosine_similarity_basics() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
    }

    #[test]
    fn test_search_orders_by_similarity_and_limits() {
        let dir = tempfile::tempdir().unwrap();
        let store = VectorStore::open_or_create(dir.path()).unwrap();
        store
            .add_passages(
                &[
                    passage("Art. 145 concediu de odihnă", "codul_muncii"),
                    passage("Art. 112 durata timpului de muncă", "codul_muncii"),
                    passage("Hotărâre nr. 12 privind concediul", "case"),
                ],
                vec![vec![0.9, 0.1, 0.0], vec![0.0, 0.2, 0.9], vec![0.7, 0.3, 0.1]],
            )
            .unwrap();

        let hits = store.search(&[1.0, 0.0, 0.0], 2);
        assert_eq!(hits.len(), 2);
        assert!(hits[0].passage.text.starts_with("Art. 145"));
        assert_eq!(hits[1].passage.metadata["source"], "case");
        assert!(hits[0].score >= hits[1].score);
    }

    #[test]
    fn test_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = VectorStore::open_or_create(dir.path()).unwrap();
            store
                .add_passages(&[passage("Art. 1", "codul_muncii")], vec![vec![1.0, 0.0]])
                .unwrap();
        }
        let reopened = VectorStore::open_or_create(dir.path()).unwrap();
        assert_eq!(reopened.entry_count(), 1);
        assert_eq!(reopened.search(&[1.0, 0.0], 5)[0].passage.text, "Art. 1");
    }

    #[test]
    fn test_mismatched_embeddings_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = VectorStore::open_or_create(dir.path()).unwrap();
        let result = store.add_passages(&[passage("a", "x"), passage("b", "x")], vec![vec![1.0]]);
        assert!(result.is_err());
        assert_eq!(store.entry_count(), 0);
    }

    #[test]
    fn test_failed_write_leaves_store_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let store = VectorStore::open_or_create(&dir.path().join("vectors")).unwrap();
        store.add_passages(&[passage("Art. 1", "codul_muncii")], vec![vec![1.0]]).unwrap();

        std::fs::remove_dir_all(dir.path().join("vectors")).unwrap();
        let result = store.add_passages(&[passage("Art. 2", "codul_muncii")], vec![vec![0.5]]);
        assert!(result.is_err());
        assert_eq!(store.entry_count(), 1);

        assert!(store.clear().is_err());
        assert_eq!(store.entry_count(), 1);
    }

    #[test]
    fn test_clear_empties_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = VectorStore::open_or_create(dir.path()).unwrap();
        store.add_passages(&[passage("a", "x")], vec![vec![1.0]]).unwrap();
        store.clear().unwrap();
        assert_eq!(store.entry_count(), 0);
        assert!(store.search(&[1.0], 3).is_empty());
    }
}
