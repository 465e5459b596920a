//! Exact-scan vector index with snapshot persistence and atomic publish.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};

use crate::error::{IndexError, Result};

/// Metadata carried with every stored chunk, surfaced in search hits and
/// citations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkMeta {
    pub chunk_id: String,
    pub doc_id: String,
    pub title: String,
    pub category: String,
    pub source: String,
    pub position: usize,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Record {
    vector: Vec<f32>,
    meta: ChunkMeta,
}

/// One search hit: a stored chunk and its normalized similarity score.
#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub meta: ChunkMeta,
    pub score: f32,
}

/// Brute-force nearest-neighbor index over cosine similarity.
///
/// Scores are normalized to [0, 1] via `(cos + 1) / 2`, highest first;
/// ties break by insertion order. Exact scan is deliberate: the corpus is
/// thousands of chunks, not millions.
#[derive(Debug)]
pub struct VectorIndex {
    embedding_model: String,
    dimension: usize,
    records: Vec<Record>,
    by_id: HashMap<String, usize>,
}

impl VectorIndex {
    #[must_use]
    pub fn new(embedding_model: impl Into<String>, dimension: usize) -> Self {
        Self {
            embedding_model: embedding_model.into(),
            dimension,
            records: Vec::new(),
            by_id: HashMap::new(),
        }
    }

    #[must_use]
    pub fn embedding_model(&self) -> &str {
        &self.embedding_model
    }

    #[must_use]
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Insert or replace the vector/metadata for a chunk id. Replacing
    /// keeps the original insertion slot, so re-upserting the same id is
    /// observably a no-op.
    ///
    /// # Errors
    ///
    /// `IndexError::DimensionMismatch` if the vector dimension differs
    /// from the index's.
    pub fn upsert(&mut self, vector: Vec<f32>, meta: ChunkMeta) -> Result<()> {
        if vector.len() != self.dimension {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimension,
                actual: vector.len(),
            });
        }

        match self.by_id.get(&meta.chunk_id) {
            Some(&slot) => {
                self.records[slot] = Record { vector, meta };
            }
            None => {
                self.by_id.insert(meta.chunk_id.clone(), self.records.len());
                self.records.push(Record { vector, meta });
            }
        }
        Ok(())
    }

    /// Return the k nearest stored chunks, highest similarity first.
    /// An empty index yields an empty result, not an error.
    ///
    /// # Errors
    ///
    /// `IndexError::DimensionMismatch` if the query vector dimension
    /// differs from the index's.
    pub fn query(&self, vector: &[f32], k: usize) -> Result<Vec<ScoredChunk>> {
        if self.records.is_empty() {
            return Ok(Vec::new());
        }
        if vector.len() != self.dimension {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimension,
                actual: vector.len(),
            });
        }

        let mut scored: Vec<ScoredChunk> = self
            .records
            .iter()
            .map(|record| ScoredChunk {
                meta: record.meta.clone(),
                score: normalized_cosine(vector, &record.vector),
            })
            .collect();

        // Stable sort keeps insertion order on ties.
        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        scored.truncate(k);
        Ok(scored)
    }

    /// Remove a chunk by id. Returns whether it was present.
    pub fn delete(&mut self, chunk_id: &str) -> bool {
        let Some(slot) = self.by_id.remove(chunk_id) else {
            return false;
        };
        self.records.remove(slot);
        for idx in self.by_id.values_mut() {
            if *idx > slot {
                *idx -= 1;
            }
        }
        true
    }

    /// Persist a snapshot: write to a sibling temp file, then rename so
    /// a crashed write never clobbers the published snapshot.
    ///
    /// # Errors
    ///
    /// Returns an error on IO or serialization failure.
    pub fn save(&self, path: &Path) -> Result<()> {
        let records_json = serde_json::to_string(&self.records)?;
        let snapshot = Snapshot {
            embedding_model: self.embedding_model.clone(),
            dimension: self.dimension,
            checksum: blake3::hash(records_json.as_bytes()).to_hex().to_string(),
            records_json,
        };

        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, serde_json::to_vec(&snapshot)?)?;
        std::fs::rename(&tmp, path)?;
        tracing::info!(chunks = self.records.len(), path = %path.display(), "index snapshot written");
        Ok(())
    }

    /// Load a persisted snapshot, verifying integrity and that it was
    /// built by the configured embedding model.
    ///
    /// # Errors
    ///
    /// `IndexError::Corrupt` on checksum mismatch,
    /// `IndexError::ModelMismatch` when `expected_model` differs from the
    /// snapshot's; IO/JSON errors otherwise.
    pub fn load(path: &Path, expected_model: Option<&str>) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        let snapshot: Snapshot = serde_json::from_slice(&bytes)?;

        let checksum = blake3::hash(snapshot.records_json.as_bytes())
            .to_hex()
            .to_string();
        if checksum != snapshot.checksum {
            return Err(IndexError::Corrupt(format!(
                "checksum mismatch for {}",
                path.display()
            )));
        }

        if let Some(expected) = expected_model
            && expected != snapshot.embedding_model
        {
            return Err(IndexError::ModelMismatch {
                built_with: snapshot.embedding_model,
                configured: expected.to_owned(),
            });
        }

        let records: Vec<Record> = serde_json::from_str(&snapshot.records_json)?;
        let by_id = records
            .iter()
            .enumerate()
            .map(|(i, r)| (r.meta.chunk_id.clone(), i))
            .collect();

        Ok(Self {
            embedding_model: snapshot.embedding_model,
            dimension: snapshot.dimension,
            records,
            by_id,
        })
    }
}

#[derive(Serialize, Deserialize)]
struct Snapshot {
    embedding_model: String,
    dimension: usize,
    checksum: String,
    records_json: String,
}

fn normalized_cosine(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    ((dot / (norm_a * norm_b)) + 1.0) / 2.0
}

/// Read-concurrent handle over the published index. Queries clone the
/// current `Arc` and keep scanning their snapshot even while `publish`
/// swaps in a rebuilt index.
#[derive(Debug)]
pub struct SharedIndex {
    inner: RwLock<Arc<VectorIndex>>,
}

impl SharedIndex {
    #[must_use]
    pub fn new(index: VectorIndex) -> Self {
        Self {
            inner: RwLock::new(Arc::new(index)),
        }
    }

    /// The currently published snapshot.
    ///
    /// # Panics
    ///
    /// Panics if the lock is poisoned, which requires a prior panic while
    /// publishing.
    #[must_use]
    pub fn snapshot(&self) -> Arc<VectorIndex> {
        Arc::clone(&self.inner.read().unwrap())
    }

    /// Atomically replace the published index. In-flight readers keep
    /// their old snapshot.
    ///
    /// # Panics
    ///
    /// Panics if the lock is poisoned.
    pub fn publish(&self, index: VectorIndex) {
        *self.inner.write().unwrap() = Arc::new(index);
    }
}
