//! Corpus indexing orchestrator: load → chunk → embed → publish.

use std::path::Path;
use std::sync::Arc;

use docent_llm::LlmProvider;

use crate::chunker::{Chunk, ChunkerConfig, chunk_document};
use crate::corpus::{Document, load_corpus};
use crate::error::{IndexError, Result};
use crate::store::{ChunkMeta, VectorIndex};

/// Indexer configuration.
#[derive(Debug, Clone, Default)]
pub struct IndexerConfig {
    pub chunker: ChunkerConfig,
}

/// Summary of an indexing run.
#[derive(Debug, Default)]
pub struct IndexReport {
    pub documents: usize,
    pub chunks: usize,
    pub duration_ms: u64,
}

/// Builds a fresh index from a corpus directory. Any chunking or
/// embedding failure aborts the run with the failing document named, so
/// a rebuild never publishes a partial index.
pub struct CorpusIndexer<P: LlmProvider> {
    provider: Arc<P>,
    embedding_model: String,
    config: IndexerConfig,
}

impl<P: LlmProvider> CorpusIndexer<P> {
    #[must_use]
    pub fn new(provider: Arc<P>, embedding_model: impl Into<String>, config: IndexerConfig) -> Self {
        Self {
            provider,
            embedding_model: embedding_model.into(),
            config,
        }
    }

    /// Ingest the corpus and return a fully built index.
    ///
    /// # Errors
    ///
    /// Returns an error if the corpus cannot be read, any document fails
    /// to chunk, or any embedding call fails. The error names the
    /// offending document where one exists.
    pub async fn build(&self, corpus_dir: &Path) -> Result<(VectorIndex, IndexReport)> {
        let start = std::time::Instant::now();
        let documents = load_corpus(corpus_dir).await?;

        // Probe the embedding dimension once; it is fixed for the index
        // lifetime.
        let probe = self.provider.embed("dimension probe").await?;
        let mut index = VectorIndex::new(self.embedding_model.clone(), probe.len());

        let mut report = IndexReport {
            documents: documents.len(),
            ..IndexReport::default()
        };

        for (i, doc) in documents.iter().enumerate() {
            let chunks = chunk_document(doc, &self.config.chunker)?;
            tracing::info!(
                doc = %doc.id,
                progress = format_args!("{}/{}", i + 1, documents.len()),
                chunks = chunks.len(),
            );

            for chunk in &chunks {
                let vector = self.provider.embed(&chunk.text).await.map_err(|e| {
                    tracing::error!(doc = %doc.id, chunk = %chunk.id, "embedding failed: {e}");
                    IndexError::Llm(e)
                })?;
                index.upsert(vector, chunk_meta(doc, chunk))?;
                report.chunks += 1;
            }
        }

        report.duration_ms = start.elapsed().as_millis().try_into().unwrap_or(u64::MAX);
        Ok((index, report))
    }

    /// Full rebuild: ingest the corpus, write the snapshot to
    /// `index_path` via temp-file rename.
    ///
    /// # Errors
    ///
    /// Propagates any `build` or persistence failure.
    pub async fn rebuild(&self, corpus_dir: &Path, index_path: &Path) -> Result<IndexReport> {
        let (index, report) = self.build(corpus_dir).await?;
        index.save(index_path)?;
        tracing::info!(
            documents = report.documents,
            chunks = report.chunks,
            ms = report.duration_ms,
            "rebuild complete"
        );
        Ok(report)
    }
}

fn chunk_meta(doc: &Document, chunk: &Chunk) -> ChunkMeta {
    ChunkMeta {
        chunk_id: chunk.id.clone(),
        doc_id: doc.id.clone(),
        title: doc.title.clone(),
        category: doc.category.clone(),
        source: doc.source.clone(),
        position: chunk.position,
        text: chunk.text.clone(),
    }
}
