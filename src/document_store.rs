//! Document store facade: chunk, embed, and index documents.

use std::path::PathBuf;

use parking_lot::RwLock;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::chunker::TextSplitter;
use crate::embedder::Embedder;
use crate::embeddings::{ChunkRecord, DocumentMetadata, SearchHit, SourceSummary};
use crate::vector_store::{FlatIndex, IndexError, VectorIndex};

/// Outcome of a successful ingestion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    /// Number of chunks embedded and stored.
    pub chunks_added: usize,
    /// Source name of the ingested document.
    pub document_name: String,
}

/// Reasons an ingestion stored nothing.
#[derive(Debug, Error)]
pub enum IngestError {
    /// The splitter produced no chunks long enough to keep.
    #[error("document {document} produced no chunks to embed")]
    NoChunks {
        /// Source name of the document.
        document: String,
    },
    /// Every chunk failed to embed.
    #[error("embedding generation failed for all {attempted} chunks of {document}")]
    EmbeddingFailed {
        /// Source name of the document.
        document: String,
        /// Number of chunks attempted.
        attempted: usize,
    },
    /// The index rejected or failed to persist the records.
    #[error(transparent)]
    Index(#[from] IndexError),
}

/// Composes a splitter, an embedder and a vector index.
///
/// Embedding calls run outside the index lock; only the append itself is
/// serialized, so concurrent ingestions never drop each other's records.
pub struct DocumentStore<E, I = FlatIndex> {
    splitter: TextSplitter,
    embedder: E,
    index: RwLock<I>,
}

impl<E: Embedder> DocumentStore<E, FlatIndex> {
    /// Opens a flat-file store at `path`.
    pub fn open(path: impl Into<PathBuf>, splitter: TextSplitter, embedder: E) -> Self {
        Self::new(splitter, embedder, FlatIndex::open(path))
    }
}

impl<E: Embedder, I: VectorIndex> DocumentStore<E, I> {
    /// Builds a store from its parts.
    pub fn new(splitter: TextSplitter, embedder: E, index: I) -> Self {
        Self {
            splitter,
            embedder,
            index: RwLock::new(index),
        }
    }

    /// Splits, embeds and stores a document. Chunks that fail to embed are
    /// skipped; the call fails only when none succeed.
    pub fn ingest(
        &self,
        text: &str,
        metadata: &DocumentMetadata,
    ) -> Result<IngestReport, IngestError> {
        let document = metadata.display_name().to_string();
        let chunks = self.splitter.split(text);
        if chunks.is_empty() {
            return Err(IngestError::NoChunks { document });
        }

        let total_chunks = chunks.len();
        let mut records = Vec::with_capacity(total_chunks);
        for (chunk_index, chunk) in chunks.into_iter().enumerate() {
            match self.embedder.embed(&chunk) {
                Some(embedding) => records.push(ChunkRecord::new(
                    chunk,
                    embedding,
                    metadata,
                    chunk_index,
                    total_chunks,
                )),
                None => warn!(
                    document = %document,
                    chunk_index,
                    "skipping chunk without embedding"
                ),
            }
        }

        if records.is_empty() {
            return Err(IngestError::EmbeddingFailed {
                document,
                attempted: total_chunks,
            });
        }

        let chunks_added = records.len();
        self.index.write().append(records)?;
        info!(
            document = %document,
            chunks_added,
            total_chunks,
            "ingested document"
        );
        Ok(IngestReport {
            chunks_added,
            document_name: document,
        })
    }

    /// Embeds `query` and returns the `k` closest chunks. Empty on an empty
    /// store or when the query cannot be embedded.
    pub fn search(&self, query: &str, k: usize) -> Vec<SearchHit> {
        if self.index.read().is_empty() {
            return Vec::new();
        }
        let Some(vector) = self.embedder.embed(query) else {
            warn!("query embedding failed; returning no results");
            return Vec::new();
        };
        let hits = self.index.read().search(&vector, k);
        debug!(k, returned = hits.len(), "search completed");
        hits
    }

    /// Lists stored documents grouped by source.
    pub fn list_documents(&self) -> Vec<SourceSummary> {
        self.index.read().list_sources()
    }

    /// Deletes every chunk of `source`.
    pub fn delete_document(&self, source: &str) -> bool {
        self.index.write().delete_by_source(source)
    }

    /// Removes every stored chunk and the backing file.
    pub fn reset(&self) -> bool {
        let ok = self.index.write().reset();
        if ok {
            info!("vector store reset");
        }
        ok
    }

    /// Total number of stored chunks.
    pub fn chunk_count(&self) -> usize {
        self.index.read().len()
    }
}
