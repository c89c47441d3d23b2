//! Flat-file similarity index over embedded chunk records.
//!
//! Every record lives in memory and is mirrored to a single JSON array on
//! disk. Search is a linear cosine scan; there is no index structure.

use std::collections::HashMap;
use std::fs;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::embeddings::{ChunkRecord, SearchHit, SourceSummary};

/// File name used for the store inside a data directory.
pub const STORE_FILE_NAME: &str = "documents.json";

/// Suffix appended to a store file that failed to parse before it is set aside.
pub const CORRUPT_SUFFIX: &str = "corrupt";

/// Errors surfaced by mutating index operations.
#[derive(Debug, Error)]
pub enum IndexError {
    /// A record arrived without an embedding.
    #[error("record {doc_id} has no embedding")]
    EmptyEmbedding {
        /// Fingerprint of the rejected record.
        doc_id: String,
    },
    /// A record's dimensionality differs from the stored records.
    #[error("embedding has {actual} dimensions, store holds {expected}")]
    DimensionMismatch {
        /// Dimensionality already present in the store.
        expected: usize,
        /// Dimensionality of the rejected record.
        actual: usize,
    },
    /// Writing the backing file failed.
    #[error("failed to write vector store: {0}")]
    Io(#[from] io::Error),
    /// Serializing the record list failed.
    #[error("failed to serialize vector store: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Nearest-neighbour storage used by the document store.
pub trait VectorIndex: Send + Sync {
    /// Appends records and persists the result.
    fn append(&mut self, records: Vec<ChunkRecord>) -> Result<(), IndexError>;
    /// Returns the `k` most similar records, best first.
    fn search(&self, query: &[f32], k: usize) -> Vec<SearchHit>;
    /// Removes every record of `source`; true when something was removed and persisted.
    fn delete_by_source(&mut self, source: &str) -> bool;
    /// One summary per source, in first-seen order.
    fn list_sources(&self) -> Vec<SourceSummary>;
    /// Drops every record and the backing file.
    fn reset(&mut self) -> bool;
    /// Number of stored records.
    fn len(&self) -> usize;
    /// True when no records are stored.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Linear-scan index persisted as one JSON file.
#[derive(Debug)]
pub struct FlatIndex {
    path: PathBuf,
    records: Vec<ChunkRecord>,
}

impl FlatIndex {
    /// Opens the store at `path`. A missing or unreadable file yields an empty store.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            if let Err(err) = fs::create_dir_all(parent) {
                warn!(dir = %parent.display(), "failed to create data directory: {err}");
            }
        }
        let records = load_records(&path);
        Self { path, records }
    }

    /// Path of the backing JSON file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Stored records in insertion order.
    pub fn records(&self) -> &[ChunkRecord] {
        &self.records
    }

    /// Embedding dimensionality of the stored records, if any.
    pub fn dimension(&self) -> Option<usize> {
        self.records.first().map(|record| record.embedding.len())
    }

    fn persist(&self) -> Result<(), IndexError> {
        let dir = self
            .path
            .parent()
            .filter(|dir| !dir.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(dir)?;
        let mut tmp = NamedTempFile::new_in(dir)?;
        {
            let mut writer = BufWriter::new(tmp.as_file_mut());
            serde_json::to_writer_pretty(&mut writer, &self.records)?;
            writer.flush()?;
        }
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|err| err.error)?;
        Ok(())
    }
}

impl VectorIndex for FlatIndex {
    fn append(&mut self, records: Vec<ChunkRecord>) -> Result<(), IndexError> {
        if records.is_empty() {
            return Ok(());
        }
        let mut expected = self.dimension();
        for record in &records {
            let actual = record.embedding.len();
            if actual == 0 {
                return Err(IndexError::EmptyEmbedding {
                    doc_id: record.metadata.doc_id.clone(),
                });
            }
            match expected {
                Some(dim) if dim != actual => {
                    return Err(IndexError::DimensionMismatch {
                        expected: dim,
                        actual,
                    })
                }
                None => expected = Some(actual),
                _ => {}
            }
        }
        let before = self.records.len();
        self.records.extend(records);
        if let Err(err) = self.persist() {
            self.records.truncate(before);
            return Err(err);
        }
        debug!(
            added = self.records.len() - before,
            total = self.records.len(),
            "appended chunk records"
        );
        Ok(())
    }

    fn search(&self, query: &[f32], k: usize) -> Vec<SearchHit> {
        if k == 0 || self.records.is_empty() {
            return Vec::new();
        }
        let mut scored: Vec<(f32, &ChunkRecord)> = self
            .records
            .iter()
            .map(|record| (cosine_similarity(query, &record.embedding), record))
            .collect();
        // Stable sort keeps insertion order among equal scores.
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        debug!(candidates = scored.len(), k, "ranked chunk records");
        scored
            .into_iter()
            .take(k)
            .map(|(score, record)| SearchHit {
                content: record.content.clone(),
                score,
                metadata: record.metadata.clone(),
            })
            .collect()
    }

    fn delete_by_source(&mut self, source: &str) -> bool {
        let before = self.records.len();
        self.records.retain(|record| record.metadata.source != source);
        let removed = before - self.records.len();
        if removed == 0 {
            return false;
        }
        match self.persist() {
            Ok(()) => {
                info!(source, removed, "deleted document chunks");
                true
            }
            Err(err) => {
                warn!(source, "failed to persist deletion: {err}");
                false
            }
        }
    }

    fn list_sources(&self) -> Vec<SourceSummary> {
        let mut summaries: Vec<SourceSummary> = Vec::new();
        let mut positions: HashMap<&str, usize> = HashMap::new();
        for record in &self.records {
            let source = record.metadata.source.as_str();
            match positions.get(source) {
                Some(&idx) => summaries[idx].chunks += 1,
                None => {
                    positions.insert(source, summaries.len());
                    summaries.push(SourceSummary {
                        source: source.to_string(),
                        chunks: 1,
                        created_at: record.metadata.created_at,
                    });
                }
            }
        }
        summaries
    }

    fn reset(&mut self) -> bool {
        self.records.clear();
        match fs::remove_file(&self.path) {
            Ok(()) => true,
            Err(err) if err.kind() == io::ErrorKind::NotFound => true,
            Err(err) => {
                warn!(path = %self.path.display(), "failed to remove vector store: {err}");
                false
            }
        }
    }

    fn len(&self) -> usize {
        self.records.len()
    }
}

/// Cosine similarity; 0.0 when either vector has zero magnitude or the lengths differ.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let magnitude_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let magnitude_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if magnitude_a == 0.0 || magnitude_b == 0.0 {
        return 0.0;
    }
    let similarity = dot / (magnitude_a * magnitude_b);
    if similarity.is_finite() {
        similarity
    } else {
        0.0
    }
}

fn load_records(path: &Path) -> Vec<ChunkRecord> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Vec::new(),
        Err(err) => {
            warn!(path = %path.display(), "failed to read vector store, starting empty: {err}");
            return Vec::new();
        }
    };
    match serde_json::from_slice::<Vec<ChunkRecord>>(&bytes) {
        Ok(records) => {
            info!(path = %path.display(), records = records.len(), "loaded vector store");
            records
        }
        Err(err) => {
            let aside = path.with_extension(format!("json.{CORRUPT_SUFFIX}"));
            match fs::rename(path, &aside) {
                Ok(()) => warn!(
                    path = %path.display(),
                    moved_to = %aside.display(),
                    "vector store is corrupt, starting empty: {err}"
                ),
                Err(rename_err) => warn!(
                    path = %path.display(),
                    "vector store is corrupt and could not be set aside ({rename_err}), starting empty: {err}"
                ),
            }
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::DocumentMetadata;

    fn record(source: &str, content: &str, embedding: Vec<f32>) -> ChunkRecord {
        ChunkRecord::new(
            content.to_string(),
            embedding,
            &DocumentMetadata::new(source),
            0,
            1,
        )
    }

    fn store_path(dir: &tempfile::TempDir) -> PathBuf {
        dir.path().join("nested").join(STORE_FILE_NAME)
    }

    #[test]
    fn cosine_of_vector_with_itself_is_one() {
        let v = [0.3, -1.2, 4.5, 0.01];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
        assert!((cosine_similarity(&[1.0, 0.0], &[-2.0, 0.0]) + 1.0).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[0.0, 3.0]), 0.0);
    }

    #[test]
    fn cosine_with_zero_or_mismatched_vector_is_zero() {
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[0.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[0.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0, 2.0, 3.0]), 0.0);
    }

    #[test]
    fn empty_store_returns_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let index = FlatIndex::open(store_path(&dir));
        assert!(index.is_empty());
        assert!(index.search(&[1.0, 0.0], 5).is_empty());
        assert!(index.list_sources().is_empty());
    }

    #[test]
    fn search_returns_top_k_descending() {
        let dir = tempfile::tempdir().unwrap();
        let mut index = FlatIndex::open(store_path(&dir));
        index
            .append(vec![
                record("a.txt", "east", vec![1.0, 0.0]),
                record("a.txt", "north", vec![0.0, 1.0]),
                record("b.txt", "north-east", vec![1.0, 1.0]),
                record("b.txt", "west", vec![-1.0, 0.0]),
                record("c.txt", "mostly east", vec![0.9, 0.1]),
            ])
            .unwrap();

        let hits = index.search(&[1.0, 0.0], 2);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].content, "east");
        assert_eq!(hits[1].content, "mostly east");
        assert!(hits[0].score >= hits[1].score);
        assert_eq!(index.search(&[1.0, 0.0], 0).len(), 0);
        assert_eq!(index.search(&[1.0, 0.0], 50).len(), 5);
    }

    #[test]
    fn ties_keep_insertion_order() {
        let dir = tempfile::tempdir().unwrap();
        let mut index = FlatIndex::open(store_path(&dir));
        index
            .append(vec![
                record("a.txt", "first", vec![2.0, 0.0]),
                record("a.txt", "second", vec![1.0, 0.0]),
                record("a.txt", "third", vec![3.0, 0.0]),
            ])
            .unwrap();
        let order: Vec<String> = index
            .search(&[1.0, 0.0], 3)
            .into_iter()
            .map(|hit| hit.content)
            .collect();
        assert_eq!(order, vec!["first", "second", "third"]);
    }

    #[test]
    fn hits_never_expose_embeddings() {
        let dir = tempfile::tempdir().unwrap();
        let mut index = FlatIndex::open(store_path(&dir));
        index.append(vec![record("a.txt", "text", vec![1.0])]).unwrap();
        let hit = index.search(&[1.0], 1).remove(0);
        let value = serde_json::to_value(&hit).unwrap();
        assert!(value.get("embedding").is_none());
        assert!(value["metadata"].get("embedding").is_none());
        assert!(value["metadata"].get("content").is_none());
        assert_eq!(value["metadata"]["source"], "a.txt");
    }

    #[test]
    fn append_persists_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = store_path(&dir);
        let mut index = FlatIndex::open(&path);
        index
            .append(vec![record("a.txt", "persisted chunk", vec![0.5, 0.5])])
            .unwrap();
        assert!(path.exists());

        let reopened = FlatIndex::open(&path);
        assert_eq!(reopened.records(), index.records());
    }

    #[test]
    fn rejects_mismatched_or_missing_embeddings() {
        let dir = tempfile::tempdir().unwrap();
        let mut index = FlatIndex::open(store_path(&dir));
        index.append(vec![record("a.txt", "one", vec![1.0, 0.0])]).unwrap();

        let err = index
            .append(vec![record("a.txt", "two", vec![1.0, 0.0, 0.0])])
            .unwrap_err();
        assert!(matches!(
            err,
            IndexError::DimensionMismatch {
                expected: 2,
                actual: 3
            }
        ));
        let err = index.append(vec![record("a.txt", "three", Vec::new())]).unwrap_err();
        assert!(matches!(err, IndexError::EmptyEmbedding { .. }));
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn delete_by_source_removes_only_that_source() {
        let dir = tempfile::tempdir().unwrap();
        let path = store_path(&dir);
        let mut index = FlatIndex::open(&path);
        index
            .append(vec![
                record("a.txt", "a1", vec![1.0]),
                record("b.txt", "b1", vec![1.0]),
                record("a.txt", "a2", vec![1.0]),
                record("c.txt", "c1", vec![1.0]),
            ])
            .unwrap();

        assert!(index.delete_by_source("a.txt"));
        assert_eq!(index.len(), 2);
        let sources: Vec<String> = index.list_sources().into_iter().map(|s| s.source).collect();
        assert_eq!(sources, vec!["b.txt", "c.txt"]);
        assert!(!index.delete_by_source("a.txt"));
        assert_eq!(FlatIndex::open(&path).len(), 2);
    }

    #[test]
    fn list_sources_uses_first_seen_record() {
        let dir = tempfile::tempdir().unwrap();
        let mut index = FlatIndex::open(store_path(&dir));
        let mut first = record("a.txt", "a1", vec![1.0]);
        let mut second = record("a.txt", "a2", vec![1.0]);
        first.metadata.created_at = "2024-05-02T00:00:00Z".parse().unwrap();
        second.metadata.created_at = "2024-05-01T00:00:00Z".parse().unwrap();
        index
            .append(vec![first.clone(), record("b.txt", "b1", vec![1.0]), second])
            .unwrap();

        let summaries = index.list_sources();
        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[0].source, "a.txt");
        assert_eq!(summaries[0].chunks, 2);
        assert_eq!(summaries[0].created_at, first.metadata.created_at);
        assert_eq!(summaries[1].chunks, 1);
    }

    #[test]
    fn reset_clears_records_and_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = store_path(&dir);
        let mut index = FlatIndex::open(&path);
        index.append(vec![record("a.txt", "a1", vec![1.0])]).unwrap();
        assert!(path.exists());

        assert!(index.reset());
        assert!(index.list_sources().is_empty());
        assert!(!path.exists());
        assert!(index.reset());
    }

    #[test]
    fn corrupt_file_loads_as_empty_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(STORE_FILE_NAME);
        fs::write(&path, b"[{\"content\": \"trunc").unwrap();
        let mut index = FlatIndex::open(&path);
        assert!(index.is_empty());

        index.append(vec![record("a.txt", "fresh", vec![1.0])]).unwrap();
        assert_eq!(FlatIndex::open(&path).len(), 1);
        let aside = dir.path().join("documents.json.corrupt");
        assert_eq!(fs::read(aside).unwrap(), b"[{\"content\": \"trunc");
    }

    #[test]
    fn failed_append_leaves_memory_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let path = store_path(&dir);
        let mut index = FlatIndex::open(&path);
        index.append(vec![record("a.txt", "kept", vec![1.0])]).unwrap();
        fs::remove_file(&path).unwrap();
        fs::create_dir(&path).unwrap();

        let err = index
            .append(vec![record("b.txt", "lost", vec![1.0])])
            .unwrap_err();
        assert!(matches!(err, IndexError::Io(_)));
        assert_eq!(index.len(), 1);
        assert_eq!(index.search(&[1.0], 5)[0].content, "kept");
    }

    #[test]
    fn delete_reports_false_when_persist_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = store_path(&dir);
        let mut index = FlatIndex::open(&path);
        index
            .append(vec![
                record("a.txt", "a1", vec![1.0]),
                record("b.txt", "b1", vec![1.0]),
            ])
            .unwrap();
        fs::remove_file(&path).unwrap();
        fs::create_dir(&path).unwrap();

        assert!(!index.delete_by_source("a.txt"));
    }

    #[test]
    fn reset_reports_false_when_file_cannot_be_removed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(STORE_FILE_NAME);
        fs::create_dir(&path).unwrap();
        let mut index = FlatIndex {
            path: path.clone(),
            records: vec![record("a.txt", "a1", vec![1.0])],
        };

        assert!(!index.reset());
        assert!(index.is_empty());
        assert!(path.is_dir());
    }
}
