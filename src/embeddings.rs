//! Shared chunk record structures persisted by the vector store.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Source name reported when a document carries no `source` metadata.
pub const UNKNOWN_SOURCE: &str = "Unknown";

/// Caller-supplied metadata describing a document before ingestion.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    /// Originating document name (usually the uploaded filename).
    pub source: String,
    /// Additional fields copied verbatim onto every chunk record.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl DocumentMetadata {
    /// Builds metadata for the given source with no extra fields.
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            extra: Map::new(),
        }
    }

    /// Adds an extra metadata field.
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    /// Name reported back to callers after ingestion.
    pub fn display_name(&self) -> &str {
        if self.source.trim().is_empty() {
            UNKNOWN_SOURCE
        } else {
            &self.source
        }
    }

    fn page_label(&self) -> String {
        match self.extra.get("page") {
            None | Some(Value::Null) => String::new(),
            Some(Value::String(page)) => page.clone(),
            Some(other) => other.to_string(),
        }
    }
}

/// Metadata stored alongside each chunk; everything except text and vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    /// Originating document name.
    pub source: String,
    /// Position of the chunk within its document.
    pub chunk_index: usize,
    /// Number of chunks the splitter produced for the document.
    pub total_chunks: usize,
    /// Ingestion timestamp. Offset-less timestamps are read as UTC.
    #[serde(deserialize_with = "deserialize_timestamp")]
    pub created_at: DateTime<Utc>,
    /// Content fingerprint (md5 of content, source and page).
    pub doc_id: String,
    /// Caller-supplied metadata fields.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One retrievable unit: chunk text, its embedding, and metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkRecord {
    /// Chunk body text submitted to the embedding model.
    pub content: String,
    /// Model embedding vector.
    pub embedding: Vec<f32>,
    /// Flattened chunk metadata.
    #[serde(flatten)]
    pub metadata: ChunkMetadata,
}

impl ChunkRecord {
    /// Builds a record for a freshly embedded chunk, stamping it with the current time.
    pub fn new(
        content: String,
        embedding: Vec<f32>,
        document: &DocumentMetadata,
        chunk_index: usize,
        total_chunks: usize,
    ) -> Self {
        let doc_id = doc_id(&content, &document.source, &document.page_label());
        Self {
            content,
            embedding,
            metadata: ChunkMetadata {
                source: document.source.clone(),
                chunk_index,
                total_chunks,
                created_at: Utc::now(),
                doc_id,
                extra: document.extra.clone(),
            },
        }
    }
}

/// Ranked search result. The embedding vector is never included.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    /// Chunk text.
    pub content: String,
    /// Cosine similarity against the query vector.
    pub score: f32,
    /// Chunk metadata.
    pub metadata: ChunkMetadata,
}

/// Per-source summary returned by document listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceSummary {
    /// Source document name.
    pub source: String,
    /// Number of stored chunks for the source.
    pub chunks: usize,
    /// Timestamp of the first stored chunk seen for the source.
    pub created_at: DateTime<Utc>,
}

/// Hex md5 fingerprint of a chunk. Identical content from the same source and page collides.
pub fn doc_id(content: &str, source: &str, page: &str) -> String {
    let digest = md5::compute(format!("{content}{source}{page}"));
    format!("{:x}", digest)
}

/// Parses RFC 3339, falling back to a naive ISO 8601 timestamp taken as UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|parsed| parsed.with_timezone(&Utc))
        .ok()
        .or_else(|| raw.parse::<NaiveDateTime>().ok().map(|naive| naive.and_utc()))
}

fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_timestamp(&raw)
        .ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp {raw:?}")))
}
