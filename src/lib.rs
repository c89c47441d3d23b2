#![warn(missing_docs)]
//! Core library for docchat: document chunking, embedding, flat-file
//! similarity search, and the chat/session layer served over HTTP.

pub mod api;
pub mod chat;
pub mod chunker;
pub mod config;
pub mod document_store;
pub mod embedder;
pub mod embeddings;
pub mod loader;
pub mod session;
pub mod vector_store;

pub use chat::{ChatMessage, ChatProvider, ChatSettings, ChatStream, ProviderKind};
pub use chunker::{ChunkerConfig, TextSplitter};
pub use config::Cli;
pub use document_store::{DocumentStore, IngestError, IngestReport};
pub use embedder::{Embedder, EmbeddingSettings, OpenAiEmbedder};
pub use embeddings::{ChunkMetadata, ChunkRecord, DocumentMetadata, SearchHit, SourceSummary};
pub use loader::{LoadError, LoadedDocument};
pub use session::{SessionInfo, SessionStore};
pub use vector_store::{cosine_similarity, FlatIndex, IndexError, VectorIndex};
