//! Embedding backends used at ingestion and query time.

pub mod openai;

use std::sync::Arc;

pub use openai::{EmbeddingSettings, OpenAiEmbedder};

/// Maps text onto a fixed-length vector.
///
/// Implementations never propagate failures: `None` tells the caller to skip
/// the chunk (or return no results for a query).
pub trait Embedder: Send + Sync {
    /// Embeds a single input with one outbound call.
    fn embed(&self, text: &str) -> Option<Vec<f32>>;
}

impl<T: Embedder + ?Sized> Embedder for Arc<T> {
    fn embed(&self, text: &str) -> Option<Vec<f32>> {
        (**self).embed(text)
    }
}

impl<T: Embedder + ?Sized> Embedder for Box<T> {
    fn embed(&self, text: &str) -> Option<Vec<f32>> {
        (**self).embed(text)
    }
}
