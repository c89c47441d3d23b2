#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};

use docchat::{ChunkerConfig, Embedder, TextSplitter};

/// Deterministic embedder: 26-dim ASCII letter histogram. Inputs containing
/// `FAIL` are treated as upstream failures.
#[derive(Default)]
pub struct FakeEmbedder {
    calls: AtomicUsize,
}

impl FakeEmbedder {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Embedder for FakeEmbedder {
    fn embed(&self, text: &str) -> Option<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if text.contains("FAIL") {
            return None;
        }
        let mut vector = vec![0.0f32; 26];
        for ch in text.chars().filter(char::is_ascii_alphabetic) {
            vector[(ch.to_ascii_lowercase() as u8 - b'a') as usize] += 1.0;
        }
        Some(vector)
    }
}

/// Splitter that keeps each paragraph built by [`paragraph`] as its own chunk.
pub fn splitter() -> TextSplitter {
    TextSplitter::new(ChunkerConfig {
        chunk_size: 100,
        chunk_overlap: 0,
        min_chunk_len: 50,
        ..ChunkerConfig::default()
    })
}

/// A 60-90 character paragraph repeating `word`.
pub fn paragraph(word: &str) -> String {
    vec![word; 12].join(" ")
}

/// Paragraphs joined with blank lines.
pub fn document(words: &[&str]) -> String {
    words
        .iter()
        .map(|word| paragraph(word))
        .collect::<Vec<_>>()
        .join("\n\n")
}
