//! Validation and text loading for uploaded documents.

use std::borrow::Cow;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::warn;

use crate::embeddings::DocumentMetadata;

/// File extensions accepted for ingestion (lowercase, with leading dot).
pub const SUPPORTED_EXTENSIONS: [&str; 2] = [".txt", ".md"];

/// Largest accepted upload in bytes (10 MiB).
pub const MAX_FILE_SIZE: u64 = 10 * 1024 * 1024;

/// Errors raised while validating or reading a document.
#[derive(Debug, Error)]
pub enum LoadError {
    /// Extension is not one of [`SUPPORTED_EXTENSIONS`].
    #[error("unsupported file type {extension:?}; supported types: .txt, .md")]
    Unsupported {
        /// Lowercased extension including the dot, or empty.
        extension: String,
    },
    /// File exceeds [`MAX_FILE_SIZE`].
    #[error("file is {size} bytes; the maximum is {max} bytes")]
    TooLarge {
        /// Size of the rejected file.
        size: u64,
        /// Configured maximum.
        max: u64,
    },
    /// Reading the file failed.
    #[error("failed to read {path:?}")]
    Io {
        /// Path that could not be read.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
}

/// Extracted document text plus the metadata stored with each chunk.
#[derive(Debug, Clone)]
pub struct LoadedDocument {
    /// Decoded document text.
    pub text: String,
    /// Metadata (`source`, `file_type`, `file_size`).
    pub metadata: DocumentMetadata,
}

/// Checks the extension and size of a prospective upload.
pub fn validate(filename: &str, size: u64) -> Result<(), LoadError> {
    let extension = extension_of(filename);
    if !SUPPORTED_EXTENSIONS.contains(&extension.as_str()) {
        return Err(LoadError::Unsupported { extension });
    }
    if size > MAX_FILE_SIZE {
        return Err(LoadError::TooLarge {
            size,
            max: MAX_FILE_SIZE,
        });
    }
    Ok(())
}

/// Validates and reads a document from disk.
pub fn load_path(path: &Path) -> Result<LoadedDocument, LoadError> {
    let filename = source_name(&path.to_string_lossy());
    let size = fs::metadata(path)
        .map_err(|source| LoadError::Io {
            path: path.to_path_buf(),
            source,
        })?
        .len();
    validate(&filename, size)?;
    let bytes = fs::read(path).map_err(|source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let text = decode_text(&bytes, &filename).into_owned();
    Ok(LoadedDocument {
        text,
        metadata: document_metadata(&filename, size),
    })
}

/// Validates an in-memory upload and wraps it as a document.
pub fn from_upload(filename: &str, content: &str) -> Result<LoadedDocument, LoadError> {
    let filename = source_name(filename);
    let size = content.len() as u64;
    validate(&filename, size)?;
    Ok(LoadedDocument {
        text: content.to_string(),
        metadata: document_metadata(&filename, size),
    })
}

fn document_metadata(filename: &str, size: u64) -> DocumentMetadata {
    DocumentMetadata::new(filename)
        .with_field("file_type", extension_of(filename))
        .with_field("file_size", size)
}

fn source_name(filename: &str) -> String {
    Path::new(filename)
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| filename.to_string())
}

fn extension_of(filename: &str) -> String {
    Path::new(filename)
        .extension()
        .map(|ext| format!(".{}", ext.to_string_lossy().to_lowercase()))
        .unwrap_or_default()
}

fn decode_text<'a>(bytes: &'a [u8], filename: &str) -> Cow<'a, str> {
    match std::str::from_utf8(bytes) {
        Ok(text) => Cow::Borrowed(text),
        Err(_) => {
            warn!(file = filename, "document is not valid UTF-8; decoding lossily");
            Cow::Owned(String::from_utf8_lossy(bytes).into_owned())
        }
    }
}
