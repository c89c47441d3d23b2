//! Command-line and environment configuration shared by the binaries.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;
use tracing_subscriber::EnvFilter;

use crate::chat::{ChatSettings, ProviderKind, DEFAULT_SYSTEM_PROMPT};
use crate::chunker::ChunkerConfig;
use crate::embedder::EmbeddingSettings;
use crate::vector_store::STORE_FILE_NAME;

/// Options shared by every binary that touches the document store.
#[derive(Args, Debug, Clone)]
pub struct Cli {
    /// Directory holding the persisted store
    #[arg(long, env = "DOCCHAT_DATA_DIR", default_value = "./vector_db_data")]
    pub data_dir: PathBuf,

    /// Maximum characters per chunk
    #[arg(long, env = "DOCCHAT_CHUNK_SIZE", default_value_t = 1000)]
    pub chunk_size: usize,

    /// Characters shared between adjacent chunks
    #[arg(long, env = "DOCCHAT_CHUNK_OVERLAP", default_value_t = 200)]
    pub chunk_overlap: usize,

    /// Chunks with this many characters or fewer are dropped
    #[arg(long, env = "DOCCHAT_MIN_CHUNK_LEN", default_value_t = 50)]
    pub min_chunk_len: usize,

    /// API key for the embeddings endpoint
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    pub embedding_api_key: Option<String>,

    /// Embeddings API base URL (Azure resource endpoint with --azure-api-version)
    #[arg(
        long,
        env = "DOCCHAT_OPENAI_BASE",
        default_value = "https://api.openai.com/v1"
    )]
    pub embedding_base_url: String,

    /// Embedding model or Azure deployment name
    #[arg(
        long,
        env = "DOCCHAT_EMBEDDING_MODEL",
        default_value = "text-embedding-ada-002"
    )]
    pub embedding_model: String,

    /// Optional embedding dimension override
    #[arg(long, env = "DOCCHAT_EMBEDDING_DIMENSIONS")]
    pub embedding_dimensions: Option<usize>,

    /// Azure OpenAI api-version; enables Azure-style URLs and auth
    #[arg(long, env = "AZURE_OPENAI_API_VERSION")]
    pub azure_api_version: Option<String>,

    /// Seconds before an embedding request times out
    #[arg(long, env = "DOCCHAT_EMBEDDING_TIMEOUT", default_value_t = 30)]
    pub embedding_timeout_secs: u64,

    /// Chat backend
    #[arg(long, env = "DOCCHAT_CHAT_PROVIDER", value_enum, default_value = "openai")]
    pub chat_provider: ProviderKind,

    /// Chat model or Azure deployment name
    #[arg(long, env = "DOCCHAT_CHAT_MODEL", default_value = "gpt-35-turbo")]
    pub chat_model: String,

    /// API key for the chat backend (defaults to the embeddings key)
    #[arg(long, env = "DOCCHAT_CHAT_API_KEY", hide_env_values = true)]
    pub chat_api_key: Option<String>,

    /// Chat API base URL (defaults to the embeddings base for OpenAI)
    #[arg(long, env = "DOCCHAT_CHAT_BASE")]
    pub chat_base_url: Option<String>,

    /// Sampling temperature
    #[arg(long, env = "DOCCHAT_TEMPERATURE", default_value_t = 0.7)]
    pub temperature: f32,

    /// Maximum tokens generated per reply
    #[arg(long, env = "DOCCHAT_MAX_TOKENS", default_value_t = 1000)]
    pub max_tokens: usize,

    /// Nucleus sampling parameter
    #[arg(long, env = "DOCCHAT_TOP_P", default_value_t = 0.95)]
    pub top_p: f32,

    /// System prompt prepended to conversations
    #[arg(long, env = "DOCCHAT_SYSTEM_PROMPT", default_value = DEFAULT_SYSTEM_PROMPT)]
    pub system_prompt: String,

    /// Seconds before a chat request times out
    #[arg(long, env = "DOCCHAT_CHAT_TIMEOUT", default_value_t = 60)]
    pub chat_timeout_secs: u64,
}

impl Cli {
    /// Path of the JSON store file inside the data directory.
    pub fn store_path(&self) -> PathBuf {
        self.data_dir.join(STORE_FILE_NAME)
    }

    /// Converts the chunk flags into a [`ChunkerConfig`].
    pub fn chunker_config(&self) -> ChunkerConfig {
        ChunkerConfig {
            chunk_size: self.chunk_size,
            chunk_overlap: self.chunk_overlap,
            min_chunk_len: self.min_chunk_len,
            ..ChunkerConfig::default()
        }
    }

    /// Builds embeddings settings; fails when no API key is configured.
    pub fn embedding_settings(&self) -> Result<EmbeddingSettings> {
        let api_key = self
            .embedding_api_key
            .clone()
            .context("OPENAI_API_KEY (or --embedding-api-key) must be set")?;
        Ok(EmbeddingSettings {
            api_key,
            base_url: self.embedding_base_url.clone(),
            model: self.embedding_model.clone(),
            dimensions: self.embedding_dimensions,
            azure_api_version: self.azure_api_version.clone(),
            timeout: Duration::from_secs(self.embedding_timeout_secs),
        })
    }

    /// Builds chat settings, reusing the embeddings credentials for OpenAI
    /// when no chat-specific ones are given.
    pub fn chat_settings(&self) -> Result<ChatSettings> {
        let openai = self.chat_provider == ProviderKind::OpenAi;
        let api_key = self
            .chat_api_key
            .clone()
            .or_else(|| openai.then(|| self.embedding_api_key.clone()).flatten())
            .context("DOCCHAT_CHAT_API_KEY (or --chat-api-key) must be set")?;
        let base_url = self
            .chat_base_url
            .clone()
            .or_else(|| openai.then(|| self.embedding_base_url.clone()));
        Ok(ChatSettings {
            provider: self.chat_provider,
            api_key,
            base_url,
            model: self.chat_model.clone(),
            azure_api_version: self.azure_api_version.clone().filter(|_| openai),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            top_p: self.top_p,
            system_prompt: self.system_prompt.clone(),
            timeout: Duration::from_secs(self.chat_timeout_secs),
        })
    }
}

/// Installs the global `tracing` subscriber, honouring `RUST_LOG` and falling
/// back to `default_filter`.
pub fn init_tracing(default_filter: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}
