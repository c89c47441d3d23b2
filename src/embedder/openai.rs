//! OpenAI-compatible and Azure OpenAI embedding client.

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::Embedder;

/// Connection settings for an OpenAI-style embeddings endpoint.
#[derive(Debug, Clone)]
pub struct EmbeddingSettings {
    /// API key sent as bearer token (OpenAI) or `api-key` header (Azure).
    pub api_key: String,
    /// API base URL, or the Azure resource endpoint when `azure_api_version` is set.
    pub base_url: String,
    /// Model identifier, or deployment name on Azure.
    pub model: String,
    /// Optional dimension override when supported by the model.
    pub dimensions: Option<usize>,
    /// Azure `api-version` query value; switches the client into Azure mode.
    pub azure_api_version: Option<String>,
    /// Transport timeout per request.
    pub timeout: Duration,
}

/// Blocking embeddings client. One request per input, no retries.
#[derive(Clone)]
pub struct OpenAiEmbedder {
    client: Client,
    endpoint: String,
    model: String,
    dimensions: Option<usize>,
}

impl OpenAiEmbedder {
    /// Builds a new embeddings client.
    pub fn new(settings: &EmbeddingSettings) -> Result<Self> {
        anyhow::ensure!(!settings.model.trim().is_empty(), "missing embedding model name");
        let (client, endpoint) = build_client(
            &settings.api_key,
            &settings.base_url,
            &settings.model,
            settings.azure_api_version.as_deref(),
            "embeddings",
            settings.timeout,
        )?;
        Ok(Self {
            client,
            endpoint,
            model: settings.model.clone(),
            dimensions: settings.dimensions,
        })
    }

    /// Fully-resolved embeddings URL.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Sends one input and returns its vector, surfacing any failure.
    pub fn try_embed(&self, input: &str) -> Result<Vec<f32>> {
        let request = EmbeddingRequest {
            model: &self.model,
            input,
            dimensions: self.dimensions,
        };
        let resp = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .context("failed to call embeddings endpoint")?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp
                .text()
                .unwrap_or_else(|_| "<body unavailable>".to_string());
            anyhow::bail!("embeddings request failed ({}): {}", status, body);
        }
        let parsed: EmbeddingResponse = resp
            .json()
            .context("failed to parse embedding response")?;
        let embedding = parsed
            .data
            .into_iter()
            .min_by_key(|entry| entry.index)
            .map(|entry| entry.embedding)
            .ok_or_else(|| anyhow!("embedding response contained no vectors"))?;
        anyhow::ensure!(
            !embedding.is_empty(),
            "embedding response contained an empty vector"
        );
        Ok(embedding)
    }
}

impl Embedder for OpenAiEmbedder {
    fn embed(&self, text: &str) -> Option<Vec<f32>> {
        match self.try_embed(text) {
            Ok(vector) => Some(vector),
            Err(err) => {
                warn!("embedding generation failed: {err:#}");
                None
            }
        }
    }
}

/// Builds a blocking client plus the resolved URL for an OpenAI-style operation
/// (`embeddings`, `chat/completions`).
pub(crate) fn build_client(
    api_key: &str,
    base_url: &str,
    model: &str,
    azure_api_version: Option<&str>,
    operation: &str,
    timeout: Duration,
) -> Result<(Client, String)> {
    anyhow::ensure!(!api_key.trim().is_empty(), "missing OpenAI API key");
    let base = base_url.trim_end_matches('/');
    let mut headers = HeaderMap::new();
    let endpoint = match azure_api_version {
        Some(version) => {
            headers.insert(
                "api-key",
                HeaderValue::from_str(api_key.trim()).context("invalid Azure OpenAI API key")?,
            );
            format!("{base}/openai/deployments/{model}/{operation}?api-version={version}")
        }
        None => {
            let auth = format!("Bearer {}", api_key.trim());
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&auth).context("invalid OpenAI API key")?,
            );
            format!("{base}/{operation}")
        }
    };
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    let client = Client::builder()
        .timeout(timeout)
        .default_headers(headers)
        .build()
        .context("failed to build OpenAI HTTP client")?;
    Ok((client, endpoint))
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    #[serde(default)]
    index: usize,
}
