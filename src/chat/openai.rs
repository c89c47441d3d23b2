use std::io::BufReader;

use anyhow::{bail, Context, Result};
use reqwest::blocking::{Client, Response};
use serde::{Deserialize, Serialize};

use super::{with_system_prompt, ChatMessage, ChatProvider, ChatSettings, ChatStream, SseLines};
use crate::embedder::openai::build_client;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// OpenAI-compatible (or Azure OpenAI) chat completions backend.
pub struct OpenAiChat {
    client: Client,
    endpoint: String,
    model: String,
    temperature: f32,
    max_tokens: usize,
    top_p: f32,
    system_prompt: String,
}

impl OpenAiChat {
    /// Builds a client for the configured endpoint.
    pub fn new(settings: &ChatSettings) -> Result<Self> {
        let (client, endpoint) = build_client(
            &settings.api_key,
            settings.base_url.as_deref().unwrap_or(DEFAULT_BASE_URL),
            &settings.model,
            settings.azure_api_version.as_deref(),
            "chat/completions",
            settings.timeout,
        )?;
        Ok(Self {
            client,
            endpoint,
            model: settings.model.clone(),
            temperature: settings.temperature,
            max_tokens: settings.max_tokens,
            top_p: settings.top_p,
            system_prompt: settings.system_prompt.clone(),
        })
    }

    /// Fully-resolved chat completions URL.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn request(&self, history: &[ChatMessage], stream: bool) -> Result<Response> {
        let messages = with_system_prompt(history, &self.system_prompt);
        let body = ChatRequest {
            model: &self.model,
            messages: &messages,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            top_p: self.top_p,
            stream,
        };
        let resp = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .context("failed to call OpenAI chat completions")?;
        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp
                .text()
                .unwrap_or_else(|_| "<body unavailable>".to_string());
            bail!("OpenAI returned {}: {}", status, text);
        }
        Ok(resp)
    }
}

impl ChatProvider for OpenAiChat {
    fn complete(&self, history: &[ChatMessage]) -> Result<String> {
        let parsed: ChatResponse = self
            .request(history, false)?
            .json()
            .context("failed to parse OpenAI response")?;
        let answer = parsed
            .choices
            .into_iter()
            .find_map(|choice| choice.message.content)
            .unwrap_or_default();
        Ok(answer)
    }

    fn stream(&self, history: &[ChatMessage]) -> Result<ChatStream> {
        let resp = self.request(history, true)?;
        let lines = SseLines::new(BufReader::new(resp));
        Ok(Box::new(lines.filter_map(|line| {
            let data = match line.context("failed to read OpenAI stream") {
                Ok(data) => data,
                Err(err) => return Some(Err(err)),
            };
            match serde_json::from_str::<StreamChunk>(&data) {
                Ok(chunk) => chunk.into_text().map(Ok),
                Err(err) => Some(Err(err).context("failed to parse OpenAI stream chunk")),
            }
        })))
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    max_tokens: usize,
    top_p: f32,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: AssistantMessage,
}

#[derive(Debug, Deserialize)]
struct AssistantMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

impl StreamChunk {
    fn into_text(self) -> Option<String> {
        self.choices
            .into_iter()
            .next()
            .and_then(|choice| choice.delta.content)
            .filter(|text| !text.is_empty())
    }
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: Delta,
}

#[derive(Debug, Default, Deserialize)]
struct Delta {
    #[serde(default)]
    content: Option<String>,
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::chat::{ProviderKind, DEFAULT_SYSTEM_PROMPT};

    fn settings() -> ChatSettings {
        ChatSettings {
            provider: ProviderKind::OpenAi,
            api_key: "sk-test".into(),
            base_url: Some("https://example.openai.azure.com".into()),
            model: "gpt-35-turbo".into(),
            azure_api_version: Some("2024-02-01".into()),
            temperature: 0.7,
            max_tokens: 1000,
            top_p: 0.95,
            system_prompt: DEFAULT_SYSTEM_PROMPT.into(),
            timeout: Duration::from_secs(5),
        }
    }

    #[test]
    fn resolves_azure_chat_endpoint() {
        let chat = OpenAiChat::new(&settings()).expect("client");
        assert_eq!(
            chat.endpoint(),
            "https://example.openai.azure.com/openai/deployments/gpt-35-turbo/chat/completions?api-version=2024-02-01"
        );
    }

    #[test]
    fn request_omits_stream_flag_when_disabled() {
        let messages = vec![ChatMessage::user("hi")];
        let body = ChatRequest {
            model: "m",
            messages: &messages,
            temperature: 0.7,
            max_tokens: 10,
            top_p: 0.95,
            stream: false,
        };
        let value = serde_json::to_value(&body).expect("json");
        assert!(value.get("stream").is_none());
        assert_eq!(value["messages"][0]["role"], "user");
    }

    #[test]
    fn stream_chunk_extracts_delta_text() {
        let chunk: StreamChunk =
            serde_json::from_str(r#"{"choices":[{"delta":{"content":"Hel"}}]}"#).expect("parse");
        assert_eq!(chunk.into_text().as_deref(), Some("Hel"));

        let role_only: StreamChunk =
            serde_json::from_str(r#"{"choices":[{"delta":{"role":"assistant"}}]}"#)
                .expect("parse");
        assert_eq!(role_only.into_text(), None);

        let empty: StreamChunk = serde_json::from_str(r#"{"choices":[]}"#).expect("parse");
        assert_eq!(empty.into_text(), None);
    }
}
