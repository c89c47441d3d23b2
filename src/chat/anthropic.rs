use std::io::BufReader;

use anyhow::{anyhow, bail, Context, Result};
use reqwest::blocking::{Client, Response};
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use serde::{Deserialize, Serialize};

use super::{with_system_prompt, ChatMessage, ChatProvider, ChatSettings, ChatStream, SseLines};

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1";

/// Anthropic Messages API backend.
pub struct AnthropicChat {
    client: Client,
    endpoint: String,
    model: String,
    temperature: f32,
    max_tokens: usize,
    system_prompt: String,
}

impl AnthropicChat {
    /// Builds a client against `settings.base_url` or the public API.
    pub fn new(settings: &ChatSettings) -> Result<Self> {
        anyhow::ensure!(!settings.api_key.trim().is_empty(), "missing Anthropic API key");
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-api-key",
            HeaderValue::from_str(settings.api_key.trim()).context("invalid Anthropic API key")?,
        );
        headers.insert("anthropic-version", HeaderValue::from_static("2023-06-01"));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let client = Client::builder()
            .timeout(settings.timeout)
            .default_headers(headers)
            .build()
            .context("failed to build Anthropic HTTP client")?;
        let base = settings
            .base_url
            .as_deref()
            .unwrap_or(DEFAULT_BASE_URL)
            .trim_end_matches('/');
        Ok(Self {
            client,
            endpoint: format!("{base}/messages"),
            model: settings.model.clone(),
            temperature: settings.temperature,
            max_tokens: settings.max_tokens,
            system_prompt: settings.system_prompt.clone(),
        })
    }

    /// Fully-resolved messages URL.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn request(&self, history: &[ChatMessage], stream: bool) -> Result<Response> {
        let body = build_request(
            &self.model,
            &self.system_prompt,
            history,
            self.temperature,
            self.max_tokens,
            stream,
        );
        let resp = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .context("failed to call Anthropic messages API")?;
        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp
                .text()
                .unwrap_or_else(|_| "<body unavailable>".to_string());
            bail!("Anthropic returned {}: {}", status, text);
        }
        Ok(resp)
    }
}

impl ChatProvider for AnthropicChat {
    fn complete(&self, history: &[ChatMessage]) -> Result<String> {
        let parsed: AnthropicResponse = self
            .request(history, false)?
            .json()
            .context("failed to parse Anthropic response")?;
        let answer = parsed
            .content
            .into_iter()
            .filter_map(|block| match block {
                AnthropicResponseBlock::Text { text } => Some(text),
                AnthropicResponseBlock::Other => None,
            })
            .collect::<Vec<_>>()
            .join("\n");
        if answer.is_empty() {
            bail!("Anthropic response missing text content");
        }
        Ok(answer)
    }

    fn stream(&self, history: &[ChatMessage]) -> Result<ChatStream> {
        let resp = self.request(history, true)?;
        let lines = SseLines::new(BufReader::new(resp));
        Ok(Box::new(lines.filter_map(|line| {
            let data = match line.context("failed to read Anthropic stream") {
                Ok(data) => data,
                Err(err) => return Some(Err(err)),
            };
            match serde_json::from_str::<StreamEvent>(&data) {
                Ok(event) => event.into_text().transpose(),
                Err(err) => Some(Err(err).context("failed to parse Anthropic stream event")),
            }
        })))
    }
}

/// Splits system turns out of the history into Anthropic's `system` field.
fn build_request<'a>(
    model: &'a str,
    system_prompt: &str,
    history: &'a [ChatMessage],
    temperature: f32,
    max_tokens: usize,
    stream: bool,
) -> AnthropicRequest<'a> {
    let messages = with_system_prompt(history, system_prompt);
    let system = messages
        .iter()
        .filter(|message| message.is_system())
        .map(|message| message.content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n");
    let turns = history
        .iter()
        .filter(|message| !message.is_system())
        .map(|message| AnthropicMessage {
            role: &message.role,
            content: vec![AnthropicContentBlock {
                kind: "text",
                text: &message.content,
            }],
        })
        .collect();
    AnthropicRequest {
        model,
        max_tokens,
        temperature,
        system,
        messages: turns,
        stream,
    }
}

#[derive(Serialize)]
struct AnthropicRequest<'a> {
    model: &'a str,
    max_tokens: usize,
    temperature: f32,
    system: String,
    messages: Vec<AnthropicMessage<'a>>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
}

#[derive(Serialize)]
struct AnthropicMessage<'a> {
    role: &'a str,
    content: Vec<AnthropicContentBlock<'a>>,
}

#[derive(Serialize)]
struct AnthropicContentBlock<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicResponseBlock>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum AnthropicResponseBlock {
    Text {
        text: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum StreamEvent {
    ContentBlockDelta {
        delta: StreamDelta,
    },
    Error {
        error: StreamError,
    },
    #[serde(other)]
    Other,
}

impl StreamEvent {
    fn into_text(self) -> Result<Option<String>> {
        match self {
            StreamEvent::ContentBlockDelta {
                delta: StreamDelta::TextDelta { text },
            } if !text.is_empty() => Ok(Some(text)),
            StreamEvent::Error { error } => Err(anyhow!(
                "Anthropic stream error ({}): {}",
                error.kind,
                error.message
            )),
            _ => Ok(None),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum StreamDelta {
    TextDelta {
        text: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct StreamError {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_turns_move_to_system_field() {
        let history = vec![
            ChatMessage::system("custom"),
            ChatMessage::user("hi"),
            ChatMessage::assistant("hello"),
        ];
        let request = build_request("claude", "default", &history, 0.7, 100, false);
        assert_eq!(request.system, "custom");
        assert_eq!(request.messages.len(), 2);

        let value = serde_json::to_value(&request).expect("json");
        assert_eq!(value["messages"][0]["role"], "user");
        assert_eq!(value["messages"][0]["content"][0]["text"], "hi");
        assert!(value.get("stream").is_none());
        assert!(value.get("top_p").is_none());
    }

    #[test]
    fn default_system_prompt_applies_without_system_turn() {
        let history = vec![ChatMessage::user("hi")];
        let request = build_request("claude", "default", &history, 0.7, 100, true);
        assert_eq!(request.system, "default");
        assert!(request.stream);
    }

    #[test]
    fn stream_events_yield_text_deltas_only() {
        let delta: StreamEvent = serde_json::from_str(
            r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"Hi"}}"#,
        )
        .expect("parse");
        assert_eq!(delta.into_text().expect("text"), Some("Hi".to_string()));

        let ping: StreamEvent = serde_json::from_str(r#"{"type":"ping"}"#).expect("parse");
        assert_eq!(ping.into_text().expect("ping"), None);

        let error: StreamEvent = serde_json::from_str(
            r#"{"type":"error","error":{"type":"overloaded_error","message":"Overloaded"}}"#,
        )
        .expect("parse");
        let err = error.into_text().unwrap_err();
        assert!(err.to_string().contains("Overloaded"));
    }
}
