//! Chat-completion providers used by the conversational endpoints.

mod anthropic;
mod openai;

use std::io::BufRead;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

pub use anthropic::AnthropicChat;
pub use openai::OpenAiChat;

/// System prompt prepended when a history carries none.
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant. Answer the user's \
questions accurately and concisely, and say so when you do not know the answer.";

/// One turn of a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// `system`, `user` or `assistant`.
    pub role: String,
    /// Message text.
    pub content: String,
}

impl ChatMessage {
    /// Builds a system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self::with_role("system", content)
    }

    /// Builds a user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self::with_role("user", content)
    }

    /// Builds an assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::with_role("assistant", content)
    }

    fn with_role(role: &str, content: impl Into<String>) -> Self {
        Self {
            role: role.to_string(),
            content: content.into(),
        }
    }

    /// True for `system` messages.
    pub fn is_system(&self) -> bool {
        self.role == "system"
    }
}

/// Incremental reply fragments from a streaming completion.
pub type ChatStream = Box<dyn Iterator<Item = Result<String>> + Send>;

/// Trait implemented by concrete chat backends.
pub trait ChatProvider: Send + Sync {
    /// Returns the full assistant reply for `history`.
    fn complete(&self, history: &[ChatMessage]) -> Result<String>;

    /// Returns the assistant reply as a stream of text fragments.
    fn stream(&self, history: &[ChatMessage]) -> Result<ChatStream>;
}

impl<T: ChatProvider + ?Sized> ChatProvider for Arc<T> {
    fn complete(&self, history: &[ChatMessage]) -> Result<String> {
        (**self).complete(history)
    }

    fn stream(&self, history: &[ChatMessage]) -> Result<ChatStream> {
        (**self).stream(history)
    }
}

/// Supported chat backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ProviderKind {
    /// OpenAI-compatible or Azure OpenAI chat completions.
    #[value(name = "openai")]
    OpenAi,
    /// Anthropic Messages API.
    Anthropic,
}

/// Generation parameters and credentials for a chat backend.
#[derive(Debug, Clone)]
pub struct ChatSettings {
    /// Backend to use.
    pub provider: ProviderKind,
    /// API key for the backend.
    pub api_key: String,
    /// API base URL (Azure resource endpoint when `azure_api_version` is set);
    /// `None` selects the backend's public endpoint.
    pub base_url: Option<String>,
    /// Model or deployment name.
    pub model: String,
    /// Azure `api-version`; ignored by Anthropic.
    pub azure_api_version: Option<String>,
    /// Sampling temperature.
    pub temperature: f32,
    /// Upper bound on generated tokens.
    pub max_tokens: usize,
    /// Nucleus sampling parameter; ignored by Anthropic.
    pub top_p: f32,
    /// System prompt prepended to histories without one.
    pub system_prompt: String,
    /// Transport timeout per request.
    pub timeout: Duration,
}

/// Returns `history` with `system_prompt` prepended unless it already opens
/// with a system message.
pub fn with_system_prompt(history: &[ChatMessage], system_prompt: &str) -> Vec<ChatMessage> {
    if history.first().is_some_and(ChatMessage::is_system) {
        return history.to_vec();
    }
    let mut messages = Vec::with_capacity(history.len() + 1);
    messages.push(ChatMessage::system(system_prompt));
    messages.extend_from_slice(history);
    messages
}

/// Builds the configured chat backend.
pub fn build_provider(settings: &ChatSettings) -> Result<Arc<dyn ChatProvider>> {
    Ok(match settings.provider {
        ProviderKind::OpenAi => Arc::new(OpenAiChat::new(settings)?),
        ProviderKind::Anthropic => Arc::new(AnthropicChat::new(settings)?),
    })
}

/// Iterates the `data:` payloads of a server-sent event stream, ending at
/// `[DONE]` or end of input.
pub(crate) struct SseLines<R> {
    reader: R,
    done: bool,
}

impl<R: BufRead> SseLines<R> {
    pub(crate) fn new(reader: R) -> Self {
        Self {
            reader,
            done: false,
        }
    }
}

impl<R: BufRead> Iterator for SseLines<R> {
    type Item = std::io::Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let mut line = String::new();
        loop {
            line.clear();
            match self.reader.read_line(&mut line) {
                Ok(0) => {
                    self.done = true;
                    return None;
                }
                Ok(_) => {}
                Err(err) => {
                    self.done = true;
                    return Some(Err(err));
                }
            }
            let Some(data) = line.trim_end().strip_prefix("data:") else {
                continue;
            };
            let data = data.trim_start();
            if data.is_empty() {
                continue;
            }
            if data == "[DONE]" {
                self.done = true;
                return None;
            }
            return Some(Ok(data.to_string()));
        }
    }
}
