//! Chat-completion access.
//!
//! The rest of the crate only sees the [`ChatModel`] trait and a plain
//! [`ChatRequest`]; the HTTP backends live in the submodules.

pub mod ollama;
pub mod openai;

use crate::config::{ModelConfig, Provider};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

pub use ollama::OllamaClient;
pub use openai::OpenAiClient;

/// Role of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::System => write!(f, "system"),
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}

/// A role-tagged chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// One completion request.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatRequest {
    pub model: String,
    pub temperature: f32,
    /// Generation stops before any of these sequences.
    pub stop: Vec<String>,
    /// End-user identifier forwarded to the API for abuse monitoring.
    pub user: Option<String>,
    pub messages: Vec<ChatMessage>,
}

impl ChatRequest {
    pub fn new(model: impl Into<String>, messages: Vec<ChatMessage>) -> Self {
        Self {
            model: model.into(),
            temperature: 0.0,
            stop: Vec::new(),
            user: None,
            messages,
        }
    }

    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn stop<S: Into<String>>(mut self, stop: impl IntoIterator<Item = S>) -> Self {
        self.stop = stop.into_iter().map(Into::into).collect();
        self
    }

    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }
}

/// Failures talking to a model API. None of these are retried.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("request timed out after {0}s")]
    Timeout(u64),
    #[error("cannot connect to model API at {0}")]
    Connect(String),
    #[error("model API error {status}: {body}")]
    Api { status: u16, body: String },
    #[error("failed to decode model API response: {0}")]
    Decode(String),
    #[error("missing API key: set {0}")]
    MissingApiKey(String),
    #[error("failed to send request: {0}")]
    Http(#[from] reqwest::Error),
}

impl LlmError {
    /// Classify a `reqwest` send error the way users need to see it.
    pub(crate) fn from_send(err: reqwest::Error, base_url: &str, timeout: Option<u64>) -> Self {
        if err.is_timeout() {
            LlmError::Timeout(timeout.unwrap_or_default())
        } else if err.is_connect() {
            LlmError::Connect(base_url.to_string())
        } else {
            LlmError::Http(err)
        }
    }
}

/// A chat-completion backend.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Send the request and return the generated text.
    async fn complete(&self, request: ChatRequest) -> Result<String, LlmError>;

    /// Short backend name for logs.
    fn backend(&self) -> &str;
}

/// Build a `reqwest` client with the configured timeout.
pub(crate) fn http_client(timeout_seconds: Option<u64>) -> Result<reqwest::Client, LlmError> {
    let mut builder = reqwest::Client::builder();
    if let Some(secs) = timeout_seconds {
        builder = builder.timeout(Duration::from_secs(secs));
    }
    Ok(builder.build()?)
}

/// Build the chat backend selected by the configuration.
pub fn build_chat_model(config: &ModelConfig) -> Result<Arc<dyn ChatModel>, LlmError> {
    let model: Arc<dyn ChatModel> = match config.provider {
        Provider::Ollama => Arc::new(OllamaClient::new(&config.base_url, config.timeout_seconds)?),
        Provider::Openai => {
            let api_key = std::env::var(&config.api_key_env)
                .ok()
                .filter(|k| !k.trim().is_empty())
                .ok_or_else(|| LlmError::MissingApiKey(config.api_key_env.clone()))?;
            Arc::new(OpenAiClient::new(
                &config.base_url,
                api_key,
                config.timeout_seconds,
            )?)
        }
    };
    Ok(model)
}
