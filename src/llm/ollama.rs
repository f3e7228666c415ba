//! Ollama `/api/chat` backend.

use super::{http_client, ChatMessage, ChatModel, ChatRequest, LlmError};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Ollama chat API request.
#[derive(Debug, Serialize)]
struct OllamaChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
    options: OllamaOptions<'a>,
}

#[derive(Debug, Serialize)]
struct OllamaOptions<'a> {
    temperature: f32,
    #[serde(skip_serializing_if = "no_stop")]
    stop: &'a [String],
}

fn no_stop(stop: &&[String]) -> bool {
    stop.is_empty()
}

/// Ollama chat API response.
#[derive(Debug, Deserialize)]
struct OllamaChatResponse {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: String,
}

/// Ollama embeddings API request.
#[derive(Debug, Serialize)]
struct OllamaEmbeddingRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Debug, Deserialize)]
struct OllamaEmbeddingResponse {
    embedding: Vec<f32>,
}

/// Client for a local or remote Ollama server.
#[derive(Debug, Clone)]
pub struct OllamaClient {
    base_url: String,
    timeout_seconds: Option<u64>,
    http_client: reqwest::Client,
}

impl OllamaClient {
    pub fn new(base_url: &str, timeout_seconds: Option<u64>) -> Result<Self, LlmError> {
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout_seconds,
            http_client: http_client(timeout_seconds)?,
        })
    }

    async fn post<T: Serialize, R: DeserializeOwned>(
        &self,
        path: &str,
        body: &T,
    ) -> Result<R, LlmError> {
        let url = format!("{}{}", self.base_url, path);

        let response = self
            .http_client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| LlmError::from_send(e, &self.base_url, self.timeout_seconds))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Api { status, body });
        }

        response
            .json()
            .await
            .map_err(|e| LlmError::Decode(e.to_string()))
    }

    /// Embed one text with `model` through `/api/embeddings`.
    pub async fn embed(&self, model: &str, text: &str) -> Result<Vec<f32>, LlmError> {
        let request = OllamaEmbeddingRequest {
            model,
            prompt: text,
        };
        let response: OllamaEmbeddingResponse = self.post("/api/embeddings", &request).await?;
        Ok(response.embedding)
    }
}

#[async_trait]
impl ChatModel for OllamaClient {
    async fn complete(&self, request: ChatRequest) -> Result<String, LlmError> {
        // Ollama has no per-request end-user field; the id only goes to the logs.
        debug!(
            model = %request.model,
            user = request.user.as_deref().unwrap_or("-"),
            "Sending chat request with {} messages",
            request.messages.len()
        );

        let body = OllamaChatRequest {
            model: &request.model,
            messages: &request.messages,
            stream: false,
            options: OllamaOptions {
                temperature: request.temperature,
                stop: &request.stop,
            },
        };

        let response: OllamaChatResponse = self.post("/api/chat", &body).await?;
        Ok(response.message.content)
    }

    fn backend(&self) -> &str {
        "ollama"
    }
}
