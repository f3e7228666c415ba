//! OpenAI-compatible `/chat/completions` backend.

use super::{http_client, ChatMessage, ChatModel, ChatRequest, LlmError};
use async_trait::async_trait;
use reqwest::header;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop: Option<&'a [String]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    user: Option<&'a str>,
}

#[derive(Deserialize)]
struct CompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

/// Client for the OpenAI API or any server speaking the same protocol.
#[derive(Debug, Clone)]
pub struct OpenAiClient {
    base_url: String,
    api_key: String,
    timeout_seconds: Option<u64>,
    http_client: reqwest::Client,
}

impl OpenAiClient {
    pub fn new(
        base_url: &str,
        api_key: String,
        timeout_seconds: Option<u64>,
    ) -> Result<Self, LlmError> {
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
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

        let res = self
            .http_client
            .post(&url)
            .header(header::AUTHORIZATION, format!("Bearer {}", self.api_key))
            .json(body)
            .send()
            .await
            .map_err(|e| LlmError::from_send(e, &self.base_url, self.timeout_seconds))?;

        let status = res.status();
        let text = res.text().await.unwrap_or_default();

        if !status.is_success() {
            return Err(LlmError::Api {
                status: status.as_u16(),
                body: text,
            });
        }

        serde_json::from_str(&text).map_err(|e| LlmError::Decode(e.to_string()))
    }

    /// Embed one text with `model` through `/embeddings`.
    pub async fn embed(&self, model: &str, text: &str) -> Result<Vec<f32>, LlmError> {
        let request = EmbeddingRequest { model, input: text };
        let response: EmbeddingResponse = self.post("/embeddings", &request).await?;
        response
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| LlmError::Decode("embedding response has no data".to_string()))
    }
}

#[async_trait]
impl ChatModel for OpenAiClient {
    async fn complete(&self, request: ChatRequest) -> Result<String, LlmError> {
        debug!(
            model = %request.model,
            "Sending chat completion with {} messages",
            request.messages.len()
        );

        let body = CompletionRequest {
            model: &request.model,
            messages: &request.messages,
            temperature: request.temperature,
            stop: (!request.stop.is_empty()).then_some(request.stop.as_slice()),
            user: request.user.as_deref(),
        };

        let parsed: CompletionResponse = self.post("/chat/completions", &body).await?;
        Ok(parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default())
    }

    fn backend(&self) -> &str {
        "openai"
    }
}
