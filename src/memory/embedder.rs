//! Text embedders for the retrieval memory.

use crate::config::{MemoryConfig, ModelConfig, Provider};
use crate::llm::{LlmError, OllamaClient, OpenAiClient};
use async_trait::async_trait;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Embedding failures.
#[derive(Debug, thiserror::Error)]
pub enum EmbeddingError {
    #[error("embedding request failed: {0}")]
    Provider(#[from] LlmError),
    #[error("embedding has dimension {got}, store expects {expected}")]
    DimensionMismatch { expected: usize, got: usize },
}

/// Turns text into dense vectors.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed_documents(&self, documents: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError>;

    async fn embed_query(&self, query: &str) -> Result<Vec<f32>, EmbeddingError> {
        let mut vectors = self.embed_documents(&[query.to_string()]).await?;
        Ok(vectors.pop().unwrap_or_default())
    }

    fn display_name(&self) -> &str;
}

/// Local bag-of-words embedder using the hashing trick.
///
/// Lowercased alphanumeric tokens are hashed into `dimension` buckets and
/// the resulting vector is L2-normalised. No vocabulary, no network.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimension: usize,
}

impl HashingEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }

    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];

        let tokens = text
            .split(|c: char| !c.is_alphanumeric() && c != '_')
            .filter(|t| !t.is_empty())
            .map(str::to_lowercase);

        for token in tokens {
            let mut hasher = DefaultHasher::new();
            token.hash(&mut hasher);
            let hash = hasher.finish();
            let bucket = (hash % self.dimension as u64) as usize;
            // Top hash bit picks the sign
            let sign = if (hash >> 63) & 1 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }

        normalize(&mut vector);
        vector
    }
}

#[async_trait]
impl Embedder for HashingEmbedder {
    async fn embed_documents(&self, documents: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        Ok(documents.iter().map(|d| self.embed_text(d)).collect())
    }

    fn display_name(&self) -> &str {
        "hashing (local)"
    }
}

enum RemoteBackend {
    Ollama(OllamaClient),
    OpenAi(OpenAiClient),
}

/// Embedder backed by the configured provider's embeddings endpoint.
pub struct RemoteEmbedder {
    backend: RemoteBackend,
    model: String,
}

impl RemoteEmbedder {
    pub fn from_config(model: &ModelConfig, memory: &MemoryConfig) -> Result<Self, LlmError> {
        let backend = match model.provider {
            Provider::Ollama => RemoteBackend::Ollama(OllamaClient::new(
                &model.base_url,
                model.timeout_seconds,
            )?),
            Provider::Openai => {
                let api_key = std::env::var(&model.api_key_env)
                    .map_err(|_| LlmError::MissingApiKey(model.api_key_env.clone()))?;
                RemoteBackend::OpenAi(OpenAiClient::new(
                    &model.base_url,
                    api_key,
                    model.timeout_seconds,
                )?)
            }
        };
        Ok(Self {
            backend,
            model: memory.embedding_model.clone(),
        })
    }
}

#[async_trait]
impl Embedder for RemoteEmbedder {
    async fn embed_documents(&self, documents: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let mut vectors = Vec::with_capacity(documents.len());
        for doc in documents {
            let mut vector = match &self.backend {
                RemoteBackend::Ollama(client) => client.embed(&self.model, doc).await?,
                RemoteBackend::OpenAi(client) => client.embed(&self.model, doc).await?,
            };
            normalize(&mut vector);
            vectors.push(vector);
        }
        Ok(vectors)
    }

    fn display_name(&self) -> &str {
        &self.model
    }
}

/// Build the embedder selected by the configuration.
pub fn build_embedder(
    model: &ModelConfig,
    memory: &MemoryConfig,
) -> Result<Arc<dyn Embedder>, LlmError> {
    let embedder: Arc<dyn Embedder> = match memory.embedder {
        crate::config::EmbedderKind::Hashing => Arc::new(HashingEmbedder::new(memory.dimension)),
        crate::config::EmbedderKind::Remote => Arc::new(RemoteEmbedder::from_config(model, memory)?),
    };
    Ok(embedder)
}

fn normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for v in vector.iter_mut() {
            *v /= norm;
        }
    }
}
