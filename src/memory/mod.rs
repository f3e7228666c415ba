//! Retrieval memory for the inspector agent.
//!
//! A flat in-process vector index: every document is embedded on insert and
//! queries return the nearest documents by Euclidean distance. One store
//! lives for the duration of one inspector run.

pub mod embedder;

pub use embedder::{build_embedder, Embedder, EmbeddingError};

use std::sync::Arc;
use tracing::debug;

struct StoredDocument {
    text: String,
    vector: Vec<f32>,
}

/// In-memory vector store with a flat L2 index.
pub struct MemoryStore {
    embedder: Arc<dyn Embedder>,
    documents: Vec<StoredDocument>,
    dimension: Option<usize>,
}

impl MemoryStore {
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        Self {
            embedder,
            documents: Vec::new(),
            dimension: None,
        }
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    /// Every stored document, in insertion order.
    #[cfg(test)]
    pub fn documents(&self) -> impl Iterator<Item = &str> {
        self.documents.iter().map(|d| d.text.as_str())
    }

    /// Embed and insert documents.
    pub async fn add_documents(&mut self, texts: &[String]) -> Result<(), EmbeddingError> {
        let vectors = self.embedder.embed_documents(texts).await?;

        // Nothing is stored unless every vector fits the index
        let expected = self
            .dimension
            .or_else(|| vectors.first().map(Vec::len));
        if let Some(expected) = expected {
            if let Some(bad) = vectors.iter().find(|v| v.len() != expected) {
                return Err(EmbeddingError::DimensionMismatch {
                    expected,
                    got: bad.len(),
                });
            }
            self.dimension = Some(expected);
        }

        for (text, vector) in texts.iter().zip(vectors) {
            self.documents.push(StoredDocument {
                text: text.clone(),
                vector,
            });
        }

        debug!("Memory store now holds {} documents", self.documents.len());
        Ok(())
    }

    /// The `k` documents closest to `query`, nearest first.
    pub async fn relevant_documents(
        &self,
        query: &str,
        k: usize,
    ) -> Result<Vec<String>, EmbeddingError> {
        if self.documents.is_empty() || k == 0 {
            return Ok(Vec::new());
        }

        let query_vector = self.embedder.embed_query(query).await?;
        if let Some(expected) = self.dimension {
            if query_vector.len() != expected {
                return Err(EmbeddingError::DimensionMismatch {
                    expected,
                    got: query_vector.len(),
                });
            }
        }

        let mut scored: Vec<(f32, &StoredDocument)> = self
            .documents
            .iter()
            .map(|doc| (squared_l2(&query_vector, &doc.vector), doc))
            .collect();
        scored.sort_by(|a, b| a.0.total_cmp(&b.0));

        Ok(scored
            .into_iter()
            .take(k)
            .map(|(_, doc)| doc.text.clone())
            .collect())
    }
}

fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}
