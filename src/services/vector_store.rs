//! Course-material retrieval: embed a query, search the chunk collection.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

use crate::models::internal::ContextChunk;
use crate::services::embedding_provider::{EmbeddingProvider, ProviderError};
use crate::storage::chroma_client::{ChromaClient, ChromaError};

#[derive(Debug, thiserror::Error)]
pub enum VectorStoreError {
    #[error("Embedding error: {0}")]
    Embedding(#[from] ProviderError),
    #[error("Chroma error: {0}")]
    Chroma(#[from] ChromaError),
    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}

#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Up to `top_k` chunks, most relevant first.
    async fn semantic_search(
        &self,
        query: &str,
        top_k: usize,
    ) -> Result<Vec<ContextChunk>, VectorStoreError>;

    /// Fixed-dimension embedding; a wrong dimension is an error.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, VectorStoreError>;
}

/// Chroma-backed store fed by an embedding provider.
pub struct ChromaVectorStore {
    provider: Arc<dyn EmbeddingProvider>,
    chroma: Arc<ChromaClient>,
    collection: String,
    dimension: usize,
}

impl ChromaVectorStore {
    pub fn new(
        provider: Arc<dyn EmbeddingProvider>,
        chroma: Arc<ChromaClient>,
        collection: impl Into<String>,
        dimension: usize,
    ) -> Self {
        Self {
            provider,
            chroma,
            collection: collection.into(),
            dimension,
        }
    }
}

#[async_trait]
impl VectorStore for ChromaVectorStore {
    async fn semantic_search(
        &self,
        query: &str,
        top_k: usize,
    ) -> Result<Vec<ContextChunk>, VectorStoreError> {
        let embedding = self.embed(query).await?;
        let limit = u32::try_from(top_k).unwrap_or(u32::MAX);

        let hits = self.chroma.query(&self.collection, embedding, limit).await?;
        debug!(
            "Semantic search over '{}' returned {} chunks",
            self.collection,
            hits.len()
        );

        Ok(hits
            .into_iter()
            .map(|hit| ContextChunk {
                id: hit.id,
                text: hit.document,
                score: 1.0 - hit.distance,
            })
            .collect())
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, VectorStoreError> {
        let embedding = self.provider.generate_embedding(text).await?;
        if embedding.len() != self.dimension {
            return Err(VectorStoreError::DimensionMismatch {
                expected: self.dimension,
                actual: embedding.len(),
            });
        }
        Ok(embedding)
    }
}
