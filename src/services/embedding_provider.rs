use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use thiserror::Error;

#[derive(Debug, Error, Clone)]
pub enum ProviderError {
    #[error("Embedding request failed: {0}")]
    Http(String),
    #[error("Embedding model returned no vectors")]
    NoEmbeddings,
}

/// Turns query text into a vector comparable with the indexed course chunks.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn generate_embedding(&self, content: &str) -> Result<Vec<f32>, ProviderError>;
}

/// Embeddings from a local Ollama server.
pub struct OllamaProvider {
    ollama: ollama_rs::Ollama,
    model: String,
}

impl OllamaProvider {
    /// `base_url` may carry its own port (`http://host:11434`).
    pub fn new(base_url: String, model: String) -> Self {
        let ollama = match reqwest::Url::parse(&base_url) {
            Ok(url) => {
                let port = url.port().unwrap_or(11434);
                let host = format!("{}://{}", url.scheme(), url.host_str().unwrap_or("localhost"));
                ollama_rs::Ollama::new(host, port)
            }
            Err(_) => ollama_rs::Ollama::default(),
        };

        Self { ollama, model }
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaProvider {
    async fn generate_embedding(&self, content: &str) -> Result<Vec<f32>, ProviderError> {
        use ollama_rs::generation::embeddings::request::{
            EmbeddingsInput, GenerateEmbeddingsRequest,
        };

        let input = EmbeddingsInput::Single(content.to_string());
        let request = GenerateEmbeddingsRequest::new(self.model.clone(), input);

        let response = self
            .ollama
            .generate_embeddings(request)
            .await
            .map_err(|e| ProviderError::Http(e.to_string()))?;

        let first = response
            .embeddings
            .into_iter()
            .next()
            .ok_or(ProviderError::NoEmbeddings)?;

        tracing::debug!("Embedded {} chars with {}", content.len(), self.model);
        Ok(first.into_iter().map(|v| v as f32).collect())
    }
}

/// Canned embedding for tests; counts how often it is asked.
pub struct MockProvider {
    response: Result<Vec<f32>, ProviderError>,
    call_count: Arc<Mutex<usize>>,
}

impl MockProvider {
    pub fn new_success(embedding: Vec<f32>) -> Self {
        Self {
            response: Ok(embedding),
            call_count: Arc::new(Mutex::new(0)),
        }
    }

    pub fn new_error(error: ProviderError) -> Self {
        Self {
            response: Err(error),
            call_count: Arc::new(Mutex::new(0)),
        }
    }

    pub fn calls(&self) -> usize {
        self.call_count.lock().map(|n| *n).unwrap_or(0)
    }
}

#[async_trait]
impl EmbeddingProvider for MockProvider {
    async fn generate_embedding(&self, _content: &str) -> Result<Vec<f32>, ProviderError> {
        if let Ok(mut count) = self.call_count.lock() {
            *count += 1;
        }
        self.response.clone()
    }
}
