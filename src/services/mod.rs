pub mod embedding_provider;
pub mod llm_bridge_client;
pub mod model_client;
pub mod prompt_service;
pub mod vector_store;

// Re-export for convenience
pub use embedding_provider::{EmbeddingProvider, MockProvider, OllamaProvider};
pub use llm_bridge_client::LlmBridgeClient;
pub use model_client::{MockModelClient, ModelClient, ModelError};
pub use prompt_service::{FilePromptStore, PromptError, PromptService, PromptStore, StaticPromptStore};
pub use vector_store::{ChromaVectorStore, VectorStore, VectorStoreError};
