//! Tutor Controller - retrieval-augmented tutoring core

pub mod config;
pub mod models;
pub mod orchestrator;
pub mod services;
pub mod storage;

// Re-export main types for convenience
pub use crate::config::Config;
pub use crate::models::internal::{ChatRequest, ChatResult, Message, Role, SessionInfo};
pub use crate::models::pedagogy::PedagogyMode;
pub use crate::orchestrator::{ChatOrchestrator, ChatServiceError, ChatSettings};
pub use crate::services::llm_bridge_client::LlmBridgeClient;
pub use crate::services::prompt_service::PromptService;
pub use crate::storage::db::init_db;
pub use crate::storage::memory::{ConversationMemory, MemoryError};
