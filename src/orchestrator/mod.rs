pub mod postprocess;
pub mod prompt_builder;
pub mod title;

use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::models::internal::{ChatMessage, ChatRequest, ChatResult};
use crate::models::pedagogy::{self, PedagogyMode};
use crate::services::model_client::{ModelClient, ModelError};
use crate::services::prompt_service::{PromptService, DEFAULT_SEPARATOR};
use crate::services::vector_store::{VectorStore, VectorStoreError};
use crate::storage::memory::{
    format_history, short_id, ConversationMemory, Exchange, MemoryError,
};

use postprocess::clean_answer;
use prompt_builder::{assemble_prompt, join_context, BASE_SYSTEM_PREAMBLE};

/// Tunables for a chat turn.
#[derive(Debug, Clone)]
pub struct ChatSettings {
    /// Character budget for the joined course-material block
    pub max_context_chars: usize,
    /// Prior messages fed into the prompt
    pub max_history_messages: usize,
    /// Per-message clip when rendering history into the prompt
    pub history_message_chars: usize,
    pub default_top_k: usize,
    pub generate_titles: bool,
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            max_context_chars: 8000,
            max_history_messages: 10,
            history_message_chars: 500,
            default_top_k: 5,
            generate_titles: true,
        }
    }
}

/// A turn that could not produce an answer.
#[derive(Debug, thiserror::Error)]
pub enum ChatServiceError {
    #[error("Vector search failed: {0}")]
    Retrieval(#[source] VectorStoreError),
    #[error("Agent call failed: {0}")]
    ModelCall(#[source] ModelError),
    #[error("Conversation memory failed: {0}")]
    Memory(#[from] MemoryError),
}

/// Runs one chat turn end to end: session and mode resolution, history,
/// retrieval, prompt assembly, the model call, cleanup and persistence.
///
/// Holds no per-session state of its own; every turn re-reads memory.
pub struct ChatOrchestrator {
    memory: Arc<dyn ConversationMemory>,
    vector_store: Arc<dyn VectorStore>,
    model: Arc<dyn ModelClient>,
    prompts: Arc<PromptService>,
    settings: ChatSettings,
}

impl ChatOrchestrator {
    pub fn new(
        memory: Arc<dyn ConversationMemory>,
        vector_store: Arc<dyn VectorStore>,
        model: Arc<dyn ModelClient>,
        prompts: Arc<PromptService>,
        settings: ChatSettings,
    ) -> Self {
        Self {
            memory,
            vector_store,
            model,
            prompts,
            settings,
        }
    }

    pub fn memory(&self) -> &Arc<dyn ConversationMemory> {
        &self.memory
    }

    pub fn prompts(&self) -> &Arc<PromptService> {
        &self.prompts
    }

    pub fn settings(&self) -> &ChatSettings {
        &self.settings
    }

    #[tracing::instrument(
        skip(self, request),
        fields(session = tracing::field::Empty, top_k = ?request.top_k)
    )]
    pub async fn chat(&self, request: ChatRequest) -> Result<ChatResult, ChatServiceError> {
        let (session_id, is_new_session) = self.resolve_session(request.session_id.as_deref()).await?;
        let sid = short_id(&session_id).to_string();
        tracing::Span::current().record("session", sid.as_str());

        let (mode, persist_mode) = self
            .resolve_mode(&session_id, request.pedagogy_mode.as_deref())
            .await?;

        let history = if request.include_history && !is_new_session {
            self.memory
                .get_history(&session_id, Some(self.settings.max_history_messages))
                .await?
        } else {
            Vec::new()
        };
        let history_block = format_history(&history, Some(self.settings.history_message_chars));

        let top_k = request.top_k.unwrap_or(self.settings.default_top_k);
        let chunks = self
            .vector_store
            .semantic_search(&request.query, top_k)
            .await
            .map_err(|e| {
                error!("Vector search failed for session {}: {}", sid, e);
                ChatServiceError::Retrieval(e)
            })?;
        let context_ids: Vec<String> = chunks.iter().map(|c| c.id.clone()).collect();
        let context = join_context(&chunks, self.settings.max_context_chars);

        let system_prompt = self.system_prompt(mode).await;
        let prompt = assemble_prompt(&system_prompt, &history_block, &context, &request.query);
        debug!(
            "Session {}: prompt assembled ({} chars, {} history messages, {} chunks)",
            sid,
            prompt.chars().count(),
            history.len(),
            chunks.len()
        );

        let reply = self
            .model
            .chat(&[ChatMessage::user(prompt)])
            .await
            .map_err(|e| {
                error!("Agent call failed for session {}: {}", sid, e);
                ChatServiceError::ModelCall(e)
            })?;

        let answer = clean_answer(&reply.text);

        // Nothing is written until the model has answered, then the whole
        // turn lands in one mutation.
        self.memory
            .append_exchange(
                &session_id,
                Exchange {
                    pedagogy_mode: persist_mode.then(|| mode.as_str().to_string()),
                    question: request.query.clone(),
                    question_tokens: reply.tokens_input,
                    answer: answer.clone(),
                    answer_tokens: reply.tokens_output,
                    context_ids: context_ids.clone(),
                },
            )
            .await?;

        let title = if is_new_session && self.settings.generate_titles {
            let title = title::generate_title(self.model.as_ref(), &request.query).await;
            if let Err(e) = self.memory.set_session_title(&session_id, &title).await {
                warn!("Could not store title for session {}: {}", sid, e);
            }
            Some(title)
        } else {
            None
        };

        info!(
            "Session {}: answered in {} mode (new: {}, history: {}, chunks: {})",
            sid,
            mode,
            is_new_session,
            history.len(),
            context_ids.len()
        );

        Ok(ChatResult {
            answer,
            session_id,
            is_new_session,
            history_length: history.len(),
            pedagogy_mode: mode,
            context_ids,
            tokens_input: reply.tokens_input,
            tokens_output: reply.tokens_output,
            model_id: reply.model_id,
            title,
        })
    }

    /// Blank ids are treated as absent.
    async fn resolve_session(&self, requested: Option<&str>) -> Result<(String, bool), MemoryError> {
        match requested.map(str::trim).filter(|id| !id.is_empty()) {
            Some(id) => {
                let exists = self.memory.session_exists(id).await?;
                Ok((id.to_string(), !exists))
            }
            None => {
                let id = Uuid::new_v4().to_string();
                debug!("Generated session id {}", short_id(&id));
                Ok((id, true))
            }
        }
    }

    /// Returns the mode for this turn and whether it must be stored.
    ///
    /// An explicit mode that fails validation becomes the default, which is
    /// then stored like any explicit choice. Without an explicit mode the
    /// stored value is read and retired names are mapped forward.
    async fn resolve_mode(
        &self,
        session_id: &str,
        requested: Option<&str>,
    ) -> Result<(PedagogyMode, bool), MemoryError> {
        match requested {
            Some(raw) => {
                let mode = self.prompts.validate_mode(Some(raw)).unwrap_or_else(|e| {
                    warn!("{}; falling back to '{}'", e, PedagogyMode::default());
                    PedagogyMode::default()
                });
                Ok((mode, true))
            }
            None => {
                let stored = self.memory.get_pedagogy_mode(session_id).await?;
                Ok((pedagogy::migrate_stored_mode(&stored), false))
            }
        }
    }

    async fn system_prompt(&self, mode: PedagogyMode) -> String {
        match self
            .prompts
            .get_combined_prompt(BASE_SYSTEM_PREAMBLE, mode, DEFAULT_SEPARATOR)
            .await
        {
            Ok(prompt) => prompt,
            Err(e) => {
                warn!("Using base preamble only, {} mode prompt unavailable: {}", mode, e);
                BASE_SYSTEM_PREAMBLE.to_string()
            }
        }
    }
}
