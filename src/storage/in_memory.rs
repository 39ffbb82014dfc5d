use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::models::internal::{Message, Role, SessionInfo};
use crate::storage::memory::{
    default_mode_name, recent_window, short_id, total_tokens, ConversationMemory, Exchange,
    MemoryError,
};

/// Volatile session store bounded by `max_sessions`.
///
/// One coarse lock guards the whole map, so session creation and eviction
/// can never interleave.
pub struct InMemoryConversationMemory {
    max_sessions: usize,
    inner: RwLock<Inner>,
}

#[derive(Default)]
struct Inner {
    sessions: HashMap<String, SessionState>,
    /// Monotonic access counter, breaks `last_accessed` ties on eviction
    clock: u64,
}

struct SessionState {
    created_at: DateTime<Utc>,
    last_accessed: DateTime<Utc>,
    access_seq: u64,
    messages: Vec<Message>,
    total_tokens: u64,
    pedagogy_mode: String,
    title: Option<String>,
}

impl SessionState {
    fn new(seq: u64) -> Self {
        let now = Utc::now();
        Self {
            created_at: now,
            last_accessed: now,
            access_seq: seq,
            messages: Vec::new(),
            total_tokens: 0,
            pedagogy_mode: default_mode_name(),
            title: None,
        }
    }

    fn touch(&mut self, seq: u64) {
        self.last_accessed = Utc::now();
        self.access_seq = seq;
    }

    fn push(
        &mut self,
        role: Role,
        content: String,
        tokens: Option<u32>,
        context_ids: Option<Vec<String>>,
    ) {
        self.messages.push(Message {
            role,
            content,
            timestamp: Utc::now(),
            tokens,
            context_ids,
        });
        if let Some(t) = tokens {
            self.total_tokens += u64::from(t);
        }
    }

    fn info(&self, session_id: &str) -> SessionInfo {
        SessionInfo {
            session_id: session_id.to_string(),
            message_count: self.messages.len(),
            created_at: self.created_at,
            last_accessed: self.last_accessed,
            total_tokens: self.total_tokens,
            pedagogy_mode: self.pedagogy_mode.clone(),
            title: self.title.clone(),
        }
    }
}

impl Inner {
    fn next_seq(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    /// The one path through which sessions come into existence.
    fn ensure_session(&mut self, session_id: &str, max_sessions: usize) -> &mut SessionState {
        if !self.sessions.contains_key(session_id) {
            if self.sessions.len() >= max_sessions {
                self.evict_oldest();
            }
            info!("Created new session {}...", short_id(session_id));
        }

        let seq = self.next_seq();
        let session = self
            .sessions
            .entry(session_id.to_string())
            .or_insert_with(|| SessionState::new(seq));
        session.touch(seq);
        session
    }

    fn evict_oldest(&mut self) {
        let oldest = self
            .sessions
            .iter()
            .min_by_key(|(_, s)| (s.last_accessed, s.access_seq))
            .map(|(id, _)| id.clone());

        if let Some(id) = oldest {
            self.sessions.remove(&id);
            info!("Evicted least recently accessed session {}...", short_id(&id));
        }
    }
}

impl InMemoryConversationMemory {
    pub fn new(max_sessions: usize) -> Self {
        Self {
            max_sessions: max_sessions.max(1),
            inner: RwLock::new(Inner::default()),
        }
    }

    pub fn max_sessions(&self) -> usize {
        self.max_sessions
    }
}

impl Default for InMemoryConversationMemory {
    fn default() -> Self {
        Self::new(1000)
    }
}

#[async_trait]
impl ConversationMemory for InMemoryConversationMemory {
    async fn add_message(
        &self,
        session_id: &str,
        role: Role,
        content: &str,
        tokens: Option<u32>,
        context_ids: Option<Vec<String>>,
    ) -> Result<(), MemoryError> {
        let mut inner = self.inner.write().await;
        let session = inner.ensure_session(session_id, self.max_sessions);
        session.push(role, content.to_string(), tokens, context_ids);

        debug!(
            "Added {} message to session {}... (tokens: {})",
            role,
            short_id(session_id),
            tokens.unwrap_or(0)
        );
        Ok(())
    }

    async fn append_exchange(
        &self,
        session_id: &str,
        exchange: Exchange,
    ) -> Result<(), MemoryError> {
        let mut inner = self.inner.write().await;
        let session = inner.ensure_session(session_id, self.max_sessions);

        if let Some(mode) = exchange.pedagogy_mode {
            session.pedagogy_mode = mode;
        }
        session.push(Role::User, exchange.question, exchange.question_tokens, None);
        session.push(
            Role::Assistant,
            exchange.answer,
            exchange.answer_tokens,
            Some(exchange.context_ids),
        );

        debug!(
            "Stored exchange in session {}... ({} messages)",
            short_id(session_id),
            session.messages.len()
        );
        Ok(())
    }

    async fn get_history(
        &self,
        session_id: &str,
        max_messages: Option<usize>,
    ) -> Result<Vec<Message>, MemoryError> {
        let mut inner = self.inner.write().await;
        let seq = inner.next_seq();

        let Some(session) = inner.sessions.get_mut(session_id) else {
            return Ok(Vec::new());
        };
        session.touch(seq);

        Ok(recent_window(&session.messages, max_messages).to_vec())
    }

    async fn session_exists(&self, session_id: &str) -> Result<bool, MemoryError> {
        Ok(self.inner.read().await.sessions.contains_key(session_id))
    }

    async fn get_session_info(
        &self,
        session_id: &str,
    ) -> Result<Option<SessionInfo>, MemoryError> {
        let inner = self.inner.read().await;
        Ok(inner.sessions.get(session_id).map(|s| s.info(session_id)))
    }

    async fn list_sessions(&self) -> Result<Vec<SessionInfo>, MemoryError> {
        let inner = self.inner.read().await;
        Ok(inner
            .sessions
            .iter()
            .map(|(id, s)| s.info(id))
            .collect())
    }

    async fn clear_session(&self, session_id: &str) -> Result<bool, MemoryError> {
        let removed = self.inner.write().await.sessions.remove(session_id).is_some();
        if removed {
            info!("Cleared session {}...", short_id(session_id));
        }
        Ok(removed)
    }

    async fn set_pedagogy_mode(&self, session_id: &str, mode: &str) -> Result<(), MemoryError> {
        let mut inner = self.inner.write().await;
        let session = inner.ensure_session(session_id, self.max_sessions);
        session.pedagogy_mode = mode.to_string();
        debug!(
            "Set pedagogy mode for session {}... to '{}'",
            short_id(session_id),
            mode
        );
        Ok(())
    }

    async fn get_pedagogy_mode(&self, session_id: &str) -> Result<String, MemoryError> {
        let inner = self.inner.read().await;
        Ok(inner
            .sessions
            .get(session_id)
            .map(|s| s.pedagogy_mode.clone())
            .unwrap_or_else(default_mode_name))
    }

    async fn set_session_title(
        &self,
        session_id: &str,
        title: &str,
    ) -> Result<bool, MemoryError> {
        let mut inner = self.inner.write().await;
        match inner.sessions.get_mut(session_id) {
            Some(session) => {
                session.title = Some(title.to_string());
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn prune_sessions_before(&self, cutoff: DateTime<Utc>) -> Result<usize, MemoryError> {
        let mut inner = self.inner.write().await;
        let before = inner.sessions.len();
        inner.sessions.retain(|_, s| s.last_accessed >= cutoff);
        let removed = before - inner.sessions.len();

        if removed > 0 {
            info!("Pruned {} sessions idle since before {}", removed, cutoff);
        }
        Ok(removed)
    }

    async fn truncate_session_history(
        &self,
        session_id: &str,
        max_messages: usize,
    ) -> Result<usize, MemoryError> {
        let mut inner = self.inner.write().await;
        let Some(session) = inner.sessions.get_mut(session_id) else {
            return Ok(0);
        };

        if session.messages.len() <= max_messages {
            return Ok(0);
        }

        let removed = session.messages.len() - max_messages;
        session.messages.drain(..removed);
        session.total_tokens = total_tokens(&session.messages);

        info!(
            "Truncated session {}... removed {} old messages",
            short_id(session_id),
            removed
        );
        Ok(removed)
    }

    async fn session_count(&self) -> Result<usize, MemoryError> {
        Ok(self.inner.read().await.sessions.len())
    }
}
