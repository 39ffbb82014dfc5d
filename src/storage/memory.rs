//! Conversation memory contract shared by the in-memory and SQLite backends.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use crate::models::internal::{Message, Role, SessionInfo};
use crate::models::pedagogy::PedagogyMode;

/// Banner that opens every rendered history block.
pub const HISTORY_BANNER: &str = "Previous conversation:";

/// A question and its answer, stored together or not at all.
#[derive(Debug, Clone, Default)]
pub struct Exchange {
    /// Written before the messages when set
    pub pedagogy_mode: Option<String>,
    pub question: String,
    pub question_tokens: Option<u32>,
    pub answer: String,
    pub answer_tokens: Option<u32>,
    /// Attached to the answer
    pub context_ids: Vec<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum MemoryError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("Corrupt session record: {0}")]
    Corrupt(String),
}

/// Per-session conversation state, keyed by an opaque session id.
///
/// `max_messages` follows one rule across every method: `None` means no
/// limit, `Some(0)` means zero messages.
///
/// `add_message`, `append_exchange` and `set_pedagogy_mode` create an unknown
/// session as a side effect (evicting the least recently accessed session
/// first when the store is full). Implementations route all three through a
/// single creation path.
#[async_trait]
pub trait ConversationMemory: Send + Sync {
    async fn add_message(
        &self,
        session_id: &str,
        role: Role,
        content: &str,
        tokens: Option<u32>,
        context_ids: Option<Vec<String>>,
    ) -> Result<(), MemoryError>;

    /// Stores a whole turn as one mutation: no reader or evicting writer can
    /// observe the question without its answer, and a failure stores nothing.
    async fn append_exchange(&self, session_id: &str, exchange: Exchange)
        -> Result<(), MemoryError>;

    /// Oldest-first. Unknown sessions yield an empty history and are not created.
    async fn get_history(
        &self,
        session_id: &str,
        max_messages: Option<usize>,
    ) -> Result<Vec<Message>, MemoryError>;

    async fn session_exists(&self, session_id: &str) -> Result<bool, MemoryError>;

    async fn get_session_info(&self, session_id: &str)
        -> Result<Option<SessionInfo>, MemoryError>;

    /// No ordering guarantee.
    async fn list_sessions(&self) -> Result<Vec<SessionInfo>, MemoryError>;

    /// Returns `false` if the session did not exist.
    async fn clear_session(&self, session_id: &str) -> Result<bool, MemoryError>;

    /// Stores `mode` verbatim; validation belongs to the caller.
    async fn set_pedagogy_mode(&self, session_id: &str, mode: &str) -> Result<(), MemoryError>;

    /// Raw stored value, `explanatory` for unknown sessions.
    async fn get_pedagogy_mode(&self, session_id: &str) -> Result<String, MemoryError>;

    /// Returns `false` (and stores nothing) for an unknown session.
    async fn set_session_title(&self, session_id: &str, title: &str)
        -> Result<bool, MemoryError>;

    /// Removes every session last accessed strictly before `cutoff`.
    async fn prune_sessions_before(&self, cutoff: DateTime<Utc>) -> Result<usize, MemoryError>;

    /// Keeps the newest `max_messages`; the token total is recomputed from
    /// what remains.
    async fn truncate_session_history(
        &self,
        session_id: &str,
        max_messages: usize,
    ) -> Result<usize, MemoryError>;

    async fn session_count(&self) -> Result<usize, MemoryError>;

    async fn get_formatted_history(
        &self,
        session_id: &str,
        max_messages: Option<usize>,
    ) -> Result<String, MemoryError> {
        let history = self.get_history(session_id, max_messages).await?;
        Ok(format_history(&history, None))
    }

    async fn prune_old_sessions(&self, max_age_hours: u64) -> Result<usize, MemoryError> {
        let hours = i64::try_from(max_age_hours).unwrap_or(i64::MAX);
        let cutoff = Duration::try_hours(hours)
            .and_then(|age| Utc::now().checked_sub_signed(age))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        self.prune_sessions_before(cutoff).await
    }

    /// Legacy alias: zeroed record instead of `None` for unknown sessions.
    async fn get_session_stats(&self, session_id: &str) -> Result<SessionInfo, MemoryError> {
        Ok(self.get_session_info(session_id).await?.unwrap_or_default())
    }
}

pub fn default_mode_name() -> String {
    PedagogyMode::default().as_str().to_string()
}

/// The newest `max_messages` items, oldest-first.
pub fn recent_window<T>(items: &[T], max_messages: Option<usize>) -> &[T] {
    match max_messages {
        Some(max) if max < items.len() => &items[items.len() - max..],
        _ => items,
    }
}

/// Render history as `Student:`/`Tutor:` lines under [`HISTORY_BANNER`].
///
/// With `max_chars_per_message`, longer message bodies are cut to that many
/// characters and suffixed with `...`. Empty history renders as "".
pub fn format_history(messages: &[Message], max_chars_per_message: Option<usize>) -> String {
    if messages.is_empty() {
        return String::new();
    }

    let mut lines = Vec::with_capacity(messages.len() + 1);
    lines.push(HISTORY_BANNER.to_string());

    for msg in messages {
        let label = match msg.role {
            Role::User => "Student",
            Role::Assistant => "Tutor",
        };
        let body = match max_chars_per_message {
            Some(max) if msg.content.chars().count() > max => {
                let clipped: String = msg.content.chars().take(max).collect();
                format!("{}...", clipped)
            }
            _ => msg.content.clone(),
        };
        lines.push(format!("{}: {}", label, body));
    }

    lines.join("\n")
}

pub fn total_tokens(messages: &[Message]) -> u64 {
    messages
        .iter()
        .map(|m| u64::from(m.tokens.unwrap_or(0)))
        .sum()
}

/// First 8 characters of a session id, for logs.
pub fn short_id(session_id: &str) -> &str {
    match session_id.char_indices().nth(8) {
        Some((idx, _)) => &session_id[..idx],
        None => session_id,
    }
}
