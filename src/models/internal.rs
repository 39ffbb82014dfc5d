use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::models::pedagogy::PedagogyMode;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            other => Err(format!("unknown message role '{}'", other)),
        }
    }
}

/// One stored conversation message. Owned by exactly one session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub tokens: Option<u32>,
    /// Chunks that grounded an assistant answer
    pub context_ids: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct SessionInfo {
    pub session_id: String,
    pub message_count: usize,
    pub created_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
    pub total_tokens: u64,
    /// Raw stored value; may be a retired mode name
    pub pedagogy_mode: String,
    pub title: Option<String>,
}

/// A retrieved course-material snippet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextChunk {
    pub id: String,
    pub text: String,
    pub score: f32,
}

/// Canonical message shape sent to a model backend. Content is always flat text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User.as_str().to_string(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ModelReply {
    pub text: String,
    pub tokens_input: Option<u32>,
    pub tokens_output: Option<u32>,
    pub model_id: Option<String>,
}

/// One chat turn as requested by the transport layer.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub query: String,
    pub top_k: Option<usize>,
    pub session_id: Option<String>,
    pub include_history: bool,
    pub pedagogy_mode: Option<String>,
}

impl ChatRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            top_k: None,
            session_id: None,
            include_history: true,
            pedagogy_mode: None,
        }
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = Some(top_k);
        self
    }

    pub fn with_mode(mut self, mode: impl Into<String>) -> Self {
        self.pedagogy_mode = Some(mode.into());
        self
    }

    pub fn without_history(mut self) -> Self {
        self.include_history = false;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatResult {
    pub answer: String,
    pub session_id: String,
    pub is_new_session: bool,
    /// Prior messages fed into the prompt
    pub history_length: usize,
    pub pedagogy_mode: PedagogyMode,
    pub context_ids: Vec<String>,
    pub tokens_input: Option<u32>,
    pub tokens_output: Option<u32>,
    pub model_id: Option<String>,
    /// Generated for new sessions only
    pub title: Option<String>,
}
