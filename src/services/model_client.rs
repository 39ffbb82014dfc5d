use async_trait::async_trait;
use std::sync::{Arc, Mutex};

use crate::models::internal::{ChatMessage, ModelReply};

#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

/// Language-model backend. Adapters own their wire format; callers only ever
/// hand over flat-text messages.
#[async_trait]
pub trait ModelClient: Send + Sync {
    async fn chat(&self, messages: &[ChatMessage]) -> Result<ModelReply, ModelError>;
}

type Responder = dyn Fn(&[ChatMessage]) -> Result<ModelReply, String> + Send + Sync;

/// Mock model for testing. Records every message list it receives.
pub struct MockModelClient {
    responder: Box<Responder>,
    calls: Arc<Mutex<Vec<Vec<ChatMessage>>>>,
}

impl MockModelClient {
    pub fn with_responder<F>(responder: F) -> Self
    where
        F: Fn(&[ChatMessage]) -> Result<ModelReply, String> + Send + Sync + 'static,
    {
        Self {
            responder: Box::new(responder),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Always answers `text`, reporting 100 input / 50 output tokens from `test-model`.
    pub fn replying(text: impl Into<String>) -> Self {
        let text = text.into();
        Self::with_responder(move |_| {
            Ok(ModelReply {
                text: text.clone(),
                tokens_input: Some(100),
                tokens_output: Some(50),
                model_id: Some("test-model".to_string()),
            })
        })
    }

    pub fn failing(message: impl Into<String>) -> Self {
        let message = message.into();
        Self::with_responder(move |_| Err(message.clone()))
    }

    pub fn calls(&self) -> Vec<Vec<ChatMessage>> {
        self.calls
            .lock()
            .map(|calls| calls.clone())
            .unwrap_or_default()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().map(|calls| calls.len()).unwrap_or(0)
    }

    /// Content of the first message of the first call.
    pub fn first_prompt(&self) -> Option<String> {
        self.calls()
            .first()
            .and_then(|messages| messages.first())
            .map(|m| m.content.clone())
    }
}

#[async_trait]
impl ModelClient for MockModelClient {
    async fn chat(&self, messages: &[ChatMessage]) -> Result<ModelReply, ModelError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(messages.to_vec());
        }

        (self.responder)(messages).map_err(|message| ModelError::Api {
            status: 500,
            message,
        })
    }
}
