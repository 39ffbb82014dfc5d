use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::models::internal::{ChatMessage, ModelReply};
use crate::services::model_client::{ModelClient, ModelError};

/// HTTP client for the LLM bridge that fronts the chat model.
#[derive(Clone)]
pub struct LlmBridgeClient {
    client: reqwest::Client,
    base_url: String,
    model: Option<String>,
}

impl LlmBridgeClient {
    pub fn new(base_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            model: None,
        }
    }

    /// Pin every request to a named model instead of the bridge default.
    pub fn with_model(mut self, model: Option<String>) -> Self {
        self.model = model;
        self
    }

    pub async fn health_check(&self) -> Result<bool, ModelError> {
        let response = self
            .client
            .get(format!("{}/health", self.base_url))
            .send()
            .await?;

        Ok(response.status().is_success())
    }
}

#[async_trait]
impl ModelClient for LlmBridgeClient {
    async fn chat(&self, messages: &[ChatMessage]) -> Result<ModelReply, ModelError> {
        let request = ChatRequestBody {
            messages,
            model: self.model.as_deref(),
        };

        let response = self
            .client
            .post(format!("{}/chat", self.base_url))
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(ModelError::Api {
                status: response.status().as_u16(),
                message: response.text().await.unwrap_or_default(),
            });
        }

        let body: ChatResponseBody = response.json().await?;
        let text = body
            .content
            .or(body.answer)
            .ok_or_else(|| ModelError::InvalidResponse("reply has no content".to_string()))?;

        tracing::debug!(
            "LLM bridge reply: model={:?}, tokens_in={:?}, tokens_out={:?}",
            body.model,
            body.tokens_input,
            body.tokens_output
        );

        Ok(ModelReply {
            text,
            tokens_input: body.tokens_input,
            tokens_output: body.tokens_output,
            model_id: body.model,
        })
    }
}

// Request/Response Models
#[derive(Serialize)]
struct ChatRequestBody<'a> {
    messages: &'a [ChatMessage],
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<&'a str>,
}

#[derive(Deserialize)]
struct ChatResponseBody {
    content: Option<String>,
    answer: Option<String>,
    tokens_input: Option<u32>,
    tokens_output: Option<u32>,
    #[serde(alias = "model_id")]
    model: Option<String>,
}
