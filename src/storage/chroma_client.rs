use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ChromaError {
    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),
    #[error("Chroma API error {status}: {message}")]
    ApiError { status: u16, message: String },
    #[error("Collection not found: {0}")]
    CollectionNotFound(String),
}

/// One nearest-neighbour hit from a collection query.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkHit {
    pub id: String,
    pub document: String,
    pub distance: f32,
}

#[derive(Debug, Serialize)]
struct ChromaQueryRequest {
    query_embeddings: Vec<Vec<f32>>,
    n_results: u32,
    include: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ChromaQueryResponse {
    ids: Vec<Vec<String>>,
    distances: Option<Vec<Vec<f32>>>,
    documents: Option<Vec<Vec<Option<String>>>>,
}

/// Rust-native ChromaDB client using HTTP API v2 (query side only)
pub struct ChromaClient {
    base_url: String,
    client: Client,
    tenant: String,
    database: String,
}

impl ChromaClient {
    pub fn new(base_url: String) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: Client::new(),
            tenant: "default_tenant".to_string(),
            database: "default_database".to_string(),
        }
    }

    fn collection_url(&self, collection_name: &str) -> String {
        format!(
            "{}/api/v2/tenants/{}/databases/{}/collections/{}",
            self.base_url, self.tenant, self.database, collection_name
        )
    }

    fn collection_operation_url(&self, collection_id: &str, operation: &str) -> String {
        format!(
            "{}/api/v2/tenants/{}/databases/{}/collections/{}/{}",
            self.base_url, self.tenant, self.database, collection_id, operation
        )
    }

    /// Nearest chunks to `embedding`, closest first.
    pub async fn query(
        &self,
        collection: &str,
        embedding: Vec<f32>,
        limit: u32,
    ) -> Result<Vec<ChunkHit>, ChromaError> {
        let collection_id = self.get_collection_id(collection).await?;
        let url = self.collection_operation_url(&collection_id, "query");

        let request = ChromaQueryRequest {
            query_embeddings: vec![embedding],
            n_results: limit,
            include: vec!["documents".to_string(), "distances".to_string()],
        };

        let response = self.client.post(&url).json(&request).send().await?;

        match response.status() {
            StatusCode::OK => {
                let query_response: ChromaQueryResponse = response.json().await?;
                let hits = parse_query_results(query_response)?;
                tracing::debug!("Chroma returned {} hits from {}", hits.len(), collection);
                Ok(hits)
            }
            status => {
                let message = response.text().await?;
                Err(ChromaError::ApiError {
                    status: status.as_u16(),
                    message,
                })
            }
        }
    }

    /// Get collection ID by name
    async fn get_collection_id(&self, name: &str) -> Result<String, ChromaError> {
        let url = self.collection_url(name);

        let response = self.client.get(&url).send().await?;

        match response.status() {
            StatusCode::OK => {
                let collection: Value = response.json().await?;
                collection["id"]
                    .as_str()
                    .map(|s| s.to_string())
                    .ok_or_else(|| ChromaError::CollectionNotFound(name.to_string()))
            }
            StatusCode::NOT_FOUND => Err(ChromaError::CollectionNotFound(name.to_string())),
            status => {
                let message = response.text().await?;
                Err(ChromaError::ApiError {
                    status: status.as_u16(),
                    message,
                })
            }
        }
    }

    /// Health check method - uses v2 API
    pub async fn ping(&self) -> Result<(), ChromaError> {
        let url = format!("{}/api/v2/heartbeat", self.base_url);
        self.client.get(&url).send().await?.error_for_status()?;
        Ok(())
    }
}

fn parse_query_results(response: ChromaQueryResponse) -> Result<Vec<ChunkHit>, ChromaError> {
    let Some(ids) = response.ids.into_iter().next() else {
        return Ok(Vec::new());
    };

    let distances = response
        .distances
        .and_then(|d| d.into_iter().next())
        .ok_or_else(|| ChromaError::ApiError {
            status: 500,
            message: "No distances returned from Chroma".to_string(),
        })?;

    let documents = response
        .documents
        .and_then(|d| d.into_iter().next())
        .unwrap_or_default();

    Ok(ids
        .into_iter()
        .enumerate()
        .map(|(idx, id)| ChunkHit {
            id,
            document: documents.get(idx).cloned().flatten().unwrap_or_default(),
            distance: distances.get(idx).copied().unwrap_or(0.0),
        })
        .collect())
}
