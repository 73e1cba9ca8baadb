//! OpenAI-compatible embeddings client.
//!
//! Works with any endpoint exposing `POST /v1/embeddings`. The client is
//! async; calls are driven to completion on a runtime owned by the
//! embedder so operators can stay synchronous.

use super::EmbeddingModel;
use crate::config::ModelSettings;
use crate::error::{EvalError, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::runtime::Runtime;

/// Request body for the embeddings endpoint.
#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [&'a str],
}

/// Response from the embeddings endpoint.
#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    #[serde(default)]
    index: usize,
}

/// OpenAI API error response.
#[derive(Debug, Deserialize)]
struct ApiError {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

/// Embedding backend over HTTP.
pub struct ApiEmbedder {
    id: String,
    model: String,
    api_base: String,
    api_key: String,
    client: Client,
    runtime: Runtime,
    dimension: std::sync::OnceLock<usize>,
}

impl ApiEmbedder {
    /// Create a client for `model` using the connection details in settings.
    pub fn new(model: &str, settings: &ModelSettings) -> Result<Self> {
        if settings.api_base.is_empty() {
            return Err(EvalError::Model(
                "models.api_base is required for api: embedding models".to_string(),
            ));
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(settings.api_timeout_secs))
            .build()?;

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| EvalError::Model(format!("Failed to start runtime: {}", e)))?;

        Ok(Self {
            id: format!("api:{}", model),
            model: model.to_string(),
            api_base: settings.api_base.clone(),
            api_key: settings.api_key.clone(),
            client,
            runtime,
            dimension: std::sync::OnceLock::new(),
        })
    }

    /// Get the API endpoint URL.
    fn endpoint(&self) -> String {
        let base = self.api_base.trim_end_matches('/');
        format!("{}/v1/embeddings", base)
    }

    async fn request(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        let request = EmbeddingRequest {
            model: &self.model,
            input: texts,
        };

        let response = self
            .client
            .post(self.endpoint())
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            // Try to parse as API error
            if let Ok(api_error) = serde_json::from_str::<ApiError>(&body) {
                return Err(EvalError::Model(format!(
                    "API error ({}): {}",
                    status, api_error.error.message
                )));
            }
            return Err(EvalError::Model(format!(
                "Request failed ({}): {}",
                status, body
            )));
        }

        let parsed: EmbeddingResponse = serde_json::from_str(&body)
            .map_err(|e| EvalError::Model(format!("Malformed embeddings response: {}", e)))?;

        order_embeddings(parsed.data, texts.len())
    }
}

/// Put embeddings back in input order and check the count.
fn order_embeddings(mut data: Vec<EmbeddingData>, expected: usize) -> Result<Vec<Vec<f32>>> {
    if data.len() != expected {
        return Err(EvalError::Model(format!(
            "Expected {} embeddings, got {}",
            expected,
            data.len()
        )));
    }
    data.sort_by_key(|d| d.index);
    Ok(data.into_iter().map(|d| d.embedding).collect())
}

impl EmbeddingModel for ApiEmbedder {
    fn id(&self) -> &str {
        &self.id
    }

    /// Known after the first successful call; 0 before that.
    fn dimension(&self) -> usize {
        self.dimension.get().copied().unwrap_or(0)
    }

    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let embeddings = self.runtime.block_on(self.request(texts))?;
        if let Some(first) = embeddings.first() {
            let dim = *self.dimension.get_or_init(|| first.len());
            if embeddings.iter().any(|e| e.len() != dim) {
                return Err(EvalError::Model(format!(
                    "Backend '{}' returned vectors of inconsistent length",
                    self.id
                )));
            }
        }
        Ok(embeddings)
    }
}
