//! ============================================================================
//! Embedding Service - Text to vector via an OpenAI-compatible API
//! ============================================================================
//! The store only needs "some vector of fixed dimensionality"; the first
//! vector returned fixes the store's dimensionality. x.ai is tried first,
//! OpenAI is the fallback.
//! ============================================================================

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::types::{MemoryError, MemoryResult};

/// Default embedding model (OpenAI compatible)
pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";

pub const XAI_BASE_URL: &str = "https://api.x.ai/v1";
pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// Turns text into a raw (unnormalized) vector
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Fails with `EmbeddingUnavailable` on network or API error
    async fn embed(&self, text: &str) -> MemoryResult<Vec<f32>>;
}

/// HTTP embedding client
pub struct EmbeddingService {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest {
    model: String,
    input: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
    model: String,
    usage: Option<EmbeddingUsage>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    index: usize,
}

#[derive(Debug, Deserialize)]
struct EmbeddingUsage {
    prompt_tokens: u32,
    total_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    message: String,
    #[serde(rename = "type")]
    error_type: Option<String>,
}

impl EmbeddingService {
    /// Create a new embedding service using x.ai API
    pub fn new_xai(api_key: String) -> Self {
        Self::new_custom(api_key, XAI_BASE_URL.to_string(), DEFAULT_EMBEDDING_MODEL.to_string())
    }

    /// Create a new embedding service using OpenAI API (fallback)
    pub fn new_openai(api_key: String) -> Self {
        Self::new_custom(
            api_key,
            OPENAI_BASE_URL.to_string(),
            DEFAULT_EMBEDDING_MODEL.to_string(),
        )
    }

    /// Create with custom base URL and model
    pub fn new_custom(api_key: String, base_url: String, model: String) -> Self {
        Self {
            client: Client::new(),
            api_key,
            base_url,
            model,
        }
    }

    /// Override the model name
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Generate embeddings for multiple texts
    pub async fn embed_batch(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        debug!("Generating embeddings for {} texts", texts.len());

        let request = EmbeddingRequest {
            model: self.model.clone(),
            input: texts,
        };

        let response = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| anyhow!("Failed to send embedding request: {}", e))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| anyhow!("Failed to read response body: {}", e))?;

        if !status.is_success() {
            if let Ok(error) = serde_json::from_str::<ErrorResponse>(&body) {
                return Err(anyhow!("{}", describe_api_error(status, &error.error)));
            }
            return Err(anyhow!("Embedding API error ({}): {}", status, body));
        }

        parse_embedding_response(&body)
    }

    /// Generate embedding for a single text
    pub async fn embed_single(&self, text: &str) -> Result<Vec<f32>> {
        let embeddings = self.embed_batch(vec![text.to_string()]).await?;
        embeddings
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("No embedding returned"))
    }

    /// Get the current model name
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Get the base URL
    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl Embedder for EmbeddingService {
    async fn embed(&self, text: &str) -> MemoryResult<Vec<f32>> {
        self.embed_single(text)
            .await
            .map_err(|e| MemoryError::EmbeddingUnavailable(e.to_string()))
    }
}

/// Decode an `/embeddings` response body, ordering vectors by input index
fn parse_embedding_response(body: &str) -> Result<Vec<Vec<f32>>> {
    let embedding_response: EmbeddingResponse = serde_json::from_str(body)
        .map_err(|e| anyhow!("Failed to parse embedding response: {} - body: {}", e, body))?;

    if let Some(usage) = &embedding_response.usage {
        debug!(
            "Embedding tokens used: {} prompt / {} total (model: {})",
            usage.prompt_tokens, usage.total_tokens, embedding_response.model
        );
    }

    let mut embeddings: Vec<(usize, Vec<f32>)> = embedding_response
        .data
        .into_iter()
        .map(|d| (d.index, d.embedding))
        .collect();
    embeddings.sort_by_key(|(idx, _)| *idx);

    Ok(embeddings.into_iter().map(|(_, e)| e).collect())
}

fn describe_api_error(status: reqwest::StatusCode, detail: &ErrorDetail) -> String {
    match &detail.error_type {
        Some(kind) => format!("Embedding API error ({}, {}): {}", status, kind, detail.message),
        None => format!("Embedding API error ({}): {}", status, detail.message),
    }
}

/// Create an embedding service, trying x.ai first, then OpenAI
pub fn create_embedding_service(
    xai_api_key: Option<String>,
    openai_api_key: Option<String>,
) -> Result<EmbeddingService> {
    if let Some(key) = xai_api_key {
        if !key.is_empty() {
            debug!("Using x.ai for embeddings");
            return Ok(EmbeddingService::new_xai(key));
        }
    }

    if let Some(key) = openai_api_key {
        if !key.is_empty() {
            warn!("x.ai API key not available, falling back to OpenAI for embeddings");
            return Ok(EmbeddingService::new_openai(key));
        }
    }

    Err(anyhow!("No embedding API key available (tried x.ai and OpenAI)"))
}
