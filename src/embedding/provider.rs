//! Embedding providers
//!
//! A provider turns batches of text into fixed-dimension vectors. The
//! local variant talks to Ollama, the remote one to any
//! OpenAI-compatible `/embeddings` endpoint. The provider identity
//! (`provider:model`) feeds both cache keys and collection names so
//! vectors from different models never mix.

use crate::config::{EmbeddingConfig, ModelKind};
use crate::error::{EmbeddingError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, error};

/// Capability interface for embedding backends
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a batch of texts, order-preserving
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Short provider identifier ("ollama", "openai")
    fn provider_id(&self) -> &str;

    /// Model name
    fn model(&self) -> &str;

    /// `provider:model` identity string
    fn identity(&self) -> String {
        format!("{}:{}", self.provider_id(), self.model())
    }
}

/// Build the provider selected by the configuration
pub fn build_provider(config: &EmbeddingConfig) -> Arc<dyn EmbeddingProvider> {
    match config.provider {
        ModelKind::Local => Arc::new(OllamaEmbedder::new(
            config.local_url.clone(),
            config.model.clone(),
            config.timeout,
        )),
        ModelKind::Remote => Arc::new(OpenAiCompatEmbedder::new(
            config.remote_api_base.clone(),
            config.remote_api_key.clone().unwrap_or_default(),
            config.model.clone(),
            config.timeout,
        )),
    }
}

/// Validate that a batch response is rectangular and non-degenerate
fn validate_vectors(vectors: &[Vec<f32>]) -> Result<()> {
    let Some(first) = vectors.first() else {
        return Ok(());
    };
    let expected = first.len();
    if expected == 0 {
        return Err(EmbeddingError::MalformedVector {
            expected: 1,
            actual: 0,
        }
        .into());
    }
    for v in vectors {
        if v.len() != expected {
            return Err(EmbeddingError::MalformedVector {
                expected,
                actual: v.len(),
            }
            .into());
        }
    }
    Ok(())
}

/// Ollama embedding client
pub struct OllamaEmbedder {
    client: reqwest::Client,
    base_url: String,
    model: String,
    timeout: u64,
}

#[derive(Debug, Serialize)]
struct OllamaEmbedRequest {
    model: String,
    prompt: String,
}

#[derive(Debug, Deserialize)]
struct OllamaEmbedResponse {
    embedding: Vec<f32>,
}

impl OllamaEmbedder {
    pub fn new(base_url: String, model: String, timeout: u64) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            client,
            base_url,
            model,
            timeout,
        }
    }

    fn api_url(&self) -> String {
        format!("{}/api/embeddings", self.base_url.trim_end_matches('/'))
    }

    async fn embed_one(&self, text: &str) -> Result<Vec<f32>> {
        let request = OllamaEmbedRequest {
            model: self.model.clone(),
            prompt: text.to_string(),
        };

        let response = timeout(
            Duration::from_secs(self.timeout),
            self.client.post(self.api_url()).json(&request).send(),
        )
        .await
        .map_err(|_| EmbeddingError::Timeout)?
        .map_err(|e| EmbeddingError::BackendUnavailable(e.to_string()))?;

        if !response.status().is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            error!("Ollama embedding API error: {}", error_text);
            return Err(EmbeddingError::BackendUnavailable(error_text).into());
        }

        let body: OllamaEmbedResponse = response
            .json()
            .await
            .map_err(|e| EmbeddingError::BackendUnavailable(e.to_string()))?;

        Ok(body.embedding)
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaEmbedder {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        debug!("Embedding {} texts via Ollama", texts.len());

        let mut vectors = Vec::with_capacity(texts.len());
        for text in texts {
            vectors.push(self.embed_one(text).await?);
        }

        validate_vectors(&vectors)?;
        Ok(vectors)
    }

    fn provider_id(&self) -> &str {
        "ollama"
    }

    fn model(&self) -> &str {
        &self.model
    }
}

/// OpenAI-compatible embedding client
pub struct OpenAiCompatEmbedder {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    timeout: u64,
}

#[derive(Debug, Serialize)]
struct OpenAiEmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct OpenAiEmbedResponse {
    data: Vec<OpenAiEmbedItem>,
}

#[derive(Debug, Deserialize)]
struct OpenAiEmbedItem {
    index: usize,
    embedding: Vec<f32>,
}

impl OpenAiCompatEmbedder {
    pub fn new(base_url: String, api_key: String, model: String, timeout: u64) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            client,
            base_url,
            api_key,
            model,
            timeout,
        }
    }

    fn api_url(&self) -> String {
        format!("{}/embeddings", self.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiCompatEmbedder {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        debug!("Embedding {} texts via remote API", texts.len());

        let request = OpenAiEmbedRequest {
            model: &self.model,
            input: texts,
        };

        let response = timeout(
            Duration::from_secs(self.timeout),
            self.client
                .post(self.api_url())
                .bearer_auth(&self.api_key)
                .json(&request)
                .send(),
        )
        .await
        .map_err(|_| EmbeddingError::Timeout)?
        .map_err(|e| EmbeddingError::BackendUnavailable(e.to_string()))?;

        if !response.status().is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            error!("Remote embedding API error: {}", error_text);
            return Err(EmbeddingError::BackendUnavailable(error_text).into());
        }

        let body: OpenAiEmbedResponse = response
            .json()
            .await
            .map_err(|e| EmbeddingError::BackendUnavailable(e.to_string()))?;

        let mut items = body.data;
        items.sort_by_key(|item| item.index);

        if items.len() != texts.len() {
            return Err(EmbeddingError::BackendUnavailable(format!(
                "expected {} vectors, got {}",
                texts.len(),
                items.len()
            ))
            .into());
        }

        let vectors: Vec<Vec<f32>> = items.into_iter().map(|item| item.embedding).collect();
        validate_vectors(&vectors)?;
        Ok(vectors)
    }

    fn provider_id(&self) -> &str {
        "openai"
    }

    fn model(&self) -> &str {
        &self.model
    }
}
