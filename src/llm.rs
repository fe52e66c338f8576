//! Language model clients
//!
//! The query engine treats the model as an opaque text generator behind
//! [`LlmClient`]. The local variant talks to Ollama's chat API, the
//! remote one to any OpenAI-compatible `/chat/completions` endpoint.

use crate::config::{LlmConfig, ModelKind};
use crate::error::{LlmError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, error, info};

/// Message role in a conversation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A message in a conversation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

/// Response from text generation
#[derive(Debug, Clone)]
pub struct GenerationResponse {
    pub text: String,
    pub tokens_used: Option<u32>,
    pub model: String,
}

/// Trait for text generation backends
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Generate text from a conversation
    async fn generate(&self, messages: &[Message]) -> Result<GenerationResponse>;
}

/// Build the client selected by the configuration
pub fn build_client(config: &LlmConfig) -> Arc<dyn LlmClient> {
    match config.model_type {
        ModelKind::Local => Arc::new(OllamaChatClient::new(config.clone())),
        ModelKind::Remote => Arc::new(OpenAiCompatChatClient::new(config.clone())),
    }
}

/// Ollama chat client
pub struct OllamaChatClient {
    client: reqwest::Client,
    config: LlmConfig,
}

#[derive(Debug, Serialize)]
struct OllamaGenerateRequest {
    model: String,
    messages: Vec<Message>,
    stream: bool,
    options: OllamaOptions,
}

#[derive(Debug, Serialize)]
struct OllamaOptions {
    num_predict: u32,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct OllamaGenerateResponse {
    model: String,
    message: Message,
    done: bool,
    #[serde(default)]
    eval_count: Option<u32>,
}

impl OllamaChatClient {
    pub fn new(config: LlmConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout))
            .build()
            .expect("Failed to create HTTP client");

        Self { client, config }
    }

    fn api_url(&self) -> String {
        format!("{}/api/chat", self.config.local_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl LlmClient for OllamaChatClient {
    async fn generate(&self, messages: &[Message]) -> Result<GenerationResponse> {
        debug!("Generating text with {} messages", messages.len());

        let request = OllamaGenerateRequest {
            model: self.config.local_model.clone(),
            messages: messages.to_vec(),
            stream: false,
            options: OllamaOptions {
                num_predict: self.config.max_tokens,
                temperature: self.config.local_temperature,
            },
        };

        let response = timeout(
            Duration::from_secs(self.config.timeout),
            self.client.post(self.api_url()).json(&request).send(),
        )
        .await
        .map_err(|_| LlmError::Timeout)?
        .map_err(|e| LlmError::ConnectionFailed(e.to_string()))?;

        if !response.status().is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            error!("Ollama API error: {}", error_text);
            return Err(LlmError::GenerationFailed(error_text).into());
        }

        let body: OllamaGenerateResponse = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;

        if !body.done {
            return Err(LlmError::InvalidResponse("Incomplete response".to_string()).into());
        }

        info!("Generated {} tokens", body.eval_count.unwrap_or(0));

        Ok(GenerationResponse {
            text: body.message.content,
            tokens_used: body.eval_count,
            model: body.model,
        })
    }
}

/// OpenAI-compatible chat client
pub struct OpenAiCompatChatClient {
    client: reqwest::Client,
    config: LlmConfig,
}

#[derive(Debug, Serialize)]
struct OpenAiChatRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct OpenAiChatResponse {
    model: String,
    choices: Vec<OpenAiChoice>,
    #[serde(default)]
    usage: Option<OpenAiUsage>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    message: Message,
}

#[derive(Debug, Deserialize)]
struct OpenAiUsage {
    #[serde(default)]
    completion_tokens: Option<u32>,
}

impl OpenAiCompatChatClient {
    pub fn new(config: LlmConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout))
            .build()
            .expect("Failed to create HTTP client");

        Self { client, config }
    }

    fn api_url(&self) -> String {
        format!(
            "{}/chat/completions",
            self.config.remote_api_base.trim_end_matches('/')
        )
    }
}

#[async_trait]
impl LlmClient for OpenAiCompatChatClient {
    async fn generate(&self, messages: &[Message]) -> Result<GenerationResponse> {
        debug!("Generating text via remote API ({} messages)", messages.len());

        let request = OpenAiChatRequest {
            model: &self.config.remote_model,
            messages,
            max_tokens: self.config.max_tokens,
            temperature: self.config.remote_temperature,
        };

        let response = timeout(
            Duration::from_secs(self.config.timeout),
            self.client
                .post(self.api_url())
                .bearer_auth(self.config.remote_api_key.as_deref().unwrap_or_default())
                .json(&request)
                .send(),
        )
        .await
        .map_err(|_| LlmError::Timeout)?
        .map_err(|e| LlmError::ConnectionFailed(e.to_string()))?;

        if !response.status().is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            error!("Remote chat API error: {}", error_text);
            return Err(LlmError::GenerationFailed(error_text).into());
        }

        let body: OpenAiChatResponse = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;

        let choice = body
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::InvalidResponse("no choices in response".to_string()))?;

        Ok(GenerationResponse {
            text: choice.message.content,
            tokens_used: body.usage.and_then(|u| u.completion_tokens),
            model: body.model,
        })
    }
}

/// Helper function to create a system message
pub fn system_message(content: impl Into<String>) -> Message {
    Message {
        role: Role::System,
        content: content.into(),
    }
}

/// Helper function to create a user message
pub fn user_message(content: impl Into<String>) -> Message {
    Message {
        role: Role::User,
        content: content.into(),
    }
}
