//! LLM Provider Abstraction Layer
//!
//! Common interface for the text-generation backends the tutoring agents talk
//! to. Providers are plain request/response adapters: they do not retry, time
//! out or degrade on their own. That is the job of [`invoker::ModelInvoker`],
//! which wraps a provider with bounded retries and a [`circuit_breaker::CircuitBreaker`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::config::{ProviderConfig, ProviderKind};
use sdk::errors::PipelineError;

pub mod circuit_breaker;
pub mod invoker;
pub mod ollama;
pub mod openai;

/// Result type for LLM operations
pub type Result<T> = std::result::Result<T, LLMError>;

/// Errors that can occur during LLM operations
///
/// Internal to providers and the invoker; never surfaced to a student.
#[derive(Debug, thiserror::Error)]
pub enum LLMError {
    #[error("Provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Rate limit exceeded")]
    RateLimitExceeded,

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Timeout")]
    Timeout,

    #[error("Server error ({0}): {1}")]
    ServerError(u16, String),

    #[error("Parse error: {0}")]
    ParseError(String),
}

impl LLMError {
    /// Whether a retry of the same request may succeed
    pub fn is_transient(&self) -> bool {
        match self {
            LLMError::Timeout
            | LLMError::NetworkError(_)
            | LLMError::ProviderUnavailable(_)
            | LLMError::RateLimitExceeded => true,
            LLMError::ServerError(status, _) => *status >= 500,
            LLMError::AuthenticationFailed(_)
            | LLMError::InvalidRequest(_)
            | LLMError::ParseError(_) => false,
        }
    }

    /// Map an HTTP error status to an error variant
    pub fn from_status(status: u16, body: String) -> Self {
        match status {
            401 | 403 => LLMError::AuthenticationFailed(body),
            429 => LLMError::RateLimitExceeded,
            500..=599 => LLMError::ServerError(status, body),
            _ => LLMError::InvalidRequest(body),
        }
    }
}

/// Message in a conversation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
        }
    }
}

/// Role of a message sender
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    System,
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageRole::User => write!(f, "user"),
            MessageRole::Assistant => write!(f, "assistant"),
            MessageRole::System => write!(f, "system"),
        }
    }
}

/// LLM Provider trait that all providers must implement
#[async_trait]
pub trait LLMProvider: Send + Sync {
    /// Returns the name of the provider (e.g., "ollama", "openai")
    fn name(&self) -> &str;

    /// Generate a completion for the conversation
    ///
    /// # Arguments
    /// * `messages` - System prompt followed by the conversation
    /// * `temperature` - Sampling temperature
    /// * `max_tokens` - Upper bound on generated tokens
    async fn generate(
        &self,
        messages: &[Message],
        temperature: f32,
        max_tokens: u32,
    ) -> Result<String>;
}

/// Build the provider selected by `[provider]` configuration
///
/// # Errors
///
/// Returns `PipelineError::Config` if the HTTP client cannot be built or the
/// configured API key variable is unset for a provider that needs one.
pub fn build_provider(config: &ProviderConfig) -> std::result::Result<Arc<dyn LLMProvider>, PipelineError> {
    match config.kind {
        ProviderKind::OpenAI => {
            let provider = openai::OpenAICompatibleProvider::from_config(config)?;
            Ok(Arc::new(provider))
        }
        ProviderKind::Ollama => {
            let provider = ollama::OllamaProvider::new(&config.base_url, &config.model)?;
            Ok(Arc::new(provider))
        }
    }
}
