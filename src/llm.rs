//! Completion backends for the map and reduce stages.
//!
//! Both providers speak plain HTTP through `reqwest`: OpenAI-compatible chat completions and the
//! Ollama `generate` endpoint. The pipeline only sees the [`CompletionClient`] trait, so tests can
//! substitute deterministic stubs.

mod ollama;
mod openai;
pub mod retry;

pub use ollama::OllamaCompletionClient;
pub use openai::OpenAiCompletionClient;
pub use retry::{RetryPolicy, complete_with_retry};

use crate::config::{Config, LlmProvider};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

const USER_AGENT: &str = "reportsynth/0.1";

/// Errors surfaced by a completion backend.
#[derive(Debug, Error)]
pub enum CompletionError {
    /// Backend could not be reached or is misconfigured.
    #[error("Language model provider unavailable: {0}")]
    ProviderUnavailable(String),
    /// Backend rejected the request because of rate limiting.
    #[error("Rate limited by provider: {0}")]
    RateLimited(String),
    /// Backend failed with a server-side error.
    #[error("Provider server error: {0}")]
    ServerError(String),
    /// Backend refused the request (authentication, bad request, unknown model).
    #[error("Failed to generate completion: {0}")]
    GenerationFailed(String),
    /// Response body could not be interpreted.
    #[error("Malformed provider response: {0}")]
    InvalidResponse(String),
    /// No response arrived within the request timeout.
    #[error("Request timed out")]
    Timeout,
}

impl CompletionError {
    /// Whether retrying the same request may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::ProviderUnavailable(_) | Self::RateLimited(_) | Self::ServerError(_) | Self::Timeout
        )
    }

    fn from_status(provider: &str, status: StatusCode, body: &str) -> Self {
        let message = format!("{provider} returned {status}: {}", body.trim());
        if status == StatusCode::TOO_MANY_REQUESTS {
            Self::RateLimited(message)
        } else if status.is_server_error() {
            Self::ServerError(message)
        } else {
            Self::GenerationFailed(message)
        }
    }

    fn from_transport(provider: &str, base_url: &str, error: reqwest::Error) -> Self {
        if error.is_timeout() {
            Self::Timeout
        } else {
            Self::ProviderUnavailable(format!("failed to reach {provider} at {base_url}: {error}"))
        }
    }
}

/// A single prompt sent to the backend.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    /// Fully rendered prompt.
    pub prompt: String,
    /// Sampling temperature chosen for the run.
    pub temperature: f32,
}

/// Interface implemented by text completion providers.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// Return the model's answer for `request`, trimmed of surrounding whitespace.
    async fn complete(&self, request: CompletionRequest) -> Result<String, CompletionError>;
}

/// Build the completion client selected by configuration.
pub fn build_completion_client(
    config: &Config,
) -> Result<Arc<dyn CompletionClient>, CompletionError> {
    let http = http_client(config.llm_timeout())?;
    let client: Arc<dyn CompletionClient> = match config.llm_provider {
        LlmProvider::OpenAI => {
            let api_key = config.openai_api_key.clone().ok_or_else(|| {
                CompletionError::ProviderUnavailable("OPENAI_API_KEY is not set".into())
            })?;
            Arc::new(OpenAiCompletionClient::new(
                http,
                config.openai_base_url.clone(),
                api_key,
                config.llm_model.clone(),
            ))
        }
        LlmProvider::Ollama => Arc::new(OllamaCompletionClient::new(
            http,
            config.ollama_url.clone(),
            config.llm_model.clone(),
        )),
    };
    tracing::info!(
        provider = ?config.llm_provider,
        model = %config.llm_model,
        "Completion client initialized"
    );
    Ok(client)
}

fn http_client(timeout: Duration) -> Result<Client, CompletionError> {
    Client::builder()
        .user_agent(USER_AGENT)
        .timeout(timeout)
        .build()
        .map_err(|error| {
            CompletionError::ProviderUnavailable(format!("failed to build HTTP client: {error}"))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_errors_are_retryable() {
        assert!(CompletionError::Timeout.is_transient());
        assert!(CompletionError::RateLimited("slow down".into()).is_transient());
        assert!(CompletionError::ServerError("502".into()).is_transient());
        assert!(!CompletionError::GenerationFailed("401".into()).is_transient());
        assert!(!CompletionError::InvalidResponse("{}".into()).is_transient());
    }

    #[test]
    fn status_codes_map_to_categories() {
        assert!(matches!(
            CompletionError::from_status("OpenAI", StatusCode::TOO_MANY_REQUESTS, ""),
            CompletionError::RateLimited(_)
        ));
        assert!(matches!(
            CompletionError::from_status("OpenAI", StatusCode::BAD_GATEWAY, ""),
            CompletionError::ServerError(_)
        ));
        assert!(matches!(
            CompletionError::from_status("OpenAI", StatusCode::UNAUTHORIZED, "bad key"),
            CompletionError::GenerationFailed(message) if message.contains("401") && message.contains("bad key")
        ));
    }

    #[test]
    fn openai_requires_an_api_key() {
        let config = Config::from_lookup(|key| match key {
            "LLM_PROVIDER" => Some("ollama".into()),
            _ => None,
        })
        .expect("ollama config");
        let mut openai = config.clone();
        openai.llm_provider = LlmProvider::OpenAI;
        openai.openai_api_key = None;

        assert!(build_completion_client(&config).is_ok());
        assert!(matches!(
            build_completion_client(&openai),
            Err(CompletionError::ProviderUnavailable(message)) if message.contains("OPENAI_API_KEY")
        ));
    }
}
