use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::OpenAiBackend;
use crate::RunError;

/// Failure of a single call to a generative backend
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Failed to reach service: {0}")]
    Transport(String),

    #[error("Service error: {status} - {body}")]
    Status { status: u16, body: String },

    #[error("Malformed service response: {0}")]
    Malformed(String),
}

impl BackendError {
    /// Failures worth retrying as-is
    pub fn is_transient(&self) -> bool {
        match self {
            BackendError::Timeout(_) | BackendError::Transport(_) => true,
            BackendError::Status { .. } => self.is_transient_server(),
            BackendError::Malformed(_) => false,
        }
    }

    /// Overload and server-side classes that get the fixed back-off delay
    pub fn is_transient_server(&self) -> bool {
        matches!(
            self,
            BackendError::Status { status: 429 | 500 | 502 | 503 | 504 | 529, .. }
        )
    }

    pub(crate) fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            BackendError::Timeout(Duration::ZERO)
        } else if err.is_decode() {
            BackendError::Malformed(err.to_string())
        } else {
            BackendError::Transport(err.to_string())
        }
    }
}

/// A text generation service reachable with a system + user prompt pair
#[async_trait]
pub trait GenerativeBackend: Send + Sync {
    async fn complete(&self, system: &str, user: &str) -> Result<String, BackendError>;

    /// Model name reported in the run summary
    fn model_name(&self) -> &str {
        "unspecified"
    }
}

/// Which generation API to talk to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    #[default]
    Anthropic,
    #[serde(rename = "openai")]
    OpenAi,
}

impl Provider {
    pub fn api_key_variable(&self) -> &'static str {
        match self {
            Provider::Anthropic => "ANTHROPIC_API_KEY",
            Provider::OpenAi => "OPENAI_API_KEY",
        }
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            Provider::Anthropic => "claude-sonnet-4-20250514",
            Provider::OpenAi => "gpt-4o-mini",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Provider::Anthropic => f.write_str("anthropic"),
            Provider::OpenAi => f.write_str("openai"),
        }
    }
}

impl FromStr for Provider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "anthropic" => Ok(Provider::Anthropic),
            "openai" => Ok(Provider::OpenAi),
            other => Err(format!("unknown provider: {}", other)),
        }
    }
}

/// Configuration for the generative service
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub provider: Provider,
    /// API key (from the provider's env var)
    pub api_key: String,
    pub model: String,
    /// Temperature (0-1, lower = more deterministic)
    pub temperature: f64,
    /// Maximum tokens in response
    pub max_tokens: u32,
}

impl ServiceConfig {
    /// Create config from environment variables
    pub fn from_env(provider: Provider, model: Option<String>) -> Result<Self, RunError> {
        let variable = provider.api_key_variable();
        let api_key = std::env::var(variable)
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| RunError::MissingCredential {
                variable: variable.to_string(),
            })?;

        Ok(Self::new(provider, api_key, model))
    }

    pub fn new(provider: Provider, api_key: String, model: Option<String>) -> Self {
        Self {
            provider,
            api_key,
            model: model.unwrap_or_else(|| provider.default_model().to_string()),
            temperature: 0.1,
            max_tokens: 4096,
        }
    }
}

/// Build the backend selected by the config
pub fn build_backend(config: ServiceConfig) -> Arc<dyn GenerativeBackend> {
    match config.provider {
        Provider::Anthropic => Arc::new(AnthropicBackend::new(config)),
        Provider::OpenAi => Arc::new(OpenAiBackend::new(config)),
    }
}

/// Anthropic Messages API client
pub struct AnthropicBackend {
    client: Client,
    config: ServiceConfig,
}

impl AnthropicBackend {
    pub fn new(config: ServiceConfig) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }
}

#[async_trait]
impl GenerativeBackend for AnthropicBackend {
    fn model_name(&self) -> &str {
        &self.config.model
    }

    async fn complete(&self, system: &str, user: &str) -> Result<String, BackendError> {
        let request = AnthropicRequest {
            model: self.config.model.clone(),
            max_tokens: self.config.max_tokens,
            temperature: Some(self.config.temperature),
            system: Some(system.to_string()),
            messages: vec![Message {
                role: "user".to_string(),
                content: user.to_string(),
            }],
        };

        let response = self
            .client
            .post("https://api.anthropic.com/v1/messages")
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(BackendError::from_reqwest)?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::Status { status, body });
        }

        let response: AnthropicResponse = response.json().await.map_err(BackendError::from_reqwest)?;

        // Concatenate the text blocks
        let text: String = response
            .content
            .iter()
            .filter(|c| c.content_type == "text")
            .map(|c| c.text.as_str())
            .collect();

        if text.is_empty() {
            return Err(BackendError::Malformed("No text content in response".to_string()));
        }
        Ok(text)
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct Message {
    pub(crate) role: String,
    pub(crate) content: String,
}

#[derive(Debug, Serialize)]
struct AnthropicRequest {
    model: String,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<Message>,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    content_type: String,
    #[serde(default)]
    text: String,
}
