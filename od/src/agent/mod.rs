//! External capability interfaces: the code-generation agent and the
//! supervising LLM
//!
//! Both are consumed through traits; concrete variants are selected at
//! construction time from configuration. The supervisor is optional at
//! runtime: components degrade to deterministic fallbacks when
//! `available()` is false and record that degradation.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

use crate::config::ProviderConfig;
use crate::domain::TokenUsage;
use crate::error::{ErrorKind, OrchError, OrchResult};

mod http;
pub mod mock;

pub use http::{HttpAgent, HttpSupervisor};
pub use mock::{MockAgent, MockSupervisor};

/// One request to the agent: a rendered prompt plus an idempotency token
/// so a retried dispatch cannot double-apply
#[derive(Debug, Clone)]
pub struct AgentRequest {
    pub prompt: String,

    /// Fresh per iteration; the agent must treat repeats as the same call
    pub idempotency_key: String,

    pub max_tokens: u32,
}

/// The agent's reply for one iteration
#[derive(Debug, Clone)]
pub struct AgentResponse {
    pub text: String,

    /// Per-response token breakdown, summed into the session ledger
    pub tokens: TokenUsage,

    /// Paths the agent reports having created or modified
    pub files_touched: Vec<String>,

    pub metadata: serde_json::Value,
}

impl AgentResponse {
    /// A plain text response (tests and fallbacks)
    pub fn text(text: impl Into<String>) -> Self {
        let text = text.into();
        let tokens = TokenUsage {
            input: 0,
            cache_read: 0,
            cache_creation: 0,
            output: (text.len() / 4) as u64,
        };
        Self {
            text,
            tokens,
            files_touched: Vec::new(),
            metadata: serde_json::Value::Null,
        }
    }

    pub fn with_tokens(mut self, tokens: TokenUsage) -> Self {
        self.tokens = tokens;
        self
    }

    pub fn with_files(mut self, files: Vec<String>) -> Self {
        self.files_touched = files;
        self
    }
}

/// Failures from either capability
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    #[error("Unavailable: {0}")]
    Unavailable(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Rejected: {0}")]
    Rejected(String),
}

impl AgentError {
    /// Whether the dispatch may be retried with the same idempotency key
    pub fn is_retryable(&self) -> bool {
        matches!(self, AgentError::Timeout(_) | AgentError::Unavailable(_) | AgentError::Protocol(_))
    }

    /// Map to the core error taxonomy
    pub fn kind(&self) -> ErrorKind {
        match self {
            AgentError::Timeout(_) => ErrorKind::Timeout,
            AgentError::Unavailable(_) => ErrorKind::Unavailable,
            AgentError::Protocol(_) => ErrorKind::Protocol,
            AgentError::Rejected(_) => ErrorKind::Validation,
        }
    }
}

impl From<reqwest::Error> for AgentError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            AgentError::Timeout(Duration::ZERO)
        } else if err.is_connect() {
            AgentError::Unavailable(err.to_string())
        } else {
            AgentError::Protocol(err.to_string())
        }
    }
}

/// The code-generation agent capability
#[async_trait]
pub trait AgentClient: Send + Sync {
    /// One prompt/response exchange
    async fn send(&self, request: AgentRequest) -> Result<AgentResponse, AgentError>;

    /// Context-window limit the agent publishes, when known
    fn context_window(&self) -> Option<u64> {
        None
    }
}

/// The supervising LLM capability
#[async_trait]
pub trait Supervisor: Send + Sync {
    async fn generate(&self, prompt: &str, max_tokens: u32) -> Result<String, AgentError>;

    /// Whether the supervisor can be consulted at all
    fn available(&self) -> bool;
}

/// Create an agent client from configuration
pub fn create_agent(config: &ProviderConfig) -> OrchResult<Arc<dyn AgentClient>> {
    debug!(provider = %config.provider, model = %config.model, "create_agent: called");
    match config.provider.as_str() {
        "http" => Ok(Arc::new(HttpAgent::from_config(config)?)),
        "mock" => Ok(Arc::new(MockAgent::new(vec![]))),
        other => Err(OrchError::new(
            ErrorKind::Validation,
            "agent",
            format!("Unknown agent provider: '{}'. Supported: http, mock", other),
        )),
    }
}

/// Create a supervisor from configuration
pub fn create_supervisor(config: &ProviderConfig) -> OrchResult<Arc<dyn Supervisor>> {
    debug!(provider = %config.provider, model = %config.model, "create_supervisor: called");
    match config.provider.as_str() {
        "http" => Ok(Arc::new(HttpSupervisor::from_config(config)?)),
        "mock" => Ok(Arc::new(MockSupervisor::new())),
        other => Err(OrchError::new(
            ErrorKind::Validation,
            "supervisor",
            format!("Unknown supervisor provider: '{}'. Supported: http, mock", other),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_agent_error_retryable() {
        assert!(AgentError::Timeout(Duration::from_secs(1)).is_retryable());
        assert!(AgentError::Unavailable("down".to_string()).is_retryable());
        assert!(AgentError::Protocol("bad json".to_string()).is_retryable());
        assert!(!AgentError::Rejected("policy".to_string()).is_retryable());
    }

    #[test]
    fn test_agent_error_kind_mapping() {
        assert_eq!(AgentError::Timeout(Duration::ZERO).kind(), ErrorKind::Timeout);
        assert_eq!(AgentError::Unavailable(String::new()).kind(), ErrorKind::Unavailable);
        assert_eq!(AgentError::Protocol(String::new()).kind(), ErrorKind::Protocol);
        assert_eq!(AgentError::Rejected(String::new()).kind(), ErrorKind::Validation);
    }

    #[test]
    fn test_create_agent_unknown_provider() {
        let config = ProviderConfig {
            provider: "carrier-pigeon".to_string(),
            ..Default::default()
        };
        assert!(create_agent(&config).is_err());
    }

    #[test]
    fn test_create_mock_agent() {
        let config = ProviderConfig::default();
        assert!(create_agent(&config).is_ok());
        assert!(create_supervisor(&config).is_ok());
    }

    #[test]
    fn test_response_text_estimates_output_tokens() {
        let response = AgentResponse::text("x".repeat(400));
        assert_eq!(response.tokens.output, 100);
    }
}
