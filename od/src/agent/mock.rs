//! Mock capability clients for tests
//!
//! Scripted responses pop in order; when the script runs dry the mocks fall
//! back to a deterministic default so long executions stay predictable.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use super::{AgentClient, AgentError, AgentRequest, AgentResponse, Supervisor};
use crate::domain::TokenUsage;

/// Scripted agent for tests
pub struct MockAgent {
    responses: Mutex<VecDeque<Result<AgentResponse, AgentError>>>,
    window: Option<u64>,
    /// Tokens reported by the fallback response
    default_tokens: TokenUsage,
}

impl MockAgent {
    pub fn new(responses: Vec<Result<AgentResponse, AgentError>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            window: None,
            default_tokens: TokenUsage {
                input: 200,
                cache_read: 0,
                cache_creation: 0,
                output: 100,
            },
        }
    }

    /// Script only successful responses
    pub fn with_responses(responses: Vec<AgentResponse>) -> Self {
        Self::new(responses.into_iter().map(Ok).collect())
    }

    pub fn with_window(mut self, window: u64) -> Self {
        self.window = Some(window);
        self
    }

    pub fn with_default_tokens(mut self, tokens: TokenUsage) -> Self {
        self.default_tokens = tokens;
        self
    }
}

#[async_trait]
impl AgentClient for MockAgent {
    async fn send(&self, request: AgentRequest) -> Result<AgentResponse, AgentError> {
        let scripted = self.responses.lock().unwrap().pop_front();
        match scripted {
            Some(response) => response,
            None => Ok(AgentResponse {
                text: format!("Applied the requested change for: {}", request.idempotency_key),
                tokens: self.default_tokens,
                files_touched: Vec::new(),
                metadata: serde_json::Value::Null,
            }),
        }
    }

    fn context_window(&self) -> Option<u64> {
        self.window
    }
}

/// Scripted supervisor for tests
pub struct MockSupervisor {
    replies: Mutex<VecDeque<String>>,
    available: bool,
}

impl MockSupervisor {
    pub fn new() -> Self {
        Self {
            replies: Mutex::new(VecDeque::new()),
            available: true,
        }
    }

    pub fn with_replies(replies: Vec<String>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            available: true,
        }
    }

    /// A supervisor that reports itself absent
    pub fn unavailable() -> Self {
        Self {
            replies: Mutex::new(VecDeque::new()),
            available: false,
        }
    }
}

impl Default for MockSupervisor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Supervisor for MockSupervisor {
    async fn generate(&self, _prompt: &str, _max_tokens: u32) -> Result<String, AgentError> {
        if !self.available {
            return Err(AgentError::Unavailable("supervisor disabled".to_string()));
        }
        let reply = self.replies.lock().unwrap().pop_front();
        Ok(reply.unwrap_or_else(|| "0.9".to_string()))
    }

    fn available(&self) -> bool {
        self.available
    }
}
