//! HTTP implementations of the agent and supervisor capabilities
//!
//! Both speak a small JSON protocol against a local agent runner. The API
//! key is read from the environment variable named in configuration; the
//! idempotency key travels as a header so the runner can deduplicate
//! retried dispatches.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use crate::config::ProviderConfig;
use crate::domain::TokenUsage;

use super::{AgentClient, AgentError, AgentRequest, AgentResponse, Supervisor};

/// HTTP agent client
pub struct HttpAgent {
    model: String,
    api_key: String,
    base_url: String,
    http: Client,
    max_tokens: u32,
    window: Option<u64>,
}

impl HttpAgent {
    /// Create a client from configuration
    pub fn from_config(config: &ProviderConfig) -> Result<Self, AgentError> {
        let api_key = std::env::var(&config.api_key_env)
            .map_err(|_| AgentError::Rejected(format!("Environment variable {} not set", config.api_key_env)))?;

        let http = Client::builder()
            .build()
            .map_err(|e| AgentError::Unavailable(e.to_string()))?;

        Ok(Self {
            model: config.model.clone(),
            api_key,
            base_url: config.base_url.clone(),
            http,
            max_tokens: config.max_tokens,
            window: config.context_window,
        })
    }

    fn build_request_body(&self, request: &AgentRequest) -> serde_json::Value {
        serde_json::json!({
            "model": self.model,
            "prompt": request.prompt,
            "max_tokens": request.max_tokens.min(self.max_tokens),
        })
    }

    fn parse_response(&self, api_response: WireResponse) -> AgentResponse {
        AgentResponse {
            text: api_response.text,
            tokens: TokenUsage {
                input: api_response.usage.input_tokens,
                cache_read: api_response.usage.cache_read_tokens.unwrap_or(0),
                cache_creation: api_response.usage.cache_creation_tokens.unwrap_or(0),
                output: api_response.usage.output_tokens,
            },
            files_touched: api_response.files.unwrap_or_default(),
            metadata: api_response.metadata.unwrap_or(serde_json::Value::Null),
        }
    }
}

#[async_trait]
impl AgentClient for HttpAgent {
    async fn send(&self, request: AgentRequest) -> Result<AgentResponse, AgentError> {
        let url = format!("{}/v1/agent/execute", self.base_url);
        let body = self.build_request_body(&request);

        let response = self
            .http
            .post(url)
            .header("x-api-key", self.api_key.clone())
            .header("idempotency-key", request.idempotency_key.clone())
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = response.status().as_u16();
        if status == 429 {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse::<u64>().ok())
                .unwrap_or(60);
            return Err(AgentError::Unavailable(format!(
                "rate limited, retry after {}s",
                retry_after
            )));
        }
        if status == 401 || status == 403 {
            let text = response.text().await.unwrap_or_default();
            return Err(AgentError::Rejected(text));
        }
        if !(200..300).contains(&status) {
            let text = response.text().await.unwrap_or_default();
            if status >= 500 {
                return Err(AgentError::Unavailable(format!("status {}: {}", status, text)));
            }
            return Err(AgentError::Rejected(format!("status {}: {}", status, text)));
        }

        let api_response: WireResponse = response
            .json()
            .await
            .map_err(|e| AgentError::Protocol(e.to_string()))?;
        Ok(self.parse_response(api_response))
    }

    fn context_window(&self) -> Option<u64> {
        self.window
    }
}

/// HTTP supervisor client; shares the wire shape with the agent but hits
/// the plain generation endpoint
pub struct HttpSupervisor {
    model: String,
    api_key: String,
    base_url: String,
    http: Client,
    max_tokens: u32,
}

impl HttpSupervisor {
    pub fn from_config(config: &ProviderConfig) -> Result<Self, AgentError> {
        let api_key = std::env::var(&config.api_key_env)
            .map_err(|_| AgentError::Rejected(format!("Environment variable {} not set", config.api_key_env)))?;

        let http = Client::builder()
            .build()
            .map_err(|e| AgentError::Unavailable(e.to_string()))?;

        Ok(Self {
            model: config.model.clone(),
            api_key,
            base_url: config.base_url.clone(),
            http,
            max_tokens: config.max_tokens,
        })
    }
}

#[async_trait]
impl Supervisor for HttpSupervisor {
    async fn generate(&self, prompt: &str, max_tokens: u32) -> Result<String, AgentError> {
        let url = format!("{}/v1/generate", self.base_url);
        let body = serde_json::json!({
            "model": self.model,
            "prompt": prompt,
            "max_tokens": max_tokens.min(self.max_tokens),
        });

        let response = self
            .http
            .post(url)
            .header("x-api-key", self.api_key.clone())
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = response.status().as_u16();
        if !(200..300).contains(&status) {
            let text = response.text().await.unwrap_or_default();
            if status >= 500 || status == 429 {
                return Err(AgentError::Unavailable(format!("status {}: {}", status, text)));
            }
            return Err(AgentError::Rejected(format!("status {}: {}", status, text)));
        }

        let wire: GenerateResponse = response
            .json()
            .await
            .map_err(|e| AgentError::Protocol(e.to_string()))?;
        Ok(wire.text)
    }

    fn available(&self) -> bool {
        true
    }
}

// Wire types

#[derive(Debug, Deserialize)]
struct WireResponse {
    text: String,
    usage: WireUsage,
    files: Option<Vec<String>>,
    metadata: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    input_tokens: u64,
    output_tokens: u64,
    cache_read_tokens: Option<u64>,
    cache_creation_tokens: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    text: String,
}
