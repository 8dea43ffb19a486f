//! Chat-completion transport for the text oracle

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

const USER_AGENT: &str = concat!("nomen-engine/", env!("CARGO_PKG_VERSION"));
const TEMPERATURE: f64 = 0.3;
const MAX_TOKENS: u32 = 1024;

/// Oracle call failures
#[derive(Debug, Clone, Error)]
pub enum OracleError {
    #[error("Request timed out")]
    Timeout,

    #[error("Rate limited by the oracle")]
    RateLimited,

    #[error("Network error: {0}")]
    Network(String),

    #[error("API error {0}: {1}")]
    Api(u16, String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Circuit breaker is open")]
    CircuitOpen,

    #[error("Oracle is not configured")]
    Disabled,
}

impl OracleError {
    /// Whether another attempt may succeed
    pub fn is_transient(&self) -> bool {
        match self {
            OracleError::Timeout | OracleError::RateLimited | OracleError::Network(_) => true,
            OracleError::Api(status, _) => *status >= 500,
            OracleError::Parse(_) | OracleError::CircuitOpen | OracleError::Disabled => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

/// One round trip to a chat model; returns the reply text
#[async_trait]
pub trait ChatTransport: Send + Sync {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, OracleError>;
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f64,
    max_tokens: u32,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    content: String,
}

/// OpenAI-style chat completions over HTTPS
pub struct HttpChatTransport {
    http_client: reqwest::Client,
    url: String,
    api_key: String,
    model: String,
}

impl HttpChatTransport {
    pub fn new(url: String, api_key: String, model: String, timeout: Duration) -> Result<Self, OracleError> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|e| OracleError::Network(e.to_string()))?;

        Ok(Self {
            http_client,
            url,
            api_key,
            model,
        })
    }
}

#[async_trait]
impl ChatTransport for HttpChatTransport {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, OracleError> {
        let body = ChatRequest {
            model: &self.model,
            messages,
            temperature: TEMPERATURE,
            max_tokens: MAX_TOKENS,
            stream: false,
        };

        let response = self
            .http_client
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    OracleError::Timeout
                } else {
                    OracleError::Network(e.to_string())
                }
            })?;

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(OracleError::RateLimited);
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(OracleError::Api(status.as_u16(), text));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| OracleError::Parse(e.to_string()))?;

        parsed
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or_else(|| OracleError::Parse("reply has no choices".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(OracleError::Timeout.is_transient());
        assert!(OracleError::RateLimited.is_transient());
        assert!(OracleError::Api(503, String::new()).is_transient());
        assert!(!OracleError::Api(401, String::new()).is_transient());
        assert!(!OracleError::Parse("x".into()).is_transient());
        assert!(!OracleError::CircuitOpen.is_transient());
    }

    #[test]
    fn test_request_body_shape() {
        let messages = vec![ChatMessage::system("s"), ChatMessage::user("u")];
        let body = ChatRequest {
            model: "GLM-4.5-Air",
            messages: &messages,
            temperature: TEMPERATURE,
            max_tokens: MAX_TOKENS,
            stream: false,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["model"], "GLM-4.5-Air");
        assert_eq!(json["messages"][1]["role"], "user");
        assert_eq!(json["max_tokens"], 1024);
        assert_eq!(json["stream"], false);
    }
}
