use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use switchyard_core::{Message, ToolCall, Usage};
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ProviderError {
    #[error("Rate limited: {0}")]
    RateLimited(String),
    #[error("Request timed out: {0}")]
    Timeout(String),
    #[error("Connection error: {0}")]
    Connection(String),
    #[error("Server error {status}: {message}")]
    Server { status: u16, message: String },
    #[error("Authentication failed: {0}")]
    Auth(String),
    #[error("Context length exceeded: {0}")]
    TokenOverflow(String),
    #[error("Bad request: {0}")]
    BadRequest(String),
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("Provider not configured: {0}")]
    Unavailable(String),
}

const OVERFLOW_MARKERS: &[&str] = &[
    "context_length_exceeded",
    "context length",
    "maximum context",
    "too many tokens",
    "prompt is too long",
    "input is too long",
    "exceeds the context window",
];

impl ProviderError {
    /// Worth retrying against another model.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ProviderError::RateLimited(_)
                | ProviderError::Timeout(_)
                | ProviderError::Connection(_)
                | ProviderError::Server { .. }
        )
    }

    /// Failure that puts the model into cooldown.
    pub fn is_hard_failure(&self) -> bool {
        self.is_transient() || matches!(self, ProviderError::Auth(_))
    }

    pub fn is_overflow(&self) -> bool {
        matches!(self, ProviderError::TokenOverflow(_))
    }

    /// Classify a non-success HTTP response.
    pub fn from_status(status: u16, body: &str) -> ProviderError {
        let message = body.chars().take(500).collect::<String>();
        match status {
            401 | 403 => ProviderError::Auth(message),
            429 => ProviderError::RateLimited(message),
            408 | 504 => ProviderError::Timeout(message),
            500..=599 => ProviderError::Server { status, message },
            400 | 413 | 422 if is_overflow_text(body) => ProviderError::TokenOverflow(message),
            _ => ProviderError::BadRequest(format!("{}: {}", status, message)),
        }
    }
}

pub fn is_overflow_text(body: &str) -> bool {
    let lower = body.to_lowercase();
    OVERFLOW_MARKERS.iter().any(|marker| lower.contains(marker))
}

/// Why the provider stopped generating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    EndTurn,
    ToolUse,
    MaxTokens,
    Other,
}

impl StopReason {
    pub fn from_finish_reason(reason: &str) -> StopReason {
        match reason {
            "stop" | "end_turn" => StopReason::EndTurn,
            "tool_calls" | "tool_use" | "function_call" => StopReason::ToolUse,
            "length" | "max_tokens" => StopReason::MaxTokens,
            _ => StopReason::Other,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProviderRequest {
    pub model: String,
    pub messages: Vec<Message>,
    /// Function schemas offered to the model.
    pub tools: Vec<Value>,
    pub max_tokens: u32,
    /// Reasoning budget in tokens.
    pub thinking: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ProviderResponse {
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
    pub usage: Usage,
    pub stop_reason: Option<StopReason>,
}

impl ProviderResponse {
    pub fn stop_reason(&self) -> StopReason {
        self.stop_reason.unwrap_or(if self.tool_calls.is_empty() {
            StopReason::EndTurn
        } else {
            StopReason::ToolUse
        })
    }
}

/// Token deltas are delivered over this channel when the caller wants them.
pub type TokenSender = mpsc::UnboundedSender<String>;

#[async_trait]
pub trait ProviderClient: Send + Sync {
    async fn call(
        &self,
        request: &ProviderRequest,
        on_token: Option<&TokenSender>,
    ) -> Result<ProviderResponse, ProviderError>;

    fn name(&self) -> &str;
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert!(matches!(ProviderError::from_status(401, "no"), ProviderError::Auth(_)));
        assert!(ProviderError::from_status(429, "slow down").is_transient());
        assert!(ProviderError::from_status(503, "overloaded").is_transient());
        assert!(ProviderError::from_status(
            400,
            r#"{"error":{"code":"context_length_exceeded"}}"#
        )
        .is_overflow());
        assert!(matches!(
            ProviderError::from_status(400, "bad field"),
            ProviderError::BadRequest(_)
        ));
    }

    #[test]
    fn test_auth_is_hard_but_not_transient() {
        let err = ProviderError::Auth("bad key".into());
        assert!(err.is_hard_failure());
        assert!(!err.is_transient());
        assert!(!ProviderError::BadRequest("x".into()).is_hard_failure());
    }

    #[test]
    fn test_stop_reason_fallback() {
        let response = ProviderResponse::default();
        assert_eq!(response.stop_reason(), StopReason::EndTurn);
        assert_eq!(StopReason::from_finish_reason("length"), StopReason::MaxTokens);
    }
}
