//! Error taxonomy and the localized messages shown to end users.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Closed set of failure classes a turn can end with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    TransientProvider,
    PermanentAuth,
    TokenOverflow,
    ToolExecution,
    LoopDetected,
    CircuitOpen,
    MaxIterations,
    Aborted,
    ShuttingDown,
    Unhandled,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::TransientProvider => "transient_provider",
            ErrorKind::PermanentAuth => "permanent_auth",
            ErrorKind::TokenOverflow => "token_overflow",
            ErrorKind::ToolExecution => "tool_execution",
            ErrorKind::LoopDetected => "loop_detected",
            ErrorKind::CircuitOpen => "circuit_open",
            ErrorKind::MaxIterations => "max_iterations",
            ErrorKind::Aborted => "aborted",
            ErrorKind::ShuttingDown => "shutting_down",
            ErrorKind::Unhandled => "unhandled",
        }
    }
}

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("All providers failed: {0}")]
    ProvidersExhausted(String),

    #[error("Authentication rejected by {provider}: {message}")]
    Auth { provider: String, message: String },

    #[error("Context too large after all recovery attempts")]
    TokenOverflow,

    #[error("Tool loop detected: {0}")]
    LoopDetected(String),

    #[error("Circuit breaker open: {0}")]
    CircuitOpen(String),

    #[error("Max iterations exceeded: {0}")]
    MaxIterations(usize),

    #[error("Turn aborted")]
    Aborted,

    #[error("Gateway is shutting down")]
    ShuttingDown,

    #[error("Session error: {0}")]
    Session(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::ProvidersExhausted(_) => ErrorKind::TransientProvider,
            EngineError::Auth { .. } => ErrorKind::PermanentAuth,
            EngineError::TokenOverflow => ErrorKind::TokenOverflow,
            EngineError::LoopDetected(_) => ErrorKind::LoopDetected,
            EngineError::CircuitOpen(_) => ErrorKind::CircuitOpen,
            EngineError::MaxIterations(_) => ErrorKind::MaxIterations,
            EngineError::Aborted => ErrorKind::Aborted,
            EngineError::ShuttingDown => ErrorKind::ShuttingDown,
            EngineError::Session(_) | EngineError::Internal(_) => ErrorKind::Unhandled,
        }
    }

    /// Localized text for the end user. Never exposes internals.
    pub fn user_message(&self, locale: Locale) -> &'static str {
        friendly_message(self.kind(), locale)
    }
}

/// Languages the user-facing messages are available in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Locale {
    #[default]
    En,
    Ko,
}

impl Locale {
    pub fn parse(value: &str) -> Locale {
        match value.trim().to_ascii_lowercase().as_str() {
            "ko" | "ko-kr" | "korean" => Locale::Ko,
            _ => Locale::En,
        }
    }
}

pub fn friendly_message(kind: ErrorKind, locale: Locale) -> &'static str {
    match (locale, kind) {
        (Locale::En, ErrorKind::TransientProvider) => {
            "The AI service is temporarily unavailable. Please try again in a moment."
        }
        (Locale::En, ErrorKind::PermanentAuth) => {
            "The AI service rejected our credentials. Please check the API key configuration."
        }
        (Locale::En, ErrorKind::TokenOverflow) => {
            "This conversation has grown too long. Please start a new session or try a shorter request."
        }
        (Locale::En, ErrorKind::LoopDetected) => {
            "I kept repeating the same action without progress, so I stopped. Could you rephrase the request?"
        }
        (Locale::En, ErrorKind::CircuitOpen) => {
            "Tools kept failing, so I stopped trying. Please check the request and try again."
        }
        (Locale::En, ErrorKind::MaxIterations) => {
            "This task needed more steps than allowed. Please break it into smaller requests."
        }
        (Locale::En, ErrorKind::Aborted) => "The request was cancelled.",
        (Locale::En, ErrorKind::ShuttingDown) => {
            "The gateway is restarting. Please try again shortly."
        }
        (Locale::Ko, ErrorKind::TransientProvider) => {
            "AI 서비스가 일시적으로 응답하지 않습니다. 잠시 후 다시 시도해 주세요."
        }
        (Locale::Ko, ErrorKind::PermanentAuth) => {
            "AI 서비스 인증에 실패했습니다. API 키 설정을 확인해 주세요."
        }
        (Locale::Ko, ErrorKind::TokenOverflow) => {
            "대화가 너무 길어졌습니다. 새 세션을 시작하거나 더 짧게 요청해 주세요."
        }
        (Locale::Ko, ErrorKind::LoopDetected) => {
            "같은 작업이 진전 없이 반복되어 중단했습니다. 요청을 다르게 표현해 주세요."
        }
        (Locale::Ko, ErrorKind::CircuitOpen) => {
            "도구 실행이 계속 실패하여 중단했습니다. 요청을 확인한 뒤 다시 시도해 주세요."
        }
        (Locale::Ko, ErrorKind::MaxIterations) => {
            "작업 단계가 허용 범위를 넘었습니다. 요청을 작게 나누어 주세요."
        }
        (Locale::Ko, ErrorKind::Aborted) => "요청이 취소되었습니다.",
        (Locale::Ko, ErrorKind::ShuttingDown) => {
            "게이트웨이가 재시작 중입니다. 잠시 후 다시 시도해 주세요."
        }
        (Locale::En, _) => "Something went wrong while handling your request. Please try again.",
        (Locale::Ko, _) => "요청을 처리하는 중 문제가 발생했습니다. 다시 시도해 주세요.",
    }
}

pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_mapping() {
        assert_eq!(EngineError::TokenOverflow.kind(), ErrorKind::TokenOverflow);
        assert_eq!(EngineError::Internal("x".into()).kind(), ErrorKind::Unhandled);
        assert_eq!(
            EngineError::ProvidersExhausted("503".into()).kind(),
            ErrorKind::TransientProvider
        );
    }

    #[test]
    fn test_messages_hide_internals() {
        let err = EngineError::Internal("panicked at src/secret.rs:10".into());
        let text = err.user_message(Locale::En);
        assert!(!text.contains("secret.rs"));
        assert!(!err.user_message(Locale::Ko).is_empty());
    }

    #[test]
    fn test_tool_execution_uses_generic_fallback() {
        assert_eq!(
            friendly_message(ErrorKind::ToolExecution, Locale::En),
            friendly_message(ErrorKind::Unhandled, Locale::En)
        );
    }

    #[test]
    fn test_locale_parse() {
        assert_eq!(Locale::parse("KO"), Locale::Ko);
        assert_eq!(Locale::parse("fr"), Locale::En);
    }
}
