use async_trait::async_trait;
use crate::request::ValidatedCall;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    NotFound(String),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Execution error: {0}")]
    Execution(String),
    #[error("Permission denied: {0}")]
    PermissionDenied(String),
    #[error("Timed out after {0:?}")]
    Timeout(Duration),
    #[error("Tool panicked")]
    Panicked,
}

/// A single in-process tool.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn schema(&self) -> Value;

    /// Runs an already validated call addressed to this tool.
    async fn execute(&self, call: &ValidatedCall) -> Result<String, ToolError>;
}

/// Anything that can execute a tool by name.
#[async_trait]
pub trait ToolRegistry: Send + Sync {
    async fn execute(&self, call: &ValidatedCall) -> Result<String, ToolError>;

    /// Function schema offered to providers, if the tool exists.
    fn schema(&self, name: &str) -> Option<Value>;

    fn names(&self) -> Vec<String>;
}
