//! Typed tool requests, validated once before dispatch.

use crate::traits::ToolError;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "tool", content = "args", rename_all = "snake_case")]
pub enum ToolRequest {
    Exec {
        command: String,
        #[serde(default)]
        workdir: Option<String>,
    },
    Read {
        path: String,
    },
    Write {
        path: String,
        content: String,
    },
    Edit {
        path: String,
        old_text: String,
        new_text: String,
    },
    WebSearch {
        query: String,
        #[serde(default)]
        max_results: Option<u32>,
    },
    WebFetch {
        url: String,
    },
}

/// Names with a typed request shape.
const TYPED_TOOLS: &[&str] = &["exec", "read", "write", "edit", "web_search", "web_fetch"];

/// Validated form of one call: typed for known tools, opaque otherwise.
#[derive(Debug, Clone, PartialEq)]
pub enum ValidatedCall {
    Typed(ToolRequest),
    Other {
        name: String,
        args: Map<String, Value>,
    },
}

impl ValidatedCall {
    pub fn name(&self) -> &str {
        match self {
            ValidatedCall::Typed(request) => request.name(),
            ValidatedCall::Other { name, .. } => name,
        }
    }

    /// Error for a tool handed a call shaped for another tool.
    pub fn mismatch(&self, tool: &str) -> ToolError {
        ToolError::Validation(format!("{} cannot handle a {} request", tool, self.name()))
    }
}

impl ToolRequest {
    pub fn name(&self) -> &'static str {
        match self {
            ToolRequest::Exec { .. } => "exec",
            ToolRequest::Read { .. } => "read",
            ToolRequest::Write { .. } => "write",
            ToolRequest::Edit { .. } => "edit",
            ToolRequest::WebSearch { .. } => "web_search",
            ToolRequest::WebFetch { .. } => "web_fetch",
        }
    }

    pub fn parse(name: &str, args: &Map<String, Value>) -> Result<ValidatedCall, ToolError> {
        if let Some(raw) = args.get("_invalid_arguments") {
            return Err(ToolError::Validation(format!(
                "arguments for {} are not a JSON object: {}",
                name, raw
            )));
        }
        if !TYPED_TOOLS.contains(&name) {
            return Ok(ValidatedCall::Other {
                name: name.to_string(),
                args: args.clone(),
            });
        }

        let request: ToolRequest =
            serde_json::from_value(json!({"tool": name, "args": Value::Object(args.clone())}))
                .map_err(|e| ToolError::Validation(format!("{}: {}", name, e)))?;
        request.validate()?;
        Ok(ValidatedCall::Typed(request))
    }

    fn validate(&self) -> Result<(), ToolError> {
        let blank = |field: &str, value: &str| {
            if value.trim().is_empty() {
                Err(ToolError::Validation(format!("'{}' must not be empty", field)))
            } else {
                Ok(())
            }
        };
        match self {
            ToolRequest::Exec { command, .. } => blank("command", command),
            ToolRequest::Read { path } | ToolRequest::Write { path, .. } => blank("path", path),
            ToolRequest::Edit { path, old_text, .. } => {
                blank("path", path)?;
                blank("old_text", old_text)
            }
            ToolRequest::WebSearch { query, .. } => blank("query", query),
            ToolRequest::WebFetch { url } => {
                if url.starts_with("http://") || url.starts_with("https://") {
                    Ok(())
                } else {
                    Err(ToolError::Validation(format!("unsupported url: {}", url)))
                }
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    fn args(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_typed_exec() {
        let call = ToolRequest::parse("exec", &args(json!({"command": "ls -la"}))).unwrap();
        assert_eq!(
            call,
            ValidatedCall::Typed(ToolRequest::Exec {
                command: "ls -la".into(),
                workdir: None
            })
        );
    }

    #[test]
    fn test_missing_field_rejected() {
        let err = ToolRequest::parse("write", &args(json!({"path": "a.txt"}))).unwrap_err();
        assert!(matches!(err, ToolError::Validation(_)));
    }

    #[test]
    fn test_blank_and_bad_url_rejected() {
        assert!(ToolRequest::parse("read", &args(json!({"path": "  "}))).is_err());
        assert!(ToolRequest::parse("web_fetch", &args(json!({"url": "file:///etc/passwd"}))).is_err());
    }

    #[test]
    fn test_unknown_tool_passes_through() {
        let call = ToolRequest::parse("weather", &args(json!({"city": "Seoul"}))).unwrap();
        assert_eq!(call.name(), "weather");
        assert_eq!(
            call,
            ValidatedCall::Other {
                name: "weather".into(),
                args: args(json!({"city": "Seoul"}))
            }
        );
    }

    #[test]
    fn test_typed_names_match_tool_names() {
        for name in TYPED_TOOLS {
            let raw = match *name {
                "exec" => json!({"command": "true"}),
                "read" => json!({"path": "a"}),
                "write" => json!({"path": "a", "content": ""}),
                "edit" => json!({"path": "a", "old_text": "x", "new_text": "y"}),
                "web_search" => json!({"query": "rust"}),
                _ => json!({"url": "https://example.org"}),
            };
            let call = ToolRequest::parse(name, &args(raw)).unwrap();
            assert!(matches!(call, ValidatedCall::Typed(_)));
            assert_eq!(call.name(), *name);
        }
    }

    #[test]
    fn test_invalid_arguments_marker() {
        let err = ToolRequest::parse("weather", &args(json!({"_invalid_arguments": "oops"}))).unwrap_err();
        assert!(err.to_string().contains("not a JSON object"));
    }
}
