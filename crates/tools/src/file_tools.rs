use crate::request::{ToolRequest, ValidatedCall};
use crate::traits::{Tool, ToolError};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::path::{Component, Path, PathBuf};

/// Resolve `relative` inside `root`, refusing absolute paths and `..`.
fn sandboxed(root: &Path, relative: &str) -> Result<PathBuf, ToolError> {
    let candidate = Path::new(relative);
    let escapes = candidate
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
    if escapes {
        return Err(ToolError::PermissionDenied(format!(
            "Path outside sandbox: {}",
            relative
        )));
    }
    Ok(root.join(candidate))
}

pub struct ReadTool {
    sandbox_path: PathBuf,
}

impl ReadTool {
    pub fn new(sandbox_path: PathBuf) -> Self {
        Self { sandbox_path }
    }
}

#[async_trait]
impl Tool for ReadTool {
    fn name(&self) -> &str {
        "read"
    }

    fn description(&self) -> &str {
        "Read a text file from the workspace"
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "description": "Path relative to the workspace"}
            },
            "required": ["path"]
        })
    }

    async fn execute(&self, call: &ValidatedCall) -> Result<String, ToolError> {
        let ValidatedCall::Typed(ToolRequest::Read { path }) = call else {
            return Err(call.mismatch(self.name()));
        };
        let path = sandboxed(&self.sandbox_path, path)?;
        tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| ToolError::Execution(e.to_string()))
    }
}

pub struct WriteTool {
    sandbox_path: PathBuf,
}

impl WriteTool {
    pub fn new(sandbox_path: PathBuf) -> Self {
        Self { sandbox_path }
    }
}

#[async_trait]
impl Tool for WriteTool {
    fn name(&self) -> &str {
        "write"
    }

    fn description(&self) -> &str {
        "Create or overwrite a file in the workspace"
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "description": "Path relative to the workspace"},
                "content": {"type": "string", "description": "Full file content"}
            },
            "required": ["path", "content"]
        })
    }

    async fn execute(&self, call: &ValidatedCall) -> Result<String, ToolError> {
        let ValidatedCall::Typed(ToolRequest::Write {
            path: relative,
            content,
        }) = call
        else {
            return Err(call.mismatch(self.name()));
        };
        let path = sandboxed(&self.sandbox_path, relative)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| ToolError::Execution(e.to_string()))?;
        }
        tokio::fs::write(&path, content)
            .await
            .map_err(|e| ToolError::Execution(e.to_string()))?;
        Ok(format!("Wrote {} bytes to {}", content.len(), relative))
    }
}

pub struct EditTool {
    sandbox_path: PathBuf,
}

impl EditTool {
    pub fn new(sandbox_path: PathBuf) -> Self {
        Self { sandbox_path }
    }
}

#[async_trait]
impl Tool for EditTool {
    fn name(&self) -> &str {
        "edit"
    }

    fn description(&self) -> &str {
        "Replace one exact occurrence of text in a workspace file"
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {"type": "string"},
                "old_text": {"type": "string", "description": "Text to replace; must occur exactly once"},
                "new_text": {"type": "string"}
            },
            "required": ["path", "old_text", "new_text"]
        })
    }

    async fn execute(&self, call: &ValidatedCall) -> Result<String, ToolError> {
        let ValidatedCall::Typed(ToolRequest::Edit {
            path: relative,
            old_text,
            new_text,
        }) = call
        else {
            return Err(call.mismatch(self.name()));
        };
        let path = sandboxed(&self.sandbox_path, relative)?;

        let current = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| ToolError::Execution(e.to_string()))?;
        match current.matches(old_text.as_str()).count() {
            0 => Err(ToolError::Execution(format!("old_text not found in {}", relative))),
            1 => {
                let updated = current.replacen(old_text.as_str(), new_text, 1);
                tokio::fs::write(&path, updated)
                    .await
                    .map_err(|e| ToolError::Execution(e.to_string()))?;
                Ok(format!("Edited {}", relative))
            }
            n => Err(ToolError::Execution(format!(
                "old_text occurs {} times in {}; make it unique",
                n, relative
            ))),
        }
    }
}
