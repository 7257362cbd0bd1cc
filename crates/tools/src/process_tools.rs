use crate::request::{ToolRequest, ValidatedCall};
use crate::traits::{Tool, ToolError};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::path::PathBuf;

/// Runs a shell command inside the workspace directory.
pub struct ExecTool {
    workdir: PathBuf,
}

impl ExecTool {
    pub fn new(workdir: PathBuf) -> Self {
        Self { workdir }
    }
}

#[async_trait]
impl Tool for ExecTool {
    fn name(&self) -> &str {
        "exec"
    }

    fn description(&self) -> &str {
        "Run a shell command in the workspace and return its output"
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": {"type": "string", "description": "Command line passed to sh -c"},
                "workdir": {"type": "string", "description": "Subdirectory of the workspace"}
            },
            "required": ["command"]
        })
    }

    async fn execute(&self, call: &ValidatedCall) -> Result<String, ToolError> {
        let ValidatedCall::Typed(ToolRequest::Exec { command, workdir }) = call else {
            return Err(call.mismatch(self.name()));
        };

        let mut dir = self.workdir.clone();
        if let Some(sub) = workdir {
            if sub.contains("..") || sub.starts_with('/') {
                return Err(ToolError::PermissionDenied(format!("workdir outside workspace: {}", sub)));
            }
            dir.push(sub);
        }

        let output = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(command)
            .current_dir(&dir)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| ToolError::Execution(e.to_string()))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !output.status.success() {
            return Err(ToolError::Execution(format!(
                "exit status {}: {}",
                output.status.code().unwrap_or(-1),
                stderr.trim()
            )));
        }
        if stderr.trim().is_empty() {
            Ok(stdout.into_owned())
        } else {
            Ok(format!("{}\n[stderr]\n{}", stdout, stderr))
        }
    }
}
