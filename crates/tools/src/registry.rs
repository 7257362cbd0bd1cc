use crate::request::ValidatedCall;
use crate::traits::{Tool, ToolError, ToolRegistry};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;

/// Registry of tools living in this process.
pub struct InProcessRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl InProcessRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }
}

impl Default for InProcessRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ToolRegistry for InProcessRegistry {
    async fn execute(&self, call: &ValidatedCall) -> Result<String, ToolError> {
        let tool = self
            .get(call.name())
            .ok_or_else(|| ToolError::NotFound(call.name().to_string()))?;
        tool.execute(call).await
    }

    fn schema(&self, name: &str) -> Option<Value> {
        self.tools.get(name).map(|tool| {
            json!({
                "type": "function",
                "function": {
                    "name": tool.name(),
                    "description": tool.description(),
                    "parameters": tool.schema()
                }
            })
        })
    }

    fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }
}
