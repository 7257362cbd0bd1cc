pub mod dispatcher;
pub mod file_tools;
pub mod guard;
pub mod limits;
pub mod process_tools;
pub mod redact;
pub mod registry;
pub mod request;
pub mod traits;

pub use dispatcher::{ProgressSender, ToolDispatcher, ToolEvent, ERROR_MARKER};
pub use guard::{GuardTrip, ToolGuard};
pub use limits::ToolLimits;
pub use redact::redact;
pub use registry::InProcessRegistry;
pub use request::{ToolRequest, ValidatedCall};
pub use traits::{Tool, ToolError, ToolRegistry};

use std::path::Path;
use std::sync::Arc;

/// Registry with the workspace tools (exec, read, write, edit) rooted at `workspace`.
pub fn workspace_registry(workspace: &Path) -> InProcessRegistry {
    let mut registry = InProcessRegistry::new();
    let root = workspace.to_path_buf();
    registry.register(Arc::new(process_tools::ExecTool::new(root.clone())));
    registry.register(Arc::new(file_tools::ReadTool::new(root.clone())));
    registry.register(Arc::new(file_tools::WriteTool::new(root.clone())));
    registry.register(Arc::new(file_tools::EditTool::new(root)));
    registry
}
