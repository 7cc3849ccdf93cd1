//! ReadFile: read a text file from the work directory.

use async_trait::async_trait;
use rustact_core::error::ToolError;
use rustact_core::tool::{ParamKind, Tool, ToolArgs, ToolContext, ToolOutput, ToolSpec};

use crate::sandbox::Workspace;
use crate::str_arg;

pub struct ReadFileTool {
    spec: ToolSpec,
    workspace: Workspace,
}

impl ReadFileTool {
    pub fn new(workspace: Workspace) -> Self {
        Self {
            spec: ToolSpec::new(
                "ReadFile",
                "Read the full text content of a file. Invalid UTF-8 is replaced.",
            )
            .required(
                "path",
                ParamKind::String,
                "File path, relative to the work directory",
            ),
            workspace,
        }
    }
}

#[async_trait]
impl Tool for ReadFileTool {
    fn spec(&self) -> &ToolSpec {
        &self.spec
    }

    async fn execute(&self, args: ToolArgs, _ctx: ToolContext) -> Result<ToolOutput, ToolError> {
        let path = str_arg(&args, "path")?;
        let resolved = self
            .workspace
            .resolve(path)
            .map_err(|e| e.into_tool_error("ReadFile"))?;

        if resolved.is_dir() {
            return Err(ToolError::ExecutionFailed {
                tool_name: "ReadFile".into(),
                reason: format!("'{path}' is a directory; use ListFiles"),
            });
        }

        let bytes = tokio::fs::read(&resolved)
            .await
            .map_err(|e| ToolError::ExecutionFailed {
                tool_name: "ReadFile".into(),
                reason: format!("Failed to read '{path}': {e}"),
            })?;

        Ok(ToolOutput::Text(String::from_utf8_lossy(&bytes).into_owned()))
    }
}
