//! CreateFolder: create a directory and any missing parents.

use async_trait::async_trait;
use rustact_core::error::ToolError;
use rustact_core::tool::{ParamKind, Tool, ToolArgs, ToolContext, ToolOutput, ToolSpec};

use crate::sandbox::Workspace;
use crate::str_arg;

pub struct CreateFolderTool {
    spec: ToolSpec,
    workspace: Workspace,
}

impl CreateFolderTool {
    pub fn new(workspace: Workspace) -> Self {
        Self {
            spec: ToolSpec::new(
                "CreateFolder",
                "Create a directory, including missing parent directories.",
            )
            .required(
                "path",
                ParamKind::String,
                "Directory path, relative to the work directory",
            ),
            workspace,
        }
    }
}

#[async_trait]
impl Tool for CreateFolderTool {
    fn spec(&self) -> &ToolSpec {
        &self.spec
    }

    async fn execute(&self, args: ToolArgs, _ctx: ToolContext) -> Result<ToolOutput, ToolError> {
        let path = str_arg(&args, "path")?;
        let resolved = self
            .workspace
            .resolve(path)
            .map_err(|e| e.into_tool_error("CreateFolder"))?;

        if resolved.is_file() {
            return Err(ToolError::ExecutionFailed {
                tool_name: "CreateFolder".into(),
                reason: format!("'{path}' already exists as a file"),
            });
        }

        tokio::fs::create_dir_all(&resolved)
            .await
            .map_err(|e| ToolError::ExecutionFailed {
                tool_name: "CreateFolder".into(),
                reason: e.to_string(),
            })?;

        Ok(ToolOutput::Text(format!(
            "Created folder {}",
            self.workspace.relative(&resolved)
        )))
    }
}
