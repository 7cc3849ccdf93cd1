//! WriteFile: create or overwrite a file, creating parent directories.

use async_trait::async_trait;
use rustact_core::error::ToolError;
use rustact_core::tool::{ParamKind, Tool, ToolArgs, ToolContext, ToolOutput, ToolSpec};
use tokio::io::AsyncWriteExt;

use crate::sandbox::Workspace;
use crate::{bool_arg, str_arg};

pub struct WriteFileTool {
    spec: ToolSpec,
    workspace: Workspace,
}

impl WriteFileTool {
    pub fn new(workspace: Workspace) -> Self {
        Self {
            spec: ToolSpec::new(
                "WriteFile",
                "Write content to a file. Creates the file and any missing parent \
                 directories; overwrites unless `append` is true.",
            )
            .required(
                "path",
                ParamKind::String,
                "File path, relative to the work directory",
            )
            .required("content", ParamKind::String, "The content to write")
            .optional(
                "append",
                ParamKind::Boolean,
                "Append to the file instead of overwriting (default false)",
            ),
            workspace,
        }
    }

    fn failed(reason: String) -> ToolError {
        ToolError::ExecutionFailed {
            tool_name: "WriteFile".into(),
            reason,
        }
    }
}

#[async_trait]
impl Tool for WriteFileTool {
    fn spec(&self) -> &ToolSpec {
        &self.spec
    }

    async fn execute(&self, args: ToolArgs, _ctx: ToolContext) -> Result<ToolOutput, ToolError> {
        let path = str_arg(&args, "path")?;
        let content = str_arg(&args, "content")?;
        let append = bool_arg(&args, "append")?.unwrap_or(false);

        let resolved = self
            .workspace
            .resolve(path)
            .map_err(|e| e.into_tool_error("WriteFile"))?;

        if let Some(parent) = resolved.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| Self::failed(format!("Failed to create directory: {e}")))?;
        }

        if append {
            let mut file = tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&resolved)
                .await
                .map_err(|e| Self::failed(format!("Failed to open '{path}': {e}")))?;
            file.write_all(content.as_bytes())
                .await
                .map_err(|e| Self::failed(format!("Failed to write '{path}': {e}")))?;
        } else {
            tokio::fs::write(&resolved, content)
                .await
                .map_err(|e| Self::failed(format!("Failed to write '{path}': {e}")))?;
        }

        Ok(ToolOutput::Text(format!(
            "Successfully wrote {} bytes to {}",
            content.len(),
            self.workspace.relative(&resolved)
        )))
    }
}
