//! EditFile: exact string replacement inside an existing file.

use async_trait::async_trait;
use rustact_core::error::ToolError;
use rustact_core::tool::{ParamKind, Tool, ToolArgs, ToolContext, ToolOutput, ToolSpec};

use crate::sandbox::Workspace;
use crate::{bool_arg, str_arg};

pub struct EditFileTool {
    spec: ToolSpec,
    workspace: Workspace,
}

impl EditFileTool {
    pub fn new(workspace: Workspace) -> Self {
        Self {
            spec: ToolSpec::new(
                "EditFile",
                "Replace an exact snippet in a file. `old_string` must match exactly \
                 once unless `replace_all` is true.",
            )
            .required(
                "path",
                ParamKind::String,
                "File path, relative to the work directory",
            )
            .required("old_string", ParamKind::String, "Exact text to replace")
            .required("new_string", ParamKind::String, "Replacement text")
            .optional(
                "replace_all",
                ParamKind::Boolean,
                "Replace every occurrence (default false)",
            ),
            workspace,
        }
    }

    fn failed(reason: String) -> ToolError {
        ToolError::ExecutionFailed {
            tool_name: "EditFile".into(),
            reason,
        }
    }
}

/// Apply the replacement, returning the new text and the number of matches
/// replaced.
fn replace(
    text: &str,
    old: &str,
    new: &str,
    replace_all: bool,
) -> Result<(String, usize), String> {
    let count = text.matches(old).count();
    match count {
        0 => Err("old_string not found in file".into()),
        1 => Ok((text.replacen(old, new, 1), 1)),
        n if replace_all => Ok((text.replace(old, new), n)),
        n => Err(format!(
            "old_string matches {n} times; add surrounding context or set replace_all"
        )),
    }
}

#[async_trait]
impl Tool for EditFileTool {
    fn spec(&self) -> &ToolSpec {
        &self.spec
    }

    async fn execute(&self, args: ToolArgs, _ctx: ToolContext) -> Result<ToolOutput, ToolError> {
        let path = str_arg(&args, "path")?;
        let old = str_arg(&args, "old_string")?;
        let new = str_arg(&args, "new_string")?;
        let replace_all = bool_arg(&args, "replace_all")?.unwrap_or(false);

        if old.is_empty() {
            return Err(ToolError::InvalidArguments(
                "'old_string' must not be empty".into(),
            ));
        }

        let resolved = self
            .workspace
            .resolve(path)
            .map_err(|e| e.into_tool_error("EditFile"))?;

        let text = tokio::fs::read_to_string(&resolved)
            .await
            .map_err(|e| Self::failed(format!("Failed to read '{path}': {e}")))?;

        let (updated, count) =
            replace(&text, old, new, replace_all).map_err(Self::failed)?;

        tokio::fs::write(&resolved, updated)
            .await
            .map_err(|e| Self::failed(format!("Failed to write '{path}': {e}")))?;

        Ok(ToolOutput::Text(format!(
            "Replaced {count} occurrence(s) in {}",
            self.workspace.relative(&resolved)
        )))
    }
}
