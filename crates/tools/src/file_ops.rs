//! File management: DeleteFile, DeleteFolder, RenameFile, MoveFile and
//! CopyFile.
//!
//! Every source and destination goes through the [`Workspace`], and the work
//! directory itself can never be deleted or moved. None of these tools
//! overwrite an existing destination unless asked to.

use async_trait::async_trait;
use rustact_core::error::ToolError;
use rustact_core::tool::{ParamKind, Tool, ToolArgs, ToolContext, ToolOutput, ToolSpec};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::sandbox::Workspace;
use crate::{bool_arg, str_arg};

fn failed(tool: &str, reason: String) -> ToolError {
    ToolError::ExecutionFailed {
        tool_name: tool.into(),
        reason,
    }
}

/// Resolve `path` to an existing entry other than the work directory.
fn existing(workspace: &Workspace, path: &str, tool: &str) -> Result<PathBuf, ToolError> {
    let resolved = workspace
        .resolve(path)
        .map_err(|e| e.into_tool_error(tool))?;
    if resolved.as_path() == workspace.root() {
        return Err(ToolError::PermissionDenied {
            tool_name: tool.into(),
            reason: "the work directory itself cannot be modified".into(),
        });
    }
    if !resolved.exists() {
        return Err(failed(tool, format!("'{path}' does not exist")));
    }
    Ok(resolved)
}

/// Create the parent directories of `target`.
async fn ensure_parent(target: &Path, tool: &str) -> Result<(), ToolError> {
    if let Some(parent) = target.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| failed(tool, format!("Failed to create directory: {e}")))?;
    }
    Ok(())
}

// --- DeleteFile ----------------------------------------------------------------

pub struct DeleteFileTool {
    spec: ToolSpec,
    workspace: Workspace,
}

impl DeleteFileTool {
    pub fn new(workspace: Workspace) -> Self {
        Self {
            spec: ToolSpec::new("DeleteFile", "Delete a single file.").required(
                "path",
                ParamKind::String,
                "File path, relative to the work directory",
            ),
            workspace,
        }
    }
}

#[async_trait]
impl Tool for DeleteFileTool {
    fn spec(&self) -> &ToolSpec {
        &self.spec
    }

    async fn execute(&self, args: ToolArgs, _ctx: ToolContext) -> Result<ToolOutput, ToolError> {
        let path = str_arg(&args, "path")?;
        let resolved = existing(&self.workspace, path, "DeleteFile")?;
        if resolved.is_dir() {
            return Err(failed(
                "DeleteFile",
                format!("'{path}' is a directory; use DeleteFolder"),
            ));
        }

        tokio::fs::remove_file(&resolved)
            .await
            .map_err(|e| failed("DeleteFile", format!("Failed to delete '{path}': {e}")))?;
        debug!(path = %path, "Deleted file");
        Ok(ToolOutput::Text(format!(
            "Deleted {}",
            self.workspace.relative(&resolved)
        )))
    }
}

// --- DeleteFolder --------------------------------------------------------------

pub struct DeleteFolderTool {
    spec: ToolSpec,
    workspace: Workspace,
}

impl DeleteFolderTool {
    pub fn new(workspace: Workspace) -> Self {
        Self {
            spec: ToolSpec::new(
                "DeleteFolder",
                "Delete a directory. A non-empty directory is only removed when \
                 `recursive` is true.",
            )
            .required(
                "path",
                ParamKind::String,
                "Directory path, relative to the work directory",
            )
            .optional(
                "recursive",
                ParamKind::Boolean,
                "Delete the directory and everything in it (default false)",
            ),
            workspace,
        }
    }
}

#[async_trait]
impl Tool for DeleteFolderTool {
    fn spec(&self) -> &ToolSpec {
        &self.spec
    }

    async fn execute(&self, args: ToolArgs, _ctx: ToolContext) -> Result<ToolOutput, ToolError> {
        let path = str_arg(&args, "path")?;
        let recursive = bool_arg(&args, "recursive")?.unwrap_or(false);
        let resolved = existing(&self.workspace, path, "DeleteFolder")?;
        if !resolved.is_dir() {
            return Err(failed(
                "DeleteFolder",
                format!("'{path}' is not a directory"),
            ));
        }

        let result = if recursive {
            tokio::fs::remove_dir_all(&resolved).await
        } else {
            tokio::fs::remove_dir(&resolved).await
        };
        result.map_err(|e| {
            let hint = if recursive {
                ""
            } else {
                " (set recursive to delete a non-empty directory)"
            };
            failed(
                "DeleteFolder",
                format!("Failed to delete '{path}': {e}{hint}"),
            )
        })?;

        debug!(path = %path, recursive, "Deleted folder");
        Ok(ToolOutput::Text(format!(
            "Deleted folder {}",
            self.workspace.relative(&resolved)
        )))
    }
}

// --- RenameFile ----------------------------------------------------------------

pub struct RenameFileTool {
    spec: ToolSpec,
    workspace: Workspace,
}

impl RenameFileTool {
    pub fn new(workspace: Workspace) -> Self {
        Self {
            spec: ToolSpec::new(
                "RenameFile",
                "Rename a file or directory in place. `new_name` is a bare name; use \
                 MoveFile to change directories.",
            )
            .required(
                "path",
                ParamKind::String,
                "Current path, relative to the work directory",
            )
            .required("new_name", ParamKind::String, "New name, without any '/'"),
            workspace,
        }
    }
}

#[async_trait]
impl Tool for RenameFileTool {
    fn spec(&self) -> &ToolSpec {
        &self.spec
    }

    async fn execute(&self, args: ToolArgs, _ctx: ToolContext) -> Result<ToolOutput, ToolError> {
        let path = str_arg(&args, "path")?;
        let new_name = str_arg(&args, "new_name")?.trim();
        if new_name.is_empty()
            || new_name == "."
            || new_name == ".."
            || new_name.contains(['/', '\\'])
        {
            return Err(ToolError::InvalidArguments(format!(
                "'new_name' must be a plain file name, got '{new_name}'"
            )));
        }

        let source = existing(&self.workspace, path, "RenameFile")?;
        let target = source.with_file_name(new_name);
        if target.exists() {
            return Err(failed(
                "RenameFile",
                format!("'{}' already exists", self.workspace.relative(&target)),
            ));
        }

        tokio::fs::rename(&source, &target)
            .await
            .map_err(|e| failed("RenameFile", format!("Failed to rename '{path}': {e}")))?;
        Ok(ToolOutput::Text(format!(
            "Renamed {} to {}",
            self.workspace.relative(&source),
            self.workspace.relative(&target)
        )))
    }
}

// --- MoveFile ------------------------------------------------------------------

pub struct MoveFileTool {
    spec: ToolSpec,
    workspace: Workspace,
}

impl MoveFileTool {
    pub fn new(workspace: Workspace) -> Self {
        Self {
            spec: ToolSpec::new(
                "MoveFile",
                "Move a file or directory. If `destination` is an existing directory \
                 the source is moved into it; missing parent directories are created.",
            )
            .required(
                "source",
                ParamKind::String,
                "Path to move, relative to the work directory",
            )
            .required(
                "destination",
                ParamKind::String,
                "Target path or directory, relative to the work directory",
            ),
            workspace,
        }
    }
}

#[async_trait]
impl Tool for MoveFileTool {
    fn spec(&self) -> &ToolSpec {
        &self.spec
    }

    async fn execute(&self, args: ToolArgs, _ctx: ToolContext) -> Result<ToolOutput, ToolError> {
        let source_arg = str_arg(&args, "source")?;
        let destination_arg = str_arg(&args, "destination")?;

        let source = existing(&self.workspace, source_arg, "MoveFile")?;
        let mut target = self
            .workspace
            .resolve(destination_arg)
            .map_err(|e| e.into_tool_error("MoveFile"))?;
        if target.is_dir() {
            if let Some(name) = source.file_name() {
                target.push(name);
            }
        }
        if target.starts_with(&source) {
            return Err(failed(
                "MoveFile",
                format!("cannot move '{source_arg}' into itself"),
            ));
        }
        if target.exists() {
            return Err(failed(
                "MoveFile",
                format!("'{}' already exists", self.workspace.relative(&target)),
            ));
        }

        ensure_parent(&target, "MoveFile").await?;
        tokio::fs::rename(&source, &target)
            .await
            .map_err(|e| failed("MoveFile", format!("Failed to move '{source_arg}': {e}")))?;
        Ok(ToolOutput::Text(format!(
            "Moved {} to {}",
            self.workspace.relative(&source),
            self.workspace.relative(&target)
        )))
    }
}

// --- CopyFile ------------------------------------------------------------------

pub struct CopyFileTool {
    spec: ToolSpec,
    workspace: Workspace,
}

impl CopyFileTool {
    pub fn new(workspace: Workspace) -> Self {
        Self {
            spec: ToolSpec::new(
                "CopyFile",
                "Copy a file. If `destination` is an existing directory the copy is \
                 placed inside it; missing parent directories are created.",
            )
            .required(
                "source",
                ParamKind::String,
                "File to copy, relative to the work directory",
            )
            .required(
                "destination",
                ParamKind::String,
                "Target path or directory, relative to the work directory",
            )
            .optional(
                "overwrite",
                ParamKind::Boolean,
                "Replace an existing destination file (default false)",
            ),
            workspace,
        }
    }
}

#[async_trait]
impl Tool for CopyFileTool {
    fn spec(&self) -> &ToolSpec {
        &self.spec
    }

    async fn execute(&self, args: ToolArgs, _ctx: ToolContext) -> Result<ToolOutput, ToolError> {
        let source_arg = str_arg(&args, "source")?;
        let destination_arg = str_arg(&args, "destination")?;
        let overwrite = bool_arg(&args, "overwrite")?.unwrap_or(false);

        let source = existing(&self.workspace, source_arg, "CopyFile")?;
        if !source.is_file() {
            return Err(failed("CopyFile", format!("'{source_arg}' is not a file")));
        }
        let mut target = self
            .workspace
            .resolve(destination_arg)
            .map_err(|e| e.into_tool_error("CopyFile"))?;
        if target.is_dir() {
            if let Some(name) = source.file_name() {
                target.push(name);
            }
        }
        if target.exists() && !overwrite {
            return Err(failed(
                "CopyFile",
                format!(
                    "'{}' already exists (set overwrite to replace it)",
                    self.workspace.relative(&target)
                ),
            ));
        }

        ensure_parent(&target, "CopyFile").await?;
        let bytes = tokio::fs::copy(&source, &target)
            .await
            .map_err(|e| failed("CopyFile", format!("Failed to copy '{source_arg}': {e}")))?;
        Ok(ToolOutput::Text(format!(
            "Copied {} to {} ({bytes} bytes)",
            self.workspace.relative(&source),
            self.workspace.relative(&target)
        )))
    }
}
