//! Built-in tool implementations for rustact.
//!
//! Tools give the agent the ability to interact with its work directory:
//! read, write, edit, search and manage files, inspect and commit with git,
//! and run shell commands. Every path argument is confined to the work
//! directory by [`sandbox`].

pub mod create_folder;
pub mod edit_file;
pub mod file_ops;
pub mod git;
pub mod list_files;
pub mod read_file;
pub mod run_command;
pub mod sandbox;
pub mod search;
pub mod write_file;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use rustact_config::ToolSettings;
use rustact_core::error::{Error, ToolError};
use rustact_core::tool::{Tool, ToolArgs, ToolRegistry};

pub use sandbox::{PathValidationError, Workspace};

/// Directories never descended into by recursive listings and searches.
pub(crate) const SKIPPED_DIRS: &[&str] = &[".git", "node_modules", "target", "__pycache__"];

/// Create the default tool registry for a work directory.
pub fn default_registry(work_dir: &Path, settings: &ToolSettings) -> Result<ToolRegistry, Error> {
    let workspace = Workspace::new(work_dir).map_err(|e| Error::Config {
        message: format!("invalid work directory: {e}"),
    })?;

    let timeout = Duration::from_secs(settings.timeout_secs);
    let git = git::GitRunner::new(workspace.clone(), timeout);

    let tools: Vec<Arc<dyn Tool>> = vec![
        Arc::new(list_files::ListFilesTool::new(
            workspace.clone(),
            settings.max_list_entries,
        )),
        Arc::new(read_file::ReadFileTool::new(workspace.clone())),
        Arc::new(write_file::WriteFileTool::new(workspace.clone())),
        Arc::new(edit_file::EditFileTool::new(workspace.clone())),
        Arc::new(create_folder::CreateFolderTool::new(workspace.clone())),
        Arc::new(file_ops::DeleteFileTool::new(workspace.clone())),
        Arc::new(file_ops::DeleteFolderTool::new(workspace.clone())),
        Arc::new(file_ops::RenameFileTool::new(workspace.clone())),
        Arc::new(file_ops::MoveFileTool::new(workspace.clone())),
        Arc::new(file_ops::CopyFileTool::new(workspace.clone())),
        Arc::new(search::SearchInFilesTool::new(
            workspace.clone(),
            settings.max_search_results,
        )),
        Arc::new(search::FindFilesTool::new(
            workspace.clone(),
            settings.max_find_results,
        )),
        Arc::new(git::GitStatusTool::new(git.clone())),
        Arc::new(git::GitDiffTool::new(git.clone())),
        Arc::new(git::GitLogTool::new(git.clone())),
        Arc::new(git::GitBranchTool::new(git.clone())),
        Arc::new(git::GitCommitTool::new(git)),
        Arc::new(run_command::RunCommandTool::new(workspace, timeout)),
    ];

    let mut registry = ToolRegistry::new();
    for tool in tools {
        registry.register(tool)?;
    }
    Ok(registry)
}

/// Required string argument.
pub(crate) fn str_arg<'a>(args: &'a ToolArgs, name: &str) -> Result<&'a str, ToolError> {
    args.get(name)
        .and_then(|v| v.as_str())
        .ok_or_else(|| ToolError::InvalidArguments(format!("Missing '{name}' argument")))
}

/// Optional boolean argument; `null` counts as absent.
pub(crate) fn bool_arg(args: &ToolArgs, name: &str) -> Result<Option<bool>, ToolError> {
    match args.get(name) {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::Bool(b)) => Ok(Some(*b)),
        Some(other) => Err(ToolError::InvalidArguments(format!(
            "'{name}' must be a boolean, got {other}"
        ))),
    }
}
