//! ListFiles: list directory entries, optionally recursive and filtered.

use async_trait::async_trait;
use rustact_core::error::ToolError;
use rustact_core::tool::{ParamKind, Tool, ToolArgs, ToolContext, ToolOutput, ToolSpec};
use std::path::{Path, PathBuf};

use crate::sandbox::Workspace;
use crate::{SKIPPED_DIRS, bool_arg, str_arg};

pub struct ListFilesTool {
    spec: ToolSpec,
    workspace: Workspace,
    max_entries: usize,
}

impl ListFilesTool {
    pub fn new(workspace: Workspace, max_entries: usize) -> Self {
        Self {
            spec: ToolSpec::new(
                "ListFiles",
                "List files in a directory as a JSON array of paths relative to the \
                 work directory. Directories end with '/'.",
            )
            .required(
                "path",
                ParamKind::String,
                "Directory to list, relative to the work directory",
            )
            .optional(
                "recursive",
                ParamKind::Boolean,
                "Descend into subdirectories (default false)",
            )
            .optional(
                "pattern",
                ParamKind::String,
                "Glob applied to file names, e.g. '*.rs'",
            ),
            workspace,
            max_entries,
        }
    }
}

fn failed(reason: String) -> ToolError {
    ToolError::ExecutionFailed {
        tool_name: "ListFiles".into(),
        reason,
    }
}

/// Walk `dir`, collecting matching entries. Directories are always reported
/// when no pattern is given so the model can see the layout.
fn walk(
    dir: &Path,
    recursive: bool,
    pattern: Option<&glob::Pattern>,
    out: &mut Vec<(PathBuf, bool)>,
) -> std::io::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let file_type = entry.file_type()?;
        let name = entry.file_name();
        let name = name.to_string_lossy();

        if file_type.is_dir() {
            if pattern.is_none() {
                out.push((path.clone(), true));
            }
            if recursive && !SKIPPED_DIRS.contains(&name.as_ref()) {
                walk(&path, recursive, pattern, out)?;
            }
        } else if pattern.is_none_or(|p| p.matches(&name)) {
            out.push((path, false));
        }
    }
    Ok(())
}

#[async_trait]
impl Tool for ListFilesTool {
    fn spec(&self) -> &ToolSpec {
        &self.spec
    }

    async fn execute(&self, args: ToolArgs, _ctx: ToolContext) -> Result<ToolOutput, ToolError> {
        let path = str_arg(&args, "path")?;
        let recursive = bool_arg(&args, "recursive")?.unwrap_or(false);
        let pattern = match args.get("pattern").and_then(|v| v.as_str()) {
            Some(p) => Some(glob::Pattern::new(p).map_err(|e| {
                ToolError::InvalidArguments(format!("invalid pattern '{p}': {e}"))
            })?),
            None => None,
        };

        let resolved = self
            .workspace
            .resolve(path)
            .map_err(|e| e.into_tool_error("ListFiles"))?;
        if !resolved.is_dir() {
            return Err(failed(format!("'{path}' is not a directory")));
        }

        let entries = tokio::task::spawn_blocking(move || {
            let mut entries = Vec::new();
            walk(&resolved, recursive, pattern.as_ref(), &mut entries).map(|()| entries)
        })
        .await
        .map_err(|e| failed(e.to_string()))?
        .map_err(|e| failed(format!("Failed to list '{path}': {e}")))?;

        let mut listed: Vec<String> = entries
            .iter()
            .map(|(p, is_dir)| {
                let rel = self.workspace.relative(p);
                if *is_dir { format!("{rel}/") } else { rel }
            })
            .collect();
        listed.sort();

        let total = listed.len();
        if total > self.max_entries {
            listed.truncate(self.max_entries);
            listed.push(format!("[... {} more entries]", total - self.max_entries));
        }

        Ok(ToolOutput::Json(serde_json::json!(listed)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fixture() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "a").unwrap();
        std::fs::write(dir.path().join("b.rs"), "b").unwrap();
        std::fs::create_dir_all(dir.path().join("src/nested")).unwrap();
        std::fs::write(dir.path().join("src/lib.rs"), "lib").unwrap();
        std::fs::write(dir.path().join("src/nested/mod.rs"), "mod").unwrap();
        std::fs::create_dir(dir.path().join(".git")).unwrap();
        std::fs::write(dir.path().join(".git/HEAD"), "ref").unwrap();
        dir
    }

    async fn list(dir: &tempfile::TempDir, args: serde_json::Value, max: usize) -> Vec<String> {
        let tool = ListFilesTool::new(Workspace::new(dir.path()).unwrap(), max);
        let out = tool
            .execute(args.as_object().cloned().unwrap(), ToolContext::default())
            .await
            .unwrap();
        match out {
            ToolOutput::Json(v) => serde_json::from_value(v).unwrap(),
            other => panic!("expected JSON, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn flat_listing_is_sorted() {
        let dir = fixture();
        let entries = list(&dir, json!({"path": "."}), 100).await;
        assert_eq!(entries, vec![".git/", "a.txt", "b.rs", "src/"]);
    }

    #[tokio::test]
    async fn recursive_with_pattern() {
        let dir = fixture();
        let entries = list(&dir, json!({"path": ".", "recursive": true, "pattern": "*.rs"}), 100).await;
        assert_eq!(entries, vec!["b.rs", "src/lib.rs", "src/nested/mod.rs"]);
    }

    #[tokio::test]
    async fn recursive_skips_vcs_dirs() {
        let dir = fixture();
        let entries = list(&dir, json!({"path": ".", "recursive": true}), 100).await;
        assert!(!entries.iter().any(|e| e.contains("HEAD")));
    }

    #[tokio::test]
    async fn listing_is_bounded() {
        let dir = fixture();
        let entries = list(&dir, json!({"path": "."}), 2).await;
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[2], "[... 2 more entries]");
    }

    #[tokio::test]
    async fn file_path_is_not_a_directory() {
        let dir = fixture();
        let tool = ListFilesTool::new(Workspace::new(dir.path()).unwrap(), 100);
        let args = json!({"path": "a.txt"}).as_object().cloned().unwrap();
        let err = tool.execute(args, ToolContext::default()).await.unwrap_err();
        assert!(err.to_string().contains("not a directory"));
    }
}
