//! Path validation: filesystem sandboxing to the work directory.
//!
//! Every file tool resolves its `path` argument through a [`Workspace`], which
//! guarantees the result lies inside the configured root. Resolution is
//! lexical first (so `..` cannot climb past the root) and then canonical on
//! the deepest existing ancestor (so a symlink cannot point outside it).

use rustact_core::ToolError;
use std::path::{Component, Path, PathBuf};

/// Error returned when path validation fails.
#[derive(Debug, thiserror::Error)]
pub enum PathValidationError {
    #[error("Path '{path}' is outside the work directory")]
    OutsideWorkspace { path: String },

    #[error("Path traversal detected in '{path}'")]
    PathTraversal { path: String },

    #[error("Failed to canonicalize path '{path}': {reason}")]
    CanonicalizeFailed { path: String, reason: String },
}

impl PathValidationError {
    /// Convert into a tool error attributed to `tool_name`.
    pub fn into_tool_error(self, tool_name: &str) -> ToolError {
        ToolError::PermissionDenied {
            tool_name: tool_name.into(),
            reason: self.to_string(),
        }
    }
}

/// The directory tools are confined to.
#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    /// Create a workspace rooted at `root`, which must exist.
    pub fn new(root: impl AsRef<Path>) -> Result<Self, PathValidationError> {
        let root = root.as_ref();
        let canonical = root
            .canonicalize()
            .map_err(|e| PathValidationError::CanonicalizeFailed {
                path: root.display().to_string(),
                reason: e.to_string(),
            })?;
        Ok(Self { root: canonical })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a user-supplied path (relative to the root, or absolute) to a
    /// path inside the workspace. The target itself need not exist.
    pub fn resolve(&self, path: &str) -> Result<PathBuf, PathValidationError> {
        let joined = self.root.join(path.trim());

        // Lexical normalization: `.` is dropped, `..` pops a component.
        let mut normalized = PathBuf::new();
        for component in joined.components() {
            match component {
                Component::CurDir => {}
                Component::ParentDir => {
                    if !normalized.pop() {
                        return Err(PathValidationError::PathTraversal { path: path.into() });
                    }
                }
                other => normalized.push(other),
            }
        }

        if !normalized.starts_with(&self.root) {
            return Err(PathValidationError::OutsideWorkspace { path: path.into() });
        }

        // Canonicalize the deepest existing ancestor to resolve symlinks.
        let mut existing = normalized.as_path();
        let mut rest = Vec::new();
        while !existing.exists() {
            match (existing.parent(), existing.file_name()) {
                (Some(parent), Some(name)) => {
                    rest.push(name.to_os_string());
                    existing = parent;
                }
                _ => break,
            }
        }
        let mut resolved =
            existing
                .canonicalize()
                .map_err(|e| PathValidationError::CanonicalizeFailed {
                    path: path.into(),
                    reason: e.to_string(),
                })?;
        for name in rest.into_iter().rev() {
            resolved.push(name);
        }

        if !resolved.starts_with(&self.root) {
            return Err(PathValidationError::OutsideWorkspace { path: path.into() });
        }

        Ok(resolved)
    }

    /// Display form of a resolved path, relative to the root.
    pub fn relative(&self, path: &Path) -> String {
        match path.strip_prefix(&self.root) {
            Ok(rel) if rel.as_os_str().is_empty() => ".".into(),
            Ok(rel) => rel.to_string_lossy().replace('\\', "/"),
            Err(_) => path.to_string_lossy().into_owned(),
        }
    }
}
