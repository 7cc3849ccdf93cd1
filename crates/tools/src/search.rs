//! SearchInFiles and FindFiles: content and file-name search under the work
//! directory.
//!
//! Both walk the tree on a blocking thread in sorted order, so results are
//! deterministic, and skip the same VCS/build directories as ListFiles.

use async_trait::async_trait;
use regex_lite::{Regex, RegexBuilder};
use rustact_core::error::ToolError;
use rustact_core::tool::{ParamKind, Tool, ToolArgs, ToolContext, ToolOutput, ToolSpec};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::sandbox::Workspace;
use crate::{SKIPPED_DIRS, bool_arg, str_arg};

/// Files larger than this are not searched.
const MAX_SEARCH_FILE_BYTES: u64 = 2 * 1024 * 1024;

/// Longest line echoed back in a match, in chars.
const MAX_LINE_CHARS: usize = 200;

fn failed(tool: &str, reason: String) -> ToolError {
    ToolError::ExecutionFailed {
        tool_name: tool.into(),
        reason,
    }
}

/// Optional string argument; `null` and empty count as absent.
fn opt_str<'a>(args: &'a ToolArgs, name: &str) -> Option<&'a str> {
    args.get(name)
        .and_then(|v| v.as_str())
        .filter(|s| !s.trim().is_empty())
}

fn glob_arg(args: &ToolArgs, name: &str) -> Result<Option<glob::Pattern>, ToolError> {
    opt_str(args, name)
        .map(|p| {
            glob::Pattern::new(p)
                .map_err(|e| ToolError::InvalidArguments(format!("invalid pattern '{p}': {e}")))
        })
        .transpose()
}

/// Resolve the `directory` argument, defaulting to the root.
fn search_root(workspace: &Workspace, args: &ToolArgs, tool: &str) -> Result<PathBuf, ToolError> {
    let dir = opt_str(args, "directory").unwrap_or(".");
    let resolved = workspace
        .resolve(dir)
        .map_err(|e| e.into_tool_error(tool))?;
    if !resolved.is_dir() {
        return Err(failed(tool, format!("'{dir}' is not a directory")));
    }
    Ok(resolved)
}

/// Collect regular files under `dir` in sorted order.
fn collect_files(dir: &Path, recursive: bool, out: &mut Vec<PathBuf>) -> std::io::Result<()> {
    let mut entries: Vec<_> = std::fs::read_dir(dir)?.collect::<Result<_, _>>()?;
    entries.sort_by_key(|e| e.file_name());

    for entry in entries {
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            let name = entry.file_name();
            if recursive && !SKIPPED_DIRS.contains(&name.to_string_lossy().as_ref()) {
                collect_files(&entry.path(), recursive, out)?;
            }
        } else if file_type.is_file() {
            out.push(entry.path());
        }
    }
    Ok(())
}

// --- SearchInFiles -------------------------------------------------------------

enum Matcher {
    Literal { needle: String, case_sensitive: bool },
    Regex(Regex),
}

impl Matcher {
    fn new(text: &str, use_regex: bool, case_sensitive: bool) -> Result<Self, String> {
        if use_regex {
            RegexBuilder::new(text)
                .case_insensitive(!case_sensitive)
                .build()
                .map(Self::Regex)
                .map_err(|e| format!("invalid regex '{text}': {e}"))
        } else if case_sensitive {
            Ok(Self::Literal {
                needle: text.to_string(),
                case_sensitive,
            })
        } else {
            Ok(Self::Literal {
                needle: text.to_lowercase(),
                case_sensitive,
            })
        }
    }

    fn is_match(&self, line: &str) -> bool {
        match self {
            Self::Literal {
                needle,
                case_sensitive: true,
            } => line.contains(needle.as_str()),
            Self::Literal { needle, .. } => line.to_lowercase().contains(needle.as_str()),
            Self::Regex(re) => re.is_match(line),
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
struct LineMatch {
    path: PathBuf,
    line: usize,
    text: String,
}

/// Search `files` line by line. Returns the first `limit` matches and the
/// total number found. Binary and oversized files are skipped.
fn search_files(files: &[PathBuf], matcher: &Matcher, limit: usize) -> (Vec<LineMatch>, usize) {
    let mut matches = Vec::new();
    let mut total = 0;

    for path in files {
        let too_big = std::fs::metadata(path).is_ok_and(|m| m.len() > MAX_SEARCH_FILE_BYTES);
        if too_big {
            continue;
        }
        let Ok(bytes) = std::fs::read(path) else {
            continue;
        };
        if bytes.contains(&0) {
            continue;
        }
        let text = String::from_utf8_lossy(&bytes);
        for (idx, line) in text.lines().enumerate() {
            if !matcher.is_match(line) {
                continue;
            }
            total += 1;
            if matches.len() < limit {
                matches.push(LineMatch {
                    path: path.clone(),
                    line: idx + 1,
                    text: line.trim().chars().take(MAX_LINE_CHARS).collect(),
                });
            }
        }
    }
    (matches, total)
}

pub struct SearchInFilesTool {
    spec: ToolSpec,
    workspace: Workspace,
    max_results: usize,
}

impl SearchInFilesTool {
    pub fn new(workspace: Workspace, max_results: usize) -> Self {
        Self {
            spec: ToolSpec::new(
                "SearchInFiles",
                "Search file contents for text or a regular expression. Returns \
                 matching lines as `path:line: text`.",
            )
            .required("search_text", ParamKind::String, "Text or regex to find")
            .optional(
                "directory",
                ParamKind::String,
                "Directory to search, relative to the work directory (default '.')",
            )
            .optional(
                "file_pattern",
                ParamKind::String,
                "Glob applied to file names, e.g. '*.rs'",
            )
            .optional(
                "case_sensitive",
                ParamKind::Boolean,
                "Match case exactly (default false)",
            )
            .optional(
                "use_regex",
                ParamKind::Boolean,
                "Treat search_text as a regular expression (default false)",
            ),
            workspace,
            max_results,
        }
    }
}

#[async_trait]
impl Tool for SearchInFilesTool {
    fn spec(&self) -> &ToolSpec {
        &self.spec
    }

    async fn execute(&self, args: ToolArgs, _ctx: ToolContext) -> Result<ToolOutput, ToolError> {
        let search_text = str_arg(&args, "search_text")?;
        if search_text.is_empty() {
            return Err(ToolError::InvalidArguments(
                "'search_text' must not be empty".into(),
            ));
        }
        let case_sensitive = bool_arg(&args, "case_sensitive")?.unwrap_or(false);
        let use_regex = bool_arg(&args, "use_regex")?.unwrap_or(false);
        let matcher =
            Matcher::new(search_text, use_regex, case_sensitive).map_err(ToolError::InvalidArguments)?;
        let file_pattern = glob_arg(&args, "file_pattern")?;
        let root = search_root(&self.workspace, &args, "SearchInFiles")?;

        let limit = self.max_results;
        let (matches, total) = tokio::task::spawn_blocking(move || {
            let mut files = Vec::new();
            collect_files(&root, true, &mut files)?;
            files.retain(|path| {
                file_pattern.as_ref().is_none_or(|p| {
                    path.file_name()
                        .is_some_and(|name| p.matches(&name.to_string_lossy()))
                })
            });
            Ok::<_, std::io::Error>(search_files(&files, &matcher, limit))
        })
        .await
        .map_err(|e| failed("SearchInFiles", e.to_string()))?
        .map_err(|e| failed("SearchInFiles", format!("Search failed: {e}")))?;

        debug!(pattern = %search_text, total, "Content search finished");

        if total == 0 {
            return Ok(ToolOutput::Text(format!("No matches for '{search_text}'")));
        }
        let mut text = matches
            .iter()
            .map(|m| format!("{}:{}: {}", self.workspace.relative(&m.path), m.line, m.text))
            .collect::<Vec<_>>()
            .join("\n");
        if total > matches.len() {
            text.push_str(&format!("\n[... {} more matches]", total - matches.len()));
        }
        Ok(ToolOutput::Text(text))
    }
}

// --- FindFiles -----------------------------------------------------------------

pub struct FindFilesTool {
    spec: ToolSpec,
    workspace: Workspace,
    max_results: usize,
}

impl FindFilesTool {
    pub fn new(workspace: Workspace, max_results: usize) -> Self {
        Self {
            spec: ToolSpec::new(
                "FindFiles",
                "Find files by name pattern. Patterns without '/' match file names \
                 ('*.rs', 'test*'); patterns with '/' match relative paths \
                 ('src/**/mod.rs'). Returns a JSON array of paths.",
            )
            .required("pattern", ParamKind::String, "Glob pattern")
            .optional(
                "directory",
                ParamKind::String,
                "Directory to search, relative to the work directory (default '.')",
            )
            .optional(
                "recursive",
                ParamKind::Boolean,
                "Descend into subdirectories (default true)",
            ),
            workspace,
            max_results,
        }
    }
}

#[async_trait]
impl Tool for FindFilesTool {
    fn spec(&self) -> &ToolSpec {
        &self.spec
    }

    async fn execute(&self, args: ToolArgs, _ctx: ToolContext) -> Result<ToolOutput, ToolError> {
        let raw = str_arg(&args, "pattern")?;
        let pattern = glob::Pattern::new(raw)
            .map_err(|e| ToolError::InvalidArguments(format!("invalid pattern '{raw}': {e}")))?;
        let by_path = raw.contains('/');
        let recursive = bool_arg(&args, "recursive")?.unwrap_or(true);
        let root = search_root(&self.workspace, &args, "FindFiles")?;

        let files = tokio::task::spawn_blocking(move || {
            let mut files = Vec::new();
            collect_files(&root, recursive, &mut files).map(|()| files)
        })
        .await
        .map_err(|e| failed("FindFiles", e.to_string()))?
        .map_err(|e| failed("FindFiles", format!("Search failed: {e}")))?;

        let mut found: Vec<String> = files
            .iter()
            .filter_map(|path| {
                let rel = self.workspace.relative(path);
                let hit = if by_path {
                    pattern.matches(&rel)
                } else {
                    path.file_name()
                        .is_some_and(|name| pattern.matches(&name.to_string_lossy()))
                };
                hit.then_some(rel)
            })
            .collect();
        found.sort();

        let total = found.len();
        if total > self.max_results {
            found.truncate(self.max_results);
            found.push(format!("[... {} more files]", total - self.max_results));
        }
        Ok(ToolOutput::Json(serde_json::json!(found)))
    }
}
