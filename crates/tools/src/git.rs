//! Git tools: GitStatus, GitDiff, GitLog, GitBranch and GitCommit.
//!
//! Each tool runs `git` directly (no shell) in the work directory with a
//! fixed argument list, so model input never reaches a command line as
//! options. Like RunCommand, children are spawned with `kill_on_drop`.

use async_trait::async_trait;
use rustact_core::error::ToolError;
use rustact_core::tool::{ParamKind, Tool, ToolArgs, ToolContext, ToolOutput, ToolSpec};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::sandbox::Workspace;
use crate::{bool_arg, str_arg};

/// Upper bound on `max_count` for GitLog.
const MAX_LOG_ENTRIES: u64 = 100;

/// Output of a finished git invocation.
struct GitOutput {
    code: i32,
    stdout: String,
    stderr: String,
}

/// Runs git in the workspace with a timeout and cancellation.
#[derive(Clone)]
pub struct GitRunner {
    workspace: Workspace,
    timeout: Duration,
}

impl GitRunner {
    pub fn new(workspace: Workspace, timeout: Duration) -> Self {
        Self { workspace, timeout }
    }

    async fn output(
        &self,
        tool: &str,
        args: &[&str],
        ctx: &ToolContext,
    ) -> Result<GitOutput, ToolError> {
        debug!(tool, args = ?args, "Running git");
        let child = Command::new("git")
            .args(args)
            .current_dir(self.workspace.root())
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ToolError::ExecutionFailed {
                tool_name: tool.into(),
                reason: format!("failed to start git: {e}"),
            })?;

        let output = tokio::select! {
            result = tokio::time::timeout(self.timeout, child.wait_with_output()) => match result {
                Ok(output) => output.map_err(|e| ToolError::ExecutionFailed {
                    tool_name: tool.into(),
                    reason: e.to_string(),
                })?,
                Err(_) => {
                    warn!(tool, "git timed out");
                    return Err(ToolError::Timeout {
                        tool_name: tool.into(),
                        timeout_secs: self.timeout.as_secs(),
                    });
                }
            },
            _ = ctx.cancel.cancelled() => {
                return Err(ToolError::ExecutionFailed {
                    tool_name: tool.into(),
                    reason: "git cancelled".into(),
                });
            }
        };

        Ok(GitOutput {
            code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    /// Run git and return stdout, failing on a non-zero exit.
    async fn run(&self, tool: &str, args: &[&str], ctx: &ToolContext) -> Result<String, ToolError> {
        let out = self.output(tool, args, ctx).await?;
        if out.code != 0 {
            let message = out.stderr.trim();
            return Err(ToolError::ExecutionFailed {
                tool_name: tool.into(),
                reason: if message.is_empty() {
                    format!("git {} exited with code {}", args.join(" "), out.code)
                } else {
                    message.to_string()
                },
            });
        }
        Ok(out.stdout)
    }

    /// A path argument as a workspace-relative pathspec.
    fn pathspec(&self, tool: &str, path: &str) -> Result<String, ToolError> {
        let resolved = self
            .workspace
            .resolve(path)
            .map_err(|e| e.into_tool_error(tool))?;
        Ok(self.workspace.relative(&resolved))
    }
}

/// Reject revision and branch names that git would read as options.
fn revision_arg<'a>(args: &'a ToolArgs, name: &str) -> Result<Option<&'a str>, ToolError> {
    match args.get(name).and_then(|v| v.as_str()).map(str::trim) {
        None | Some("") => Ok(None),
        Some(rev) if rev.starts_with('-') || rev.chars().any(char::is_whitespace) => Err(
            ToolError::InvalidArguments(format!("'{name}' is not a valid revision: '{rev}'")),
        ),
        Some(rev) => Ok(Some(rev)),
    }
}

fn opt_path<'a>(args: &'a ToolArgs, name: &str) -> Option<&'a str> {
    args.get(name)
        .and_then(|v| v.as_str())
        .filter(|s| !s.trim().is_empty())
}

// --- GitStatus -----------------------------------------------------------------

pub struct GitStatusTool {
    spec: ToolSpec,
    git: GitRunner,
}

impl GitStatusTool {
    pub fn new(git: GitRunner) -> Self {
        Self {
            spec: ToolSpec::new(
                "GitStatus",
                "Show the current branch and changed files (`git status --short --branch`).",
            ),
            git,
        }
    }
}

#[async_trait]
impl Tool for GitStatusTool {
    fn spec(&self) -> &ToolSpec {
        &self.spec
    }

    async fn execute(&self, _args: ToolArgs, ctx: ToolContext) -> Result<ToolOutput, ToolError> {
        let out = self
            .git
            .run("GitStatus", &["status", "--short", "--branch"], &ctx)
            .await?;
        let mut lines = out.lines();
        let branch = lines.next().unwrap_or_default();
        let changes: Vec<&str> = lines.collect();
        let text = if changes.is_empty() {
            format!("{branch}\nWorking tree clean")
        } else {
            format!("{branch}\n{}", changes.join("\n"))
        };
        Ok(ToolOutput::Text(text))
    }
}

// --- GitDiff -------------------------------------------------------------------

pub struct GitDiffTool {
    spec: ToolSpec,
    git: GitRunner,
}

impl GitDiffTool {
    pub fn new(git: GitRunner) -> Self {
        Self {
            spec: ToolSpec::new(
                "GitDiff",
                "Show changes as a unified diff: unstaged by default, staged with \
                 `staged`, or against a commit.",
            )
            .optional(
                "path",
                ParamKind::String,
                "Limit the diff to this path, relative to the work directory",
            )
            .optional(
                "staged",
                ParamKind::Boolean,
                "Show staged changes (default false)",
            )
            .optional(
                "commit",
                ParamKind::String,
                "Compare against this commit or branch, e.g. 'HEAD~1'",
            ),
            git,
        }
    }
}

#[async_trait]
impl Tool for GitDiffTool {
    fn spec(&self) -> &ToolSpec {
        &self.spec
    }

    async fn execute(&self, args: ToolArgs, ctx: ToolContext) -> Result<ToolOutput, ToolError> {
        let staged = bool_arg(&args, "staged")?.unwrap_or(false);
        let commit = revision_arg(&args, "commit")?;
        let pathspec = opt_path(&args, "path")
            .map(|p| self.git.pathspec("GitDiff", p))
            .transpose()?;

        let mut cmd = vec!["diff", "--no-color"];
        if staged {
            cmd.push("--cached");
        }
        if let Some(commit) = commit {
            cmd.push(commit);
        }
        cmd.push("--");
        if let Some(path) = pathspec.as_deref() {
            cmd.push(path);
        }

        let out = self.git.run("GitDiff", &cmd, &ctx).await?;
        if out.trim().is_empty() {
            return Ok(ToolOutput::Text("No differences".into()));
        }
        Ok(ToolOutput::Text(out.trim_end().to_string()))
    }
}

// --- GitLog --------------------------------------------------------------------

pub struct GitLogTool {
    spec: ToolSpec,
    git: GitRunner,
}

impl GitLogTool {
    pub fn new(git: GitRunner) -> Self {
        Self {
            spec: ToolSpec::new(
                "GitLog",
                "Show recent commits, one per line: hash, date, author, subject.",
            )
            .optional(
                "max_count",
                ParamKind::Integer,
                "Number of commits to show (default 10, at most 100)",
            )
            .optional(
                "path",
                ParamKind::String,
                "Only commits touching this path, relative to the work directory",
            ),
            git,
        }
    }
}

#[async_trait]
impl Tool for GitLogTool {
    fn spec(&self) -> &ToolSpec {
        &self.spec
    }

    async fn execute(&self, args: ToolArgs, ctx: ToolContext) -> Result<ToolOutput, ToolError> {
        let count = args
            .get("max_count")
            .and_then(|v| v.as_u64())
            .filter(|n| *n > 0)
            .unwrap_or(10)
            .min(MAX_LOG_ENTRIES)
            .to_string();
        let pathspec = opt_path(&args, "path")
            .map(|p| self.git.pathspec("GitLog", p))
            .transpose()?;

        let mut cmd = vec![
            "log",
            "--no-color",
            "--date=short",
            "--pretty=format:%h %ad %an %s",
            "-n",
            count.as_str(),
            "--",
        ];
        if let Some(path) = pathspec.as_deref() {
            cmd.push(path);
        }

        let out = self.git.run("GitLog", &cmd, &ctx).await?;
        if out.trim().is_empty() {
            return Ok(ToolOutput::Text("No commits".into()));
        }
        Ok(ToolOutput::Text(out.trim_end().to_string()))
    }
}

// --- GitBranch -----------------------------------------------------------------

pub struct GitBranchTool {
    spec: ToolSpec,
    git: GitRunner,
}

impl GitBranchTool {
    pub fn new(git: GitRunner) -> Self {
        Self {
            spec: ToolSpec::new(
                "GitBranch",
                "List local branches with the current one marked, or create a branch.",
            )
            .optional(
                "create",
                ParamKind::String,
                "Name of a new branch to create from HEAD",
            )
            .optional(
                "checkout",
                ParamKind::Boolean,
                "Switch to the created branch (default false)",
            ),
            git,
        }
    }
}

#[async_trait]
impl Tool for GitBranchTool {
    fn spec(&self) -> &ToolSpec {
        &self.spec
    }

    async fn execute(&self, args: ToolArgs, ctx: ToolContext) -> Result<ToolOutput, ToolError> {
        if let Some(name) = revision_arg(&args, "create")? {
            let checkout = bool_arg(&args, "checkout")?.unwrap_or(false);
            if checkout {
                self.git
                    .run("GitBranch", &["switch", "-c", name], &ctx)
                    .await?;
                return Ok(ToolOutput::Text(format!(
                    "Created and switched to branch {name}"
                )));
            }
            self.git.run("GitBranch", &["branch", name], &ctx).await?;
            return Ok(ToolOutput::Text(format!("Created branch {name}")));
        }

        let out = self
            .git
            .run("GitBranch", &["branch", "--list", "--no-color"], &ctx)
            .await?;
        if out.trim().is_empty() {
            return Ok(ToolOutput::Text("No branches yet".into()));
        }
        Ok(ToolOutput::Text(out.trim_end().to_string()))
    }
}

// --- GitCommit -----------------------------------------------------------------

pub struct GitCommitTool {
    spec: ToolSpec,
    git: GitRunner,
}

impl GitCommitTool {
    pub fn new(git: GitRunner) -> Self {
        Self {
            spec: ToolSpec::new(
                "GitCommit",
                "Stage changes and commit them. Stages everything unless `files` \
                 is given.",
            )
            .required("message", ParamKind::String, "Commit message")
            .optional(
                "files",
                ParamKind::Array,
                "Paths to stage, relative to the work directory",
            ),
            git,
        }
    }
}

#[async_trait]
impl Tool for GitCommitTool {
    fn spec(&self) -> &ToolSpec {
        &self.spec
    }

    async fn execute(&self, args: ToolArgs, ctx: ToolContext) -> Result<ToolOutput, ToolError> {
        let message = str_arg(&args, "message")?.trim();
        if message.is_empty() {
            return Err(ToolError::InvalidArguments(
                "'message' must not be empty".into(),
            ));
        }

        let files = match args.get("files") {
            None | Some(serde_json::Value::Null) => None,
            Some(serde_json::Value::Array(items)) => Some(
                items
                    .iter()
                    .map(|item| {
                        let path = item.as_str().ok_or_else(|| {
                            ToolError::InvalidArguments("'files' must contain strings".into())
                        })?;
                        self.git.pathspec("GitCommit", path)
                    })
                    .collect::<Result<Vec<_>, _>>()?,
            ),
            Some(other) => {
                return Err(ToolError::InvalidArguments(format!(
                    "'files' must be an array, got {other}"
                )));
            }
        };

        match &files {
            Some(paths) if !paths.is_empty() => {
                let mut cmd = vec!["add", "--"];
                cmd.extend(paths.iter().map(String::as_str));
                self.git.run("GitCommit", &cmd, &ctx).await?;
            }
            _ => {
                self.git.run("GitCommit", &["add", "-A"], &ctx).await?;
            }
        }

        // Exit code 0 means nothing is staged.
        let staged = self
            .git
            .output("GitCommit", &["diff", "--cached", "--quiet"], &ctx)
            .await?;
        if staged.code == 0 {
            return Ok(ToolOutput::Text("Nothing to commit".into()));
        }

        self.git
            .run("GitCommit", &["commit", "--no-verify", "-m", message], &ctx)
            .await?;
        let summary = self
            .git
            .run("GitCommit", &["log", "-1", "--oneline", "--no-color"], &ctx)
            .await?;
        Ok(ToolOutput::Text(format!("Committed {}", summary.trim())))
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use serde_json::json;

    fn git_available() -> bool {
        std::process::Command::new("git")
            .arg("--version")
            .output()
            .is_ok_and(|o| o.status.success())
    }

    fn git(dir: &std::path::Path, args: &[&str]) {
        let status = std::process::Command::new("git")
            .args(args)
            .current_dir(dir)
            .output()
            .unwrap();
        assert!(status.status.success(), "git {args:?} failed: {status:?}");
    }

    /// A repository with one commit touching `README.md`.
    fn repo() -> (tempfile::TempDir, GitRunner) {
        let dir = tempfile::tempdir().unwrap();
        git(dir.path(), &["init", "-q"]);
        git(dir.path(), &["config", "user.name", "Test User"]);
        git(dir.path(), &["config", "user.email", "test@example.com"]);
        git(dir.path(), &["config", "commit.gpgsign", "false"]);
        std::fs::write(dir.path().join("README.md"), "hello\n").unwrap();
        git(dir.path(), &["add", "README.md"]);
        git(dir.path(), &["commit", "-q", "-m", "Initial commit"]);
        let runner = GitRunner::new(
            Workspace::new(dir.path()).unwrap(),
            Duration::from_secs(30),
        );
        (dir, runner)
    }

    fn args(value: serde_json::Value) -> ToolArgs {
        value.as_object().cloned().unwrap()
    }

    async fn run(tool: &dyn Tool, value: serde_json::Value) -> Result<String, ToolError> {
        tool.execute(args(value), ToolContext::default())
            .await
            .map(|out| out.render())
    }

    #[tokio::test]
    async fn status_reports_changes() {
        if !git_available() {
            return;
        }
        let (dir, git) = repo();
        let tool = GitStatusTool::new(git);
        let clean = run(&tool, json!({})).await.unwrap();
        assert!(clean.starts_with("## "));
        assert!(clean.ends_with("Working tree clean"));

        std::fs::write(dir.path().join("new.txt"), "new").unwrap();
        let dirty = run(&tool, json!({})).await.unwrap();
        assert!(dirty.contains("?? new.txt"));
    }

    #[tokio::test]
    async fn diff_unstaged_and_staged() {
        if !git_available() {
            return;
        }
        let (dir, runner) = repo();
        let tool = GitDiffTool::new(runner);
        assert_eq!(run(&tool, json!({})).await.unwrap(), "No differences");

        std::fs::write(dir.path().join("README.md"), "hello\nworld\n").unwrap();
        let diff = run(&tool, json!({"path": "README.md"})).await.unwrap();
        assert!(diff.contains("+world"));

        git(dir.path(), &["add", "README.md"]);
        assert_eq!(run(&tool, json!({})).await.unwrap(), "No differences");
        let staged = run(&tool, json!({"staged": true})).await.unwrap();
        assert!(staged.contains("+world"));
    }

    #[tokio::test]
    async fn diff_rejects_option_like_commit() {
        if !git_available() {
            return;
        }
        let (_dir, runner) = repo();
        let err = run(&GitDiffTool::new(runner), json!({"commit": "--output=/tmp/x"}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
    }

    #[tokio::test]
    async fn log_lists_commits() {
        if !git_available() {
            return;
        }
        let (_dir, runner) = repo();
        let out = run(&GitLogTool::new(runner), json!({"max_count": 5}))
            .await
            .unwrap();
        assert_eq!(out.lines().count(), 1);
        assert!(out.ends_with("Test User Initial commit"));
    }

    #[tokio::test]
    async fn branch_create_and_list() {
        if !git_available() {
            return;
        }
        let (_dir, runner) = repo();
        let tool = GitBranchTool::new(runner);
        let out = run(&tool, json!({"create": "feature/search"})).await.unwrap();
        assert_eq!(out, "Created branch feature/search");

        let list = run(&tool, json!({})).await.unwrap();
        assert!(list.contains("feature/search"));
        assert!(list.lines().any(|l| l.starts_with("* ")));
    }

    #[tokio::test]
    async fn commit_stages_and_commits() {
        if !git_available() {
            return;
        }
        let (dir, runner) = repo();
        let tool = GitCommitTool::new(runner.clone());
        assert_eq!(
            run(&tool, json!({"message": "noop"})).await.unwrap(),
            "Nothing to commit"
        );

        std::fs::write(dir.path().join("a.txt"), "a").unwrap();
        std::fs::write(dir.path().join("b.txt"), "b").unwrap();
        let out = run(&tool, json!({"message": "Add a", "files": ["a.txt"]}))
            .await
            .unwrap();
        assert!(out.starts_with("Committed "));
        assert!(out.ends_with("Add a"));

        let status = run(&GitStatusTool::new(runner), json!({})).await.unwrap();
        assert!(status.contains("?? b.txt"));
        assert!(!status.contains("a.txt"));
    }

    #[tokio::test]
    async fn outside_repository_fails() {
        if !git_available() {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let runner = GitRunner::new(Workspace::new(dir.path()).unwrap(), Duration::from_secs(30));
        let err = run(&GitStatusTool::new(runner), json!({})).await.unwrap_err();
        assert!(matches!(err, ToolError::ExecutionFailed { .. }));
    }
}
