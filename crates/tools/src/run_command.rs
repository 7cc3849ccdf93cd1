//! RunCommand: execute a shell command in the work directory.
//!
//! The child is spawned with `kill_on_drop`, so abandoning the future (on
//! timeout, cancellation, or when the dispatcher aborts the task) terminates
//! the process.

use async_trait::async_trait;
use rustact_core::error::ToolError;
use rustact_core::tool::{ParamKind, Tool, ToolArgs, ToolContext, ToolOutput, ToolSpec};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::sandbox::Workspace;
use crate::str_arg;

pub struct RunCommandTool {
    spec: ToolSpec,
    workspace: Workspace,
    default_timeout: Duration,
}

impl RunCommandTool {
    pub fn new(workspace: Workspace, default_timeout: Duration) -> Self {
        Self {
            spec: ToolSpec::new(
                "RunCommand",
                "Run a shell command (e.g. `cargo test`, `git status`) in the work \
                 directory and return its exit code, stdout and stderr.",
            )
            .required("command", ParamKind::String, "The shell command to execute")
            .optional(
                "timeout",
                ParamKind::Integer,
                "Timeout in seconds for this command",
            ),
            workspace,
            default_timeout,
        }
    }

    fn command(&self, command: &str) -> Command {
        let mut cmd = if cfg!(target_os = "windows") {
            let mut c = Command::new("cmd");
            c.args(["/C", command]);
            c
        } else {
            let mut c = Command::new("sh");
            c.args(["-c", command]);
            c
        };
        cmd.current_dir(self.workspace.root())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

fn format_output(output: &std::process::Output) -> String {
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    let code = output.status.code().unwrap_or(-1);

    let mut text = format!("exit code: {code}\n");
    if !stdout.trim().is_empty() {
        text.push_str("[stdout]\n");
        text.push_str(stdout.trim_end());
        text.push('\n');
    }
    if !stderr.trim().is_empty() {
        text.push_str("[stderr]\n");
        text.push_str(stderr.trim_end());
        text.push('\n');
    }
    text.trim_end().to_string()
}

#[async_trait]
impl Tool for RunCommandTool {
    fn spec(&self) -> &ToolSpec {
        &self.spec
    }

    async fn execute(&self, args: ToolArgs, ctx: ToolContext) -> Result<ToolOutput, ToolError> {
        let command = str_arg(&args, "command")?;
        if command.trim().is_empty() {
            return Err(ToolError::InvalidArguments("'command' is empty".into()));
        }
        let timeout = match args.get("timeout").and_then(|v| v.as_u64()) {
            Some(0) | None => self.default_timeout,
            Some(secs) => Duration::from_secs(secs),
        };

        debug!(command = %command, timeout_secs = timeout.as_secs(), "Executing shell command");

        let child = self.command(command).spawn().map_err(|e| ToolError::ExecutionFailed {
            tool_name: "RunCommand".into(),
            reason: e.to_string(),
        })?;

        let output = tokio::select! {
            result = tokio::time::timeout(timeout, child.wait_with_output()) => match result {
                Ok(output) => output.map_err(|e| ToolError::ExecutionFailed {
                    tool_name: "RunCommand".into(),
                    reason: e.to_string(),
                })?,
                Err(_) => {
                    warn!(command = %command, "Command timed out");
                    return Err(ToolError::Timeout {
                        tool_name: "RunCommand".into(),
                        timeout_secs: timeout.as_secs(),
                    });
                }
            },
            _ = ctx.cancel.cancelled() => {
                return Err(ToolError::ExecutionFailed {
                    tool_name: "RunCommand".into(),
                    reason: "command cancelled".into(),
                });
            }
        };

        if !output.status.success() {
            warn!(command = %command, exit_code = output.status.code().unwrap_or(-1), "Command failed");
        }

        Ok(ToolOutput::Text(format_output(&output)))
    }
}
