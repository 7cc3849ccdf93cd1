//! Tool dispatch: turning parsed actions into observations.
//!
//! Dispatch never fails: a missing tool, bad arguments, a timeout, a tool
//! error, a panic, or a cancellation all come back as an [`Observation`]
//! carrying a [`ToolFailure`], ready to be fed to the model.

use rustact_config::ToolSettings;
use rustact_core::error::ToolError;
use rustact_core::tool::{
    FailureKind, ToolArgs, ToolContext, ToolFailure, ToolOutput, ToolRegistry, ToolSpec,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info_span, warn};

use crate::parser::{ActionParseError, ParsedAction};

/// Dispatcher limits.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Wall-clock limit per tool execution
    pub timeout: Duration,
    /// How long a tool may run on after cancellation before it is aborted
    pub cancel_grace: Duration,
    /// Observation size ceiling, in bytes
    pub max_observation_chars: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self::from(&ToolSettings::default())
    }
}

impl From<&ToolSettings> for DispatchConfig {
    fn from(s: &ToolSettings) -> Self {
        Self {
            timeout: Duration::from_secs(s.timeout_secs),
            cancel_grace: Duration::from_millis(s.cancel_grace_ms),
            max_observation_chars: s.max_observation_chars,
        }
    }
}

/// The textual result of one action.
#[derive(Debug, Clone)]
pub struct Observation {
    /// Tool the action named, if it got that far
    pub tool: Option<String>,
    /// Bounded observation text
    pub content: String,
    pub failure: Option<FailureKind>,
    pub elapsed: Duration,
}

impl Observation {
    pub fn is_success(&self) -> bool {
        self.failure.is_none()
    }

    /// Message content as appended to the conversation.
    pub fn to_message(&self) -> String {
        format!("<observation>{}</observation>", self.content)
    }
}

/// Validates and executes parsed actions against a shared registry.
#[derive(Clone)]
pub struct ToolDispatcher {
    registry: Arc<ToolRegistry>,
    config: DispatchConfig,
}

impl ToolDispatcher {
    pub fn new(registry: Arc<ToolRegistry>, config: DispatchConfig) -> Self {
        Self { registry, config }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Observation for an action that could not be parsed.
    pub fn parse_failure(&self, err: &ActionParseError) -> Observation {
        let failure = ToolFailure::new(
            FailureKind::ParseError,
            format!(
                "could not parse action: {err}. Use the form ToolName({{\"key\": \"value\"}})"
            ),
        );
        self.failed(None, failure, Duration::ZERO)
    }

    /// Observation reminding the model of the turn format.
    pub fn format_reminder(&self) -> Observation {
        let failure = ToolFailure::new(
            FailureKind::ParseError,
            "no <action> or <final_answer> found. Reply with \
             <action>ToolName({\"key\": \"value\"})</action> to use a tool, or \
             <final_answer>...</final_answer> when the task is complete",
        );
        self.failed(None, failure, Duration::ZERO)
    }

    /// Validate and execute one action.
    pub async fn dispatch(&self, action: &ParsedAction, cancel: &CancellationToken) -> Observation {
        let started = Instant::now();
        let name = action.name.as_str();

        let Some(tool) = self.registry.get(name) else {
            warn!(tool = %name, "Model requested an unknown tool");
            let failure = ToolFailure::new(
                FailureKind::ToolNotFound,
                format!(
                    "tool '{name}' does not exist. Available tools: {}",
                    self.registry.names().join(", ")
                ),
            );
            return self.failed(Some(name), failure, started.elapsed());
        };

        let args = match validate(tool.spec(), &action.args) {
            Ok(args) => args,
            Err(message) => {
                let failure = ToolFailure::new(FailureKind::InvalidArguments, message);
                return self.failed(Some(name), failure, started.elapsed());
            }
        };

        let span = info_span!("tool", name = %name);
        let result = self.execute(tool, args, cancel).instrument(span).await;
        let elapsed = started.elapsed();

        match result {
            Ok(output) => {
                debug!(tool = %name, elapsed_ms = elapsed.as_millis() as u64, "Tool succeeded");
                let (content, truncated) =
                    truncate_observation(&output.render(), self.config.max_observation_chars);
                if truncated {
                    debug!(tool = %name, "Observation truncated");
                }
                Observation {
                    tool: Some(name.to_string()),
                    content,
                    failure: None,
                    elapsed,
                }
            }
            Err(failure) => {
                warn!(tool = %name, kind = %failure.kind, elapsed_ms = elapsed.as_millis() as u64, "Tool failed");
                self.failed(Some(name), failure, elapsed)
            }
        }
    }

    /// Run the tool on its own task, racing timeout and cancellation.
    async fn execute(
        &self,
        tool: Arc<dyn rustact_core::Tool>,
        args: ToolArgs,
        cancel: &CancellationToken,
    ) -> Result<ToolOutput, ToolFailure> {
        let name = tool.name().to_string();
        let ctx = ToolContext {
            cancel: cancel.child_token(),
        };
        let mut handle = tokio::spawn(async move { tool.execute(args, ctx).await });

        tokio::select! {
            joined = &mut handle => from_join(&name, joined),
            _ = tokio::time::sleep(self.config.timeout) => {
                handle.abort();
                Err(ToolFailure::new(
                    FailureKind::Timeout,
                    format!("'{name}' did not finish within {}s and was stopped", self.config.timeout.as_secs_f32()),
                ))
            }
            _ = cancel.cancelled() => {
                let finished = tokio::time::timeout(self.config.cancel_grace, &mut handle).await.is_ok();
                if !finished {
                    handle.abort();
                }
                Err(ToolFailure::new(
                    FailureKind::Cancelled,
                    if finished {
                        format!("'{name}' was cancelled")
                    } else {
                        format!("'{name}' was cancelled and forcibly stopped")
                    },
                ))
            }
        }
    }

    fn failed(&self, tool: Option<&str>, failure: ToolFailure, elapsed: Duration) -> Observation {
        let (content, _) = truncate_observation(
            &format!("{}: {}", failure.kind, failure.message),
            self.config.max_observation_chars,
        );
        Observation {
            tool: tool.map(str::to_string),
            content,
            failure: Some(failure.kind),
            elapsed,
        }
    }
}

fn from_join(
    name: &str,
    joined: Result<Result<ToolOutput, ToolError>, JoinError>,
) -> Result<ToolOutput, ToolFailure> {
    match joined {
        Ok(Ok(output)) => Ok(output),
        Ok(Err(err)) => {
            let kind = match &err {
                ToolError::InvalidArguments(_) => FailureKind::InvalidArguments,
                ToolError::Timeout { .. } => FailureKind::Timeout,
                ToolError::NotFound(_) => FailureKind::ToolNotFound,
                _ => FailureKind::ExecutionError,
            };
            Err(ToolFailure::new(kind, err.to_string()))
        }
        Err(join_err) if join_err.is_panic() => {
            let panic = join_err.into_panic();
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".into());
            Err(ToolFailure::new(
                FailureKind::ExecutionError,
                format!("'{name}' panicked: {message}"),
            ))
        }
        Err(join_err) => Err(ToolFailure::new(
            FailureKind::ExecutionError,
            format!("'{name}' was aborted: {join_err}"),
        )),
    }
}

/// Check arguments against the declared parameters. Unknown keys are kept
/// and ignored; `null` for an optional parameter counts as absent.
fn validate(spec: &ToolSpec, args: &ToolArgs) -> Result<ToolArgs, String> {
    let mut problems = Vec::new();

    for param in &spec.params {
        match args.get(&param.name) {
            None | Some(serde_json::Value::Null) if param.required => {
                problems.push(format!("missing required parameter '{}'", param.name));
            }
            None | Some(serde_json::Value::Null) => {}
            Some(value) if !param.kind.accepts(value) => {
                problems.push(format!(
                    "parameter '{}' expects {}, got {}",
                    param.name,
                    param.kind,
                    json_type(value)
                ));
            }
            Some(_) => {}
        }
    }

    for key in args.keys() {
        if spec.param(key).is_none() {
            debug!(tool = %spec.name, key = %key, "Ignoring unknown argument");
        }
    }

    if problems.is_empty() {
        Ok(args.clone())
    } else {
        Err(format!("{} for '{}'", problems.join("; "), spec.name))
    }
}

fn json_type(value: &serde_json::Value) -> &'static str {
    use serde_json::Value;
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_f64() => "number",
        Value::Number(_) => "integer",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Bound `text` to `max` bytes (on a char boundary), appending a marker with
/// the number of bytes dropped.
pub fn truncate_observation(text: &str, max: usize) -> (String, bool) {
    if text.len() <= max {
        return (text.to_string(), false);
    }
    let mut cut = max;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    let dropped = text.len() - cut;
    (
        format!("{}\n[... truncated {dropped} bytes]", &text[..cut]),
        true,
    )
}
