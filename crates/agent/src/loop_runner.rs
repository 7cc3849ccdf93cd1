//! The agent reasoning loop implementation.
//!
//! One [`AgentLoop`] can drive any number of [`Session`]s. Each call to
//! [`AgentLoop::run`] takes a session from `Idle` through model turns and
//! action executions until a final answer (`Done`) or a terminal condition
//! (`Failed`).

use rustact_config::AppConfig;
use rustact_core::error::ProviderError;
use rustact_core::message::Role;
use rustact_core::provider::{CompletionRequest, Provider};
use rustact_core::tool::{FailureKind, ToolRegistry};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::context::{ContextConfig, ContextManager, TokenUsage};
use crate::dispatcher::{DispatchConfig, Observation, ToolDispatcher};
use crate::error::{AgentError, StopSummary};
use crate::parser::{OBSERVATION_OPEN, ResponseParser, Segment, format_action};
use crate::prompt::{PromptEnv, system_prompt};
use crate::retry::RetryPolicy;
use crate::stream_event::AgentEvent;
use crate::transcript::{Transcript, TranscriptEntry};

/// Appended to a model turn cut short by cancellation.
const INTERRUPTED_MARKER: &str = "[interrupted]";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentState {
    Idle,
    AwaitingModel,
    ProcessingSegments,
    ExecutingAction,
    Done,
    Failed,
}

impl AgentState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

/// Settings for the loop itself; tool and context limits live with the
/// dispatcher and the session.
#[derive(Debug, Clone)]
pub struct LoopConfig {
    pub model: String,
    pub temperature: f32,
    pub max_response_tokens: Option<u32>,
    /// Model turns allowed per task
    pub max_steps: usize,
    pub retry: RetryPolicy,
    /// Language for thoughts and answers
    pub language: String,
    pub work_dir: Option<PathBuf>,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

impl From<&AppConfig> for LoopConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            model: config.model.clone(),
            temperature: config.temperature,
            max_response_tokens: config.max_response_tokens,
            max_steps: config.agent.max_steps,
            retry: RetryPolicy::from(&config.agent),
            language: config.language.clone(),
            work_dir: config.work_dir.clone(),
        }
    }
}

/// One conversation: its history and where the loop is in it.
pub struct Session {
    id: String,
    context: ContextManager,
    state: AgentState,
}

impl Session {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> AgentState {
        self.state
    }

    pub fn context(&self) -> &ContextManager {
        &self.context
    }

    pub fn usage(&self) -> TokenUsage {
        self.context.usage()
    }

    /// Forget everything but the system prompt.
    pub fn reset(&mut self) {
        self.context.reset();
        self.state = AgentState::Idle;
    }
}

/// What a call to [`AgentLoop::run`] produced.
#[derive(Debug)]
pub struct SessionReport {
    /// The final answer, or why there is none
    pub outcome: Result<String, AgentError>,
    pub transcript: Transcript,
    pub steps: usize,
    pub usage: TokenUsage,
}

impl SessionReport {
    pub fn answer(&self) -> Option<&str> {
        self.outcome.as_deref().ok()
    }
}

/// Per-run bookkeeping.
struct RunState {
    steps: usize,
    last_action: Option<String>,
    transcript: Transcript,
}

/// A finished model turn.
struct Turn {
    text: String,
    segments: Vec<Segment>,
}

enum StreamOutcome {
    Complete(Turn),
    /// Cancelled mid-stream, with whatever text had arrived
    Cancelled(String),
}

/// The core agent loop that orchestrates model turns and tool execution.
pub struct AgentLoop {
    /// The completion client
    provider: Arc<dyn Provider>,

    dispatcher: ToolDispatcher,

    config: LoopConfig,

    /// Optional event sink for frontends
    events: Option<mpsc::Sender<AgentEvent>>,
}

impl AgentLoop {
    pub fn new(
        provider: Arc<dyn Provider>,
        registry: Arc<ToolRegistry>,
        dispatch: DispatchConfig,
        config: LoopConfig,
    ) -> Self {
        Self {
            provider,
            dispatcher: ToolDispatcher::new(registry, dispatch),
            config,
            events: None,
        }
    }

    /// Send [`AgentEvent`]s to `tx`. Text deltas are dropped when the
    /// channel is full; every other event waits for room.
    pub fn with_events(mut self, tx: mpsc::Sender<AgentEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    /// Set the maximum number of model turns per task.
    pub fn with_max_steps(mut self, max: usize) -> Self {
        self.config.max_steps = max;
        self
    }

    pub fn config(&self) -> &LoopConfig {
        &self.config
    }

    pub fn registry(&self) -> &ToolRegistry {
        self.dispatcher.registry()
    }

    pub fn system_prompt(&self) -> String {
        system_prompt(
            self.dispatcher.registry(),
            &PromptEnv {
                model: &self.config.model,
                language: &self.config.language,
                work_dir: self.config.work_dir.as_deref(),
            },
        )
    }

    /// A fresh session seeded with the system prompt.
    pub fn new_session(&self, context: ContextConfig) -> Session {
        let mut manager = ContextManager::new(context);
        manager.append(Role::System, self.system_prompt());
        Session {
            id: Uuid::new_v4().to_string(),
            context: manager,
            state: AgentState::Idle,
        }
    }

    /// Run one task to a terminal state.
    pub async fn run(
        &self,
        session: &mut Session,
        task: &str,
        cancel: CancellationToken,
    ) -> SessionReport {
        info!(session = %session.id, model = %self.config.model, "Starting task");
        self.set_state(session, AgentState::Idle).await;

        let mut run = RunState {
            steps: 0,
            last_action: None,
            transcript: Transcript::new(task),
        };
        session.context.append(Role::User, task);
        session.context.prune_if_needed();

        let outcome = self.drive(session, &mut run, &cancel).await;

        match &outcome {
            Ok(answer) => {
                info!(session = %session.id, steps = run.steps, "Task complete");
                self.set_state(session, AgentState::Done).await;
                run.transcript.final_answer = Some(answer.clone());
                self.emit(AgentEvent::Done {
                    answer: answer.clone(),
                    steps: run.steps,
                    usage: session.usage(),
                })
                .await;
            }
            Err(err) => {
                warn!(session = %session.id, condition = err.condition(), "Task failed: {err}");
                self.set_state(session, AgentState::Failed).await;
                run.transcript.failure = Some(err.to_string());
                self.emit(AgentEvent::Failed {
                    condition: err.condition().to_string(),
                    message: err.to_string(),
                })
                .await;
            }
        }

        SessionReport {
            outcome,
            transcript: run.transcript,
            steps: run.steps,
            usage: session.usage(),
        }
    }

    async fn drive(
        &self,
        session: &mut Session,
        run: &mut RunState,
        cancel: &CancellationToken,
    ) -> Result<String, AgentError> {
        loop {
            if cancel.is_cancelled() {
                return Err(AgentError::Cancelled(summary(session, run)));
            }
            if session.context.is_over_budget() {
                return Err(AgentError::ContextBudgetExhausted(summary(session, run)));
            }

            self.set_state(session, AgentState::AwaitingModel).await;
            let turn = self.request_turn(session, run, cancel).await?;
            run.steps += 1;
            debug!(step = run.steps, chars = turn.text.len(), "Model turn received");

            self.set_state(session, AgentState::ProcessingSegments).await;
            session.context.append(Role::Assistant, turn.text.as_str());
            session.context.prune_if_needed();

            let mut final_answer = None;
            let mut thought = None;
            let mut acted = false;

            for segment in turn.segments {
                let observation = match segment {
                    Segment::Thought { text, .. } | Segment::Reflection { text, .. } => {
                        thought = Some(text);
                        continue;
                    }
                    Segment::FinalAnswer { text, .. } => {
                        final_answer = Some(text);
                        continue;
                    }
                    Segment::Action(action) => {
                        let call = format_action(&action.name, &action.args);
                        run.last_action = Some(call.clone());
                        self.set_state(session, AgentState::ExecutingAction).await;
                        self.emit(AgentEvent::Action {
                            step: run.steps,
                            name: action.name.clone(),
                            input: serde_json::Value::Object(action.args.clone()),
                        })
                        .await;
                        debug!(step = run.steps, action = %call, "Dispatching action");
                        let obs = self.dispatcher.dispatch(&action, cancel).await;
                        (call, obs)
                    }
                    Segment::ParseError(err) => {
                        let raw = err.raw.trim().to_string();
                        run.last_action = Some(raw.clone());
                        warn!(step = run.steps, "Unparsable action: {err}");
                        (raw, self.dispatcher.parse_failure(&err))
                    }
                };

                acted = true;
                let (action, obs) = observation;
                self.record(session, run, thought.take(), action, &obs).await;
                if obs.failure == Some(FailureKind::Cancelled) {
                    return Err(AgentError::Cancelled(summary(session, run)));
                }
            }

            if let Some(answer) = final_answer {
                return Ok(answer);
            }

            if !acted {
                warn!(step = run.steps, "Turn had neither an action nor a final answer");
                let obs = self.dispatcher.format_reminder();
                self.record(session, run, thought.take(), String::new(), &obs).await;
            }

            if run.steps >= self.config.max_steps {
                return Err(AgentError::StepLimitExceeded(summary(session, run)));
            }
        }
    }

    /// Append an observation to the history and the transcript.
    async fn record(
        &self,
        session: &mut Session,
        run: &mut RunState,
        thought: Option<String>,
        action: String,
        obs: &Observation,
    ) {
        session.context.append(Role::Observation, obs.to_message());
        session.context.prune_if_needed();

        self.emit(AgentEvent::Observation {
            step: run.steps,
            name: obs.tool.clone(),
            content: obs.content.clone(),
            success: obs.is_success(),
        })
        .await;
        run.transcript.push(TranscriptEntry {
            step: run.steps,
            thought,
            action,
            observation: obs.content.clone(),
            failure: obs.failure,
        });
    }

    /// Get one complete model turn, retrying transient transport failures.
    async fn request_turn(
        &self,
        session: &mut Session,
        run: &RunState,
        cancel: &CancellationToken,
    ) -> Result<Turn, AgentError> {
        let mut attempt = 0;
        loop {
            let err = match self.stream_turn(session, cancel).await {
                Ok(StreamOutcome::Complete(turn)) => return Ok(turn),
                Ok(StreamOutcome::Cancelled(partial)) => {
                    if !partial.trim().is_empty() {
                        session
                            .context
                            .append(Role::Assistant, format!("{partial}\n{INTERRUPTED_MARKER}"));
                        session.context.prune_if_needed();
                    }
                    return Err(AgentError::Cancelled(summary(session, run)));
                }
                Err(err) => err,
            };

            let Some(delay) = self.config.retry.next_delay(attempt, &err) else {
                return Err(AgentError::Transport {
                    source: err,
                    summary: summary(session, run),
                });
            };
            attempt += 1;
            warn!(
                attempt,
                delay_ms = delay.as_millis() as u64,
                "Completion failed, retrying: {err}"
            );
            self.emit(AgentEvent::Retry {
                attempt,
                delay_ms: delay.as_millis() as u64,
                reason: err.to_string(),
            })
            .await;

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return Err(AgentError::Cancelled(summary(session, run)));
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// Stream one turn through a fresh parser.
    async fn stream_turn(
        &self,
        session: &Session,
        cancel: &CancellationToken,
    ) -> Result<StreamOutcome, ProviderError> {
        let request = CompletionRequest {
            model: self.config.model.clone(),
            messages: session.context.snapshot().to_vec(),
            temperature: self.config.temperature,
            max_tokens: self.config.max_response_tokens,
            stop: vec![OBSERVATION_OPEN.to_string()],
        };

        let mut rx = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(StreamOutcome::Cancelled(String::new())),
            rx = self.provider.stream(request) => rx?,
        };

        let mut parser = ResponseParser::new();
        let mut segments = Vec::new();

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!("Closing completion stream on cancellation");
                    return Ok(StreamOutcome::Cancelled(parser.accepted_text().to_string()));
                }
                next = rx.recv() => next,
            };

            let Some(chunk) = next else {
                debug!("Completion stream closed without a done marker");
                break;
            };
            let chunk = chunk?;

            if let Some(text) = chunk.content.filter(|t| !t.is_empty()) {
                self.emit_delta(AgentEvent::TextDelta {
                    content: text.clone(),
                });
                let parsed = parser.push(&text);
                self.surface(&parsed).await;
                segments.extend(parsed);
                if parser.is_halted() {
                    break;
                }
            }
            if chunk.done {
                if let Some(usage) = chunk.usage {
                    debug!(
                        prompt = usage.prompt_tokens,
                        completion = usage.completion_tokens,
                        "Provider usage"
                    );
                }
                break;
            }
        }

        let tail = parser.finish();
        self.surface(&tail).await;
        segments.extend(tail);

        Ok(StreamOutcome::Complete(Turn {
            text: parser.accepted_text().to_string(),
            segments,
        }))
    }

    /// Report reasoning segments as they complete.
    async fn surface(&self, segments: &[Segment]) {
        for segment in segments {
            if let Segment::Thought { text, .. } | Segment::Reflection { text, .. } = segment {
                debug!(thought = %text, "Model thought");
                self.emit(AgentEvent::Thought {
                    content: text.clone(),
                })
                .await;
            }
        }
    }

    async fn set_state(&self, session: &mut Session, state: AgentState) {
        if session.state != state {
            debug!(session = %session.id, from = ?session.state, to = ?state, "State change");
            session.state = state;
        }
        self.emit(AgentEvent::StateChanged { state }).await;
    }

    /// Deliver a structural event. Waits for channel capacity so frontends
    /// see every action and observation; a closed channel is ignored.
    async fn emit(&self, event: AgentEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event).await;
        }
    }

    /// Deliver a text delta if there is room. Deltas are dropped rather
    /// than held back, so a slow frontend never stalls the stream.
    fn emit_delta(&self, event: AgentEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.try_send(event);
        }
    }
}

fn summary(session: &Session, run: &RunState) -> StopSummary {
    StopSummary {
        steps: run.steps,
        last_action: run.last_action.clone(),
        usage: session.context.usage(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{RecordingTool, ScriptedProvider, SleepTool, Turn as Script};
    use rustact_core::tool::Tool;
    use serde_json::json;
    use std::sync::Mutex;
    use std::time::Duration;

    fn build(
        provider: Arc<ScriptedProvider>,
        tools: Vec<Arc<dyn Tool>>,
        config: LoopConfig,
    ) -> AgentLoop {
        let mut registry = ToolRegistry::new();
        for tool in tools {
            registry.register(tool).unwrap();
        }
        AgentLoop::new(provider, Arc::new(registry), DispatchConfig::default(), config)
    }

    fn config() -> LoopConfig {
        LoopConfig {
            model: "test-model".into(),
            retry: RetryPolicy {
                max_retries: 2,
                initial_delay: Duration::from_millis(100),
                max_delay: Duration::from_secs(1),
            },
            work_dir: None,
            ..LoopConfig::default()
        }
    }

    #[tokio::test]
    async fn final_answer_ends_after_one_turn() {
        let provider = Arc::new(ScriptedProvider::texts(&[
            "<thought>Simple greeting.</thought><final_answer>Hello!</final_answer>",
        ]));
        let agent = build(provider.clone(), vec![], config());
        let mut session = agent.new_session(ContextConfig::default());

        let report = agent.run(&mut session, "hi", CancellationToken::new()).await;
        assert_eq!(report.answer(), Some("Hello!"));
        assert_eq!(report.steps, 1);
        assert_eq!(provider.call_count(), 1);
        assert_eq!(session.state(), AgentState::Done);

        let roles: Vec<Role> = session.context().snapshot().iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::System, Role::User, Role::Assistant]);
    }

    #[tokio::test]
    async fn actions_run_in_emitted_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let first = RecordingTool::new("CreateFolder", json!("ok")).with_log(log.clone());
        let second = RecordingTool::new("WriteFile", json!("ok")).with_log(log.clone());
        let third = RecordingTool::new("ReadFile", json!("ok")).with_log(log.clone());
        let provider = Arc::new(ScriptedProvider::texts(&[
            "<action>CreateFolder({\"path\": \"src\"})\nWriteFile({\"path\": \"src/a\"})</action>\
             <action>ReadFile({\"path\": \"src/a\"})</action>",
            "<final_answer>done</final_answer>",
        ]));
        let agent = build(
            provider,
            vec![Arc::new(second), Arc::new(third), Arc::new(first)],
            config(),
        );
        let mut session = agent.new_session(ContextConfig::default());

        let report = agent.run(&mut session, "build", CancellationToken::new()).await;
        assert!(report.outcome.is_ok());
        assert_eq!(
            *log.lock().unwrap(),
            vec!["CreateFolder", "WriteFile", "ReadFile"]
        );
        assert_eq!(report.transcript.entries.len(), 3);
    }

    #[tokio::test]
    async fn small_event_channel_still_sees_every_action() {
        let turn = "<think>Look at three files, one after another.</think>\
                    <action>ReadFile({\"path\": \"a\"})</action>\
                    <action>ReadFile({\"path\": \"b\"})</action>\
                    <action>ReadFile({\"path\": \"c\"})</action>";
        let provider = Arc::new(ScriptedProvider::new(vec![
            Script::chunked(turn, 1),
            Script::chunked("<final_answer>read all three</final_answer>", 1),
        ]));
        let (tx, mut rx) = mpsc::channel(2);
        let collector = tokio::spawn(async move {
            let mut events = Vec::new();
            while let Some(event) = rx.recv().await {
                tokio::task::yield_now().await;
                events.push(event);
            }
            events
        });
        let agent = build(
            provider,
            vec![Arc::new(RecordingTool::new("ReadFile", json!("text")))],
            config(),
        )
        .with_events(tx);
        let mut session = agent.new_session(ContextConfig::default());

        let report = agent.run(&mut session, "read", CancellationToken::new()).await;
        assert_eq!(report.answer(), Some("read all three"));
        drop(agent);

        let events = collector.await.unwrap();
        let count = |kind: &str| events.iter().filter(|e| e.event_type() == kind).count();
        assert_eq!(count("action"), 3);
        assert_eq!(count("observation"), 3);
        assert_eq!(count("thought"), 1);
        assert_eq!(count("done"), 1);
        assert_eq!(events.last().map(|e| e.event_type()), Some("done"));
    }

    #[tokio::test]
    async fn actions_before_final_answer_in_same_turn() {
        let tool = RecordingTool::new("WriteFile", json!("written"));
        let provider = Arc::new(ScriptedProvider::texts(&[
            "<action>WriteFile({\"path\": \"a\"})</action><final_answer>wrote it</final_answer>",
        ]));
        let agent = build(provider.clone(), vec![Arc::new(tool.clone())], config());
        let mut session = agent.new_session(ContextConfig::default());

        let report = agent.run(&mut session, "write", CancellationToken::new()).await;
        assert_eq!(report.answer(), Some("wrote it"));
        assert_eq!(tool.calls().len(), 1);
        assert_eq!(provider.call_count(), 1);
    }

    #[tokio::test]
    async fn turn_without_tags_gets_format_reminder() {
        let provider = Arc::new(ScriptedProvider::texts(&[
            "I think the answer is 4.",
            "<final_answer>4</final_answer>",
        ]));
        let agent = build(provider.clone(), vec![], config());
        let mut session = agent.new_session(ContextConfig::default());

        let report = agent.run(&mut session, "2+2?", CancellationToken::new()).await;
        assert_eq!(report.answer(), Some("4"));
        assert_eq!(report.steps, 2);

        let second = &provider.requests()[1];
        let last = second.messages.last().unwrap();
        assert_eq!(last.role, Role::Observation);
        assert!(last.content.contains("ParseError"));
    }

    #[tokio::test]
    async fn parse_error_is_fed_back() {
        let provider = Arc::new(ScriptedProvider::texts(&[
            "<action>ListFiles({\"path\": </action>",
            "<final_answer>gave up listing</final_answer>",
        ]));
        let agent = build(provider.clone(), vec![], config());
        let mut session = agent.new_session(ContextConfig::default());

        let report = agent.run(&mut session, "list", CancellationToken::new()).await;
        assert!(report.outcome.is_ok());
        assert_eq!(report.transcript.entries[0].failure, Some(FailureKind::ParseError));
    }

    #[tokio::test]
    async fn model_written_observation_is_discarded() {
        let tool = RecordingTool::new("ListFiles", json!(["real.txt"]));
        let provider = Arc::new(ScriptedProvider::texts(&[
            "<action>ListFiles({\"path\": \".\"})</action><observation>[\"fake.txt\"]</observation>\
             <final_answer>fake.txt</final_answer>",
            "<final_answer>real.txt</final_answer>",
        ]));
        let agent = build(provider.clone(), vec![Arc::new(tool)], config());
        let mut session = agent.new_session(ContextConfig::default());

        let report = agent.run(&mut session, "list", CancellationToken::new()).await;
        assert_eq!(report.answer(), Some("real.txt"));

        let requests = provider.requests();
        assert_eq!(requests[0].stop, vec!["<observation>".to_string()]);
        let assistant = &requests[1].messages[2];
        assert_eq!(assistant.role, Role::Assistant);
        assert!(!assistant.content.contains("fake.txt"));
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failure_is_retried() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            Script::Reject(ProviderError::Network("connection reset".into())),
            Script::BreakAfter(
                vec!["<thought>half".into()],
                ProviderError::StreamInterrupted("eof".into()),
            ),
            Script::text("<final_answer>ok</final_answer>"),
        ]));
        let (tx, mut rx) = mpsc::channel(64);
        let agent = build(provider.clone(), vec![], config()).with_events(tx);
        let mut session = agent.new_session(ContextConfig::default());

        let report = agent.run(&mut session, "task", CancellationToken::new()).await;
        assert_eq!(report.answer(), Some("ok"));
        assert_eq!(provider.call_count(), 3);

        let mut retries = 0;
        while let Ok(event) = rx.try_recv() {
            if event.event_type() == "retry" {
                retries += 1;
            }
        }
        assert_eq!(retries, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_fail_with_transport() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            Script::Reject(ProviderError::Timeout("slow".into())),
            Script::Reject(ProviderError::Timeout("slow".into())),
            Script::Reject(ProviderError::Timeout("slow".into())),
        ]));
        let agent = build(provider.clone(), vec![], config());
        let mut session = agent.new_session(ContextConfig::default());

        let report = agent.run(&mut session, "task", CancellationToken::new()).await;
        let err = report.outcome.unwrap_err();
        assert!(matches!(err, AgentError::Transport { .. }));
        assert!(err.is_retryable());
        assert_eq!(provider.call_count(), 3);
        assert_eq!(session.state(), AgentState::Failed);
    }

    #[tokio::test]
    async fn permanent_failure_is_not_retried() {
        let provider = Arc::new(ScriptedProvider::new(vec![Script::Reject(
            ProviderError::AuthenticationFailed("bad key".into()),
        )]));
        let agent = build(provider.clone(), vec![], config());
        let mut session = agent.new_session(ContextConfig::default());

        let report = agent.run(&mut session, "task", CancellationToken::new()).await;
        assert_eq!(report.outcome.unwrap_err().condition(), "Transport");
        assert_eq!(provider.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_mid_stream_keeps_partial_text() {
        let provider = Arc::new(ScriptedProvider::new(vec![Script::Stall(vec![
            "<thought>Let me look".into(),
        ])]));
        let agent = build(provider, vec![], config());
        let mut session = agent.new_session(ContextConfig::default());

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let report = agent.run(&mut session, "task", cancel).await;
        assert!(matches!(report.outcome, Err(AgentError::Cancelled(_))));
        let last = session.context().snapshot().last().unwrap();
        assert_eq!(last.role, Role::Assistant);
        assert!(last.content.starts_with("<thought>Let me look"));
        assert!(last.content.ends_with("[interrupted]"));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_during_tool_fails_cancelled() {
        let sleeper = SleepTool::new(Duration::from_secs(600));
        let provider = Arc::new(ScriptedProvider::texts(&["<action>Sleep({})</action>"]));
        let agent = build(provider, vec![Arc::new(sleeper.clone())], config());
        let mut session = agent.new_session(ContextConfig::default());

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });

        let report = agent.run(&mut session, "task", cancel).await;
        let err = report.outcome.unwrap_err();
        assert_eq!(err.condition(), "Cancelled");
        assert_eq!(err.summary().last_action.as_deref(), Some("Sleep({})"));
        assert!(!sleeper.completed());
    }

    #[tokio::test]
    async fn oversized_system_prompt_exhausts_budget() {
        let provider = Arc::new(ScriptedProvider::texts(&["<final_answer>x</final_answer>"]));
        let agent = build(provider.clone(), vec![], config());
        let mut session = agent.new_session(ContextConfig {
            max_tokens: 100,
            safety_margin: 10,
            ..ContextConfig::default()
        });

        let report = agent.run(&mut session, "task", CancellationToken::new()).await;
        assert!(matches!(
            report.outcome,
            Err(AgentError::ContextBudgetExhausted(_))
        ));
        assert_eq!(provider.call_count(), 0);
    }

    #[tokio::test]
    async fn session_can_be_reused() {
        let provider = Arc::new(ScriptedProvider::texts(&[
            "<final_answer>one</final_answer>",
            "<final_answer>two</final_answer>",
        ]));
        let agent = build(provider.clone(), vec![], config());
        let mut session = agent.new_session(ContextConfig::default());

        let first = agent.run(&mut session, "first", CancellationToken::new()).await;
        let second = agent.run(&mut session, "second", CancellationToken::new()).await;
        assert_eq!(first.answer(), Some("one"));
        assert_eq!(second.answer(), Some("two"));
        // The second request carries the first exchange.
        assert_eq!(provider.requests()[1].messages.len(), 4);

        session.reset();
        assert_eq!(session.context().len(), 1);
        assert_eq!(session.state(), AgentState::Idle);
    }
}
