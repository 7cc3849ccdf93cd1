//! Shared test doubles for the agent crate.

use async_trait::async_trait;
use rustact_core::error::{ProviderError, ToolError};
use rustact_core::provider::{ChunkReceiver, CompletionRequest, Provider, StreamChunk};
use rustact_core::tool::{Tool, ToolArgs, ToolContext, ToolOutput, ToolSpec};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

/// One scripted model turn.
#[derive(Debug, Clone)]
pub enum Turn {
    /// Stream these chunks, then `done`
    Chunks(Vec<String>),
    /// Refuse the request outright
    Reject(ProviderError),
    /// Stream these chunks, then fail
    BreakAfter(Vec<String>, ProviderError),
    /// Stream these chunks, then stay open until the receiver is dropped
    Stall(Vec<String>),
}

impl Turn {
    /// The whole turn as a single chunk.
    pub fn text(text: &str) -> Self {
        Self::Chunks(vec![text.to_string()])
    }

    /// The turn split into chunks of `size` bytes (on char boundaries).
    pub fn chunked(text: &str, size: usize) -> Self {
        let mut chunks = Vec::new();
        let mut current = String::new();
        for c in text.chars() {
            current.push(c);
            if current.len() >= size {
                chunks.push(std::mem::take(&mut current));
            }
        }
        if !current.is_empty() {
            chunks.push(current);
        }
        Self::Chunks(chunks)
    }
}

/// A streaming provider that plays back scripted turns in order and records
/// every request it receives.
pub struct ScriptedProvider {
    turns: Mutex<VecDeque<Turn>>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedProvider {
    pub fn new(turns: Vec<Turn>) -> Self {
        Self {
            turns: Mutex::new(turns.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn texts(turns: &[&str]) -> Self {
        Self::new(turns.iter().map(|t| Turn::text(t)).collect())
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn stream(&self, request: CompletionRequest) -> Result<ChunkReceiver, ProviderError> {
        self.requests.lock().unwrap().push(request);
        let turn = self
            .turns
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| ProviderError::NotConfigured("script exhausted".into()))?;

        let (chunks, ending) = match turn {
            Turn::Reject(err) => return Err(err),
            Turn::Chunks(chunks) => (chunks, Ending::Done),
            Turn::BreakAfter(chunks, err) => (chunks, Ending::Fail(err)),
            Turn::Stall(chunks) => (chunks, Ending::Stall),
        };

        let (tx, rx) = mpsc::channel(16);
        tokio::spawn(async move {
            for chunk in chunks {
                if tx.send(Ok(StreamChunk::text(chunk))).await.is_err() {
                    return;
                }
            }
            match ending {
                Ending::Done => {
                    let _ = tx.send(Ok(StreamChunk::done(None))).await;
                }
                Ending::Fail(err) => {
                    let _ = tx.send(Err(err)).await;
                }
                Ending::Stall => tx.closed().await,
            }
        });
        Ok(rx)
    }
}

enum Ending {
    Done,
    Fail(ProviderError),
    Stall,
}

/// A tool that returns a canned result and records its invocations.
#[derive(Clone)]
pub struct RecordingTool {
    spec: ToolSpec,
    result: Result<serde_json::Value, String>,
    calls: Arc<Mutex<Vec<ToolArgs>>>,
    log: Option<Arc<Mutex<Vec<String>>>>,
}

impl RecordingTool {
    pub fn new(name: &str, output: serde_json::Value) -> Self {
        Self::with_spec(ToolSpec::new(name, format!("{name} test double")), output)
    }

    pub fn with_spec(spec: ToolSpec, output: serde_json::Value) -> Self {
        Self {
            spec,
            result: Ok(output),
            calls: Arc::new(Mutex::new(Vec::new())),
            log: None,
        }
    }

    pub fn failing(name: &str, reason: &str) -> Self {
        Self {
            result: Err(reason.to_string()),
            ..Self::new(name, serde_json::Value::Null)
        }
    }

    /// Also append this tool's name to a log shared with other tools.
    pub fn with_log(mut self, log: Arc<Mutex<Vec<String>>>) -> Self {
        self.log = Some(log);
        self
    }

    pub fn calls(&self) -> Vec<ToolArgs> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Tool for RecordingTool {
    fn spec(&self) -> &ToolSpec {
        &self.spec
    }

    async fn execute(&self, args: ToolArgs, _ctx: ToolContext) -> Result<ToolOutput, ToolError> {
        self.calls.lock().unwrap().push(args);
        if let Some(log) = &self.log {
            log.lock().unwrap().push(self.spec.name.clone());
        }
        match &self.result {
            Ok(value) => Ok(ToolOutput::from(value.clone())),
            Err(reason) => Err(ToolError::ExecutionFailed {
                tool_name: self.spec.name.clone(),
                reason: reason.clone(),
            }),
        }
    }
}

/// A tool that sleeps, ignoring cancellation, then marks itself completed.
#[derive(Clone)]
pub struct SleepTool {
    spec: ToolSpec,
    duration: Duration,
    completed: Arc<AtomicBool>,
}

impl SleepTool {
    pub fn new(duration: Duration) -> Self {
        Self {
            spec: ToolSpec::new("Sleep", "sleeps"),
            duration,
            completed: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn completed(&self) -> bool {
        self.completed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Tool for SleepTool {
    fn spec(&self) -> &ToolSpec {
        &self.spec
    }

    async fn execute(&self, _args: ToolArgs, _ctx: ToolContext) -> Result<ToolOutput, ToolError> {
        tokio::time::sleep(self.duration).await;
        self.completed.store(true, Ordering::SeqCst);
        Ok(ToolOutput::from("slept"))
    }
}

pub struct PanicTool {
    spec: ToolSpec,
}

impl PanicTool {
    pub fn new() -> Self {
        Self {
            spec: ToolSpec::new("Explode", "always panics"),
        }
    }
}

#[async_trait]
impl Tool for PanicTool {
    fn spec(&self) -> &ToolSpec {
        &self.spec
    }

    async fn execute(&self, _args: ToolArgs, _ctx: ToolContext) -> Result<ToolOutput, ToolError> {
        panic!("tool blew up");
    }
}
