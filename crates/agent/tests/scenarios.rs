//! End-to-end scenarios for the agent loop.
//!
//! These drive the full pipeline (streaming provider, parser, dispatcher,
//! context manager) with a scripted provider and stub tools.

use std::sync::Arc;
use std::time::Duration;

use rustact_agent::{
    AgentError, AgentLoop, AgentState, ContextConfig, ContextManager, DispatchConfig, LoopConfig,
    ParsedAction, Segment, TokenEstimator, ToolDispatcher, format_action, parse_response,
};
use rustact_core::message::Role;
use rustact_core::tool::{FailureKind, Tool, ToolArgs, ToolRegistry};
use serde_json::json;
use tokio_util::sync::CancellationToken;

#[allow(dead_code)]
#[path = "../src/test_helpers.rs"]
mod test_helpers;

use test_helpers::{RecordingTool, ScriptedProvider, SleepTool, Turn};

/// Each turn is streamed in 7-byte chunks so tags straddle chunk boundaries.
fn provider(turns: &[&str]) -> Arc<ScriptedProvider> {
    Arc::new(ScriptedProvider::new(
        turns.iter().map(|t| Turn::chunked(t, 7)).collect(),
    ))
}

fn registry(tools: Vec<Arc<dyn Tool>>) -> Arc<ToolRegistry> {
    let mut registry = ToolRegistry::new();
    for tool in tools {
        registry.register(tool).unwrap();
    }
    Arc::new(registry)
}

fn loop_config(max_steps: usize) -> LoopConfig {
    LoopConfig {
        model: "scripted-model".into(),
        max_steps,
        work_dir: None,
        ..LoopConfig::default()
    }
}

// ── Scenarios ────────────────────────────────────────────────────────────

#[tokio::test]
async fn scenario_a_observation_reaches_second_request() {
    let provider = provider(&[
        "<think>I should look around.</think><action>ListFiles({\"path\": \".\"})</action>",
        "<final_answer>a.txt and b.txt</final_answer>",
    ]);
    let agent = AgentLoop::new(
        provider.clone(),
        registry(vec![Arc::new(RecordingTool::new(
            "ListFiles",
            json!(["a.txt", "b.txt"]),
        ))]),
        DispatchConfig::default(),
        loop_config(10),
    );
    let mut session = agent.new_session(ContextConfig::default());

    let report = agent
        .run(&mut session, "list files", CancellationToken::new())
        .await;
    assert_eq!(report.answer(), Some("a.txt and b.txt"));

    let requests = provider.requests();
    assert_eq!(requests.len(), 2);
    let first: Vec<Role> = requests[0].messages.iter().map(|m| m.role).collect();
    assert_eq!(first, vec![Role::System, Role::User]);

    let observation = requests[1].messages.last().unwrap();
    assert_eq!(observation.role, Role::Observation);
    assert!(observation.content.contains("a.txt"));
    assert!(observation.content.contains("b.txt"));

    let entry = &report.transcript.entries[0];
    assert_eq!(entry.thought.as_deref(), Some("I should look around."));
    assert_eq!(entry.action, r#"ListFiles({"path":"."})"#);
}

#[tokio::test]
async fn scenario_b_unknown_tool_does_not_terminate() {
    let provider = provider(&[
        "<action>UnknownTool({})</action>",
        "<final_answer>recovered</final_answer>",
    ]);
    let agent = AgentLoop::new(
        provider.clone(),
        registry(vec![Arc::new(RecordingTool::new("ListFiles", json!([])))]),
        DispatchConfig::default(),
        loop_config(10),
    );
    let mut session = agent.new_session(ContextConfig::default());

    let report = agent.run(&mut session, "do it", CancellationToken::new()).await;
    assert_eq!(report.answer(), Some("recovered"));
    assert_eq!(
        report.transcript.entries[0].failure,
        Some(FailureKind::ToolNotFound)
    );
    let fed_back = provider.requests()[1].messages.last().unwrap().content.clone();
    assert!(fed_back.contains("ToolNotFound"));
    assert!(fed_back.contains("ListFiles"));
}

#[tokio::test]
async fn scenario_c_step_limit() {
    let provider = provider(&["<action>ListFiles({\"path\": \".\"})</action>"; 5]);
    let tool = RecordingTool::new("ListFiles", json!([]));
    let agent = AgentLoop::new(
        provider.clone(),
        registry(vec![Arc::new(tool.clone())]),
        DispatchConfig::default(),
        loop_config(2),
    );
    let mut session = agent.new_session(ContextConfig::default());

    let report = agent.run(&mut session, "loop", CancellationToken::new()).await;
    match report.outcome {
        Err(AgentError::StepLimitExceeded(summary)) => {
            assert_eq!(summary.steps, 2);
            assert_eq!(summary.last_action.as_deref(), Some(r#"ListFiles({"path":"."})"#));
        }
        other => panic!("expected StepLimitExceeded, got {other:?}"),
    }
    assert_eq!(tool.calls().len(), 2);
    assert_eq!(provider.requests().len(), 2);
    assert_eq!(session.state(), AgentState::Failed);
}

#[tokio::test(start_paused = true)]
async fn scenario_d_timeout_bound() {
    let slow = SleepTool::new(Duration::from_secs(5));
    let dispatcher = ToolDispatcher::new(
        registry(vec![Arc::new(slow.clone())]),
        DispatchConfig {
            timeout: Duration::from_secs(1),
            ..DispatchConfig::default()
        },
    );
    let action = ParsedAction {
        name: "Sleep".into(),
        args: ToolArgs::new(),
        raw: "Sleep({})".into(),
        span: 0..9,
    };

    let started = tokio::time::Instant::now();
    let obs = dispatcher.dispatch(&action, &CancellationToken::new()).await;
    let elapsed = started.elapsed();

    assert_eq!(obs.failure, Some(FailureKind::Timeout));
    assert!(elapsed >= Duration::from_secs(1));
    assert!(elapsed < Duration::from_secs(2), "took {elapsed:?}");
    assert!(!slow.completed());
}

#[test]
fn scenario_e_pruning_keeps_system_message() {
    struct OneTokenPerChar;
    impl TokenEstimator for OneTokenPerChar {
        fn estimate(&self, text: &str) -> usize {
            text.chars().count()
        }
    }

    let mut ctx = ContextManager::with_estimator(
        ContextConfig {
            max_tokens: 100,
            safety_margin: 10,
            max_message_chars: 1_000,
            per_message_overhead: 0,
        },
        Box::new(OneTokenPerChar),
    );
    ctx.append(Role::System, "system");
    for i in 0..5 {
        ctx.append(Role::User, format!("{i}").repeat(30));
    }
    assert_eq!(ctx.total_tokens(), 156);

    let report = ctx.prune_if_needed();
    assert!(!report.exhausted);
    assert!(ctx.total_tokens() <= 90);
    assert_eq!(ctx.snapshot()[0].role, Role::System);
    assert_eq!(ctx.snapshot()[0].content, "system");
    // The newest messages survive.
    assert!(ctx.snapshot().last().unwrap().content.starts_with('4'));
}

// ── Properties ───────────────────────────────────────────────────────────

#[tokio::test]
async fn single_final_answer_is_one_turn() {
    for answer in ["42", "multi\nline answer", "  padded  "] {
        let turn = format!("<final_answer>{answer}</final_answer>");
        let provider = provider(&[turn.as_str()]);
        let agent = AgentLoop::new(
            provider.clone(),
            registry(vec![]),
            DispatchConfig::default(),
            loop_config(5),
        );
        let mut session = agent.new_session(ContextConfig::default());
        let report = agent.run(&mut session, "q", CancellationToken::new()).await;
        assert_eq!(report.answer(), Some(answer.trim()));
        assert_eq!(report.steps, 1);
        assert_eq!(provider.requests().len(), 1);
    }
}

#[test]
fn action_syntax_round_trips() {
    let cases = [
        json!({}),
        json!({"path": "src/main.rs"}),
        json!({"count": 3, "ratio": 0.5, "force": true}),
        json!({"files": ["a.txt", "b \"quoted\".txt"], "note": "line\nbreak"}),
        json!({"text": "</think> and <final_answer> inside a string"}),
        json!({"content": "use <action>X({})</action> to call", "path": "doc.md"}),
        json!({"html": "<p>a</p><br/>", "closing": "</"}),
    ];
    for value in cases {
        let args = value.as_object().unwrap().clone();
        let text = format!("<action>{}</action>", format_action("WriteFile", &args));
        match parse_response(&text).as_slice() {
            [Segment::Action(action)] => {
                assert_eq!(action.name, "WriteFile");
                assert_eq!(action.args, args);
            }
            other => panic!("unexpected segments for {value}: {other:?}"),
        }
    }
}
