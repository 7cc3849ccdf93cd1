//! `rustact agent`: single-task or interactive mode.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use rustact_agent::{
    AgentEvent, AgentLoop, ContextConfig, DispatchConfig, LoopConfig, Session, SessionReport,
};
use rustact_config::AppConfig;
use rustact_providers::OpenAiCompatProvider;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub struct AgentArgs {
    pub message: Option<String>,
    pub max_steps: Option<usize>,
    pub transcript: Option<PathBuf>,
}

/// A line typed at the interactive prompt.
#[derive(Debug, PartialEq, Eq)]
enum Input<'a> {
    Exit,
    Clear,
    Usage,
    Empty,
    Task(&'a str),
}

fn parse_input(line: &str) -> Input<'_> {
    match line.trim() {
        "" => Input::Empty,
        "exit" | "quit" | "/exit" => Input::Exit,
        "/clear" => Input::Clear,
        "/usage" => Input::Usage,
        task => Input::Task(task),
    }
}

pub async fn run(args: AgentArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;

    // Check for API key early: give a clear error
    if !config.has_api_key() {
        eprintln!();
        eprintln!("  ERROR: No API key configured!");
        eprintln!();
        eprintln!("  Set one of these environment variables:");
        eprintln!("    export OPENAI_API_KEY='sk-...'");
        eprintln!("    export RUSTACT_API_KEY='sk-...'");
        eprintln!();
        eprintln!("  Or add it to your config file:");
        eprintln!("    {}", AppConfig::config_path().display());
        eprintln!();
        return Err("No API key found. See above for setup instructions.".into());
    }

    let provider = Arc::new(OpenAiCompatProvider::from_config(&config)?);
    let work_dir = config.resolved_work_dir();
    let registry = Arc::new(rustact_tools::default_registry(&work_dir, &config.tools)?);

    let mut loop_config = LoopConfig::from(&config);
    loop_config.work_dir = Some(work_dir.clone());
    if let Some(max) = args.max_steps {
        loop_config.max_steps = max;
    }

    let (tx, rx) = mpsc::channel(256);
    let printer = tokio::spawn(print_events(rx));
    let agent = AgentLoop::new(
        provider,
        registry,
        DispatchConfig::from(&config.tools),
        loop_config,
    )
    .with_events(tx);
    let mut session = agent.new_session(ContextConfig::from(&config.context));

    if let Some(task) = args.message {
        let report = run_task(&agent, &mut session, &task).await;
        save_transcript(args.transcript.as_ref(), &report);
        drop(agent);
        let _ = printer.await;
        return match report.outcome {
            Ok(answer) => {
                println!("{answer}");
                Ok(())
            }
            Err(err) => Err(err.into()),
        };
    }

    println!();
    println!("  rustact: interactive mode");
    println!();
    println!("  Model:     {}", config.model);
    println!("  Workspace: {}", work_dir.display());
    println!("  Tools:     {}", agent.registry().names().join(", "));
    println!();
    println!("  Type a task and press Enter. Ctrl+C stops the running task.");
    println!("  Commands: /clear (forget history), /usage (token usage), exit");
    println!();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("  You > ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        match parse_input(&line) {
            Input::Empty => continue,
            Input::Exit => break,
            Input::Clear => {
                session.reset();
                println!("  History cleared.\n");
            }
            Input::Usage => println!("  Context: {}\n", session.usage()),
            Input::Task(task) => {
                let report = run_task(&agent, &mut session, task).await;
                save_transcript(args.transcript.as_ref(), &report);
                match &report.outcome {
                    Ok(answer) => {
                        println!();
                        for line in answer.lines() {
                            println!("  Assistant > {line}");
                        }
                        println!();
                    }
                    Err(err) => {
                        eprintln!("  [{}] {err}", err.condition());
                        println!();
                    }
                }
            }
        }
    }

    println!();
    println!("  Goodbye!");
    println!();
    Ok(())
}

/// Run one task; Ctrl+C cancels it without leaving the program.
async fn run_task(agent: &AgentLoop, session: &mut Session, task: &str) -> SessionReport {
    let cancel = CancellationToken::new();
    let watcher = tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("\n  Cancelling...");
                cancel.cancel();
            }
        }
    });
    let report = agent.run(session, task, cancel).await;
    watcher.abort();
    report
}

fn save_transcript(path: Option<&PathBuf>, report: &SessionReport) {
    let Some(path) = path else {
        return;
    };
    match report.transcript.save(path) {
        Ok(()) => tracing::info!("Transcript written to {}", path.display()),
        Err(e) => tracing::warn!("Failed to write transcript: {e}"),
    }
}

/// Render agent progress on stderr.
async fn print_events(mut rx: mpsc::Receiver<AgentEvent>) {
    while let Some(event) = rx.recv().await {
        match event {
            AgentEvent::Thought { content } => eprintln!("  💭 {}", first_line(&content, 120)),
            AgentEvent::Action { name, input, .. } => eprintln!("  → {name}({input})"),
            AgentEvent::Observation {
                content, success, ..
            } => {
                let mark = if success { "←" } else { "✗" };
                eprintln!("  {mark} {}", first_line(&content, 120));
            }
            AgentEvent::Retry {
                attempt, delay_ms, ..
            } => eprintln!("  … retrying (attempt {attempt}) in {delay_ms} ms"),
            _ => {}
        }
    }
}

fn first_line(text: &str, max_chars: usize) -> String {
    let line = text.lines().next().unwrap_or_default();
    let mut out: String = line.chars().take(max_chars).collect();
    if out.len() < line.len() || text.lines().nth(1).is_some() {
        out.push_str(" …");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interactive_commands() {
        assert_eq!(parse_input("  exit "), Input::Exit);
        assert_eq!(parse_input("/clear"), Input::Clear);
        assert_eq!(parse_input("/usage"), Input::Usage);
        assert_eq!(parse_input("   "), Input::Empty);
        assert_eq!(parse_input(" list the files "), Input::Task("list the files"));
    }

    #[test]
    fn first_line_marks_elision() {
        assert_eq!(first_line("short", 10), "short");
        assert_eq!(first_line("one\ntwo", 10), "one …");
        assert_eq!(first_line("abcdefghij", 4), "abcd …");
    }
}
