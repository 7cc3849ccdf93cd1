//! System prompt assembly.

use rustact_core::tool::{ToolRegistry, ToolSpec};
use std::fmt::Write;
use std::path::Path;

/// Environment facts injected into the prompt.
#[derive(Debug, Clone)]
pub struct PromptEnv<'a> {
    pub model: &'a str,
    pub language: &'a str,
    pub work_dir: Option<&'a Path>,
}

/// Build the system prompt: the turn format, the tool list, and the
/// environment.
pub fn system_prompt(registry: &ToolRegistry, env: &PromptEnv<'_>) -> String {
    let mut prompt = String::from(
        "You solve tasks step by step. In every turn, first reason inside \
         <thought>...</thought>, then either call a tool inside \
         <action>...</action> or give the result inside \
         <final_answer>...</final_answer>.\n\n\
         After an <action>, stop writing. The tool's result arrives in the next \
         message as <observation>...</observation>. Never write an \
         <observation> yourself.\n\n\
         Action syntax: ToolName({\"key\": \"value\"}). Arguments are a single \
         JSON object. Tool names and keys are case-sensitive. Several calls in \
         one <action> run in the order written.\n\n\
         Example:\n\
         <thought>I need to see what is in the project first.</thought>\n\
         <action>ListFiles({\"path\": \".\"})</action>\n",
    );

    prompt.push_str("\nAvailable tools:\n");
    for spec in registry.specs() {
        describe_tool(&mut prompt, spec);
    }

    let _ = write!(
        prompt,
        "\nEnvironment:\n- os: {}\n- model: {}\n",
        std::env::consts::OS,
        env.model
    );
    if let Some(dir) = env.work_dir {
        let _ = writeln!(prompt, "- workspace: {}", dir.display());
    }
    let _ = write!(
        prompt,
        "\nWrite thoughts and the final answer in {}.",
        env.language
    );
    prompt
}

fn describe_tool(out: &mut String, spec: &ToolSpec) {
    let _ = writeln!(out, "- {}: {}", spec.name, spec.description);
    for param in &spec.params {
        let _ = writeln!(
            out,
            "    {} ({}{}): {}",
            param.name,
            param.kind,
            if param.required { ", required" } else { "" },
            param.description
        );
    }
}
