//! Session transcript: the (thought, action, observation) record of a run.

use chrono::{DateTime, Utc};
use rustact_core::tool::FailureKind;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// One executed action and what led to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptEntry {
    pub step: usize,
    /// Reasoning emitted earlier in the same turn
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thought: Option<String>,
    /// The call in canonical syntax, or the raw text of an unparsable one
    pub action: String,
    pub observation: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureKind>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Transcript {
    pub task: String,
    pub started_at: Option<DateTime<Utc>>,
    pub entries: Vec<TranscriptEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_answer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
}

impl Transcript {
    pub fn new(task: impl Into<String>) -> Self {
        Self {
            task: task.into(),
            started_at: Some(Utc::now()),
            ..Default::default()
        }
    }

    pub fn push(&mut self, entry: TranscriptEntry) {
        self.entries.push(entry);
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Write the transcript as pretty JSON.
    pub fn save(&self, path: &Path) -> rustact_core::Result<()> {
        std::fs::write(path, self.to_json()?)?;
        Ok(())
    }
}
