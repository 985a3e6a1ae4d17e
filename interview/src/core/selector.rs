//! Deterministic focus-task selection policies.

use std::fmt;
use std::str::FromStr;

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};

use crate::core::task_board::Task;

/// How the next focus task is picked from the pending set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionPolicy {
    /// Ask the task-selection capability.
    #[default]
    Reasoning,
    /// First pending task in catalog order.
    Sequence,
    /// Pending task with the lowest score; ties go to catalog order.
    ScoreDriven,
}

impl SelectionPolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            SelectionPolicy::Reasoning => "reasoning",
            SelectionPolicy::Sequence => "sequence",
            SelectionPolicy::ScoreDriven => "score_driven",
        }
    }
}

impl fmt::Display for SelectionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SelectionPolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "reasoning" | "normal" => Ok(SelectionPolicy::Reasoning),
            "sequence" => Ok(SelectionPolicy::Sequence),
            "score_driven" => Ok(SelectionPolicy::ScoreDriven),
            other => bail!("unknown selection policy '{other}' (expected reasoning, sequence or score_driven)"),
        }
    }
}

/// The task the next question should work towards.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FocusTask {
    pub name: String,
    pub description: String,
    pub guidance: String,
}

impl FocusTask {
    /// Focus derived from the task itself, without a capability call.
    pub fn from_task(task: &Task) -> Self {
        Self {
            name: task.name.clone(),
            description: task.description.clone(),
            guidance: format!(
                "Ask about {}: {} Keep to one topic and use plain language.",
                task.name, task.description
            ),
        }
    }

    /// Focus used when no task is pending.
    pub fn closing() -> Self {
        Self {
            name: "closing".to_string(),
            description: "All tracked information has been gathered.".to_string(),
            guidance: "Confirm nothing important was missed and close the interview politely."
                .to_string(),
        }
    }
}

pub fn first_pending<'a>(pending: &[&'a Task]) -> Option<&'a Task> {
    pending.first().copied()
}

pub fn lowest_score<'a>(pending: &[&'a Task]) -> Option<&'a Task> {
    pending.iter().copied().fold(None, |best, task| match best {
        Some(current) if current.score <= task.score => Some(current),
        _ => Some(task),
    })
}

/// Look up a task the selection capability named.
pub fn find_pending<'a>(pending: &[&'a Task], name: &str) -> Option<&'a Task> {
    let name = name.trim();
    pending.iter().copied().find(|task| task.name == name)
}
