//! Reasoning-driven focus task selection.

use serde::{Deserialize, Serialize};

use crate::core::phase::Phase;
use crate::core::task_board::Task;
use crate::core::types::SummaryFields;
use crate::error::EngineError;

use super::RoleClient;

pub(crate) const OUTPUT_SCHEMA: &str = include_str!("../../schemas/task_selection.schema.json");

#[derive(Debug, Clone, Serialize)]
pub struct SelectionInput<'a> {
    pub phase: Phase,
    pub pending_tasks: &'a [&'a Task],
    pub summary: &'a SummaryFields,
    pub transcript: &'a str,
    pub guidance: &'a str,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSelection {
    pub selected_task: String,
    #[serde(default)]
    pub specific_guidance: String,
}

pub struct SelectionAgent {
    client: RoleClient,
}

impl SelectionAgent {
    pub(crate) fn new(client: RoleClient) -> Self {
        Self { client }
    }

    /// The chosen task name is returned as given; callers check membership.
    pub async fn run(
        &self,
        turn: u32,
        input: &SelectionInput<'_>,
    ) -> Result<TaskSelection, EngineError> {
        self.client.structured(turn, input).await
    }
}
