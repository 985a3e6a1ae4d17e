//! Per-task completion scoring.

use serde::{Deserialize, Serialize};

use crate::core::phase::Phase;
use crate::core::types::{Classification, SummaryFields};
use crate::error::EngineError;

use super::RoleClient;

pub(crate) const OUTPUT_SCHEMA: &str = include_str!("../../schemas/task_scoring.schema.json");

#[derive(Debug, Clone, Serialize)]
pub struct ScoringInput<'a> {
    pub phase: Phase,
    pub task_name: &'a str,
    pub task_description: &'a str,
    pub summary: &'a SummaryFields,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub classification: Option<&'a Classification>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskScore {
    pub completion_score: f64,
    #[serde(default)]
    pub reason: String,
}

pub struct ScoringAgent {
    client: RoleClient,
}

impl ScoringAgent {
    pub(crate) fn new(client: RoleClient) -> Self {
        Self { client }
    }

    pub async fn run(&self, turn: u32, input: &ScoringInput<'_>) -> Result<TaskScore, EngineError> {
        self.client.structured(turn, input).await
    }
}
