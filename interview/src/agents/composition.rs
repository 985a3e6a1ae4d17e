//! Turns the focus task into a brief for question generation.

use serde::{Deserialize, Serialize};

use crate::core::phase::Phase;
use crate::error::EngineError;

use super::RoleClient;

pub(crate) const OUTPUT_SCHEMA: &str =
    include_str!("../../schemas/instruction_composition.schema.json");

#[derive(Debug, Clone, Serialize)]
pub struct CompositionInput<'a> {
    pub phase: Phase,
    pub task_name: &'a str,
    pub task_description: &'a str,
    pub task_guidance: &'a str,
}

/// Description/instruction pair handed to the question generator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionBrief {
    pub description: String,
    #[serde(default)]
    pub instructions: Vec<String>,
}

pub struct CompositionAgent {
    client: RoleClient,
}

impl CompositionAgent {
    pub(crate) fn new(client: RoleClient) -> Self {
        Self { client }
    }

    pub async fn run(
        &self,
        turn: u32,
        input: &CompositionInput<'_>,
    ) -> Result<QuestionBrief, EngineError> {
        self.client.structured(turn, input).await
    }
}
