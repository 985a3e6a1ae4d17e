//! Next-question generation.

use serde::{Deserialize, Serialize};

use crate::core::phase::Phase;
use crate::core::types::SummaryFields;
use crate::error::EngineError;

use super::RoleClient;
use super::composition::QuestionBrief;

pub(crate) const OUTPUT_SCHEMA: &str = include_str!("../../schemas/question_generation.schema.json");

#[derive(Debug, Clone, Serialize)]
pub struct QuestionInput<'a> {
    pub brief: &'a QuestionBrief,
    pub guidance: &'a str,
    pub summary: &'a SummaryFields,
    pub transcript: &'a str,
    pub phase: Phase,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct NextQuestion {
    question: String,
}

pub struct QuestionAgent {
    client: RoleClient,
}

impl QuestionAgent {
    pub(crate) fn new(client: RoleClient) -> Self {
        Self { client }
    }

    pub async fn run(&self, turn: u32, input: &QuestionInput<'_>) -> Result<String, EngineError> {
        let output: NextQuestion = self.client.structured(turn, input).await?;
        Ok(output.question.trim().to_string())
    }
}
