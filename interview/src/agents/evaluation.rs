//! Per-turn quality evaluation against the case record.

use serde::Serialize;

use crate::core::transcript::Round;
use crate::core::types::{CaseContext, Evaluation, HistoricalScores, SummaryFields};
use crate::error::EngineError;

use super::RoleClient;

pub(crate) const OUTPUT_SCHEMA: &str = include_str!("../../schemas/quality_evaluation.schema.json");

#[derive(Debug, Clone, Serialize)]
pub struct EvaluationInput<'a> {
    pub case: &'a CaseContext,
    pub turn: u32,
    pub rounds: &'a [Round],
    /// The exchange this turn produced.
    pub current_round: &'a Round,
    pub summary: &'a SummaryFields,
    pub historical_scores: &'a HistoricalScores,
}

pub struct EvaluationAgent {
    client: RoleClient,
}

impl EvaluationAgent {
    pub(crate) fn new(client: RoleClient) -> Self {
        Self { client }
    }

    pub async fn run(
        &self,
        turn: u32,
        input: &EvaluationInput<'_>,
    ) -> Result<Evaluation, EngineError> {
        self.client.structured(turn, input).await
    }
}
