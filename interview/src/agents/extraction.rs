//! Record extraction: folds the latest reply into the summary fields.

use serde::Serialize;

use crate::core::types::SummaryFields;
use crate::error::EngineError;

use super::RoleClient;

pub(crate) const OUTPUT_SCHEMA: &str = include_str!("../../schemas/extraction.schema.json");

#[derive(Debug, Clone, Serialize)]
pub struct ExtractionInput<'a> {
    pub transcript: &'a str,
    pub latest_reply: &'a str,
    pub previous: &'a SummaryFields,
}

pub struct ExtractionAgent {
    client: RoleClient,
}

impl ExtractionAgent {
    pub(crate) fn new(client: RoleClient) -> Self {
        Self { client }
    }

    pub async fn run(
        &self,
        turn: u32,
        input: &ExtractionInput<'_>,
    ) -> Result<SummaryFields, EngineError> {
        self.client.structured(turn, input).await
    }
}
