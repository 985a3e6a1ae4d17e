//! Category classification during triage.

use serde::{Deserialize, Serialize};

use crate::core::types::{Classification, SummaryFields};
use crate::error::EngineError;

use super::RoleClient;

pub(crate) const OUTPUT_SCHEMA: &str = include_str!("../../schemas/classification.schema.json");

#[derive(Debug, Clone, Serialize)]
pub struct ClassificationInput<'a> {
    pub summary: &'a SummaryFields,
    pub guidance: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous: Option<&'a Classification>,
}

/// Wire shape of the classification role.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ClassificationOutput {
    primary_category: String,
    secondary_category: String,
    reasoning: String,
    #[serde(default)]
    candidate_primary_category: String,
    #[serde(default)]
    candidate_secondary_category: String,
}

impl From<ClassificationOutput> for Classification {
    fn from(output: ClassificationOutput) -> Self {
        Classification {
            primary: output.primary_category.trim().to_string(),
            secondary: output.secondary_category.trim().to_string(),
            reasoning: output.reasoning,
            candidate_primary: output.candidate_primary_category.trim().to_string(),
            candidate_secondary: output.candidate_secondary_category.trim().to_string(),
        }
    }
}

pub struct ClassificationAgent {
    client: RoleClient,
}

impl ClassificationAgent {
    pub(crate) fn new(client: RoleClient) -> Self {
        Self { client }
    }

    pub async fn run(
        &self,
        turn: u32,
        input: &ClassificationInput<'_>,
    ) -> Result<Classification, EngineError> {
        let output: ClassificationOutput = self.client.structured(turn, input).await?;
        Ok(output.into())
    }
}
