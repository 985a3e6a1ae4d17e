//! Simulated subject: answers the interviewer from the case record.

use serde::Serialize;

use crate::core::types::CaseContext;
use crate::error::EngineError;

use super::RoleClient;

#[derive(Debug, Clone, Serialize)]
pub struct SubjectInput<'a> {
    pub case: &'a CaseContext,
    pub question: &'a str,
    pub transcript: &'a str,
}

pub struct SubjectAgent {
    client: RoleClient,
}

impl SubjectAgent {
    pub(crate) fn new(client: RoleClient) -> Self {
        Self { client }
    }

    /// Free-text reply, trimmed. A blank reply counts as a failure.
    pub async fn run(&self, turn: u32, input: &SubjectInput<'_>) -> Result<String, EngineError> {
        let reply = self.client.unstructured(turn, input).await?;
        let reply = reply.trim();
        if reply.is_empty() {
            return Err(EngineError::Capability {
                role: self.client.role.to_string(),
                message: "subject reply is empty".to_string(),
            });
        }
        Ok(reply.to_string())
    }
}
