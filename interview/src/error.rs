//! Error taxonomy for the engine.
//!
//! Glue code (config, case files, CLI) uses `anyhow`; these variants mark the
//! conditions callers branch on.

use thiserror::Error;

use crate::step::Stage;

#[derive(Debug, Error)]
pub enum EngineError {
    /// A role cannot be set up (missing command, bad schema, ...). Fatal at startup.
    #[error("capability unavailable for {role}: {reason}")]
    CapabilityUnavailable { role: String, reason: String },

    /// None of the parallel requests of one race attempt produced a valid result.
    #[error("{role}: no valid structured result from {redundancy} parallel requests")]
    StructuredParseFailure { role: String, redundancy: usize },

    /// Every race attempt failed.
    #[error("{role}: no valid result after {attempts} attempts of {redundancy} parallel requests")]
    ExhaustedRetries {
        role: String,
        redundancy: usize,
        attempts: u32,
    },

    /// The first request to finish on the unstructured path failed.
    #[error("{role}: first completed request failed: {message}")]
    Capability { role: String, message: String },

    #[error("turn {turn} failed during {stage}: {message}")]
    TurnExecution {
        turn: u32,
        stage: Stage,
        message: String,
    },

    #[error("run aborted: {0}")]
    Run(String),
}
