//! Capability abstraction for reasoning roles.
//!
//! The [`Capability`] trait decouples the turn pipeline from the backend that
//! actually produces text. [`CommandCapability`] runs a configured program per
//! request; tests use scripted capabilities that return predetermined outputs
//! without spawning processes.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::process::Command;
use tracing::{debug, instrument, warn};

use crate::error::EngineError;
use crate::io::process::run_command_with_timeout;

/// Named reasoning roles invoked during a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    SubjectSimulation,
    Extraction,
    Classification,
    TaskScoring,
    TaskSelection,
    InstructionComposition,
    QuestionGeneration,
    QualityEvaluation,
}

impl Role {
    pub const ALL: [Role; 8] = [
        Role::SubjectSimulation,
        Role::Extraction,
        Role::Classification,
        Role::TaskScoring,
        Role::TaskSelection,
        Role::InstructionComposition,
        Role::QuestionGeneration,
        Role::QualityEvaluation,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Role::SubjectSimulation => "subject_simulation",
            Role::Extraction => "extraction",
            Role::Classification => "classification",
            Role::TaskScoring => "task_scoring",
            Role::TaskSelection => "task_selection",
            Role::InstructionComposition => "instruction_composition",
            Role::QuestionGeneration => "question_generation",
            Role::QualityEvaluation => "quality_evaluation",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        Role::ALL
            .into_iter()
            .find(|role| role.as_str() == s)
            .with_context(|| format!("unknown role '{s}'"))
    }
}

/// One request to a capability: rendered prompt plus the structured input it
/// was rendered from.
#[derive(Debug, Clone, PartialEq)]
pub struct CapabilityRequest {
    pub role: Role,
    pub prompt: String,
    pub params: BTreeMap<String, Value>,
}

/// Abstraction over text-producing backends.
///
/// Implementations must be cancel-safe: a race drops the future of every
/// request that loses.
#[async_trait]
pub trait Capability: Send + Sync + 'static {
    /// Produce raw text for the request.
    async fn invoke(&self, request: &CapabilityRequest) -> Result<String>;
}

/// Capability that runs a program with the prompt on stdin and reads the
/// answer from stdout. The role name is exported as `INTERVIEW_ROLE`.
#[derive(Debug, Clone)]
pub struct CommandCapability {
    program: String,
    args: Vec<String>,
    timeout: Duration,
    output_limit_bytes: usize,
}

impl CommandCapability {
    pub fn new(
        role: Role,
        command: &[String],
        timeout: Duration,
        output_limit_bytes: usize,
    ) -> Result<Self, EngineError> {
        let unavailable = |reason: &str| EngineError::CapabilityUnavailable {
            role: role.to_string(),
            reason: reason.to_string(),
        };
        let (program, args) = command
            .split_first()
            .ok_or_else(|| unavailable("command is empty"))?;
        if program.trim().is_empty() {
            return Err(unavailable("command program is blank"));
        }
        if timeout.is_zero() {
            return Err(unavailable("timeout must be > 0"));
        }
        Ok(Self {
            program: program.clone(),
            args: args.to_vec(),
            timeout,
            output_limit_bytes,
        })
    }
}

#[async_trait]
impl Capability for CommandCapability {
    #[instrument(skip_all, fields(role = %request.role, program = %self.program))]
    async fn invoke(&self, request: &CapabilityRequest) -> Result<String> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .env("INTERVIEW_ROLE", request.role.as_str());

        let output = run_command_with_timeout(
            cmd,
            Some(request.prompt.as_bytes()),
            self.timeout,
            self.output_limit_bytes,
        )
        .await
        .context("run capability command")?;

        if output.timed_out {
            warn!(timeout_secs = self.timeout.as_secs(), "capability command timed out");
            bail!("capability command timed out after {:?}", self.timeout);
        }
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!(exit_code = ?output.status.code(), "capability command failed");
            bail!(
                "capability command failed with status {:?}: {}",
                output.status.code(),
                stderr.trim()
            );
        }
        if output.stdout_truncated > 0 {
            warn!(truncated = output.stdout_truncated, "capability output truncated");
        }

        debug!(bytes = output.stdout.len(), "capability command completed");
        String::from_utf8(output.stdout).context("capability output is not utf-8")
    }
}
