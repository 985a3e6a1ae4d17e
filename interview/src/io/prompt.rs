//! Prompt rendering for capability roles.
//!
//! Each role has one minijinja template under `io/prompts/`. Templates see the
//! role input as `input`, the case record (when the input carries one) as
//! pretty-printed `case_json`, and the role's output schema as
//! `output_schema`. Structured roles include the shared `contract` section.

use anyhow::{Context, Result};
use minijinja::{Environment, context};
use serde_json::Value;

use crate::io::capability::Role;

const CONTRACT_TEMPLATE: &str = include_str!("prompts/contract.md");

const ROLE_TEMPLATES: [(Role, &str); 8] = [
    (
        Role::SubjectSimulation,
        include_str!("prompts/subject_simulation.md"),
    ),
    (Role::Extraction, include_str!("prompts/extraction.md")),
    (Role::Classification, include_str!("prompts/classification.md")),
    (Role::TaskScoring, include_str!("prompts/task_scoring.md")),
    (Role::TaskSelection, include_str!("prompts/task_selection.md")),
    (
        Role::InstructionComposition,
        include_str!("prompts/instruction_composition.md"),
    ),
    (
        Role::QuestionGeneration,
        include_str!("prompts/question_generation.md"),
    ),
    (
        Role::QualityEvaluation,
        include_str!("prompts/quality_evaluation.md"),
    ),
];

/// Template engine wrapper around minijinja.
pub struct PromptLibrary {
    env: Environment<'static>,
}

impl PromptLibrary {
    pub fn new() -> Result<Self> {
        let mut env = Environment::new();
        env.add_template("contract", CONTRACT_TEMPLATE)
            .context("add contract template")?;
        for (role, source) in ROLE_TEMPLATES {
            env.add_template(role.as_str(), source)
                .with_context(|| format!("add {role} template"))?;
        }
        Ok(Self { env })
    }

    pub fn render(&self, role: Role, input: &Value, output_schema: Option<&Value>) -> Result<String> {
        let template = self
            .env
            .get_template(role.as_str())
            .with_context(|| format!("missing {role} template"))?;
        let case_json = match input.get("case") {
            Some(case) => Some(serde_json::to_string_pretty(case).context("serialize case")?),
            None => None,
        };
        let output_schema = match output_schema {
            Some(schema) => Some(serde_json::to_string_pretty(schema).context("serialize schema")?),
            None => None,
        };
        let rendered = template
            .render(context! {
                input => input,
                case_json => case_json,
                output_schema => output_schema,
            })
            .with_context(|| format!("render {role} prompt"))?;
        Ok(rendered.trim().to_string())
    }
}
