//! Typed wrappers around each capability role.
//!
//! Every role renders its input into a prompt, runs it through its own
//! [`ResponseRace`], and records a `capability_execution` event with the
//! input payload, the output (or error) and the wall-clock duration.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};

use crate::core::salvage::OutputSchema;
use crate::error::EngineError;
use crate::io::capability::{Capability, CapabilityRequest, CommandCapability, Role};
use crate::io::config::EngineConfig;
use crate::io::event_log::{Event, EventRecorder};
use crate::io::prompt::PromptLibrary;
use crate::race::{RaceSettings, ResponseRace};

pub mod classification;
pub mod composition;
pub mod evaluation;
pub mod extraction;
pub mod question;
pub mod scoring;
pub mod selection;
pub mod subject;

use classification::ClassificationAgent;
use composition::CompositionAgent;
use evaluation::EvaluationAgent;
use extraction::ExtractionAgent;
use question::QuestionAgent;
use scoring::ScoringAgent;
use selection::SelectionAgent;
use subject::SubjectAgent;

/// Backend and race settings one role runs with.
#[derive(Clone)]
pub struct RoleBinding {
    pub capability: Arc<dyn Capability>,
    pub race: RaceSettings,
}

/// One agent per role, sharing a prompt library and an event recorder.
pub struct Agents {
    pub subject: SubjectAgent,
    pub extraction: ExtractionAgent,
    pub classification: ClassificationAgent,
    pub scoring: ScoringAgent,
    pub selection: SelectionAgent,
    pub composition: CompositionAgent,
    pub question: QuestionAgent,
    pub evaluation: EvaluationAgent,
}

impl Agents {
    pub fn new(
        prompts: Arc<PromptLibrary>,
        events: EventRecorder,
        mut bind: impl FnMut(Role) -> Result<RoleBinding, EngineError>,
    ) -> Result<Self, EngineError> {
        let mut client = |role: Role, schema: Option<&str>| -> Result<RoleClient, EngineError> {
            RoleClient::new(role, schema, bind(role)?, prompts.clone(), events.clone())
        };
        Ok(Self {
            subject: SubjectAgent::new(client(Role::SubjectSimulation, None)?),
            extraction: ExtractionAgent::new(client(
                Role::Extraction,
                Some(extraction::OUTPUT_SCHEMA),
            )?),
            classification: ClassificationAgent::new(client(
                Role::Classification,
                Some(classification::OUTPUT_SCHEMA),
            )?),
            scoring: ScoringAgent::new(client(Role::TaskScoring, Some(scoring::OUTPUT_SCHEMA))?),
            selection: SelectionAgent::new(client(
                Role::TaskSelection,
                Some(selection::OUTPUT_SCHEMA),
            )?),
            composition: CompositionAgent::new(client(
                Role::InstructionComposition,
                Some(composition::OUTPUT_SCHEMA),
            )?),
            question: QuestionAgent::new(client(
                Role::QuestionGeneration,
                Some(question::OUTPUT_SCHEMA),
            )?),
            evaluation: EvaluationAgent::new(client(
                Role::QualityEvaluation,
                Some(evaluation::OUTPUT_SCHEMA),
            )?),
        })
    }

    /// Agents backed by the configured command capabilities.
    pub fn from_config(
        cfg: &EngineConfig,
        prompts: Arc<PromptLibrary>,
        events: EventRecorder,
    ) -> Result<Self, EngineError> {
        Self::new(prompts, events, |role| {
            let settings = cfg.role_settings(role);
            let capability = CommandCapability::new(
                role,
                &settings.command,
                settings.timeout,
                settings.output_limit_bytes,
            )?;
            Ok(RoleBinding {
                capability: Arc::new(capability),
                race: settings.race,
            })
        })
    }

    /// Agents that all share one capability and one set of race settings.
    pub fn shared(
        capability: Arc<dyn Capability>,
        race: RaceSettings,
        prompts: Arc<PromptLibrary>,
        events: EventRecorder,
    ) -> Result<Self, EngineError> {
        Self::new(prompts, events, |_| {
            Ok(RoleBinding {
                capability: capability.clone(),
                race,
            })
        })
    }
}

/// Prompt rendering, racing and event recording for one role.
pub(crate) struct RoleClient {
    role: Role,
    race: ResponseRace,
    schema: Option<OutputSchema>,
    prompts: Arc<PromptLibrary>,
    events: EventRecorder,
}

impl RoleClient {
    fn new(
        role: Role,
        schema: Option<&str>,
        binding: RoleBinding,
        prompts: Arc<PromptLibrary>,
        events: EventRecorder,
    ) -> Result<Self, EngineError> {
        let schema = schema
            .map(OutputSchema::compile)
            .transpose()
            .map_err(|err| EngineError::CapabilityUnavailable {
                role: role.to_string(),
                reason: format!("invalid output schema: {err:#}"),
            })?;
        Ok(Self {
            role,
            race: ResponseRace::new(role, binding.capability, binding.race),
            schema,
            prompts,
            events,
        })
    }

    /// First schema-valid output of the role.
    pub(crate) async fn structured<I, O>(&self, turn: u32, input: &I) -> Result<O, EngineError>
    where
        I: Serialize,
        O: DeserializeOwned + Serialize,
    {
        let input = self.payload(input)?;
        let started = Instant::now();
        let result = match &self.schema {
            Some(schema) => {
                let request = self.request(&input)?;
                self.race.request_structured::<O>(&request, schema).await
            }
            None => Err(EngineError::CapabilityUnavailable {
                role: self.role.to_string(),
                reason: "role has no output schema".to_string(),
            }),
        };
        let output = match &result {
            Ok(output) => serde_json::to_value(output).unwrap_or(Value::Null),
            Err(err) => json!({ "error": err.to_string() }),
        };
        self.record(turn, input, output, started.elapsed());
        result
    }

    /// Raw text of the first request to finish.
    pub(crate) async fn unstructured<I: Serialize>(
        &self,
        turn: u32,
        input: &I,
    ) -> Result<String, EngineError> {
        let input = self.payload(input)?;
        let started = Instant::now();
        let request = self.request(&input)?;
        let result = self.race.request_unstructured(&request).await;
        let output = match &result {
            Ok(text) => Value::String(text.clone()),
            Err(err) => json!({ "error": err.to_string() }),
        };
        self.record(turn, input, output, started.elapsed());
        result
    }

    fn payload<I: Serialize>(&self, input: &I) -> Result<Value, EngineError> {
        serde_json::to_value(input).map_err(|err| EngineError::Capability {
            role: self.role.to_string(),
            message: format!("serialize input: {err}"),
        })
    }

    fn request(&self, input: &Value) -> Result<CapabilityRequest, EngineError> {
        let prompt = self
            .prompts
            .render(self.role, input, self.schema.as_ref().map(OutputSchema::raw))
            .map_err(|err| EngineError::Capability {
                role: self.role.to_string(),
                message: format!("{err:#}"),
            })?;
        let params = match input {
            Value::Object(map) => map.clone().into_iter().collect(),
            other => BTreeMap::from([("input".to_string(), other.clone())]),
        };
        Ok(CapabilityRequest {
            role: self.role,
            prompt,
            params,
        })
    }

    fn record(&self, turn: u32, input: Value, output: Value, elapsed: Duration) {
        self.events.emit(
            Some(turn),
            Event::CapabilityExecution {
                role: self.role,
                input,
                output,
                duration_seconds: elapsed.as_secs_f64(),
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::event_log::MemoryEventLog;
    use crate::test_support::{ScriptedCapability, ScriptedReply};

    fn agents(capability: Arc<ScriptedCapability>, log: Arc<MemoryEventLog>) -> Agents {
        let race = RaceSettings {
            redundancy: 1,
            max_attempts: 1,
            use_cache: false,
        };
        Agents::shared(
            capability,
            race,
            Arc::new(PromptLibrary::new().expect("prompts")),
            EventRecorder::new(log),
        )
        .expect("agents")
    }

    #[tokio::test]
    async fn every_call_records_capability_execution() {
        let capability = Arc::new(
            ScriptedCapability::new()
                .with_sequence(
                    Role::QuestionGeneration,
                    vec![ScriptedReply::text(r#"{"question": "Since when?"}"#)],
                )
                .with_sequence(
                    Role::InstructionComposition,
                    vec![ScriptedReply::failure("backend down")],
                ),
        );
        let log = Arc::new(MemoryEventLog::new());
        let agents = agents(capability, log.clone());

        let question = agents
            .question
            .run(
                2,
                &question::QuestionInput {
                    brief: &composition::QuestionBrief {
                        description: "Onset".to_string(),
                        instructions: vec!["Ask for a date".to_string()],
                    },
                    guidance: "",
                    summary: &Default::default(),
                    transcript: "Subject: cough",
                    phase: crate::core::phase::Phase::PresentIllness,
                },
            )
            .await
            .expect("question");
        assert_eq!(question, "Since when?");

        let err = agents
            .composition
            .run(
                2,
                &composition::CompositionInput {
                    phase: crate::core::phase::Phase::PresentIllness,
                    task_name: "onset",
                    task_description: "When it started.",
                    task_guidance: "Ask for a date.",
                },
            )
            .await
            .expect_err("composition fails");
        assert!(matches!(err, EngineError::ExhaustedRetries { .. }));

        let executions = log.of_type("capability_execution");
        assert_eq!(executions.len(), 2);
        assert_eq!(executions[0]["role"], "question_generation");
        assert_eq!(executions[0]["step_number"], 2);
        assert_eq!(executions[0]["output"]["question"], "Since when?");
        assert_eq!(executions[0]["input"]["transcript"], "Subject: cough");
        assert!(executions[1]["output"]["error"].is_string());
    }
}
