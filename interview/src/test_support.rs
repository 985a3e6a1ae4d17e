//! Test-only capabilities, guidance sources and fixtures.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::{Result, anyhow, bail};
use async_trait::async_trait;
use serde_json::{Value, json};
use tempfile::TempDir;

use crate::agents::Agents;
use crate::core::selector::SelectionPolicy;
use crate::core::types::CaseContext;
use crate::io::capability::{Capability, CapabilityRequest, Role};
use crate::io::event_log::{EventRecorder, EventSink, JsonlEventLog, read_events};
use crate::io::guidance::GuidanceSource;
use crate::io::prompt::PromptLibrary;
use crate::race::RaceSettings;
use crate::step::StepPipeline;

/// One scripted capability answer, optionally delayed.
#[derive(Debug, Clone, PartialEq)]
pub struct ScriptedReply {
    pub delay: Duration,
    pub output: Result<String, String>,
}

impl ScriptedReply {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            delay: Duration::ZERO,
            output: Ok(text.into()),
        }
    }

    pub fn json(value: Value) -> Self {
        Self::text(value.to_string())
    }

    /// Capability-level error with `message`.
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            delay: Duration::ZERO,
            output: Err(message.into()),
        }
    }

    pub fn after(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

type Responder = Arc<dyn Fn(&CapabilityRequest) -> ScriptedReply + Send + Sync>;

enum Script {
    Sequence(Mutex<VecDeque<ScriptedReply>>),
    Responder(Responder),
}

/// Capability that answers from per-role scripts and records every request.
///
/// `calls` counts invocations as they start; `completed` counts those that
/// ran to the end of their delay, so cancelled requests are not included.
#[derive(Default)]
pub struct ScriptedCapability {
    scripts: HashMap<Role, Script>,
    calls: Mutex<HashMap<Role, usize>>,
    completed: Mutex<HashMap<Role, usize>>,
    requests: Mutex<Vec<CapabilityRequest>>,
}

impl ScriptedCapability {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replies consumed in order; calls beyond the end fail.
    pub fn with_sequence(mut self, role: Role, replies: Vec<ScriptedReply>) -> Self {
        self.scripts
            .insert(role, Script::Sequence(Mutex::new(replies.into())));
        self
    }

    /// Reply computed from each request. Replaces any earlier script for `role`.
    pub fn with_responder<F>(mut self, role: Role, responder: F) -> Self
    where
        F: Fn(&CapabilityRequest) -> ScriptedReply + Send + Sync + 'static,
    {
        self.scripts
            .insert(role, Script::Responder(Arc::new(responder)));
        self
    }

    pub fn calls(&self, role: Role) -> usize {
        count(&self.calls, role)
    }

    pub fn completed(&self, role: Role) -> usize {
        count(&self.completed, role)
    }

    pub fn requests(&self, role: Role) -> Vec<CapabilityRequest> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|request| request.role == role)
            .cloned()
            .collect()
    }

    fn next_reply(&self, request: &CapabilityRequest) -> Result<ScriptedReply> {
        match self.scripts.get(&request.role) {
            Some(Script::Sequence(queue)) => queue
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .pop_front()
                .ok_or_else(|| anyhow!("no scripted reply left for {}", request.role)),
            Some(Script::Responder(responder)) => Ok(responder(request)),
            None => bail!("no script for role {}", request.role),
        }
    }
}

fn count(counter: &Mutex<HashMap<Role, usize>>, role: Role) -> usize {
    counter
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .get(&role)
        .copied()
        .unwrap_or(0)
}

fn bump(counter: &Mutex<HashMap<Role, usize>>, role: Role) {
    *counter
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .entry(role)
        .or_default() += 1;
}

#[async_trait]
impl Capability for ScriptedCapability {
    async fn invoke(&self, request: &CapabilityRequest) -> Result<String> {
        bump(&self.calls, request.role);
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request.clone());
        let reply = self.next_reply(request)?;
        if !reply.delay.is_zero() {
            tokio::time::sleep(reply.delay).await;
        }
        bump(&self.completed, request.role);
        reply.output.map_err(|message| anyhow!(message))
    }
}

/// A capability where every role answers sensibly and immediately.
///
/// Tasks always score 0.0, so a run driven by it never leaves triage on its
/// own. Override single roles with [`ScriptedCapability::with_responder`].
pub fn cooperative_capability() -> ScriptedCapability {
    ScriptedCapability::new()
        .with_responder(Role::SubjectSimulation, |_| {
            ScriptedReply::text("I have had a dry cough and a mild fever for about a week.")
        })
        .with_responder(Role::Extraction, |_| {
            ScriptedReply::json(json!({
                "chief_complaint": "Dry cough and mild fever for one week",
                "present_illness": "Dry cough for one week with evening fever.",
                "past_history": ""
            }))
        })
        .with_responder(Role::Classification, |_| {
            ScriptedReply::json(json!({
                "primary_category": "internal medicine",
                "secondary_category": "respiratory",
                "reasoning": "Cough with fever.",
                "candidate_primary_category": "internal medicine",
                "candidate_secondary_category": "cardiology"
            }))
        })
        .with_responder(Role::TaskScoring, |_| {
            ScriptedReply::json(json!({"completion_score": 0.0, "reason": "not covered yet"}))
        })
        .with_responder(Role::TaskSelection, |request| {
            let name = request
                .params
                .get("pending_tasks")
                .and_then(|tasks| tasks.get(0))
                .and_then(|task| task.get("name"))
                .and_then(Value::as_str)
                .unwrap_or("closing")
                .to_string();
            ScriptedReply::json(json!({
                "selected_task": name,
                "specific_guidance": format!("Ask directly about {name}.")
            }))
        })
        .with_responder(Role::InstructionComposition, |request| {
            let name = request
                .params
                .get("task_name")
                .and_then(Value::as_str)
                .unwrap_or("the next topic")
                .to_string();
            ScriptedReply::json(json!({
                "description": format!("Find out about {name}."),
                "instructions": ["Ask one question", "Use plain language"]
            }))
        })
        .with_responder(Role::QuestionGeneration, |request| {
            let description = request
                .params
                .get("brief")
                .and_then(|brief| brief.get("description"))
                .and_then(Value::as_str)
                .unwrap_or("Tell me more.")
                .to_string();
            ScriptedReply::json(json!({ "question": format!("{description} Can you tell me?") }))
        })
        .with_responder(Role::QualityEvaluation, |_| {
            let dimension = json!({"score": 3.0, "comment": "adequate"});
            ScriptedReply::json(json!({
                "clinical_inquiry": dimension,
                "communication_quality": dimension,
                "information_completeness": dimension,
                "overall_professionalism": dimension,
                "present_illness_similarity": dimension,
                "past_history_similarity": dimension,
                "chief_complaint_similarity": dimension,
                "summary": "Reasonable turn.",
                "key_suggestions": ["Ask about duration"]
            }))
        })
}

/// Race settings for tests: one request, one attempt.
pub fn single_shot() -> RaceSettings {
    RaceSettings {
        redundancy: 1,
        max_attempts: 1,
        use_cache: false,
    }
}

pub fn sample_case() -> CaseContext {
    serde_json::from_value(json!({
        "id": "case-1",
        "chief_complaint": "Dry cough and fever for one week",
        "present_illness": "Dry cough for a week, fever up to 38C in the evenings.",
        "past_history": "No chronic illness. No known allergies."
    }))
    .expect("sample case")
}

/// Pipeline over `capability` for [`sample_case`] with single-shot races.
pub fn pipeline_with(
    capability: Arc<ScriptedCapability>,
    guidance: Arc<dyn GuidanceSource>,
    sink: Arc<dyn EventSink>,
    policy: SelectionPolicy,
) -> StepPipeline {
    let events = EventRecorder::new(sink);
    let agents = Agents::shared(
        capability,
        single_shot(),
        Arc::new(PromptLibrary::new().expect("prompts")),
        events.clone(),
    )
    .expect("agents");
    StepPipeline::new(agents, guidance, events, sample_case(), policy)
}

/// Guidance source with fixed answers that records every lookup.
#[derive(Default)]
pub struct RecordingGuidance {
    categories: BTreeMap<String, String>,
    comparison: String,
    lookups: Mutex<Vec<String>>,
    comparisons: Mutex<Vec<(String, String)>>,
}

impl RecordingGuidance {
    pub fn with_category(mut self, category: &str, text: &str) -> Self {
        self.categories
            .insert(category.to_string(), text.to_string());
        self
    }

    /// Text returned for every comparison lookup.
    pub fn with_comparison(mut self, text: &str) -> Self {
        self.comparison = text.to_string();
        self
    }

    pub fn lookups(&self) -> Vec<String> {
        self.lookups
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn comparisons(&self) -> Vec<(String, String)> {
        self.comparisons
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl GuidanceSource for RecordingGuidance {
    fn guidance_for(&self, category: &str) -> String {
        self.lookups
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(category.to_string());
        self.categories.get(category).cloned().unwrap_or_default()
    }

    fn comparison_guidance_for(&self, first: &str, second: &str) -> String {
        self.comparisons
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((first.to_string(), second.to_string()));
        self.comparison.clone()
    }
}

/// JSONL event log in a temporary directory.
pub struct TempEventLog {
    _dir: TempDir,
    path: PathBuf,
    log: Arc<JsonlEventLog>,
}

impl TempEventLog {
    pub fn new() -> Result<Self> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("events").join("run.jsonl");
        let log = Arc::new(JsonlEventLog::create(&path)?);
        Ok(Self {
            _dir: dir,
            path,
            log,
        })
    }

    pub fn sink(&self) -> Arc<JsonlEventLog> {
        self.log.clone()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn records(&self) -> Result<Vec<Value>> {
        read_events(&self.path)
    }
}
