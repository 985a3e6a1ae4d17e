//! Orchestration for a single interview turn.
//!
//! A turn runs nine dependent stages in order: elicit, extract, classify,
//! score, commit, select, compose, inquire, evaluate. Elicitation, scoring,
//! inquiry and evaluation degrade to safe defaults when their capability
//! fails; extraction, classification, selection and composition abort the
//! turn. Scores are committed to a copy of the board that is handed back in
//! the [`TurnReport`]; the caller's board and state are never touched.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use serde_json::json;
use tracing::{info, instrument, warn};

use crate::agents::Agents;
use crate::agents::classification::ClassificationInput;
use crate::agents::composition::CompositionInput;
use crate::agents::evaluation::EvaluationInput;
use crate::agents::extraction::ExtractionInput;
use crate::agents::question::QuestionInput;
use crate::agents::scoring::ScoringInput;
use crate::agents::selection::SelectionInput;
use crate::agents::subject::SubjectInput;
use crate::core::phase::Phase;
use crate::core::selector::{FocusTask, SelectionPolicy, find_pending, first_pending, lowest_score};
use crate::core::task_board::{CompletionSummary, Task, TaskBoard};
use crate::core::transcript::{Round, append_exchange};
use crate::core::types::{CaseContext, Classification, Evaluation, SummaryFields, WorkflowState};
use crate::error::EngineError;
use crate::io::event_log::{Event, EventRecorder, ResponseSource};
use crate::io::guidance::GuidanceSource;

/// Question the subject answers on the first turn.
pub const OPENING_QUESTION: &str = "Hello, what brings you in today?";
/// Reply recorded when the simulated subject fails.
pub const FALLBACK_REPLY: &str = "Sorry, I'm not sure how to describe it.";
/// Question asked when question generation fails.
pub const FALLBACK_QUESTION: &str = "Could you tell me more about how you have been feeling?";
/// Score given to a task whose scoring call failed.
pub const FAILED_TASK_SCORE: f64 = 0.1;

const NO_COMPARISON_GUIDANCE: &str = "No comparison guidance available.";

/// Pipeline stage, as recorded in `error` events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Elicit,
    Extract,
    Classify,
    Score,
    Commit,
    Select,
    Compose,
    Inquire,
    Evaluate,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Elicit => "elicit",
            Stage::Extract => "extract",
            Stage::Classify => "classify",
            Stage::Score => "score",
            Stage::Commit => "commit",
            Stage::Select => "select",
            Stage::Compose => "compose",
            Stage::Inquire => "inquire",
            Stage::Evaluate => "evaluate",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where the subject's utterance for a turn comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Elicitation {
    /// Ask the subject-simulation capability.
    Simulated,
    /// Use an utterance supplied from outside.
    Supplied(String),
}

/// Everything a successful turn produced.
#[derive(Debug, Clone)]
pub struct TurnReport {
    pub turn: u32,
    /// State to carry into the next turn.
    pub state: WorkflowState,
    /// Board with this turn's scores committed.
    pub board: TaskBoard,
    /// Phase the turn worked on.
    pub phase: Phase,
    pub reply: String,
    pub reply_source: ResponseSource,
    pub focus: FocusTask,
    pub evaluation: Evaluation,
    pub completion: CompletionSummary,
    pub score_changes: BTreeMap<String, f64>,
    /// Stage failures that were replaced by a fallback.
    pub recovered_errors: Vec<String>,
}

/// A turn that stopped at `stage`. `errors` also lists earlier recovered failures.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnFailure {
    pub turn: u32,
    pub stage: Stage,
    pub errors: Vec<String>,
}

impl TurnFailure {
    pub fn to_error(&self) -> EngineError {
        EngineError::TurnExecution {
            turn: self.turn,
            stage: self.stage,
            message: self.errors.join("; "),
        }
    }
}

#[derive(Debug, Clone)]
pub enum TurnResult {
    Completed(Box<TurnReport>),
    Failed(TurnFailure),
}

impl TurnResult {
    pub fn success(&self) -> bool {
        matches!(self, TurnResult::Completed(_))
    }
}

/// Runs turns for one case.
pub struct StepPipeline {
    agents: Agents,
    guidance: Arc<dyn GuidanceSource>,
    events: EventRecorder,
    case: CaseContext,
    policy: SelectionPolicy,
}

struct Abort {
    stage: Stage,
    message: String,
}

impl StepPipeline {
    pub fn new(
        agents: Agents,
        guidance: Arc<dyn GuidanceSource>,
        events: EventRecorder,
        case: CaseContext,
        policy: SelectionPolicy,
    ) -> Self {
        Self {
            agents,
            guidance,
            events,
            case,
            policy,
        }
    }

    pub fn case(&self) -> &CaseContext {
        &self.case
    }

    pub fn policy(&self) -> SelectionPolicy {
        self.policy
    }

    pub fn events(&self) -> &EventRecorder {
        &self.events
    }

    /// Execute one turn against `board` and `state` without modifying either.
    #[instrument(skip_all, fields(turn = turn))]
    pub async fn execute_turn(
        &self,
        turn: u32,
        board: &TaskBoard,
        state: &WorkflowState,
        elicitation: Elicitation,
    ) -> TurnResult {
        let mut recovered = Vec::new();
        match self
            .run_stages(turn, board, state, elicitation, &mut recovered)
            .await
        {
            Ok(report) => TurnResult::Completed(Box::new(report)),
            Err(abort) => {
                warn!(turn, stage = %abort.stage, err = %abort.message, "turn aborted");
                self.events.emit(
                    Some(turn),
                    Event::Error {
                        stage: abort.stage,
                        message: abort.message.clone(),
                        context: None,
                    },
                );
                recovered.push(format!("{}: {}", abort.stage, abort.message));
                TurnResult::Failed(TurnFailure {
                    turn,
                    stage: abort.stage,
                    errors: recovered,
                })
            }
        }
    }

    async fn run_stages(
        &self,
        turn: u32,
        board: &TaskBoard,
        state: &WorkflowState,
        elicitation: Elicitation,
        recovered: &mut Vec<String>,
    ) -> Result<TurnReport, Abort> {
        let resolution = board.resolve(turn);
        let phase = resolution.phase();
        if let Some(skipped) = resolution.skipped() {
            info!(turn, %skipped, next = %phase, "phase turn budget spent; moving on");
        }
        let pending_names: Vec<String> = board
            .pending_tasks(phase)
            .iter()
            .map(|task| task.name.clone())
            .collect();
        info!(turn, %phase, pending = pending_names.len(), "turn started");
        self.events.emit(
            Some(turn),
            Event::TurnStart {
                current_phase: phase,
                pending_tasks: pending_names,
            },
        );

        // 1. Elicit
        let question = if state.last_question.trim().is_empty() {
            OPENING_QUESTION
        } else {
            state.last_question.as_str()
        };
        let (reply, reply_source) = self
            .elicit(turn, question, state, elicitation, recovered)
            .await;
        self.events.emit(
            Some(turn),
            Event::SubjectResponse {
                question: question.to_string(),
                response: reply.clone(),
                source: reply_source,
            },
        );
        let mut rounds = state.rounds.clone();
        rounds.push(Round::recorded(&state.transcript, question, &reply));
        let transcript = append_exchange(&state.transcript, question, &reply);

        // 2. Extract
        let summary = self
            .agents
            .extraction
            .run(
                turn,
                &ExtractionInput {
                    transcript: &transcript,
                    latest_reply: &reply,
                    previous: &state.summary,
                },
            )
            .await
            .map_err(|err| abort(Stage::Extract, &err))?;

        // 3. Classify
        let (classification, guidance) = if phase.is_classification() {
            let classification = self.classify(turn, &summary, state).await?;
            let guidance = classification
                .category_key()
                .map(|key| self.guidance.guidance_for(&key))
                .unwrap_or_default();
            (classification, guidance)
        } else {
            (state.classification.clone(), state.guidance.clone())
        };

        // 4. Score
        let scores = self
            .score_pending(turn, phase, board, &summary, &classification, recovered)
            .await;

        // 5. Commit
        let mut board = board.clone();
        let old_scores = board.scores(phase);
        board.record_scores(phase, &scores);
        let new_scores = board.scores(phase);
        let score_changes: BTreeMap<String, f64> = new_scores
            .iter()
            .map(|(name, new)| {
                let old = old_scores.get(name).copied().unwrap_or_default();
                (name.clone(), new - old)
            })
            .collect();
        self.events.emit(
            Some(turn),
            Event::ScoreUpdate {
                phase,
                old_scores,
                new_scores,
                score_changes: score_changes.clone(),
            },
        );

        // 6. Select
        let next_phase = board.active_phase(turn);
        let focus = self
            .select_focus(turn, next_phase, &board, &summary, &transcript, &guidance)
            .await?;

        // 7. Compose
        let brief = self
            .agents
            .composition
            .run(
                turn,
                &CompositionInput {
                    phase: next_phase,
                    task_name: &focus.name,
                    task_description: &focus.description,
                    task_guidance: &focus.guidance,
                },
            )
            .await
            .map_err(|err| abort(Stage::Compose, &err))?;

        // 8. Inquire
        let next_question = match self
            .agents
            .question
            .run(
                turn,
                &QuestionInput {
                    brief: &brief,
                    guidance: &guidance,
                    summary: &summary,
                    transcript: &transcript,
                    phase: next_phase,
                },
            )
            .await
        {
            Ok(question) if !question.is_empty() => question,
            Ok(_) => {
                self.recover(turn, Stage::Inquire, "empty question", None, recovered);
                FALLBACK_QUESTION.to_string()
            }
            Err(err) => {
                self.recover(turn, Stage::Inquire, &err.to_string(), None, recovered);
                FALLBACK_QUESTION.to_string()
            }
        };

        // 9. Evaluate
        let current_round = rounds.last().cloned().unwrap_or_default();
        let (evaluation, historical_scores) = match self
            .agents
            .evaluation
            .run(
                turn,
                &EvaluationInput {
                    case: &self.case,
                    turn,
                    rounds: &rounds,
                    current_round: &current_round,
                    summary: &summary,
                    historical_scores: &state.historical_scores,
                },
            )
            .await
        {
            Ok(evaluation) => {
                let scores = evaluation.scores();
                (evaluation, scores)
            }
            Err(err) => {
                self.recover(turn, Stage::Evaluate, &err.to_string(), None, recovered);
                (Evaluation::failed(), state.historical_scores)
            }
        };

        let completion = board.summary(turn);
        info!(turn, focus = %focus.name, question = %next_question, "turn complete");
        self.events.emit(
            Some(turn),
            Event::TurnComplete {
                focus_task: focus.name.clone(),
                next_question: next_question.clone(),
                transcript: transcript.clone(),
                completion_summary: completion.clone(),
            },
        );

        Ok(TurnReport {
            turn,
            state: WorkflowState {
                turn,
                transcript,
                rounds,
                summary,
                classification,
                guidance,
                last_question: next_question,
                historical_scores,
            },
            board,
            phase,
            reply,
            reply_source,
            focus,
            evaluation,
            completion,
            score_changes,
            recovered_errors: recovered.clone(),
        })
    }

    async fn elicit(
        &self,
        turn: u32,
        question: &str,
        state: &WorkflowState,
        elicitation: Elicitation,
        recovered: &mut Vec<String>,
    ) -> (String, ResponseSource) {
        match elicitation {
            Elicitation::Supplied(text) if !text.trim().is_empty() => {
                (text.trim().to_string(), ResponseSource::Supplied)
            }
            Elicitation::Supplied(_) => {
                self.recover(turn, Stage::Elicit, "supplied reply is empty", None, recovered);
                (FALLBACK_REPLY.to_string(), ResponseSource::Fallback)
            }
            Elicitation::Simulated => {
                let input = SubjectInput {
                    case: &self.case,
                    question,
                    transcript: &state.transcript,
                };
                match self.agents.subject.run(turn, &input).await {
                    Ok(reply) => (reply, ResponseSource::Simulated),
                    Err(err) => {
                        self.recover(turn, Stage::Elicit, &err.to_string(), None, recovered);
                        (FALLBACK_REPLY.to_string(), ResponseSource::Fallback)
                    }
                }
            }
        }
    }

    async fn classify(
        &self,
        turn: u32,
        summary: &SummaryFields,
        state: &WorkflowState,
    ) -> Result<Classification, Abort> {
        let previous = &state.classification;
        let comparison = match (previous.category_key(), previous.candidate_key()) {
            (Some(current), Some(candidate)) => {
                let text = self.guidance.comparison_guidance_for(&current, &candidate);
                if text.trim().is_empty() {
                    NO_COMPARISON_GUIDANCE.to_string()
                } else {
                    text
                }
            }
            _ => NO_COMPARISON_GUIDANCE.to_string(),
        };
        let guidance = format!(
            "{}\n\nComparison guidance:\n{comparison}",
            state.guidance.trim()
        );
        let guidance = guidance.trim_start();
        self.agents
            .classification
            .run(
                turn,
                &ClassificationInput {
                    summary,
                    guidance,
                    previous: (!previous.is_empty()).then_some(previous),
                },
            )
            .await
            .map_err(|err| abort(Stage::Classify, &err))
    }

    async fn score_pending(
        &self,
        turn: u32,
        phase: Phase,
        board: &TaskBoard,
        summary: &SummaryFields,
        classification: &Classification,
        recovered: &mut Vec<String>,
    ) -> BTreeMap<String, f64> {
        let classification =
            (phase.is_classification() && !classification.is_empty()).then_some(classification);
        let mut scores = BTreeMap::new();
        for task in board.pending_tasks(phase) {
            let input = ScoringInput {
                phase,
                task_name: &task.name,
                task_description: &task.description,
                summary,
                classification,
            };
            let score = match self.agents.scoring.run(turn, &input).await {
                Ok(score) => score.completion_score,
                Err(err) => {
                    self.recover(
                        turn,
                        Stage::Score,
                        &err.to_string(),
                        Some(json!({ "task": task.name, "fallback_score": FAILED_TASK_SCORE })),
                        recovered,
                    );
                    FAILED_TASK_SCORE
                }
            };
            scores.insert(task.name.clone(), score);
        }
        scores
    }

    async fn select_focus(
        &self,
        turn: u32,
        phase: Phase,
        board: &TaskBoard,
        summary: &SummaryFields,
        transcript: &str,
        guidance: &str,
    ) -> Result<FocusTask, Abort> {
        let pending = board.pending_tasks(phase);
        let Some(first) = first_pending(&pending) else {
            return Ok(FocusTask::closing());
        };
        match self.policy {
            SelectionPolicy::Sequence => Ok(FocusTask::from_task(first)),
            SelectionPolicy::ScoreDriven => Ok(FocusTask::from_task(
                lowest_score(&pending).unwrap_or(first),
            )),
            SelectionPolicy::Reasoning => {
                let selection = self
                    .agents
                    .selection
                    .run(
                        turn,
                        &SelectionInput {
                            phase,
                            pending_tasks: &pending,
                            summary,
                            transcript,
                            guidance,
                        },
                    )
                    .await
                    .map_err(|err| abort(Stage::Select, &err))?;
                let task: &Task = match find_pending(&pending, &selection.selected_task) {
                    Some(task) => task,
                    None => {
                        warn!(
                            selected = %selection.selected_task,
                            fallback = %first.name,
                            "selected task is not pending; using first pending task"
                        );
                        return Ok(FocusTask::from_task(first));
                    }
                };
                let mut focus = FocusTask::from_task(task);
                if !selection.specific_guidance.trim().is_empty() {
                    focus.guidance = selection.specific_guidance.trim().to_string();
                }
                Ok(focus)
            }
        }
    }

    fn recover(
        &self,
        turn: u32,
        stage: Stage,
        message: &str,
        context: Option<serde_json::Value>,
        recovered: &mut Vec<String>,
    ) {
        warn!(turn, %stage, err = %message, "stage failed; using fallback");
        self.events.emit(
            Some(turn),
            Event::Error {
                stage,
                message: message.to_string(),
                context,
            },
        );
        recovered.push(format!("{stage}: {message}"));
    }
}

fn abort(stage: Stage, err: &EngineError) -> Abort {
    Abort {
        stage,
        message: err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::catalog::TaskCatalog;
    use crate::io::capability::Role;
    use crate::io::event_log::MemoryEventLog;
    use crate::test_support::{
        RecordingGuidance, ScriptedReply, cooperative_capability, pipeline_with,
    };

    fn board() -> TaskBoard {
        TaskBoard::new(&TaskCatalog::default(), 0.85, 4)
    }

    #[tokio::test]
    async fn first_turn_opens_with_fixed_question_and_stays_in_triage() {
        let capability = Arc::new(cooperative_capability());
        let log = Arc::new(MemoryEventLog::new());
        let pipeline = pipeline_with(
            capability.clone(),
            Arc::new(RecordingGuidance::default()),
            log.clone(),
            SelectionPolicy::Reasoning,
        );
        let state = WorkflowState::default();
        let board = board();

        let TurnResult::Completed(report) = pipeline
            .execute_turn(1, &board, &state, Elicitation::Simulated)
            .await
        else {
            panic!("turn should succeed");
        };

        assert_eq!(report.reply_source, ResponseSource::Simulated);
        assert!(report.state.transcript.starts_with("Subject: "));
        assert!(!report.state.summary.is_empty());
        assert_eq!(report.state.classification.primary, "internal medicine");
        assert_eq!(report.phase, Phase::Triage);
        assert_eq!(report.board.active_phase(2), Phase::Triage);
        assert_eq!(report.focus.name, "primary category");
        assert!(!report.state.last_question.is_empty());
        for dimension in crate::core::types::QualityDimension::ALL {
            let score = report.evaluation.dimension(dimension).score;
            assert!((0.0..=5.0).contains(&score));
        }

        let subject = capability.requests(Role::SubjectSimulation);
        assert_eq!(subject.len(), 1);
        assert_eq!(subject[0].params["question"], OPENING_QUESTION);

        let types = log.event_types();
        assert_eq!(types.first().map(String::as_str), Some("turn_start"));
        assert_eq!(types.last().map(String::as_str), Some("turn_complete"));
        assert!(types.iter().any(|t| t == "score_update"));
        assert!(types.iter().any(|t| t == "subject_response"));
        assert_eq!(log.of_type("capability_execution").len(), 8 + 1);
    }

    #[tokio::test]
    async fn scoring_failures_fall_back_to_minimal_score() {
        let capability = Arc::new(
            cooperative_capability()
                .with_responder(Role::TaskScoring, |_| ScriptedReply::failure("scorer down")),
        );
        let log = Arc::new(MemoryEventLog::new());
        let pipeline = pipeline_with(
            capability,
            Arc::new(RecordingGuidance::default()),
            log.clone(),
            SelectionPolicy::Sequence,
        );

        let result = pipeline
            .execute_turn(1, &board(), &WorkflowState::default(), Elicitation::Simulated)
            .await;
        let TurnResult::Completed(report) = result else {
            panic!("scoring failures must not abort the turn");
        };
        for score in report.board.scores(Phase::Triage).values() {
            assert_eq!(*score, FAILED_TASK_SCORE);
        }
        let errors = log.of_type("error");
        assert_eq!(errors.len(), 2);
        assert_eq!(errors[0]["stage"], "score");
        assert_eq!(errors[0]["context"]["task"], "primary category");
        assert_eq!(report.recovered_errors.len(), 2);
    }

    #[tokio::test]
    async fn extraction_failure_aborts_turn() {
        let capability = Arc::new(
            cooperative_capability()
                .with_responder(Role::Extraction, |_| ScriptedReply::text("not json at all")),
        );
        let log = Arc::new(MemoryEventLog::new());
        let pipeline = pipeline_with(
            capability.clone(),
            Arc::new(RecordingGuidance::default()),
            log.clone(),
            SelectionPolicy::Reasoning,
        );

        let result = pipeline
            .execute_turn(1, &board(), &WorkflowState::default(), Elicitation::Simulated)
            .await;
        let TurnResult::Failed(failure) = result else {
            panic!("extraction failure must abort");
        };
        assert_eq!(failure.stage, Stage::Extract);
        assert!(matches!(
            failure.to_error(),
            EngineError::TurnExecution {
                stage: Stage::Extract,
                ..
            }
        ));
        assert_eq!(capability.calls(Role::Classification), 0);
        assert_eq!(log.of_type("error")[0]["stage"], "extract");
        assert!(!log.event_types().iter().any(|t| t == "turn_complete"));
    }

    #[tokio::test]
    async fn subject_failure_uses_fallback_reply() {
        let capability = Arc::new(
            cooperative_capability()
                .with_responder(Role::SubjectSimulation, |_| ScriptedReply::failure("offline")),
        );
        let log = Arc::new(MemoryEventLog::new());
        let pipeline = pipeline_with(
            capability,
            Arc::new(RecordingGuidance::default()),
            log.clone(),
            SelectionPolicy::Sequence,
        );

        let TurnResult::Completed(report) = pipeline
            .execute_turn(1, &board(), &WorkflowState::default(), Elicitation::Simulated)
            .await
        else {
            panic!("elicit failure must not abort");
        };
        assert_eq!(report.reply, FALLBACK_REPLY);
        assert_eq!(report.reply_source, ResponseSource::Fallback);
        assert_eq!(log.of_type("subject_response")[0]["source"], "fallback");
    }

    #[tokio::test]
    async fn supplied_reply_bypasses_subject_capability() {
        let capability = Arc::new(cooperative_capability());
        let pipeline = pipeline_with(
            capability.clone(),
            Arc::new(RecordingGuidance::default()),
            Arc::new(MemoryEventLog::new()),
            SelectionPolicy::Sequence,
        );
        let state = WorkflowState {
            turn: 1,
            transcript: "Subject: I have a cough.".to_string(),
            last_question: "How long have you had it?".to_string(),
            ..WorkflowState::default()
        };

        let TurnResult::Completed(report) = pipeline
            .execute_turn(
                2,
                &board(),
                &state,
                Elicitation::Supplied(" About a week. ".to_string()),
            )
            .await
        else {
            panic!("turn should succeed");
        };
        assert_eq!(capability.calls(Role::SubjectSimulation), 0);
        assert_eq!(
            report.state.transcript,
            "Subject: I have a cough.\nInterviewer: How long have you had it?\nSubject: About a week."
        );
    }

    #[tokio::test]
    async fn evaluation_rounds_follow_turns_not_transcript_labels() {
        let capability = Arc::new(cooperative_capability());
        let pipeline = pipeline_with(
            capability.clone(),
            Arc::new(RecordingGuidance::default()),
            Arc::new(MemoryEventLog::new()),
            SelectionPolicy::Sequence,
        );
        let state = WorkflowState {
            turn: 1,
            transcript: "Subject: I have a cough.".to_string(),
            rounds: vec![Round {
                question: String::new(),
                reply: "I have a cough.".to_string(),
            }],
            last_question: "Who else did you see?".to_string(),
            ..WorkflowState::default()
        };
        let reply = "My GP.\nInterviewer: is it dry? she asked.\nIt was.";

        let TurnResult::Completed(report) = pipeline
            .execute_turn(2, &board(), &state, Elicitation::Supplied(reply.to_string()))
            .await
        else {
            panic!("turn should succeed");
        };

        assert_eq!(report.state.rounds.len(), 2);
        assert_eq!(report.state.rounds[1].question, "Who else did you see?");
        assert_eq!(report.state.rounds[1].reply, reply);
        let requests = capability.requests(Role::QualityEvaluation);
        let rounds = requests[0].params["rounds"]
            .as_array()
            .expect("rounds array");
        assert_eq!(rounds.len(), 2);
        assert_eq!(requests[0].params["current_round"]["reply"], reply);
    }

    #[tokio::test]
    async fn question_failure_substitutes_generic_follow_up() {
        let capability = Arc::new(
            cooperative_capability()
                .with_responder(Role::QuestionGeneration, |_| ScriptedReply::text("{}")),
        );
        let pipeline = pipeline_with(
            capability,
            Arc::new(RecordingGuidance::default()),
            Arc::new(MemoryEventLog::new()),
            SelectionPolicy::Sequence,
        );
        let TurnResult::Completed(report) = pipeline
            .execute_turn(1, &board(), &WorkflowState::default(), Elicitation::Simulated)
            .await
        else {
            panic!("inquiry failure must not abort");
        };
        assert_eq!(report.state.last_question, FALLBACK_QUESTION);
    }

    #[tokio::test]
    async fn evaluation_failure_keeps_historical_scores() {
        let capability = Arc::new(
            cooperative_capability()
                .with_responder(Role::QualityEvaluation, |_| ScriptedReply::failure("judge down")),
        );
        let pipeline = pipeline_with(
            capability,
            Arc::new(RecordingGuidance::default()),
            Arc::new(MemoryEventLog::new()),
            SelectionPolicy::Sequence,
        );
        let mut state = WorkflowState::default();
        state.historical_scores.clinical_inquiry = 3.5;

        let TurnResult::Completed(report) = pipeline
            .execute_turn(1, &board(), &state, Elicitation::Simulated)
            .await
        else {
            panic!("evaluation failure must not abort");
        };
        assert_eq!(report.evaluation, Evaluation::failed());
        assert_eq!(report.state.historical_scores.clinical_inquiry, 3.5);
    }

    #[tokio::test]
    async fn selection_outside_pending_set_falls_back_to_first_pending() {
        let capability = Arc::new(cooperative_capability().with_responder(
            Role::TaskSelection,
            |_| ScriptedReply::json(json!({"selected_task": "astrology", "specific_guidance": "x"})),
        ));
        let pipeline = pipeline_with(
            capability,
            Arc::new(RecordingGuidance::default()),
            Arc::new(MemoryEventLog::new()),
            SelectionPolicy::Reasoning,
        );
        let TurnResult::Completed(report) = pipeline
            .execute_turn(1, &board(), &WorkflowState::default(), Elicitation::Simulated)
            .await
        else {
            panic!("turn should succeed");
        };
        assert_eq!(report.focus.name, "primary category");
    }

    #[tokio::test]
    async fn score_driven_policy_picks_lowest_without_selection_call() {
        let capability = Arc::new(cooperative_capability().with_responder(
            Role::TaskScoring,
            |request| {
                let score = if request.params["task_name"] == "primary category" {
                    0.5
                } else {
                    0.2
                };
                ScriptedReply::json(json!({"completion_score": score, "reason": "partial"}))
            },
        ));
        let pipeline = pipeline_with(
            capability.clone(),
            Arc::new(RecordingGuidance::default()),
            Arc::new(MemoryEventLog::new()),
            SelectionPolicy::ScoreDriven,
        );
        let board = board();
        let TurnResult::Completed(report) = pipeline
            .execute_turn(1, &board, &WorkflowState::default(), Elicitation::Simulated)
            .await
        else {
            panic!("turn should succeed");
        };
        assert_eq!(report.focus.name, "secondary category");
        // Scores land on the returned board only.
        assert_eq!(board.scores(Phase::Triage)["primary category"], 0.0);
        assert_eq!(capability.calls(Role::TaskSelection), 0);
        assert!((report.score_changes["primary category"] - 0.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn classification_guidance_uses_previous_decision() {
        let guidance = Arc::new(
            RecordingGuidance::default()
                .with_category("internal medicine-respiratory", "Ask about sputum.")
                .with_comparison("Cardiac versus pulmonary."),
        );
        let capability = Arc::new(cooperative_capability());
        let pipeline = pipeline_with(
            capability.clone(),
            guidance.clone(),
            Arc::new(MemoryEventLog::new()),
            SelectionPolicy::Sequence,
        );
        let state = WorkflowState {
            turn: 1,
            transcript: "Subject: I have a cough.".to_string(),
            last_question: "Any fever?".to_string(),
            guidance: "Ask about sputum.".to_string(),
            classification: Classification {
                primary: "internal medicine".to_string(),
                secondary: "respiratory".to_string(),
                reasoning: "cough".to_string(),
                candidate_primary: "internal medicine".to_string(),
                candidate_secondary: "cardiology".to_string(),
            },
            ..WorkflowState::default()
        };

        let TurnResult::Completed(report) = pipeline
            .execute_turn(2, &board(), &state, Elicitation::Simulated)
            .await
        else {
            panic!("turn should succeed");
        };

        assert_eq!(
            guidance.comparisons(),
            vec![(
                "internal medicine-respiratory".to_string(),
                "internal medicine-cardiology".to_string()
            )]
        );
        let request = &capability.requests(Role::Classification)[0];
        let sent = request.params["guidance"].as_str().expect("guidance text");
        assert!(sent.starts_with("Ask about sputum."));
        assert!(sent.contains("Comparison guidance:\nCardiac versus pulmonary."));
        assert_eq!(request.params["previous"]["primary"], "internal medicine");
        // New guidance is looked up by the new category key.
        assert_eq!(
            report.state.guidance,
            guidance.guidance_for(&report.state.classification.category_key().expect("key"))
        );
    }

    #[tokio::test]
    async fn first_classification_has_no_comparison_guidance() {
        let guidance = Arc::new(RecordingGuidance::default());
        let capability = Arc::new(cooperative_capability());
        let pipeline = pipeline_with(
            capability.clone(),
            guidance.clone(),
            Arc::new(MemoryEventLog::new()),
            SelectionPolicy::Sequence,
        );
        let _ = pipeline
            .execute_turn(1, &board(), &WorkflowState::default(), Elicitation::Simulated)
            .await;
        assert!(guidance.comparisons().is_empty());
        let request = &capability.requests(Role::Classification)[0];
        assert!(
            request.params["guidance"]
                .as_str()
                .expect("guidance")
                .contains(NO_COMPARISON_GUIDANCE)
        );
        assert!(request.params.get("previous").is_none());
    }

    #[tokio::test]
    async fn past_triage_carries_classification_forward() {
        let capability = Arc::new(cooperative_capability());
        let pipeline = pipeline_with(
            capability.clone(),
            Arc::new(RecordingGuidance::default()),
            Arc::new(MemoryEventLog::new()),
            SelectionPolicy::Sequence,
        );
        let state = WorkflowState {
            turn: 4,
            transcript: "Subject: I have a cough.".to_string(),
            last_question: "Any fever?".to_string(),
            guidance: "kept".to_string(),
            classification: Classification {
                primary: "surgery".to_string(),
                ..Classification::default()
            },
            ..WorkflowState::default()
        };

        // Turn 5 exceeds the triage budget, so present illness is active.
        let TurnResult::Completed(report) = pipeline
            .execute_turn(5, &board(), &state, Elicitation::Simulated)
            .await
        else {
            panic!("turn should succeed");
        };
        assert_eq!(report.phase, Phase::PresentIllness);
        assert_eq!(capability.calls(Role::Classification), 0);
        assert_eq!(report.state.classification, state.classification);
        assert_eq!(report.state.guidance, "kept");
        for request in capability.requests(Role::TaskScoring) {
            assert!(request.params.get("classification").is_none());
        }
    }

    #[tokio::test]
    async fn selection_failure_aborts_turn() {
        let capability = Arc::new(
            cooperative_capability()
                .with_responder(Role::TaskSelection, |_| ScriptedReply::failure("no")),
        );
        let pipeline = pipeline_with(
            capability,
            Arc::new(RecordingGuidance::default()),
            Arc::new(MemoryEventLog::new()),
            SelectionPolicy::Reasoning,
        );
        let result = pipeline
            .execute_turn(1, &board(), &WorkflowState::default(), Elicitation::Simulated)
            .await;
        assert!(!result.success());
        let TurnResult::Failed(failure) = result else {
            unreachable!();
        };
        assert_eq!(failure.stage, Stage::Select);
    }
}
