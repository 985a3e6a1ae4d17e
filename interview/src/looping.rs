//! Multi-turn run loop.

use std::any::Any;
use std::panic::AssertUnwindSafe;

use futures::FutureExt;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use crate::core::phase::Phase;
use crate::core::task_board::{CompletionSummary, TaskBoard};
use crate::core::types::WorkflowState;
use crate::error::EngineError;
use crate::io::event_log::Event;
use crate::step::{Elicitation, Stage, StepPipeline, TurnResult};

/// Reason why a run stopped.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum StopReason {
    /// Every phase is done (or passed over).
    Completed,
    /// `max_turns` turns ran without completing.
    MaxTurnsReached,
    /// A turn aborted; the run stops without retrying it.
    TurnFailed {
        turn: u32,
        stage: Stage,
        errors: Vec<String>,
    },
    /// The cancellation token fired.
    Interrupted,
    /// A turn panicked.
    Error { message: String },
}

impl StopReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            StopReason::Completed => "completed",
            StopReason::MaxTurnsReached => "max_turns_reached",
            StopReason::TurnFailed { .. } => "turn_failed",
            StopReason::Interrupted => "interrupted",
            StopReason::Error { .. } => "error",
        }
    }
}

/// Summary of a whole run.
#[derive(Debug, Clone, Serialize)]
pub struct FinalReport {
    pub case: String,
    /// Turns actually executed, failed ones included.
    pub total_turns: u32,
    pub success: bool,
    pub stop: StopReason,
    pub final_phase: Phase,
    pub summary: CompletionSummary,
    pub state: WorkflowState,
}

impl FinalReport {
    /// The error that ended the run, if any.
    pub fn error(&self) -> Option<EngineError> {
        match &self.stop {
            StopReason::TurnFailed {
                turn,
                stage,
                errors,
            } => Some(EngineError::TurnExecution {
                turn: *turn,
                stage: *stage,
                message: errors.join("; "),
            }),
            StopReason::Error { message } => Some(EngineError::Run(message.clone())),
            StopReason::Completed | StopReason::MaxTurnsReached | StopReason::Interrupted => None,
        }
    }
}

/// Drives a [`StepPipeline`] until completion, failure, interruption or the
/// turn limit.
pub struct RunLoop<'a> {
    pipeline: &'a StepPipeline,
    max_turns: u32,
    cancel: CancellationToken,
}

impl<'a> RunLoop<'a> {
    pub fn new(pipeline: &'a StepPipeline, max_turns: u32) -> Self {
        Self {
            pipeline,
            max_turns,
            cancel: CancellationToken::new(),
        }
    }

    /// Stop the run with [`StopReason::Interrupted`] once `cancel` fires.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Run from `board` and `state`. Always emits `run_start` and `run_complete`.
    #[instrument(skip_all, fields(case = %self.pipeline.case().label(), max_turns = self.max_turns))]
    pub async fn run(&self, board: TaskBoard, state: WorkflowState) -> FinalReport {
        let events = self.pipeline.events();
        events.emit(
            None,
            Event::RunStart {
                case: self.pipeline.case().label(),
                max_turns: self.max_turns,
                selection_policy: self.pipeline.policy(),
                total_tasks: board.summary(1).total_tasks(),
            },
        );

        let mut board = board;
        let mut state = state;
        let mut executed = 0u32;
        let stop = match AssertUnwindSafe(self.drive(&mut board, &mut state, &mut executed))
            .catch_unwind()
            .await
        {
            Ok(stop) => stop,
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                error!(err = %message, "turn panicked");
                StopReason::Error { message }
            }
        };

        let success = stop == StopReason::Completed;
        // Completion is detected at the top of the turn after the last one
        // executed; every other stop reports the last turn that ran.
        let summary_turn = if success {
            executed.saturating_add(1)
        } else {
            executed.max(1)
        };
        let summary = board.summary(summary_turn);
        match &stop {
            StopReason::Completed => info!(total_turns = executed, "run completed"),
            other => warn!(
                total_turns = executed,
                reason = other.as_str(),
                "run ended without completing"
            ),
        }
        events.emit(
            None,
            Event::RunComplete {
                total_turns: executed,
                success,
                stop_reason: stop.as_str().to_string(),
                error: match &stop {
                    StopReason::TurnFailed { errors, .. } => Some(errors.join("; ")),
                    StopReason::Error { message } => Some(message.clone()),
                    _ => None,
                },
                final_summary: summary.clone(),
            },
        );

        FinalReport {
            case: self.pipeline.case().label(),
            total_turns: executed,
            success,
            stop,
            final_phase: summary.current_phase,
            summary,
            state,
        }
    }

    async fn drive(
        &self,
        board: &mut TaskBoard,
        state: &mut WorkflowState,
        executed: &mut u32,
    ) -> StopReason {
        for turn in 1..=self.max_turns {
            if self.cancel.is_cancelled() {
                return StopReason::Interrupted;
            }
            if board.is_complete(turn) {
                return StopReason::Completed;
            }

            let result = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return StopReason::Interrupted,
                result = self.pipeline.execute_turn(turn, board, state, Elicitation::Simulated) => result,
            };
            *executed += 1;

            match result {
                TurnResult::Completed(report) => {
                    let report = *report;
                    *board = report.board;
                    *state = report.state;
                }
                TurnResult::Failed(failure) => {
                    return StopReason::TurnFailed {
                        turn: failure.turn,
                        stage: failure.stage,
                        errors: failure.errors,
                    };
                }
            }
        }

        StopReason::MaxTurnsReached
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "turn panicked".to_string()
    }
}
