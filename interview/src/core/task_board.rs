//! Phase-gated task completion state.
//!
//! [`TaskBoard`] owns every task's completion score. All queries are pure
//! functions of the current scores and the turn number passed in.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::core::catalog::TaskCatalog;
use crate::core::phase::{Phase, PhaseResolution};

/// Score at or above which a task counts as done.
pub const DEFAULT_COMPLETION_THRESHOLD: f64 = 0.85;
/// Turns the first phase may occupy before it is passed over.
pub const DEFAULT_FIRST_PHASE_TURN_BUDGET: u32 = 4;

/// A task with its current completion score in `[0, 1]`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Task {
    pub name: String,
    pub description: String,
    pub score: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Gate {
    Open,
    Satisfied,
    BudgetSpent,
}

/// Completion counts for one phase.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PhaseProgress {
    pub completed: usize,
    pub total: usize,
    pub completion_rate: f64,
    pub is_completed: bool,
}

/// Per-phase completion breakdown at a given turn.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompletionSummary {
    pub current_phase: Phase,
    pub phases: BTreeMap<Phase, PhaseProgress>,
}

impl CompletionSummary {
    pub fn total_completed(&self) -> usize {
        self.phases.values().map(|progress| progress.completed).sum()
    }

    pub fn total_tasks(&self) -> usize {
        self.phases.values().map(|progress| progress.total).sum()
    }
}

#[derive(Debug, Clone)]
pub struct TaskBoard {
    tasks: BTreeMap<Phase, Vec<Task>>,
    threshold: f64,
    first_phase_turn_budget: u32,
}

impl TaskBoard {
    /// Build a board with every task at score 0.
    pub fn new(catalog: &TaskCatalog, threshold: f64, first_phase_turn_budget: u32) -> Self {
        let tasks = Phase::SUBSTANTIVE
            .iter()
            .map(|phase| {
                let tasks = catalog
                    .tasks(*phase)
                    .iter()
                    .map(|spec| Task {
                        name: spec.name.clone(),
                        description: spec.description.clone(),
                        score: 0.0,
                    })
                    .collect();
                (*phase, tasks)
            })
            .collect();
        Self {
            tasks,
            threshold,
            first_phase_turn_budget,
        }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn tasks(&self, phase: Phase) -> &[Task] {
        self.tasks.get(&phase).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Tasks in `phase` still below the completion threshold, in catalog order.
    pub fn pending_tasks(&self, phase: Phase) -> Vec<&Task> {
        self.tasks(phase)
            .iter()
            .filter(|task| task.score < self.threshold)
            .collect()
    }

    /// Current scores of every task in `phase`.
    pub fn scores(&self, phase: Phase) -> BTreeMap<String, f64> {
        self.tasks(phase)
            .iter()
            .map(|task| (task.name.clone(), task.score))
            .collect()
    }

    /// Overwrite scores for the named tasks of `phase`.
    ///
    /// Unknown names are ignored. Scores are clamped into `[0, 1]`; NaN becomes 0.
    pub fn record_scores(&mut self, phase: Phase, scores: &BTreeMap<String, f64>) {
        let Some(tasks) = self.tasks.get_mut(&phase) else {
            return;
        };
        for task in tasks.iter_mut() {
            if let Some(score) = scores.get(&task.name) {
                task.score = clamp_score(*score);
            }
        }
    }

    /// True iff every task in `phase` meets the threshold.
    pub fn is_satisfied(&self, phase: Phase) -> bool {
        self.tasks(phase)
            .iter()
            .all(|task| task.score >= self.threshold)
    }

    /// Resolve the phase a turn works on.
    pub fn resolve(&self, turn: u32) -> PhaseResolution {
        let mut skipped = None;
        for phase in Phase::SUBSTANTIVE {
            match self.gate(phase, turn) {
                Gate::Open => {
                    return match skipped {
                        Some(skipped) => PhaseResolution::ForcedPast {
                            skipped,
                            next: phase,
                        },
                        None => PhaseResolution::Active(phase),
                    };
                }
                Gate::Satisfied => {}
                Gate::BudgetSpent => skipped = Some(phase),
            }
        }
        match skipped {
            Some(skipped) => PhaseResolution::ForcedPast {
                skipped,
                next: Phase::Completed,
            },
            None => PhaseResolution::Completed,
        }
    }

    pub fn active_phase(&self, turn: u32) -> Phase {
        self.resolve(turn).phase()
    }

    pub fn is_complete(&self, turn: u32) -> bool {
        self.active_phase(turn).is_terminal()
    }

    pub fn summary(&self, turn: u32) -> CompletionSummary {
        let phases = Phase::SUBSTANTIVE
            .iter()
            .map(|phase| {
                let total = self.tasks(*phase).len();
                let completed = total - self.pending_tasks(*phase).len();
                let completion_rate = if total == 0 {
                    1.0
                } else {
                    completed as f64 / total as f64
                };
                (
                    *phase,
                    PhaseProgress {
                        completed,
                        total,
                        completion_rate,
                        is_completed: completed == total,
                    },
                )
            })
            .collect();
        CompletionSummary {
            current_phase: self.active_phase(turn),
            phases,
        }
    }

    fn gate(&self, phase: Phase, turn: u32) -> Gate {
        if self.is_satisfied(phase) {
            return Gate::Satisfied;
        }
        match self.turn_budget(phase) {
            Some(budget) if turn > budget => Gate::BudgetSpent,
            Some(_) | None => Gate::Open,
        }
    }

    fn turn_budget(&self, phase: Phase) -> Option<u32> {
        (phase == Phase::SUBSTANTIVE[0]).then_some(self.first_phase_turn_budget)
    }
}

fn clamp_score(score: f64) -> f64 {
    if score.is_nan() {
        0.0
    } else {
        score.clamp(0.0, 1.0)
    }
}
