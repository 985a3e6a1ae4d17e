//! Interview phases.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Ordered interview phases followed by the terminal `Completed` marker.
///
/// Serialized names (`triage`, `hpi`, `ph`, `completed`) appear in the event
/// log and in task catalogs, so they must stay stable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Phase {
    /// Classification of the subject into a primary/secondary category.
    #[serde(rename = "triage")]
    Triage,
    /// History of the present illness.
    #[serde(rename = "hpi")]
    PresentIllness,
    /// Past history.
    #[serde(rename = "ph")]
    PastHistory,
    #[serde(rename = "completed")]
    Completed,
}

impl Phase {
    /// Substantive phases in the order the interview works through them.
    pub const SUBSTANTIVE: [Phase; 3] = [Phase::Triage, Phase::PresentIllness, Phase::PastHistory];

    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Triage => "triage",
            Phase::PresentIllness => "hpi",
            Phase::PastHistory => "ph",
            Phase::Completed => "completed",
        }
    }

    /// The phase whose tasks are answered by classifying the subject.
    pub fn is_classification(self) -> bool {
        self == Phase::Triage
    }

    pub fn is_terminal(self) -> bool {
        self == Phase::Completed
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of resolving which phase a turn works on.
///
/// The first substantive phase carries a turn budget. Once the budget is spent
/// the phase is passed over even if its tasks are unmet, and nothing re-opens
/// it later. `ForcedPast` makes that case explicit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseResolution {
    /// First substantive phase with unmet tasks.
    Active(Phase),
    /// `skipped` ran out of turns while unsatisfied; `next` is active instead
    /// (possibly `Completed`).
    ForcedPast { skipped: Phase, next: Phase },
    /// Every substantive phase is satisfied.
    Completed,
}

impl PhaseResolution {
    /// The phase the turn should work on.
    pub fn phase(self) -> Phase {
        match self {
            PhaseResolution::Active(phase) => phase,
            PhaseResolution::ForcedPast { next, .. } => next,
            PhaseResolution::Completed => Phase::Completed,
        }
    }

    /// Phase that was passed over because of its turn budget, if any.
    pub fn skipped(self) -> Option<Phase> {
        match self {
            PhaseResolution::ForcedPast { skipped, .. } => Some(skipped),
            PhaseResolution::Active(_) | PhaseResolution::Completed => None,
        }
    }
}
