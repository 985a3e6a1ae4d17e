//! Bounded-concurrency case execution.
//!
//! Every case gets its own pipeline, event log and historical scores through
//! [`Engine::run_case`]; the only shared state is the engine's read-only
//! config, catalog and guidance.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use futures::StreamExt;
use futures::stream::FuturesUnordered;
use interview::engine::Engine;
use interview::looping::StopReason;
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument};

use crate::dataset::IndexedCase;
use crate::results::{LogState, log_path, prepare_log};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CaseStatus {
    Succeeded,
    /// The run ended without completing, or could not start.
    Failed { reason: String },
    /// A finished log was already present.
    Skipped,
    /// Cancelled before or during the run.
    Interrupted,
}

#[derive(Debug, Clone, Serialize)]
pub struct CaseOutcome {
    pub index: usize,
    pub label: String,
    pub log: PathBuf,
    #[serde(flatten)]
    pub status: CaseStatus,
    pub total_turns: u32,
    pub duration_secs: f64,
}

/// Run `cases` with at most `concurrency` in flight. Outcomes come back in
/// dataset order.
#[instrument(skip_all, fields(cases = cases.len(), concurrency = concurrency))]
pub async fn run_cases(
    engine: &Engine,
    cases: Vec<IndexedCase>,
    out_dir: &Path,
    concurrency: usize,
    cancel: CancellationToken,
) -> Vec<CaseOutcome> {
    let permits = Arc::new(Semaphore::new(concurrency.max(1)));
    let mut in_flight: FuturesUnordered<_> = cases
        .into_iter()
        .map(|case| {
            let permits = permits.clone();
            let cancel = cancel.clone();
            async move {
                // Never closed, so acquiring cannot fail.
                let _permit = permits.acquire_owned().await.ok();
                run_one(engine, case, out_dir, cancel).await
            }
        })
        .collect();

    let mut outcomes = Vec::new();
    while let Some(outcome) = in_flight.next().await {
        info!(
            index = outcome.index,
            status = ?outcome.status,
            duration_secs = outcome.duration_secs,
            "case done"
        );
        outcomes.push(outcome);
    }
    outcomes.sort_by_key(|outcome| outcome.index);
    outcomes
}

async fn run_one(
    engine: &Engine,
    case: IndexedCase,
    out_dir: &Path,
    cancel: CancellationToken,
) -> CaseOutcome {
    let log = log_path(out_dir, &case);
    let mut outcome = CaseOutcome {
        index: case.index,
        label: case.case.label(),
        log: log.clone(),
        status: CaseStatus::Skipped,
        total_turns: 0,
        duration_secs: 0.0,
    };
    if cancel.is_cancelled() {
        outcome.status = CaseStatus::Interrupted;
        return outcome;
    }

    match prepare_log(&log) {
        Ok(LogState::Complete) => return outcome,
        Ok(LogState::Fresh) => {}
        Err(err) => {
            outcome.status = CaseStatus::Failed {
                reason: format!("{err:#}"),
            };
            return outcome;
        }
    }

    let started = Instant::now();
    let result = engine.run_case(case.case, &log, cancel).await;
    outcome.duration_secs = started.elapsed().as_secs_f64();
    outcome.status = match result {
        Ok(report) => {
            outcome.total_turns = report.total_turns;
            match report.stop {
                StopReason::Completed => CaseStatus::Succeeded,
                StopReason::Interrupted => CaseStatus::Interrupted,
                StopReason::MaxTurnsReached => CaseStatus::Failed {
                    reason: "turn limit reached".to_string(),
                },
                StopReason::TurnFailed { .. } | StopReason::Error { .. } => CaseStatus::Failed {
                    reason: report
                        .error()
                        .map(|err| err.to_string())
                        .unwrap_or_else(|| report.stop.as_str().to_string()),
                },
            }
        }
        Err(err) => {
            error!(index = outcome.index, error = %format!("{err:#}"), "case could not run");
            CaseStatus::Failed {
                reason: format!("{err:#}"),
            }
        }
    };
    outcome
}
