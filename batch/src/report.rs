use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::run::{CaseOutcome, CaseStatus};

/// Settings the batch ran with, echoed into the summary.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessingConfig {
    pub dataset: PathBuf,
    pub start: usize,
    pub end: Option<usize>,
    pub limit: Option<usize>,
    pub concurrency: u32,
    pub config: PathBuf,
    pub out: PathBuf,
    pub max_turns: u32,
    pub selection_policy: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct FailedCase {
    pub index: usize,
    pub label: String,
    pub reason: String,
    pub log: PathBuf,
}

/// Contents of `summary.json`.
#[derive(Debug, Clone, Serialize)]
pub struct BatchSummary {
    pub started_at: String,
    pub finished_at: String,
    /// Cases that ran to a result this time (succeeded + failed).
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub interrupted: usize,
    pub success_rate: f64,
    pub total_time_secs: f64,
    pub average_time_secs: f64,
    pub cases_per_minute: f64,
    pub failures: Vec<FailedCase>,
    pub config: ProcessingConfig,
}

pub fn summarize(
    outcomes: &[CaseOutcome],
    started_at: DateTime<Utc>,
    elapsed: Duration,
    config: ProcessingConfig,
) -> BatchSummary {
    let mut succeeded = 0;
    let mut skipped = 0;
    let mut interrupted = 0;
    let mut failures = Vec::new();
    let mut case_time = 0.0;
    for outcome in outcomes {
        match &outcome.status {
            CaseStatus::Succeeded => {
                succeeded += 1;
                case_time += outcome.duration_secs;
            }
            CaseStatus::Failed { reason } => {
                case_time += outcome.duration_secs;
                failures.push(FailedCase {
                    index: outcome.index,
                    label: outcome.label.clone(),
                    reason: reason.clone(),
                    log: outcome.log.clone(),
                });
            }
            CaseStatus::Skipped => skipped += 1,
            CaseStatus::Interrupted => interrupted += 1,
        }
    }

    let failed = failures.len();
    let processed = succeeded + failed;
    let total_time_secs = elapsed.as_secs_f64();
    let ratio = |numerator: f64, denominator: f64| {
        if denominator > 0.0 {
            numerator / denominator
        } else {
            0.0
        }
    };
    BatchSummary {
        started_at: started_at.to_rfc3339(),
        finished_at: Utc::now().to_rfc3339(),
        processed,
        succeeded,
        failed,
        skipped,
        interrupted,
        success_rate: ratio(succeeded as f64, processed as f64),
        total_time_secs,
        average_time_secs: ratio(case_time, processed as f64),
        cases_per_minute: ratio(processed as f64 * 60.0, total_time_secs),
        failures,
        config,
    }
}

pub fn write_summary(path: &Path, summary: &BatchSummary) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
    }
    let contents = serde_json::to_string_pretty(summary).context("serialize summary")?;
    fs::write(path, format!("{contents}\n"))
        .with_context(|| format!("write summary {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn outcome(index: usize, status: CaseStatus, duration_secs: f64) -> CaseOutcome {
        CaseOutcome {
            index,
            label: format!("case-{index}"),
            log: PathBuf::from(format!("out/{index}.jsonl")),
            status,
            total_turns: 3,
            duration_secs,
        }
    }

    fn config() -> ProcessingConfig {
        ProcessingConfig {
            dataset: PathBuf::from("cases.json"),
            start: 0,
            end: None,
            limit: None,
            concurrency: 2,
            config: PathBuf::from(".interview/interview.toml"),
            out: PathBuf::from("out"),
            max_turns: 30,
            selection_policy: "reasoning".to_string(),
        }
    }

    #[test]
    fn counts_and_rates() {
        let outcomes = vec![
            outcome(0, CaseStatus::Succeeded, 10.0),
            outcome(
                1,
                CaseStatus::Failed {
                    reason: "turn limit reached".to_string(),
                },
                20.0,
            ),
            outcome(2, CaseStatus::Skipped, 0.0),
            outcome(3, CaseStatus::Succeeded, 30.0),
        ];
        let summary = summarize(&outcomes, Utc::now(), Duration::from_secs(30), config());

        assert_eq!(summary.processed, 3);
        assert_eq!(summary.succeeded, 2);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.skipped, 1);
        assert!((summary.success_rate - 2.0 / 3.0).abs() < 1e-9);
        assert!((summary.average_time_secs - 20.0).abs() < 1e-9);
        assert!((summary.cases_per_minute - 6.0).abs() < 1e-9);
        assert_eq!(summary.failures[0].index, 1);
        assert_eq!(summary.failures[0].reason, "turn limit reached");
    }

    #[test]
    fn all_skipped_has_zero_rates() {
        let outcomes = vec![outcome(0, CaseStatus::Skipped, 0.0)];
        let summary = summarize(&outcomes, Utc::now(), Duration::ZERO, config());
        assert_eq!(summary.processed, 0);
        assert_eq!(summary.success_rate, 0.0);
        assert_eq!(summary.cases_per_minute, 0.0);
    }

    #[test]
    fn writes_pretty_json() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("nested").join("summary.json");
        let summary = summarize(&[], Utc::now(), Duration::ZERO, config());
        write_summary(&path, &summary).expect("write");

        let value: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).expect("read")).expect("json");
        assert_eq!(value["processed"], 0);
        assert_eq!(value["config"]["concurrency"], 2);
    }
}
