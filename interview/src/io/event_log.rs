//! Append-only JSONL event log for one run.
//!
//! Every record carries `event_type`, `timestamp` and, for turn-level events,
//! `step_number`. Offline tooling rebuilds completion curves and quality
//! score distributions from these records, so field names are part of the
//! contract.

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::{Context, Result};
use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use tracing::warn;

use crate::core::phase::Phase;
use crate::core::selector::SelectionPolicy;
use crate::core::task_board::CompletionSummary;
use crate::io::capability::Role;
use crate::step::Stage;

/// Where the subject's reply for a turn came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseSource {
    Simulated,
    Supplied,
    Fallback,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum Event {
    RunStart {
        case: String,
        max_turns: u32,
        selection_policy: SelectionPolicy,
        total_tasks: usize,
    },
    TurnStart {
        current_phase: Phase,
        pending_tasks: Vec<String>,
    },
    SubjectResponse {
        question: String,
        response: String,
        source: ResponseSource,
    },
    CapabilityExecution {
        role: Role,
        input: Value,
        output: Value,
        duration_seconds: f64,
    },
    ScoreUpdate {
        phase: Phase,
        old_scores: BTreeMap<String, f64>,
        new_scores: BTreeMap<String, f64>,
        score_changes: BTreeMap<String, f64>,
    },
    TurnComplete {
        focus_task: String,
        next_question: String,
        transcript: String,
        completion_summary: CompletionSummary,
    },
    Error {
        stage: Stage,
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        context: Option<Value>,
    },
    RunComplete {
        total_turns: u32,
        success: bool,
        stop_reason: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        final_summary: CompletionSummary,
    },
}

impl Event {
    pub fn event_type(&self) -> &'static str {
        match self {
            Event::RunStart { .. } => "run_start",
            Event::TurnStart { .. } => "turn_start",
            Event::SubjectResponse { .. } => "subject_response",
            Event::CapabilityExecution { .. } => "capability_execution",
            Event::ScoreUpdate { .. } => "score_update",
            Event::TurnComplete { .. } => "turn_complete",
            Event::Error { .. } => "error",
            Event::RunComplete { .. } => "run_complete",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EventRecord {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step_number: Option<u32>,
    pub timestamp: String,
    #[serde(flatten)]
    pub event: Event,
}

impl EventRecord {
    /// Stamp `event` with the current time. `turn` is `None` for run-level events.
    pub fn now(turn: Option<u32>, event: Event) -> Self {
        Self {
            step_number: turn,
            timestamp: Utc::now().to_rfc3339(),
            event,
        }
    }
}

/// Destination for event records.
pub trait EventSink: Send + Sync {
    fn append(&self, record: &EventRecord) -> Result<()>;
}

/// Cloneable handle the pipeline and agents emit through.
///
/// A failed write is logged and otherwise ignored; the event log never
/// decides the outcome of a turn.
#[derive(Clone)]
pub struct EventRecorder {
    sink: Arc<dyn EventSink>,
}

impl EventRecorder {
    pub fn new(sink: Arc<dyn EventSink>) -> Self {
        Self { sink }
    }

    pub fn emit(&self, turn: Option<u32>, event: Event) {
        let event_type = event.event_type();
        if let Err(err) = self.sink.append(&EventRecord::now(turn, event)) {
            warn!(event_type, err = %format!("{err:#}"), "failed to record event");
        }
    }
}

/// Event sink writing one JSON object per line, flushed per record.
pub struct JsonlEventLog {
    path: PathBuf,
    file: Mutex<File>,
}

impl JsonlEventLog {
    /// Create (or truncate) the log file, creating parent directories.
    pub fn create(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create event log dir {}", parent.display()))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)
            .with_context(|| format!("create event log {}", path.display()))?;
        Ok(Self {
            path: path.to_path_buf(),
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl EventSink for JsonlEventLog {
    fn append(&self, record: &EventRecord) -> Result<()> {
        let mut line = serde_json::to_string(record).context("serialize event")?;
        line.push('\n');
        let mut file = self.file.lock().unwrap_or_else(PoisonError::into_inner);
        file.write_all(line.as_bytes())
            .with_context(|| format!("append event {}", self.path.display()))?;
        file.flush()
            .with_context(|| format!("flush event log {}", self.path.display()))
    }
}

/// In-memory sink, for embedding the engine and for tests.
#[derive(Debug, Default)]
pub struct MemoryEventLog {
    records: Mutex<Vec<Value>>,
}

impl MemoryEventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Recorded events as serialized JSON values.
    pub fn records(&self) -> Vec<Value> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn event_types(&self) -> Vec<String> {
        self.records()
            .iter()
            .filter_map(|record| record["event_type"].as_str().map(str::to_string))
            .collect()
    }

    /// Records whose `event_type` equals `event_type`.
    pub fn of_type(&self, event_type: &str) -> Vec<Value> {
        self.records()
            .into_iter()
            .filter(|record| record["event_type"] == event_type)
            .collect()
    }
}

impl EventSink for MemoryEventLog {
    fn append(&self, record: &EventRecord) -> Result<()> {
        let value = serde_json::to_value(record).context("serialize event")?;
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(value);
        Ok(())
    }
}

/// Read every record of a JSONL log. Blank lines are skipped.
pub fn read_events(path: &Path) -> Result<Vec<Value>> {
    let file = File::open(path).with_context(|| format!("open event log {}", path.display()))?;
    let mut records = Vec::new();
    for (index, line) in BufReader::new(file).lines().enumerate() {
        let line = line.with_context(|| format!("read {}", path.display()))?;
        if line.trim().is_empty() {
            continue;
        }
        let record = serde_json::from_str(&line)
            .with_context(|| format!("parse {} line {}", path.display(), index + 1))?;
        records.push(record);
    }
    Ok(records)
}

/// The last record of a log, if it parses.
pub fn last_record(path: &Path) -> Option<Value> {
    let contents = fs::read_to_string(path).ok()?;
    let line = contents.lines().rev().find(|line| !line.trim().is_empty())?;
    serde_json::from_str(line).ok()
}

/// True when the last record of the log is `run_complete`.
///
/// Missing, empty or unparsable logs count as incomplete.
pub fn is_run_complete(path: &Path) -> bool {
    last_record(path).is_some_and(|record| record["event_type"] == "run_complete")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn turn_start() -> Event {
        Event::TurnStart {
            current_phase: Phase::Triage,
            pending_tasks: vec!["primary category".to_string()],
        }
    }

    #[test]
    fn records_flatten_event_fields() {
        let record = EventRecord::now(Some(3), turn_start());
        let value = serde_json::to_value(&record).expect("json");
        assert_eq!(value["event_type"], "turn_start");
        assert_eq!(value["step_number"], 3);
        assert_eq!(value["current_phase"], "triage");
        assert!(value["timestamp"].as_str().is_some());

        let run_level = serde_json::to_value(EventRecord::now(None, turn_start())).expect("json");
        assert!(run_level.get("step_number").is_none());
    }

    #[test]
    fn event_type_matches_serialized_tag() {
        let event = Event::Error {
            stage: Stage::Classify,
            message: "boom".to_string(),
            context: None,
        };
        let value = serde_json::to_value(EventRecord::now(Some(1), event.clone())).expect("json");
        assert_eq!(value["event_type"], event.event_type());
        assert_eq!(value["stage"], "classify");
        assert!(value.get("context").is_none());
    }

    #[test]
    fn jsonl_log_appends_lines_and_detects_completion() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("events").join("run.jsonl");
        let log = JsonlEventLog::create(&path).expect("create");
        log.append(&EventRecord::now(Some(1), turn_start()))
            .expect("append");
        assert!(!is_run_complete(&path));

        log.append(&EventRecord::now(
            None,
            Event::RunComplete {
                total_turns: 1,
                success: false,
                stop_reason: "max_turns_reached".to_string(),
                error: None,
                final_summary: crate::core::task_board::TaskBoard::new(
                    &crate::core::catalog::TaskCatalog::default(),
                    0.85,
                    4,
                )
                .summary(2),
            },
        ))
        .expect("append");

        let records = read_events(&path).expect("read");
        assert_eq!(records.len(), 2);
        assert_eq!(records[1]["event_type"], "run_complete");
        assert!(is_run_complete(&path));
        assert!(!is_run_complete(&temp.path().join("missing.jsonl")));
    }

    #[test]
    fn memory_log_filters_by_type() {
        let log = MemoryEventLog::new();
        log.append(&EventRecord::now(Some(1), turn_start()))
            .expect("append");
        assert_eq!(log.event_types(), vec!["turn_start".to_string()]);
        assert_eq!(log.of_type("turn_start").len(), 1);
        assert!(log.of_type("error").is_empty());
    }
}
