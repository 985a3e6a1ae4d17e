//! Per-case event log placement and resume checks.
//!
//! A case whose log ends with `run_complete` is done and skipped on the next
//! batch run, unless the run was interrupted. Anything else left behind
//! (empty, truncated or interrupted logs) is removed so the case starts over.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use interview::engine::sanitize_label;
use interview::io::event_log::last_record;
use tracing::{debug, warn};

use crate::dataset::IndexedCase;

/// What was found at a case's log path before running it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogState {
    /// A finished run; skip the case.
    Complete,
    /// Nothing usable; run the case.
    Fresh,
}

pub fn log_path(out_dir: &Path, case: &IndexedCase) -> PathBuf {
    out_dir.join(format!(
        "{:05}-{}.jsonl",
        case.index,
        sanitize_label(&case.case.label())
    ))
}

pub fn summary_path(out_dir: &Path) -> PathBuf {
    out_dir.join("summary.json")
}

/// Inspect the log at `path`, deleting it unless it holds a finished run.
pub fn prepare_log(path: &Path) -> Result<LogState> {
    if !path.exists() {
        return Ok(LogState::Fresh);
    }
    match last_record(path) {
        Some(record)
            if record["event_type"] == "run_complete" && record["stop_reason"] != "interrupted" =>
        {
            debug!(path = %path.display(), "finished log found");
            Ok(LogState::Complete)
        }
        _ => {
            warn!(path = %path.display(), "removing incomplete event log");
            fs::remove_file(path).with_context(|| format!("remove {}", path.display()))?;
            Ok(LogState::Fresh)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use interview::core::types::CaseContext;
    use serde_json::json;
    use tempfile::tempdir;

    fn indexed(index: usize, value: serde_json::Value) -> IndexedCase {
        IndexedCase {
            index,
            case: serde_json::from_value::<CaseContext>(value).expect("case"),
        }
    }

    #[test]
    fn log_path_uses_index_and_label() {
        let case = indexed(7, json!({"id": "abc/1"}));
        assert_eq!(
            log_path(Path::new("/out"), &case),
            PathBuf::from("/out/00007-abc_1.jsonl")
        );
    }

    #[test]
    fn finished_logs_are_kept() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("done.jsonl");
        fs::write(
            &path,
            "{\"event_type\":\"run_start\"}\n{\"event_type\":\"run_complete\",\"stop_reason\":\"max_turns_reached\"}\n",
        )
        .expect("write");
        assert_eq!(prepare_log(&path).expect("prepare"), LogState::Complete);
        assert!(path.exists());
    }

    #[test]
    fn truncated_empty_and_interrupted_logs_are_removed() {
        let temp = tempdir().expect("tempdir");
        let logs = [
            ("empty.jsonl", ""),
            ("truncated.jsonl", "{\"event_type\":\"run_start\"}\n{\"event_ty"),
            ("partial.jsonl", "{\"event_type\":\"turn_start\"}\n"),
            (
                "interrupted.jsonl",
                "{\"event_type\":\"run_complete\",\"stop_reason\":\"interrupted\"}\n",
            ),
        ];
        for (name, contents) in logs {
            let path = temp.path().join(name);
            fs::write(&path, contents).expect("write");
            assert_eq!(prepare_log(&path).expect("prepare"), LogState::Fresh, "{name}");
            assert!(!path.exists(), "{name}");
        }
        assert_eq!(
            prepare_log(&temp.path().join("missing.jsonl")).expect("prepare"),
            LogState::Fresh
        );
    }
}
