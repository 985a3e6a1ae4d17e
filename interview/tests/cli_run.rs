//! CLI tests: spawn the interview binary against a shell-script backend.

#![cfg(unix)]

use std::fs;
use std::path::Path;
use std::process::Command;

use interview::exit_codes;
use interview::io::config::{EngineConfig, write_config};
use interview::io::event_log::read_events;
use serde_json::Value;

const BACKEND: &str = r#"#!/bin/sh
cat > /dev/null
case "$INTERVIEW_ROLE" in
  subject_simulation) echo "I have had a cough for a week." ;;
  extraction) echo '{"chief_complaint": "cough", "present_illness": "one week", "past_history": ""}' ;;
  classification) echo '{"primary_category": "internal medicine", "secondary_category": "respiratory", "reasoning": "cough"}' ;;
  task_scoring) echo '{"completion_score": 0.0, "reason": "none"}' ;;
  task_selection) echo '{"selected_task": "primary category", "specific_guidance": "ask"}' ;;
  instruction_composition) echo '{"description": "Clarify the department", "instructions": ["one question"]}' ;;
  question_generation) echo '```json
{"question": "Is the cough dry?"}
```' ;;
  quality_evaluation) echo '{"clinical_inquiry": {"score": 3, "comment": "ok"}, "communication_quality": {"score": 3, "comment": "ok"}, "information_completeness": {"score": 3, "comment": "ok"}, "overall_professionalism": {"score": 3, "comment": "ok"}, "present_illness_similarity": {"score": 3, "comment": "ok"}, "past_history_similarity": {"score": 3, "comment": "ok"}, "chief_complaint_similarity": {"score": 3, "comment": "ok"}, "summary": "fine"}' ;;
  *) exit 1 ;;
esac
"#;

fn setup(dir: &Path) {
    let backend = dir.join("backend.sh");
    fs::write(&backend, BACKEND).expect("write backend");
    let mut cfg = EngineConfig::default();
    cfg.capability.command = vec!["sh".to_string(), backend.display().to_string()];
    cfg.capability.timeout_secs = 30;
    cfg.race.redundancy = 2;
    write_config(&dir.join("interview.toml"), &cfg).expect("write config");
    fs::write(
        dir.join("case.json"),
        r#"{"id": "cli-case", "chief_complaint": "cough for a week"}"#,
    )
    .expect("write case");
}

#[test]
fn run_with_one_turn_exits_incomplete_and_writes_events() {
    let temp = tempfile::tempdir().expect("tempdir");
    setup(temp.path());

    let output = Command::new(env!("CARGO_BIN_EXE_interview"))
        .current_dir(temp.path())
        .args([
            "run",
            "--case",
            "case.json",
            "--config",
            "interview.toml",
            "--max-turns",
            "1",
            "--events",
            "events.jsonl",
        ])
        .output()
        .expect("interview run");

    assert_eq!(output.status.code(), Some(exit_codes::INCOMPLETE));
    let report: Value = serde_json::from_slice(&output.stdout).expect("report json");
    assert_eq!(report["success"], false);
    assert_eq!(report["total_turns"], 1);
    assert_eq!(report["stop"]["reason"], "max_turns_reached");
    assert_eq!(report["state"]["last_question"], "Is the cough dry?");

    let records = read_events(&temp.path().join("events.jsonl")).expect("events");
    assert_eq!(records[0]["event_type"], "run_start");
    assert_eq!(records.last().expect("last")["event_type"], "run_complete");
}

#[test]
fn validate_rejects_bad_config() {
    let temp = tempfile::tempdir().expect("tempdir");
    fs::write(temp.path().join("interview.toml"), "max_turns = 0\n").expect("write");

    let status = Command::new(env!("CARGO_BIN_EXE_interview"))
        .current_dir(temp.path())
        .args(["validate", "--config", "interview.toml"])
        .status()
        .expect("interview validate");

    assert_eq!(status.code(), Some(exit_codes::INVALID));
}

#[test]
fn init_then_validate_succeeds() {
    let temp = tempfile::tempdir().expect("tempdir");
    let init = Command::new(env!("CARGO_BIN_EXE_interview"))
        .current_dir(temp.path())
        .arg("init")
        .status()
        .expect("interview init");
    assert_eq!(init.code(), Some(exit_codes::OK));
    assert!(temp.path().join(".interview/interview.toml").exists());
    assert!(temp.path().join(".interview/guidance.toml").exists());

    let validate = Command::new(env!("CARGO_BIN_EXE_interview"))
        .current_dir(temp.path())
        .arg("validate")
        .status()
        .expect("interview validate");
    assert_eq!(validate.code(), Some(exit_codes::OK));
}
