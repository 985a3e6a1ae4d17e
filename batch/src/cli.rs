//! `run` command implementation.

use std::time::Instant;

use anyhow::{Context, Result};
use chrono::Utc;
use interview::engine::{Engine, Overrides};
use interview::exit_codes;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::RunArgs;
use crate::dataset::{Range, load_range};
use crate::report::{ProcessingConfig, summarize, write_summary};
use crate::results::summary_path;
use crate::run::run_cases;

/// Run the selected cases, write `summary.json` and print it.
///
/// Returns `OK` when every processed case succeeded, `INCOMPLETE` when any
/// failed, `INTERRUPTED` after Ctrl-C.
pub async fn run_dataset(args: &RunArgs) -> Result<i32> {
    let engine = Engine::load(&args.config, Overrides::default())?;
    let cases = load_range(
        &args.dataset,
        Range {
            start: args.start,
            end: args.end,
            limit: args.limit,
        },
    )?;
    std::fs::create_dir_all(&args.out)
        .with_context(|| format!("create {}", args.out.display()))?;
    info!(cases = cases.len(), concurrency = args.concurrency, "batch started");

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received; finishing in-flight cases");
            on_signal.cancel();
        }
    });

    let started_at = Utc::now();
    let clock = Instant::now();
    let outcomes = run_cases(
        &engine,
        cases,
        &args.out,
        args.concurrency as usize,
        cancel.clone(),
    )
    .await;

    let config = ProcessingConfig {
        dataset: args.dataset.clone(),
        start: args.start,
        end: args.end,
        limit: args.limit,
        concurrency: args.concurrency,
        config: args.config.clone(),
        out: args.out.clone(),
        max_turns: engine.config().max_turns,
        selection_policy: engine.config().selection_policy.to_string(),
    };
    let summary = summarize(&outcomes, started_at, clock.elapsed(), config);
    let path = summary_path(&args.out);
    write_summary(&path, &summary)?;
    println!(
        "batch: processed={} succeeded={} failed={} skipped={} success_rate={:.2}",
        summary.processed,
        summary.succeeded,
        summary.failed,
        summary.skipped,
        summary.success_rate
    );
    println!("batch: summary={}", path.display());

    Ok(if cancel.is_cancelled() {
        exit_codes::INTERRUPTED
    } else if summary.failed > 0 {
        exit_codes::INCOMPLETE
    } else {
        exit_codes::OK
    })
}
