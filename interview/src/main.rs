//! Interview engine CLI.
//!
//! `init` writes a default config and guidance library under `.interview/`,
//! `validate` checks them, and `run` interviews one case and prints the final
//! report as JSON.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use interview::core::selector::SelectionPolicy;
use interview::engine::{Engine, Overrides};
use interview::exit_codes;
use interview::io::case_file::load_case;
use interview::io::config::{DEFAULT_CONFIG_FILE, EngineConfig, write_config};
use interview::io::guidance::{GuidanceLibrary, write_library};
use interview::logging;
use interview::looping::StopReason;
use tokio_util::sync::CancellationToken;
use tracing::warn;

const STATE_DIR: &str = ".interview";
const GUIDANCE_FILE: &str = "guidance.toml";

#[derive(Parser)]
#[command(
    name = "interview",
    version,
    about = "Multi-turn interview orchestration engine"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create `.interview/interview.toml` and an example guidance library if missing.
    Init {
        /// Overwrite existing files.
        #[arg(short, long)]
        force: bool,
    },
    /// Check config, task catalog and guidance library.
    Validate {
        #[arg(long, default_value_os_t = default_config_path())]
        config: PathBuf,
    },
    /// Interview one case and print the final report.
    Run {
        /// JSON file holding one case object.
        #[arg(long)]
        case: PathBuf,
        #[arg(long, default_value_os_t = default_config_path())]
        config: PathBuf,
        #[arg(long)]
        max_turns: Option<u32>,
        /// reasoning, sequence or score_driven.
        #[arg(long)]
        policy: Option<SelectionPolicy>,
        /// Event log path (default: a timestamped file under the events dir).
        #[arg(long)]
        events: Option<PathBuf>,
    },
}

fn default_config_path() -> PathBuf {
    Path::new(STATE_DIR).join(DEFAULT_CONFIG_FILE)
}

#[tokio::main]
async fn main() {
    logging::init();
    let code = match run().await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{err:#}");
            exit_codes::INVALID
        }
    };
    std::process::exit(code);
}

async fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Init { force } => cmd_init(Path::new(STATE_DIR), force).map(|()| exit_codes::OK),
        Command::Validate { config } => cmd_validate(&config).map(|()| exit_codes::OK),
        Command::Run {
            case,
            config,
            max_turns,
            policy,
            events,
        } => {
            cmd_run(
                &case,
                &config,
                Overrides { max_turns, policy },
                events.as_deref(),
            )
            .await
        }
    }
}

fn cmd_init(state_dir: &Path, force: bool) -> Result<()> {
    fs::create_dir_all(state_dir)
        .with_context(|| format!("create {}", state_dir.display()))?;

    let guidance_path = state_dir.join(GUIDANCE_FILE);
    if force || !guidance_path.exists() {
        write_library(&guidance_path, &GuidanceLibrary::example())?;
    }

    let config_path = state_dir.join(DEFAULT_CONFIG_FILE);
    if force || !config_path.exists() {
        let mut cfg = EngineConfig::default();
        cfg.guidance.path = Some(PathBuf::from(GUIDANCE_FILE));
        write_config(&config_path, &cfg)?;
    }
    Ok(())
}

fn cmd_validate(config: &Path) -> Result<()> {
    let engine = Engine::load(config, Overrides::default())?;
    engine.check_roles()?;
    println!(
        "ok: {} tasks, policy {}",
        engine.catalog().total_tasks(),
        engine.config().selection_policy
    );
    Ok(())
}

async fn cmd_run(
    case_path: &Path,
    config: &Path,
    overrides: Overrides,
    events: Option<&Path>,
) -> Result<i32> {
    let engine = Engine::load(config, overrides)?;
    let case = load_case(case_path)?;
    let events_path = match events {
        Some(path) => path.to_path_buf(),
        None => engine.default_events_path(&case),
    };

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received; stopping after cleanup");
            on_signal.cancel();
        }
    });

    let report = engine.run_case(case, &events_path, cancel).await?;
    println!(
        "{}",
        serde_json::to_string_pretty(&report).context("serialize final report")?
    );
    if let Some(err) = report.error() {
        eprintln!("{err}");
    }
    eprintln!("events: {}", events_path.display());

    Ok(match report.stop {
        StopReason::Completed => exit_codes::OK,
        StopReason::Interrupted => exit_codes::INTERRUPTED,
        StopReason::MaxTurnsReached | StopReason::TurnFailed { .. } | StopReason::Error { .. } => {
            exit_codes::INCOMPLETE
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use interview::io::config::load_config;

    #[test]
    fn parse_init() {
        let cli = Cli::parse_from(["interview", "init"]);
        assert!(matches!(cli.command, Command::Init { force: false }));
    }

    #[test]
    fn parse_run_with_overrides() {
        let cli = Cli::parse_from([
            "interview",
            "run",
            "--case",
            "case.json",
            "--max-turns",
            "3",
            "--policy",
            "score_driven",
        ]);
        let Command::Run {
            case,
            config,
            max_turns,
            policy,
            events,
        } = cli.command
        else {
            panic!("expected run");
        };
        assert_eq!(case, PathBuf::from("case.json"));
        assert_eq!(config, default_config_path());
        assert_eq!(max_turns, Some(3));
        assert_eq!(policy, Some(SelectionPolicy::ScoreDriven));
        assert!(events.is_none());
    }

    #[test]
    fn rejects_unknown_policy() {
        assert!(
            Cli::try_parse_from(["interview", "run", "--case", "c.json", "--policy", "random"])
                .is_err()
        );
    }

    #[test]
    fn init_writes_loadable_config_and_guidance() {
        let temp = tempfile::tempdir().expect("tempdir");
        let state_dir = temp.path().join(STATE_DIR);
        cmd_init(&state_dir, false).expect("init");

        let config_path = state_dir.join(DEFAULT_CONFIG_FILE);
        let cfg = load_config(&config_path).expect("config");
        assert_eq!(cfg.guidance.path, Some(PathBuf::from(GUIDANCE_FILE)));
        cmd_validate(&config_path).expect("validate");

        // Without --force existing files are kept.
        fs::write(&config_path, "max_turns = 7\n").expect("edit");
        cmd_init(&state_dir, false).expect("init again");
        assert_eq!(load_config(&config_path).expect("config").max_turns, 7);
        cmd_init(&state_dir, true).expect("force");
        assert_eq!(load_config(&config_path).expect("config").max_turns, 30);
    }
}
