mod cli;
mod dataset;
mod report;
mod results;
mod run;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use interview::{exit_codes, logging};

#[derive(Parser)]
#[command(
    name = "interview-batch",
    version,
    about = "Run a dataset of cases through the interview engine"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Interview every case in a range of the dataset and write `summary.json`.
    Run(RunArgs),
}

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// JSON file holding an array of case objects.
    #[arg(long)]
    pub dataset: PathBuf,
    /// First dataset index to run.
    #[arg(long, default_value_t = 0)]
    pub start: usize,
    /// Index one past the last case to run (default: end of dataset).
    #[arg(long)]
    pub end: Option<usize>,
    /// Run at most this many cases.
    #[arg(long)]
    pub limit: Option<usize>,
    /// Cases in flight at once.
    #[arg(long, default_value_t = 4, value_parser = clap::value_parser!(u32).range(1..))]
    pub concurrency: u32,
    #[arg(long, default_value = ".interview/interview.toml")]
    pub config: PathBuf,
    /// Directory for per-case event logs and `summary.json`.
    #[arg(long, default_value = "batch-results")]
    pub out: PathBuf,
}

#[tokio::main]
async fn main() {
    logging::init();
    let cli = Cli::parse();
    let code = match cli.command {
        Command::Run(args) => match cli::run_dataset(&args).await {
            Ok(code) => code,
            Err(err) => {
                eprintln!("{err:#}");
                exit_codes::INVALID
            }
        },
    };
    std::process::exit(code);
}
