//! shardrun - sharded test orchestration
//!
//! Partitions a test corpus into shards per category, runs every shard in
//! parallel against a prebuilt application with a bounded retry budget,
//! and merges all shard results into one consolidated report.
//!
//! ## Usage
//!
//! ```bash
//! # Run 6 broad and 3 legacy shards, one retry each
//! shardrun run --broad 6 --legacy 3 --retries 1 --runner ./run-shard.sh
//!
//! # Print the CI job matrix
//! shardrun matrix --broad 6 --legacy 3
//!
//! # Show the latest published report as markdown
//! shardrun report --format markdown
//! ```

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

mod batch;
mod cli;
mod config;
mod error;
mod executor;
mod external;
mod matrix;
mod models;
mod output;
mod results;
mod utils;

use batch::BatchController;
use cli::Args;
use config::{EnvConfig, SchedulerConfig};
use external::{CommandBuilder, CommandExecutor, HashPartitioner, TestCorpus};
use matrix::ShardMatrix;
use output::{OutputFormat, ResultFormatter};
use results::{generate_run_id, FsSink, ReportStore};
use utils::{init_logger, LogLevel};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let env = EnvConfig::load()?;

    let level = args.log_level.as_deref().or(env.log_level.as_deref());
    init_logger(LogLevel::resolve(args.verbose, level));

    let config = load_config(&args, &env)?;

    match args.command {
        cli::Command::Run(run_args) => {
            let success = run_batch(config, run_args).await?;
            if !success {
                std::process::exit(1);
            }
        }
        cli::Command::Matrix(matrix_args) => {
            show_matrix(config, matrix_args)?;
        }
        cli::Command::Report(report_args) => {
            show_report(config, report_args)?;
        }
        cli::Command::Env => {
            config::env::print_env_help();
            if env.has_any() {
                println!();
                env.print_summary();
            }
        }
    }

    Ok(())
}

/// Defaults, then config file, then environment
fn load_config(args: &Args, env: &EnvConfig) -> Result<SchedulerConfig> {
    let path = args
        .config
        .clone()
        .or_else(|| env.config_file.as_ref().map(PathBuf::from));

    let mut config = SchedulerConfig::load_or_default(path.as_deref())?;
    config.apply_env(env)?;
    Ok(config)
}

fn formatter(format: &str, no_color: bool) -> Result<ResultFormatter> {
    let format =
        OutputFormat::from_str(format).ok_or_else(|| anyhow!("Unknown output format: {format}"))?;
    let formatter = ResultFormatter::new(format);
    Ok(if no_color { formatter.no_color() } else { formatter })
}

async fn run_batch(mut config: SchedulerConfig, args: cli::RunArgs) -> Result<bool> {
    args.apply_to(&mut config)?;
    let run_config = config.run_config()?;
    let formatter = formatter(&args.format, args.no_color)?;

    let runner_command = config
        .commands
        .runner
        .clone()
        .context("No runner command configured (use --runner or commands.runner)")?;

    let corpus = TestCorpus::load(&config.corpus)?;
    let run_id = generate_run_id();
    let sink = FsSink::for_run(config.output_dir(), &run_id);
    info!("Run {} writes to {}", run_id, sink.run_dir().display());

    let mut controller = BatchController::new(
        run_config,
        Arc::new(CommandBuilder::new(config.commands.clone())),
        Arc::new(CommandExecutor::new(runner_command)),
        Arc::new(HashPartitioner::new(corpus)),
        Arc::new(sink),
    )
    .with_run_id(run_id);

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling batch");
            on_signal.cancel();
        }
    });

    let result = controller.run(cancel).await?;
    debug!("Batch transitions: {:?}", result.transitions);

    if let Some(report) = &result.report {
        println!("{}", formatter.format_report(report));
    }

    if !result.partial.is_empty() {
        println!("Shards finished before the batch stopped:");
        for attempt in &result.partial {
            println!("  {attempt}");
        }
    }

    if let Some(error) = &result.error {
        println!("Batch {} failed: {}", result.run_id, error);
    }

    match &result.location {
        Some(location) => println!("Report: {location}"),
        None => info!("Batch {} ended {} without a published report", result.run_id, result.state),
    }

    Ok(result.is_success())
}

fn show_matrix(config: SchedulerConfig, args: cli::MatrixArgs) -> Result<()> {
    let broad = args.broad.unwrap_or(config.shards_broad);
    let legacy = args.legacy.unwrap_or(config.shards_legacy);

    let matrix = ShardMatrix::new(broad, legacy)?;
    println!("{}", formatter(&args.format, true)?.format_matrix(&matrix.to_job_matrix()));
    Ok(())
}

fn show_report(config: SchedulerConfig, args: cli::ReportArgs) -> Result<()> {
    let store = ReportStore::new(args.output_dir.unwrap_or_else(|| config.output_dir()));

    if args.list {
        let runs = store.list_runs()?;
        if runs.is_empty() {
            println!("No reports in {}", store.base_dir().display());
        }
        for run_id in runs {
            println!("{run_id}");
        }
        return Ok(());
    }

    let (run_id, report) = match args.run_id {
        Some(run_id) => {
            let report = store.load(&run_id)?;
            (run_id, report)
        }
        None => store
            .latest()?
            .ok_or_else(|| anyhow!("No reports in {}", store.base_dir().display()))?,
    };

    info!("Showing report {}", run_id);
    println!("{}", formatter(&args.format, false)?.format_report(&report));
    Ok(())
}
