//! CLI argument parsing
//!
//! Defines command-line interface using clap.

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::config::SchedulerConfig;
use crate::models::ExecutionMode;

/// Sharded test orchestration scheduler
#[derive(Parser, Debug)]
#[command(name = "shardrun")]
#[command(version)]
#[command(about = "Split a test corpus into shards, run them in parallel and merge the results")]
#[command(long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Configuration file (defaults to ./shardrun.yaml and friends)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run one test batch
    Run(RunArgs),

    /// Print the shard matrix for CI job strategies
    Matrix(MatrixArgs),

    /// Show a published report
    Report(ReportArgs),

    /// List supported environment variables
    Env,
}

/// Arguments for run command
#[derive(Parser, Debug, Default)]
pub struct RunArgs {
    /// Number of broad shards
    #[arg(short, long)]
    pub broad: Option<u32>,

    /// Number of legacy shards
    #[arg(short, long)]
    pub legacy: Option<u32>,

    /// Extra attempts per shard
    #[arg(short, long)]
    pub retries: Option<u32>,

    /// Per-attempt timeout in seconds
    #[arg(short, long)]
    pub timeout: Option<u64>,

    /// Execution mode (development, production)
    #[arg(short, long)]
    pub mode: Option<String>,

    /// Publish the report even when shards fail
    #[arg(long)]
    pub continue_on_error: bool,

    /// Maximum shards running at once
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// Extra publish attempts when the sink rejects the report
    #[arg(long)]
    pub publish_retries: Option<u32>,

    /// Directory reports are written to
    #[arg(short, long)]
    pub output_dir: Option<PathBuf>,

    /// Command that runs one shard
    #[arg(long)]
    pub runner: Option<String>,

    /// Build command for development mode
    #[arg(long)]
    pub build_dev: Option<String>,

    /// Build command for production mode
    #[arg(long)]
    pub build_prod: Option<String>,

    /// Test list for the broad category
    #[arg(long)]
    pub corpus_broad: Option<PathBuf>,

    /// Test list for the legacy category
    #[arg(long)]
    pub corpus_legacy: Option<PathBuf>,

    /// Output format (table, json, json-pretty, csv, summary, markdown)
    #[arg(short, long, default_value = "table")]
    pub format: String,

    /// Disable colored output
    #[arg(long)]
    pub no_color: bool,
}

impl RunArgs {
    /// Overlay flags that were given on the command line
    pub fn apply_to(&self, config: &mut SchedulerConfig) -> Result<()> {
        if let Some(n) = self.broad {
            config.shards_broad = n;
        }
        if let Some(n) = self.legacy {
            config.shards_legacy = n;
        }
        if let Some(n) = self.retries {
            config.retry_budget = n;
        }
        if let Some(secs) = self.timeout {
            config.shard_timeout_secs = secs;
        }
        if let Some(mode) = &self.mode {
            config.mode = ExecutionMode::from_str(mode)
                .ok_or_else(|| anyhow!("Unknown execution mode: {mode}"))?;
        }
        if self.continue_on_error {
            config.continue_on_error = true;
        }
        if let Some(n) = self.concurrency {
            config.max_concurrent = n;
        }
        if let Some(n) = self.publish_retries {
            config.publish_retries = n;
        }
        if let Some(dir) = &self.output_dir {
            config.output_dir = Some(dir.clone());
        }
        if let Some(cmd) = &self.runner {
            config.commands.runner = Some(cmd.clone());
        }
        if let Some(cmd) = &self.build_dev {
            config.commands.build_development = Some(cmd.clone());
        }
        if let Some(cmd) = &self.build_prod {
            config.commands.build_production = Some(cmd.clone());
        }
        if let Some(path) = &self.corpus_broad {
            config.corpus.broad = path.clone();
        }
        if let Some(path) = &self.corpus_legacy {
            config.corpus.legacy = path.clone();
        }
        Ok(())
    }
}

/// Arguments for matrix command
#[derive(Parser, Debug)]
pub struct MatrixArgs {
    /// Number of broad shards
    #[arg(short, long)]
    pub broad: Option<u32>,

    /// Number of legacy shards
    #[arg(short, long)]
    pub legacy: Option<u32>,

    /// Output format (json, json-pretty, table)
    #[arg(short, long, default_value = "json")]
    pub format: String,
}

/// Arguments for report command
#[derive(Parser, Debug)]
pub struct ReportArgs {
    /// Run ID (defaults to the latest run)
    pub run_id: Option<String>,

    /// List stored runs instead of showing one
    #[arg(long)]
    pub list: bool,

    /// Directory reports were written to
    #[arg(short, long)]
    pub output_dir: Option<PathBuf>,

    /// Output format (table, json, json-pretty, csv, summary, markdown)
    #[arg(short, long, default_value = "table")]
    pub format: String,
}
