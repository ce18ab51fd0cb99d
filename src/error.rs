//! Error types for the scheduler
//!
//! Batch-fatal errors live in [`SchedulerError`]; collaborator errors are
//! kept separate so the places that recover from them stay explicit.

use thiserror::Error;

use crate::batch::BatchState;
use crate::models::ExecutionMode;

/// Errors that end a batch or reject its configuration
#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error(transparent)]
    Build(#[from] BuildError),

    #[error(transparent)]
    Sink(#[from] SinkError),

    #[error("Batch cancelled while {0}")]
    Cancelled(BatchState),

    #[error("Illegal batch transition {from} -> {to}")]
    IllegalTransition { from: BatchState, to: BatchState },
}

impl SchedulerError {
    pub fn invalid(message: impl Into<String>) -> Self {
        SchedulerError::InvalidConfiguration(message.into())
    }
}

/// Build collaborator failure
#[derive(Error, Debug)]
#[error("Build failed for {mode} mode: {message}")]
pub struct BuildError {
    pub mode: ExecutionMode,
    pub message: String,
}

impl BuildError {
    pub fn new(mode: ExecutionMode, message: impl Into<String>) -> Self {
        Self {
            mode,
            message: message.into(),
        }
    }
}

/// External test runner failures, recovered per shard
#[derive(Error, Debug)]
pub enum RunnerError {
    #[error("Malformed runner output: {0}")]
    Malformed(String),

    #[error("Failed to launch runner: {0}")]
    Launch(String),

    #[error("Runner I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Artifact sink failures
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("Sink rejected {name}: {message}")]
    Rejected { name: String, message: String },

    #[error("Sink I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to serialize report: {0}")]
    Serialize(String),

    #[error("Report not accepted after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: Box<SinkError> },
}
