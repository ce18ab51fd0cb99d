//! External collaborators
//!
//! The scheduler builds nothing, runs no test itself and stores nothing
//! on its own. These traits are the seams to the systems that do, with
//! shell-command and hash-based default implementations.

mod command;
mod partition;

#[cfg(test)]
pub mod fake;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tokio::sync::mpsc::UnboundedSender;

use crate::error::{BuildError, RunnerError, SinkError};
use crate::models::{ExecutionMode, ShardSpec, TestId};

pub use command::{CommandBuilder, CommandExecutor};
pub use partition::{HashPartitioner, TestCorpus};

/// Handle to a prebuilt application, passed unchanged to every shard
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildArtifact {
    pub mode: ExecutionMode,
    pub location: String,
}

impl BuildArtifact {
    pub fn new(mode: ExecutionMode, location: impl Into<String>) -> Self {
        Self {
            mode,
            location: location.into(),
        }
    }
}

/// Both build artifacts of a batch
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildSet {
    pub development: BuildArtifact,
    pub production: BuildArtifact,
}

impl BuildSet {
    pub fn for_mode(&self, mode: ExecutionMode) -> &BuildArtifact {
        match mode {
            ExecutionMode::Development => &self.development,
            ExecutionMode::Production => &self.production,
        }
    }
}

/// Produces the application under test
#[async_trait]
pub trait Builder: Send + Sync {
    async fn build(&self, mode: ExecutionMode) -> Result<BuildArtifact, BuildError>;
}

/// Deterministic mapping from a shard to its slice of the corpus
pub trait Partitioner: Send + Sync {
    fn select(&self, spec: &ShardSpec) -> Vec<TestId>;
}

/// Everything the external runner needs to execute one shard attempt
#[derive(Clone, Debug)]
pub struct ExecutionRequest {
    pub spec: ShardSpec,
    pub attempt: u32,
    pub artifact: BuildArtifact,
    pub tests: Vec<TestId>,
}

/// Per-test result observed while a shard is still running
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TestEvent {
    Passed(TestId),
    Failed(TestId),
}

/// Structured result of a finished runner invocation
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExecutionOutput {
    pub exit_success: bool,
    pub exit_code: Option<i32>,
    pub passed: BTreeSet<TestId>,
    pub failed: BTreeSet<TestId>,
}

/// Runs one shard's tests against a build artifact
///
/// Implementations should send a [`TestEvent`] per observed result so a
/// timed-out shard still reports what it saw before the cutoff.
#[async_trait]
pub trait TestExecutor: Send + Sync {
    async fn execute(
        &self,
        request: &ExecutionRequest,
        events: UnboundedSender<TestEvent>,
    ) -> Result<ExecutionOutput, RunnerError>;
}

/// Destination for published report artifacts
#[async_trait]
pub trait ArtifactSink: Send + Sync {
    /// Store `payload` under `name` and return where it ended up
    async fn publish(&self, name: &str, payload: &[u8]) -> Result<String, SinkError>;
}
