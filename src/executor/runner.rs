//! Single shard execution
//!
//! Runs one attempt of one shard through the external executor, bounded
//! by the per-shard timeout.

use chrono::Utc;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::RunConfig;
use crate::external::{BuildArtifact, ExecutionRequest, Partitioner, TestEvent, TestExecutor};
use crate::models::{ShardAttempt, ShardSpec};

/// Executes shard attempts; never fails, only reports outcomes
pub struct ShardRunner {
    executor: Arc<dyn TestExecutor>,
    partitioner: Arc<dyn Partitioner>,
    timeout: Duration,
}

impl ShardRunner {
    pub fn new(
        executor: Arc<dyn TestExecutor>,
        partitioner: Arc<dyn Partitioner>,
        timeout: Duration,
    ) -> Self {
        Self {
            executor,
            partitioner,
            timeout,
        }
    }

    pub fn from_config(
        executor: Arc<dyn TestExecutor>,
        partitioner: Arc<dyn Partitioner>,
        config: &RunConfig,
    ) -> Self {
        Self::new(executor, partitioner, config.per_shard_timeout)
    }

    /// Run a single attempt of `spec` against `artifact`
    pub async fn run(&self, spec: ShardSpec, artifact: &BuildArtifact, attempt: u32) -> ShardAttempt {
        let started_at = Utc::now();
        let request = ExecutionRequest {
            spec,
            attempt,
            artifact: artifact.clone(),
            tests: self.partitioner.select(&spec),
        };

        info!(
            "Running shard {} attempt {} ({} tests)",
            spec,
            attempt,
            request.tests.len()
        );

        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let result =
            tokio::time::timeout(self.timeout, self.executor.execute(&request, events_tx)).await;

        let shard_attempt = match result {
            Ok(Ok(output)) => {
                let succeeded = output.exit_success && output.failed.is_empty();
                let base = if succeeded {
                    ShardAttempt::success(spec, attempt, started_at)
                } else {
                    ShardAttempt::failure(spec, attempt, started_at)
                };
                let base = base.with_results(output.passed, output.failed);
                match (succeeded, output.exit_success, output.exit_code) {
                    (false, false, Some(code)) => base.with_note(format!("runner exited with status {code}")),
                    (false, false, None) => base.with_note("runner terminated by signal"),
                    _ => base,
                }
            }
            Ok(Err(e)) => {
                warn!("Shard {} attempt {} runner error: {}", spec, attempt, e);
                ShardAttempt::failure(spec, attempt, started_at).with_note(e.to_string())
            }
            Err(_) => {
                let mut passed = BTreeSet::new();
                let mut failed = BTreeSet::new();
                while let Ok(event) = events_rx.try_recv() {
                    match event {
                        TestEvent::Passed(id) => {
                            passed.insert(id);
                        }
                        TestEvent::Failed(id) => {
                            failed.insert(id);
                        }
                    }
                }
                warn!(
                    "Shard {} attempt {} timed out after {}s ({} passed, {} failed before cutoff)",
                    spec,
                    attempt,
                    self.timeout.as_secs_f64(),
                    passed.len(),
                    failed.len()
                );
                ShardAttempt::timed_out(spec, attempt, started_at)
                    .with_results(passed, failed)
                    .with_note(format!("exceeded {}s timeout", self.timeout.as_secs_f64()))
            }
        };

        debug!("  {}", shard_attempt);
        shard_attempt
    }
}
