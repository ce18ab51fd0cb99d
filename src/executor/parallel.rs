//! Parallel shard execution
//!
//! Spawns one task per shard, bounded by a semaphore, and joins them all
//! behind a single barrier. A failing shard never cancels its siblings;
//! only the batch cancellation token stops running shards.

use futures::future::join_all;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::{RetryPolicy, ShardExecution, ShardRunner};
use crate::external::BuildArtifact;
use crate::models::ShardSpec;

/// Bounded-concurrency shard executor
pub struct ParallelExecutor {
    max_concurrent: usize,
    policy: RetryPolicy,
}

impl ParallelExecutor {
    pub fn new(max_concurrent: usize, retry_budget: u32) -> Self {
        Self {
            max_concurrent: max_concurrent.max(1),
            policy: RetryPolicy::new(retry_budget),
        }
    }

    /// Spawn a task for every shard; each retries within its own budget
    pub fn spawn(
        &self,
        specs: Vec<ShardSpec>,
        runner: Arc<ShardRunner>,
        artifact: BuildArtifact,
        cancel: CancellationToken,
    ) -> ShardTasks {
        info!(
            "Dispatching {} shards (max {} concurrent, {} attempt(s) each)",
            specs.len(),
            self.max_concurrent,
            self.policy.max_attempts()
        );

        let semaphore = Arc::new(Semaphore::new(self.max_concurrent));
        let mut handles = Vec::with_capacity(specs.len());

        for spec in specs {
            let semaphore = semaphore.clone();
            let runner = runner.clone();
            let artifact = artifact.clone();
            let cancel = cancel.clone();
            let policy = self.policy;

            let handle = tokio::spawn(async move {
                let work = async {
                    let _permit = semaphore.acquire_owned().await.ok()?;
                    debug!("Starting shard {}", spec);

                    let execution = policy
                        .execute(spec, |spec, attempt| {
                            let runner = runner.clone();
                            let artifact = artifact.clone();
                            async move { runner.run(spec, &artifact, attempt).await }
                        })
                        .await;
                    Some(execution)
                };

                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => None,
                    execution = work => execution,
                }
            });

            handles.push((spec, handle));
        }

        ShardTasks {
            handles,
            cancel,
            started: Instant::now(),
        }
    }
}

/// In-flight shard tasks of one batch
pub struct ShardTasks {
    handles: Vec<(ShardSpec, JoinHandle<Option<ShardExecution>>)>,
    cancel: CancellationToken,
    started: Instant,
}

impl ShardTasks {
    /// Wait for every shard to reach a terminal state
    pub async fn join(self) -> FanOut {
        let results = join_all(
            self.handles
                .into_iter()
                .map(|(spec, handle)| async move { (spec, handle.await) }),
        )
        .await;

        let mut executions = Vec::new();
        let mut missing = Vec::new();

        for (spec, result) in results {
            match result {
                Ok(Some(execution)) => {
                    debug!(
                        "Shard {} terminal after {} attempt(s)",
                        spec,
                        execution.attempts()
                    );
                    executions.push(execution);
                }
                Ok(None) => {
                    debug!("Shard {} stopped before reaching a terminal attempt", spec);
                    missing.push(spec);
                }
                Err(e) => {
                    error!("Shard {} task failed: {}", spec, e);
                    missing.push(spec);
                }
            }
        }

        info!(
            "All shard tasks joined in {}ms ({} terminal, {} missing)",
            self.started.elapsed().as_millis(),
            executions.len(),
            missing.len()
        );

        FanOut {
            executions,
            missing,
            cancelled: self.cancel.is_cancelled(),
        }
    }
}

/// Everything the join barrier collected
#[derive(Debug)]
pub struct FanOut {
    pub executions: Vec<ShardExecution>,
    /// Shards with no terminal attempt
    pub missing: Vec<ShardSpec>,
    pub cancelled: bool,
}
