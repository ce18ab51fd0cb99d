//! Bounded retry of a single shard
//!
//! Attempts of one shard run strictly one after another; budgets are
//! never shared between shards.

use std::collections::BTreeSet;
use std::future::Future;
use tracing::{debug, warn};

use crate::models::{ShardAttempt, ShardSpec, TestId};

/// Every attempt made for one shard, terminal attempt last
#[derive(Clone, Debug)]
pub struct ShardExecution {
    pub terminal: ShardAttempt,
    pub earlier: Vec<ShardAttempt>,
}

impl ShardExecution {
    pub fn attempts(&self) -> usize {
        self.earlier.len() + 1
    }

    /// Tests that failed in an earlier attempt but passed in the terminal one
    pub fn flaky_tests(&self) -> BTreeSet<TestId> {
        self.earlier
            .iter()
            .flat_map(|attempt| attempt.failed.iter())
            .filter(|id| self.terminal.passed.contains(*id))
            .cloned()
            .collect()
    }
}

/// Retry budget applied to each shard independently
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    retry_budget: u32,
}

impl RetryPolicy {
    pub fn new(retry_budget: u32) -> Self {
        Self { retry_budget }
    }

    pub fn max_attempts(&self) -> u32 {
        self.retry_budget.saturating_add(1)
    }

    /// Run `run` until it succeeds or the budget is spent
    ///
    /// `run` receives the shard and the 1-based attempt number. A failed
    /// last attempt is returned as-is.
    pub async fn execute<F, Fut>(&self, spec: ShardSpec, mut run: F) -> ShardExecution
    where
        F: FnMut(ShardSpec, u32) -> Fut,
        Fut: Future<Output = ShardAttempt>,
    {
        let max_attempts = self.max_attempts();
        let mut earlier = Vec::new();
        let mut attempt_number = 1;

        loop {
            let attempt = run(spec, attempt_number).await;

            if !attempt.outcome.is_retryable() || attempt_number >= max_attempts {
                if !attempt.outcome.is_success() {
                    warn!(
                        "Shard {} finished {} after {} attempt(s)",
                        spec, attempt.outcome, attempt_number
                    );
                }
                return ShardExecution {
                    terminal: attempt,
                    earlier,
                };
            }

            debug!(
                "Shard {} attempt {}/{} was {}, retrying",
                spec, attempt_number, max_attempts, attempt.outcome
            );
            earlier.push(attempt);
            attempt_number += 1;
        }
    }
}

/// Run one shard with `retry_budget` extra attempts, returning the terminal attempt
#[cfg(test)]
pub async fn execute_with_retry<F, Fut>(spec: ShardSpec, retry_budget: u32, run: F) -> ShardAttempt
where
    F: FnMut(ShardSpec, u32) -> Fut,
    Fut: Future<Output = ShardAttempt>,
{
    RetryPolicy::new(retry_budget)
        .execute(spec, run)
        .await
        .terminal
}
