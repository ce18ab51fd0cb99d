//! Shard execution engine
//!
//! Single-shard runs, bounded retries and parallel fan-out.

mod parallel;
mod retry;
mod runner;

pub use parallel::{FanOut, ParallelExecutor};
#[cfg(test)]
pub use retry::execute_with_retry;
pub use retry::{RetryPolicy, ShardExecution};
pub use runner::ShardRunner;
