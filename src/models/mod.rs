//! Data models for the scheduler
//!
//! Shard identities, per-shard attempts and the consolidated batch report.

mod attempt;
mod report;
mod shard;

pub use attempt::{AttemptOutcome, ShardAttempt, TestId};
pub use report::{
    BatchOutcome, ConsistencyAnomaly, ConsolidatedReport, ShardStatus, ShardStatusEntry,
};
pub use shard::{Category, ExecutionMode, ShardSpec};
