//! Result handling
//!
//! Aggregation of terminal shard attempts, report publishing and the
//! on-disk report store.

mod aggregate;
mod publish;
mod storage;

pub use aggregate::ResultAggregator;
pub use publish::ReportPublisher;
pub use storage::{default_output_dir, generate_run_id, FsSink, ReportStore};
