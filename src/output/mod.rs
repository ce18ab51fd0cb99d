//! Output formatting module
//!
//! Renders batch reports and shard matrices for terminals, CI and files.

mod formatter;

pub use formatter::{markdown_summary, shard_statuses_csv, OutputFormat, ResultFormatter};
