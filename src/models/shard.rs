//! Shard identity models
//!
//! Defines test categories, execution modes and shard specifications.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::SchedulerError;

/// Independent axis of test partitioning
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Broad,
    Legacy,
}

impl Category {
    pub fn name(&self) -> &'static str {
        match self {
            Category::Broad => "broad",
            Category::Legacy => "legacy",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Mode the application under test is built in
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    Development,
    #[default]
    Production,
}

impl ExecutionMode {
    pub fn name(&self) -> &'static str {
        match self {
            ExecutionMode::Development => "development",
            ExecutionMode::Production => "production",
        }
    }

    pub fn from_str(s: &str) -> Option<ExecutionMode> {
        match s.to_lowercase().as_str() {
            "dev" | "development" => Some(ExecutionMode::Development),
            "prod" | "production" => Some(ExecutionMode::Production),
            _ => None,
        }
    }
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// One partition of the corpus: `index` of `total` within a category
///
/// Fields are private so that `1 <= index <= total` always holds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "RawShardSpec")]
pub struct ShardSpec {
    category: Category,
    index: u32,
    total: u32,
}

impl ShardSpec {
    pub fn new(category: Category, index: u32, total: u32) -> Result<Self, SchedulerError> {
        if total < 1 {
            return Err(SchedulerError::invalid(format!(
                "{category} shard total must be at least 1"
            )));
        }
        if index < 1 || index > total {
            return Err(SchedulerError::invalid(format!(
                "{category} shard index {index} outside 1..={total}"
            )));
        }
        Ok(Self {
            category,
            index,
            total,
        })
    }

    pub fn category(&self) -> Category {
        self.category
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn total(&self) -> u32 {
        self.total
    }
}

#[derive(Deserialize)]
struct RawShardSpec {
    category: Category,
    index: u32,
    total: u32,
}

impl TryFrom<RawShardSpec> for ShardSpec {
    type Error = SchedulerError;

    fn try_from(raw: RawShardSpec) -> Result<Self, Self::Error> {
        ShardSpec::new(raw.category, raw.index, raw.total)
    }
}

impl fmt::Display for ShardSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}/{}", self.category, self.index, self.total)
    }
}
