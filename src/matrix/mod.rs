//! Shard matrix generation
//!
//! Turns shard counts into the ordered list of shards a batch fans out to.

use serde::Serialize;

use crate::config::RunConfig;
use crate::error::SchedulerError;
use crate::models::{Category, ShardSpec};

/// Ordered shard specs `1..=total` for one category
pub fn generate(category: Category, total: u32) -> Result<Vec<ShardSpec>, SchedulerError> {
    if total < 1 {
        return Err(SchedulerError::invalid(format!(
            "{category} shard count must be at least 1, got {total}"
        )));
    }
    (1..=total)
        .map(|index| ShardSpec::new(category, index, total))
        .collect()
}

/// Shards of both categories for one batch
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ShardMatrix {
    pub broad: Vec<ShardSpec>,
    pub legacy: Vec<ShardSpec>,
}

impl ShardMatrix {
    pub fn new(total_broad: u32, total_legacy: u32) -> Result<Self, SchedulerError> {
        Ok(Self {
            broad: generate(Category::Broad, total_broad)?,
            legacy: generate(Category::Legacy, total_legacy)?,
        })
    }

    pub fn from_config(config: &RunConfig) -> Result<Self, SchedulerError> {
        Self::new(config.total_shards_broad, config.total_shards_legacy)
    }

    pub fn len(&self) -> usize {
        self.broad.len() + self.legacy.len()
    }

    /// Broad shards first, then legacy
    pub fn specs(&self) -> Vec<ShardSpec> {
        self.broad.iter().chain(&self.legacy).copied().collect()
    }

    /// CI-style job matrix: `{"broad": [1, 2], "legacy": [1]}`
    pub fn to_job_matrix(&self) -> JobMatrix {
        JobMatrix {
            broad: self.broad.iter().map(ShardSpec::index).collect(),
            legacy: self.legacy.iter().map(ShardSpec::index).collect(),
        }
    }
}

/// Index lists per category, as consumed by CI matrix strategies
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct JobMatrix {
    pub broad: Vec<u32>,
    pub legacy: Vec<u32>,
}
