//! Consolidated report models
//!
//! Defines the per-shard status table and the batch-level report built
//! from all terminal shard attempts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use super::{AttemptOutcome, ShardSpec, TestId};

/// Terminal status of a shard within a batch
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShardStatus {
    Success,
    Failure,
    TimedOut,
    /// No terminal attempt was ever produced
    Missing,
}

impl ShardStatus {
    pub fn symbol(&self) -> &'static str {
        match self {
            ShardStatus::Success => "✓",
            ShardStatus::Failure => "✗",
            ShardStatus::TimedOut => "⏱",
            ShardStatus::Missing => "?",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ShardStatus::Success)
    }

    /// Machine-readable name, matching the serialized form
    pub fn name(&self) -> &'static str {
        match self {
            ShardStatus::Success => "success",
            ShardStatus::Failure => "failure",
            ShardStatus::TimedOut => "timed_out",
            ShardStatus::Missing => "missing",
        }
    }
}

impl From<AttemptOutcome> for ShardStatus {
    fn from(outcome: AttemptOutcome) -> Self {
        match outcome {
            AttemptOutcome::Success => ShardStatus::Success,
            AttemptOutcome::Failure => ShardStatus::Failure,
            AttemptOutcome::TimedOut => ShardStatus::TimedOut,
        }
    }
}

impl fmt::Display for ShardStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShardStatus::Success => write!(f, "SUCCESS"),
            ShardStatus::Failure => write!(f, "FAILURE"),
            ShardStatus::TimedOut => write!(f, "TIMED OUT"),
            ShardStatus::Missing => write!(f, "MISSING"),
        }
    }
}

/// Overall verdict of a batch
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchOutcome {
    Success,
    Failure,
}

impl BatchOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, BatchOutcome::Success)
    }
}

impl fmt::Display for BatchOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BatchOutcome::Success => write!(f, "SUCCESS"),
            BatchOutcome::Failure => write!(f, "FAILURE"),
        }
    }
}

/// Status row for one shard
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardStatusEntry {
    pub spec: ShardSpec,
    pub status: ShardStatus,
    /// Number of the terminal attempt, 0 when missing
    pub attempts: u32,
    /// Whether this shard alone makes the batch fail
    pub fatal: bool,
    pub passed: usize,
    pub failed: usize,
    pub note: Option<String>,
}

/// A test reported passed by some shards and failed by others
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsistencyAnomaly {
    pub test_id: TestId,
    pub passed_in: Vec<ShardSpec>,
    pub failed_in: Vec<ShardSpec>,
}

impl fmt::Display for ConsistencyAnomaly {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let join = |specs: &[ShardSpec]| {
            specs
                .iter()
                .map(|s| s.to_string())
                .collect::<Vec<_>>()
                .join(", ")
        };
        write!(
            f,
            "{}: passed in [{}], failed in [{}]",
            self.test_id,
            join(&self.passed_in),
            join(&self.failed_in)
        )
    }
}

/// Single-batch report folded from all terminal shard attempts
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsolidatedReport {
    pub outcome: BatchOutcome,
    pub continue_on_error: bool,
    pub passed: BTreeSet<TestId>,
    pub failed: BTreeSet<TestId>,
    /// Sorted by shard spec
    pub shard_statuses: Vec<ShardStatusEntry>,
    pub anomalies: Vec<ConsistencyAnomaly>,
    /// Tests that failed in an earlier attempt and passed in the terminal one
    #[serde(default)]
    pub flaky: BTreeSet<TestId>,
    /// Latest finish time among terminal attempts
    pub completed_at: Option<DateTime<Utc>>,
}

impl ConsolidatedReport {
    #[cfg(test)]
    pub fn status_of(&self, spec: &ShardSpec) -> Option<ShardStatus> {
        self.shard_statuses
            .binary_search_by(|entry| entry.spec.cmp(spec))
            .ok()
            .map(|i| self.shard_statuses[i].status)
    }

    pub fn count_status(&self, status: ShardStatus) -> usize {
        self.shard_statuses
            .iter()
            .filter(|entry| entry.status == status)
            .count()
    }

    /// Shards that make the batch fail
    pub fn fatal_shards(&self) -> Vec<&ShardStatusEntry> {
        self.shard_statuses.iter().filter(|e| e.fatal).collect()
    }

    pub fn total_tests(&self) -> usize {
        self.passed.len() + self.failed.len()
    }

    pub fn pass_rate(&self) -> f64 {
        let total = self.total_tests();
        if total == 0 {
            0.0
        } else {
            (self.passed.len() as f64 / total as f64) * 100.0
        }
    }
}

impl fmt::Display for ConsolidatedReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Batch {}", self.outcome)?;
        writeln!(f, "━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━")?;
        for entry in &self.shard_statuses {
            write!(
                f,
                "  {} {:<14} {:<10} attempts: {}",
                entry.status.symbol(),
                entry.spec.to_string(),
                entry.status.to_string(),
                entry.attempts
            )?;
            if entry.fatal {
                write!(f, " (fatal)")?;
            }
            writeln!(f)?;
        }
        writeln!(f, "━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━")?;
        writeln!(
            f,
            "Tests: {} | Pass: {} | Fail: {} | Anomalies: {} | Flaky: {}",
            self.total_tests(),
            self.passed.len(),
            self.failed.len(),
            self.anomalies.len(),
            self.flaky.len()
        )?;
        writeln!(f, "Pass Rate: {:.1}%", self.pass_rate())
    }
}
