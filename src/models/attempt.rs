//! Shard attempt models
//!
//! A shard attempt is one execution of one shard. Retries create new
//! attempts rather than mutating earlier ones.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use super::ShardSpec;

/// Opaque, stable identifier of a single test case
pub type TestId = String;

/// Outcome of a single shard attempt
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    Success,
    Failure,
    TimedOut,
}

impl AttemptOutcome {
    pub fn symbol(&self) -> &'static str {
        match self {
            AttemptOutcome::Success => "✓",
            AttemptOutcome::Failure => "✗",
            AttemptOutcome::TimedOut => "⏱",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, AttemptOutcome::Success)
    }

    /// Failures and timeouts are worth another attempt
    pub fn is_retryable(&self) -> bool {
        !self.is_success()
    }
}

impl fmt::Display for AttemptOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttemptOutcome::Success => write!(f, "SUCCESS"),
            AttemptOutcome::Failure => write!(f, "FAILURE"),
            AttemptOutcome::TimedOut => write!(f, "TIMED OUT"),
        }
    }
}

/// Result of executing one shard once
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardAttempt {
    pub spec: ShardSpec,
    pub attempt: u32,
    pub outcome: AttemptOutcome,
    pub passed: BTreeSet<TestId>,
    pub failed: BTreeSet<TestId>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub note: Option<String>,
}

impl ShardAttempt {
    fn new(spec: ShardSpec, attempt: u32, outcome: AttemptOutcome, started_at: DateTime<Utc>) -> Self {
        Self {
            spec,
            attempt,
            outcome,
            passed: BTreeSet::new(),
            failed: BTreeSet::new(),
            started_at,
            finished_at: Utc::now(),
            note: None,
        }
    }

    pub fn success(spec: ShardSpec, attempt: u32, started_at: DateTime<Utc>) -> Self {
        Self::new(spec, attempt, AttemptOutcome::Success, started_at)
    }

    pub fn failure(spec: ShardSpec, attempt: u32, started_at: DateTime<Utc>) -> Self {
        Self::new(spec, attempt, AttemptOutcome::Failure, started_at)
    }

    pub fn timed_out(spec: ShardSpec, attempt: u32, started_at: DateTime<Utc>) -> Self {
        Self::new(spec, attempt, AttemptOutcome::TimedOut, started_at)
    }

    pub fn with_results<P, F>(mut self, passed: P, failed: F) -> Self
    where
        P: IntoIterator,
        P::Item: Into<TestId>,
        F: IntoIterator,
        F::Item: Into<TestId>,
    {
        self.passed = passed.into_iter().map(Into::into).collect();
        self.failed = failed.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }

    pub fn duration_ms(&self) -> u64 {
        (self.finished_at - self.started_at)
            .num_milliseconds()
            .max(0) as u64
    }
}

impl fmt::Display for ShardAttempt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} attempt {} [{} passed, {} failed, {}ms]",
            self.outcome.symbol(),
            self.spec,
            self.attempt,
            self.passed.len(),
            self.failed.len(),
            self.duration_ms()
        )?;
        if let Some(note) = &self.note {
            write!(f, " - {note}")?;
        }
        Ok(())
    }
}
