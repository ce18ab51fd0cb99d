//! Result aggregation
//!
//! Folds terminal shard attempts into one consolidated report. The fold
//! only uses sets and sorted maps, so input order never matters.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, warn};

use crate::executor::ShardExecution;
use crate::models::{
    AttemptOutcome, BatchOutcome, ConsistencyAnomaly, ConsolidatedReport, ShardAttempt,
    ShardSpec, ShardStatus, ShardStatusEntry, TestId,
};

/// Builds the consolidated report of one batch
#[derive(Clone, Debug)]
pub struct ResultAggregator {
    expected: BTreeSet<ShardSpec>,
    continue_on_error: bool,
}

impl ResultAggregator {
    pub fn new(expected: impl IntoIterator<Item = ShardSpec>, continue_on_error: bool) -> Self {
        Self {
            expected: expected.into_iter().collect(),
            continue_on_error,
        }
    }

    /// Aggregate terminal attempts only
    pub fn aggregate(&self, attempts: &[ShardAttempt]) -> ConsolidatedReport {
        let mut terminal: BTreeMap<ShardSpec, &ShardAttempt> = BTreeMap::new();
        for attempt in attempts {
            let keep_current = terminal
                .get(&attempt.spec)
                .is_some_and(|current| supersedes(current, attempt));
            if !keep_current {
                terminal.insert(attempt.spec, attempt);
            }
        }

        let mut passed_in: BTreeMap<&TestId, Vec<ShardSpec>> = BTreeMap::new();
        let mut failed_in: BTreeMap<&TestId, Vec<ShardSpec>> = BTreeMap::new();
        for (spec, attempt) in &terminal {
            for id in &attempt.passed {
                passed_in.entry(id).or_default().push(*spec);
            }
            for id in &attempt.failed {
                failed_in.entry(id).or_default().push(*spec);
            }
        }

        let failed: BTreeSet<TestId> = failed_in.keys().map(|id| (*id).clone()).collect();
        let passed: BTreeSet<TestId> = passed_in
            .keys()
            .filter(|id| !failed_in.contains_key(*id))
            .map(|id| (*id).clone())
            .collect();

        let anomalies: Vec<ConsistencyAnomaly> = passed_in
            .iter()
            .filter_map(|(id, passed_specs)| {
                failed_in.get(id).map(|failed_specs| ConsistencyAnomaly {
                    test_id: (*id).clone(),
                    passed_in: passed_specs.clone(),
                    failed_in: failed_specs.clone(),
                })
            })
            .collect();

        for anomaly in &anomalies {
            warn!("Consistency anomaly: {}", anomaly);
        }

        let specs: BTreeSet<ShardSpec> = self
            .expected
            .iter()
            .chain(terminal.keys())
            .copied()
            .collect();

        let shard_statuses: Vec<ShardStatusEntry> = specs
            .into_iter()
            .map(|spec| match terminal.get(&spec) {
                Some(attempt) => {
                    if !self.expected.contains(&spec) {
                        warn!("Result for unexpected shard {}", spec);
                    }
                    let status = ShardStatus::from(attempt.outcome);
                    ShardStatusEntry {
                        spec,
                        status,
                        attempts: attempt.attempt,
                        fatal: !status.is_success(),
                        passed: attempt.passed.len(),
                        failed: attempt.failed.len(),
                        note: attempt.note.clone(),
                    }
                }
                None => {
                    warn!("Shard {} produced no terminal attempt", spec);
                    ShardStatusEntry {
                        spec,
                        status: ShardStatus::Missing,
                        attempts: 0,
                        fatal: !self.continue_on_error,
                        passed: 0,
                        failed: 0,
                        note: None,
                    }
                }
            })
            .collect();

        let outcome = if shard_statuses.iter().any(|entry| entry.fatal) {
            BatchOutcome::Failure
        } else {
            BatchOutcome::Success
        };

        let completed_at = terminal.values().map(|a| a.finished_at).max();

        debug!(
            "Aggregated {} shards: {} passed, {} failed, {} anomalies",
            shard_statuses.len(),
            passed.len(),
            failed.len(),
            anomalies.len()
        );

        ConsolidatedReport {
            outcome,
            continue_on_error: self.continue_on_error,
            passed,
            failed,
            shard_statuses,
            anomalies,
            flaky: BTreeSet::new(),
            completed_at,
        }
    }

    /// Aggregate shard executions, also recording flaky tests
    ///
    /// A test that failed in any terminal attempt is never flaky.
    pub fn aggregate_executions(&self, executions: &[ShardExecution]) -> ConsolidatedReport {
        let terminals: Vec<ShardAttempt> =
            executions.iter().map(|e| e.terminal.clone()).collect();
        let mut report = self.aggregate(&terminals);

        let flaky: BTreeSet<TestId> = executions
            .iter()
            .flat_map(ShardExecution::flaky_tests)
            .filter(|id| !report.failed.contains(id))
            .collect();
        report.flaky = flaky;
        report
    }
}

/// Whether `current` stays terminal over `candidate` for the same shard
///
/// Later attempts win; equal attempt numbers fall back to a total order
/// so duplicates resolve the same way in any input order.
fn supersedes(current: &ShardAttempt, candidate: &ShardAttempt) -> bool {
    rank(current, candidate) != Ordering::Less
}

fn rank(a: &ShardAttempt, b: &ShardAttempt) -> Ordering {
    fn severity(outcome: AttemptOutcome) -> u8 {
        match outcome {
            AttemptOutcome::Success => 0,
            AttemptOutcome::TimedOut => 1,
            AttemptOutcome::Failure => 2,
        }
    }

    a.attempt
        .cmp(&b.attempt)
        .then(a.finished_at.cmp(&b.finished_at))
        .then(severity(a.outcome).cmp(&severity(b.outcome)))
        .then_with(|| a.failed.cmp(&b.failed))
        .then_with(|| a.passed.cmp(&b.passed))
        .then_with(|| a.note.cmp(&b.note))
        .then(a.started_at.cmp(&b.started_at))
}
