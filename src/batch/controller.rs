//! Batch controller
//!
//! Drives one batch through its lifecycle and is the only place that
//! decides whether the batch succeeded.

use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::BatchState;
use crate::config::RunConfig;
use crate::error::SchedulerError;
use crate::executor::{FanOut, ParallelExecutor, ShardRunner};
use crate::external::{ArtifactSink, BuildSet, Builder, Partitioner, TestExecutor};
use crate::matrix::ShardMatrix;
use crate::models::{BatchOutcome, ConsolidatedReport, ExecutionMode, ShardAttempt};
use crate::results::{generate_run_id, ReportPublisher, ResultAggregator};
use crate::utils::PhaseTimer;

/// Final state of a batch
#[derive(Debug)]
pub struct BatchResult {
    pub run_id: String,
    pub state: BatchState,
    pub outcome: BatchOutcome,
    /// Present once aggregation ran, published or not
    pub report: Option<ConsolidatedReport>,
    /// Location of the published report
    pub location: Option<String>,
    /// Terminal attempts collected before a cancellation
    pub partial: Vec<ShardAttempt>,
    /// Why the batch ended in `Failed` without a shard being at fault
    pub error: Option<SchedulerError>,
    pub transitions: Vec<BatchState>,
}

impl BatchResult {
    pub fn is_success(&self) -> bool {
        self.outcome.is_success()
    }
}

pub struct BatchController {
    config: RunConfig,
    builder: Arc<dyn Builder>,
    executor: Arc<dyn TestExecutor>,
    partitioner: Arc<dyn Partitioner>,
    sink: Arc<dyn ArtifactSink>,
    run_id: String,
    publish_delay: Option<Duration>,
    state: BatchState,
    transitions: Vec<BatchState>,
}

impl BatchController {
    pub fn new(
        config: RunConfig,
        builder: Arc<dyn Builder>,
        executor: Arc<dyn TestExecutor>,
        partitioner: Arc<dyn Partitioner>,
        sink: Arc<dyn ArtifactSink>,
    ) -> Self {
        Self {
            config,
            builder,
            executor,
            partitioner,
            sink,
            run_id: generate_run_id(),
            publish_delay: None,
            state: BatchState::Pending,
            transitions: vec![BatchState::Pending],
        }
    }

    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = run_id.into();
        self
    }

    /// Base delay between rejected publish attempts
    #[cfg(test)]
    pub fn with_publish_delay(mut self, delay: Duration) -> Self {
        self.publish_delay = Some(delay);
        self
    }

    #[cfg(test)]
    pub fn state(&self) -> BatchState {
        self.state
    }

    fn transition(&mut self, next: BatchState) -> Result<(), SchedulerError> {
        if !self.state.can_transition_to(next) {
            return Err(SchedulerError::IllegalTransition {
                from: self.state,
                to: next,
            });
        }
        debug!("Batch {}: {} -> {}", self.run_id, self.state, next);
        self.state = next;
        self.transitions.push(next);
        Ok(())
    }

    fn finish(
        &self,
        outcome: BatchOutcome,
        report: Option<ConsolidatedReport>,
        location: Option<String>,
        partial: Vec<ShardAttempt>,
        error: Option<SchedulerError>,
    ) -> BatchResult {
        debug_assert!(self.state.is_terminal());
        BatchResult {
            run_id: self.run_id.clone(),
            state: self.state,
            outcome,
            report,
            location,
            partial,
            error,
            transitions: self.transitions.clone(),
        }
    }

    /// Run the batch to a terminal state
    ///
    /// Configuration and build errors are returned as `Err`. Everything
    /// after fan-out ends in a [`BatchResult`], including cancellation.
    pub async fn run(&mut self, cancel: CancellationToken) -> Result<BatchResult, SchedulerError> {
        if self.state != BatchState::Pending {
            return Err(SchedulerError::IllegalTransition {
                from: self.state,
                to: BatchState::Building,
            });
        }

        self.config.validate()?;
        let matrix = ShardMatrix::from_config(&self.config)?;
        let mut timer = PhaseTimer::start();

        info!(
            "Batch {}: {} shards ({} broad, {} legacy), {} mode, retry budget {}, timeout {}s",
            self.run_id,
            matrix.len(),
            matrix.broad.len(),
            matrix.legacy.len(),
            self.config.execution_mode,
            self.config.retry_budget,
            self.config.per_shard_timeout.as_secs_f64()
        );

        self.transition(BatchState::Building)?;
        let builds = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            builds = self.build_all() => Some(builds),
        };
        let builds = match builds {
            Some(Ok(builds)) => builds,
            Some(Err(e)) => {
                error!("Batch {}: {}", self.run_id, e);
                self.transition(BatchState::Failed)?;
                return Err(e);
            }
            None => {
                warn!("Batch {} cancelled during build", self.run_id);
                self.transition(BatchState::Failed)?;
                return Ok(self.finish(
                    BatchOutcome::Failure,
                    None,
                    None,
                    Vec::new(),
                    Some(SchedulerError::Cancelled(BatchState::Building)),
                ));
            }
        };
        timer.end_phase("build");

        let artifact = builds.for_mode(self.config.execution_mode).clone();
        self.transition(BatchState::FanningOut)?;

        let runner = Arc::new(ShardRunner::from_config(
            self.executor.clone(),
            self.partitioner.clone(),
            &self.config,
        ));
        let tasks = ParallelExecutor::new(self.config.max_concurrent, self.config.retry_budget)
            .spawn(matrix.specs(), runner, artifact, cancel.clone());

        if cancel.is_cancelled() {
            let fan_out = tasks.join().await;
            return self.cancelled(BatchState::FanningOut, fan_out, &timer);
        }

        self.transition(BatchState::AwaitingResults)?;
        let fan_out = tasks.join().await;
        timer.end_phase("shards");

        if fan_out.cancelled {
            return self.cancelled(BatchState::AwaitingResults, fan_out, &timer);
        }

        self.transition(BatchState::Aggregating)?;
        let report = ResultAggregator::new(matrix.specs(), self.config.continue_on_error)
            .aggregate_executions(&fan_out.executions);
        timer.end_phase("aggregate");

        let all_succeeded = report.shard_statuses.iter().all(|e| e.status.is_success());
        if !self.config.continue_on_error && !all_succeeded {
            warn!(
                "Batch {}: {} shard(s) did not succeed, not publishing",
                self.run_id,
                report.fatal_shards().len()
            );
            self.transition(BatchState::Failed)?;
            info!("Batch {} timings: {}", self.run_id, timer);
            return Ok(self.finish(BatchOutcome::Failure, Some(report), None, Vec::new(), None));
        }

        let mut publisher = ReportPublisher::new(self.sink.clone(), self.config.publish_retries);
        if let Some(delay) = self.publish_delay {
            publisher = publisher.with_retry_delay(delay);
        }

        let published = publisher.publish(&report).await;
        timer.end_phase("publish");
        info!("Batch {} timings: {}", self.run_id, timer);

        match published {
            Ok(published) => {
                self.transition(BatchState::Published)?;
                info!(
                    "Batch {} {}: {} artifacts, report at {}",
                    self.run_id,
                    report.outcome,
                    published.artifacts.len(),
                    published.location
                );
                Ok(self.finish(
                    report.outcome,
                    Some(report),
                    Some(published.location),
                    Vec::new(),
                    None,
                ))
            }
            Err(e) => {
                error!("Batch {}: report lost: {}", self.run_id, e);
                self.transition(BatchState::Failed)?;
                Ok(self.finish(
                    BatchOutcome::Failure,
                    Some(report),
                    None,
                    Vec::new(),
                    Some(e.into()),
                ))
            }
        }
    }

    /// Build both execution modes once, concurrently
    async fn build_all(&self) -> Result<BuildSet, SchedulerError> {
        let (development, production) = tokio::try_join!(
            self.builder.build(ExecutionMode::Development),
            self.builder.build(ExecutionMode::Production),
        )?;
        info!(
            "Builds ready: development={}, production={}",
            development.location, production.location
        );
        Ok(BuildSet {
            development,
            production,
        })
    }

    fn cancelled(
        &mut self,
        during: BatchState,
        fan_out: FanOut,
        timer: &PhaseTimer,
    ) -> Result<BatchResult, SchedulerError> {
        warn!(
            "Batch {} cancelled while {}: {} shard(s) terminal, {} stopped",
            self.run_id,
            during,
            fan_out.executions.len(),
            fan_out.missing.len()
        );
        info!("Batch {} timings: {}", self.run_id, timer);
        self.transition(BatchState::Failed)?;

        let partial = fan_out
            .executions
            .into_iter()
            .map(|execution| execution.terminal)
            .collect();
        Ok(self.finish(
            BatchOutcome::Failure,
            None,
            None,
            partial,
            Some(SchedulerError::Cancelled(during)),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::external::fake::{MemorySink, NoopPartitioner, ScriptedExecutor, Step};
    use crate::external::fake::StaticBuilder;
    use crate::models::{Category, ShardSpec, ShardStatus};

    struct Fixture {
        builder: Arc<StaticBuilder>,
        executor: Arc<ScriptedExecutor>,
        sink: Arc<MemorySink>,
    }

    impl Fixture {
        fn new(executor: ScriptedExecutor) -> Self {
            Self {
                builder: Arc::new(StaticBuilder::default()),
                executor: Arc::new(executor),
                sink: Arc::new(MemorySink::default()),
            }
        }

        fn with_builder(mut self, builder: StaticBuilder) -> Self {
            self.builder = Arc::new(builder);
            self
        }

        fn with_sink(mut self, sink: MemorySink) -> Self {
            self.sink = Arc::new(sink);
            self
        }

        fn controller(&self, config: RunConfig) -> BatchController {
            BatchController::new(
                config,
                self.builder.clone(),
                self.executor.clone(),
                Arc::new(NoopPartitioner),
                self.sink.clone(),
            )
            .with_run_id("test-run")
            .with_publish_delay(Duration::from_millis(1))
        }
    }

    fn config(broad: u32, legacy: u32, retry_budget: u32, continue_on_error: bool) -> RunConfig {
        RunConfig {
            total_shards_broad: broad,
            total_shards_legacy: legacy,
            retry_budget,
            continue_on_error,
            ..RunConfig::default()
        }
    }

    fn broad(index: u32, total: u32) -> ShardSpec {
        ShardSpec::new(Category::Broad, index, total).unwrap()
    }

    /// Broad shard 1 fails once then passes, broad shard 2 always fails
    fn two_shard_script() -> ScriptedExecutor {
        ScriptedExecutor::new(|spec, attempt| match (spec.category(), spec.index(), attempt) {
            (Category::Broad, 1, 1) => Step::fail(&["b1-a"], &["b1-b"]),
            (Category::Broad, 1, _) => Step::pass(&["b1-a", "b1-b"]),
            (Category::Broad, 2, _) => Step::fail(&["b2-a"], &["b2-b"]),
            _ => Step::pass(&["l1-a"]),
        })
    }

    #[tokio::test]
    async fn test_all_shards_pass() {
        let fixture = Fixture::new(ScriptedExecutor::all_pass());
        let mut controller = fixture.controller(config(3, 2, 1, false));

        let result = controller.run(CancellationToken::new()).await.unwrap();

        assert!(result.is_success());
        assert_eq!(result.state, BatchState::Published);
        assert_eq!(controller.state(), BatchState::Published);
        assert_eq!(
            result.transitions,
            vec![
                BatchState::Pending,
                BatchState::Building,
                BatchState::FanningOut,
                BatchState::AwaitingResults,
                BatchState::Aggregating,
                BatchState::Published,
            ]
        );
        assert_eq!(result.location.as_deref(), Some("memory://report.json"));
        assert_eq!(fixture.executor.calls().len(), 5);
        assert_eq!(
            fixture.builder.calls().len(),
            2,
            "each mode is built exactly once"
        );
        assert_eq!(
            fixture.executor.artifacts().into_iter().collect::<Vec<_>>(),
            vec!["/builds/production".to_string()]
        );
    }

    #[tokio::test]
    async fn test_retry_scenario_with_continue_on_error() {
        let fixture = Fixture::new(two_shard_script());
        let mut controller = fixture.controller(config(2, 1, 1, true));

        let result = controller.run(CancellationToken::new()).await.unwrap();
        let report = result.report.as_ref().unwrap();

        assert_eq!(result.outcome, BatchOutcome::Failure);
        assert_eq!(result.state, BatchState::Published);
        assert_eq!(report.status_of(&broad(1, 2)), Some(ShardStatus::Success));
        assert_eq!(report.status_of(&broad(2, 2)), Some(ShardStatus::Failure));
        assert!(report.passed.contains("b1-a"));
        assert!(report.passed.contains("b1-b"));
        assert!(report.failed.contains("b2-b"));
        assert!(report.flaky.contains("b1-b"));
        assert_eq!(fixture.executor.calls_for(&broad(1, 2)), 2);
        assert_eq!(fixture.executor.calls_for(&broad(2, 2)), 2);
        assert!(fixture.sink.payload("report.json").is_some());
    }

    #[tokio::test]
    async fn test_failure_without_continue_on_error_is_not_published() {
        let fixture = Fixture::new(two_shard_script());
        let mut controller = fixture.controller(config(2, 1, 1, false));

        let result = controller.run(CancellationToken::new()).await.unwrap();

        assert_eq!(result.outcome, BatchOutcome::Failure);
        assert_eq!(result.state, BatchState::Failed);
        assert!(result.location.is_none());
        assert!(result.error.is_none());
        assert!(result.report.unwrap().passed.contains("b1-a"));
        assert_eq!(fixture.sink.attempts(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timed_out_shard() {
        let fixture = Fixture::new(ScriptedExecutor::new(|spec, _| {
            if spec.category() == Category::Legacy {
                Step::hang(&[])
            } else {
                Step::pass(&["ok"])
            }
        }));
        let mut controller = fixture.controller(RunConfig {
            per_shard_timeout: Duration::from_secs(30),
            ..config(1, 1, 1, true)
        });

        let result = controller.run(CancellationToken::new()).await.unwrap();
        let report = result.report.unwrap();
        let legacy = ShardSpec::new(Category::Legacy, 1, 1).unwrap();

        assert_eq!(result.outcome, BatchOutcome::Failure);
        assert_eq!(report.status_of(&legacy), Some(ShardStatus::TimedOut));
        assert_eq!(fixture.executor.calls_for(&legacy), 2);
        assert!(report.passed.contains("ok"));
    }

    #[tokio::test]
    async fn test_missing_shard_fails_batch() {
        let fixture = Fixture::new(ScriptedExecutor::new(|spec, _| {
            if spec.index() == 2 {
                Step::Panic
            } else {
                Step::pass(&[])
            }
        }));
        let mut controller = fixture.controller(config(2, 1, 0, false));

        let result = controller.run(CancellationToken::new()).await.unwrap();
        let report = result.report.unwrap();

        assert_eq!(result.outcome, BatchOutcome::Failure);
        assert_eq!(report.status_of(&broad(2, 2)), Some(ShardStatus::Missing));
        assert_eq!(report.count_status(ShardStatus::Success), 2);
    }

    #[tokio::test]
    async fn test_missing_shard_tolerated_with_continue_on_error() {
        let fixture = Fixture::new(ScriptedExecutor::new(|spec, _| {
            if spec.index() == 2 {
                Step::Panic
            } else {
                Step::pass(&[])
            }
        }));
        let mut controller = fixture.controller(config(2, 1, 0, true));

        let result = controller.run(CancellationToken::new()).await.unwrap();

        assert_eq!(result.state, BatchState::Published);
        assert_eq!(result.outcome, BatchOutcome::Success);
        assert_eq!(
            result.report.unwrap().status_of(&broad(2, 2)),
            Some(ShardStatus::Missing)
        );
    }

    #[tokio::test]
    async fn test_build_failure_aborts_before_fan_out() {
        let fixture = Fixture::new(ScriptedExecutor::all_pass())
            .with_builder(StaticBuilder::failing(ExecutionMode::Development));
        let mut controller = fixture.controller(config(2, 2, 1, true));

        let err = controller.run(CancellationToken::new()).await.unwrap_err();

        assert!(matches!(err, SchedulerError::Build(_)));
        assert_eq!(controller.state(), BatchState::Failed);
        assert!(fixture.executor.calls().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_config_rejected_before_build() {
        let fixture = Fixture::new(ScriptedExecutor::all_pass());
        let mut controller = fixture.controller(config(0, 1, 1, false));

        let err = controller.run(CancellationToken::new()).await.unwrap_err();

        assert!(matches!(err, SchedulerError::InvalidConfiguration(_)));
        assert_eq!(controller.state(), BatchState::Pending);
        assert!(fixture.builder.calls().is_empty());
    }

    #[tokio::test]
    async fn test_sink_failure_fails_successful_batch() {
        let fixture =
            Fixture::new(ScriptedExecutor::all_pass()).with_sink(MemorySink::failing_first(100));
        let mut controller = fixture.controller(RunConfig {
            publish_retries: 2,
            ..config(1, 1, 0, false)
        });

        let result = controller.run(CancellationToken::new()).await.unwrap();

        assert_eq!(result.outcome, BatchOutcome::Failure);
        assert_eq!(result.state, BatchState::Failed);
        assert!(result.report.unwrap().outcome.is_success());
        assert!(matches!(result.error, Some(SchedulerError::Sink(_))));
        let message = result.error.map(|e| e.to_string()).unwrap_or_default();
        assert!(message.contains("scripted rejection"), "{message}");
        assert_eq!(fixture.sink.attempts(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_keeps_partial_results() {
        let fixture = Fixture::new(ScriptedExecutor::new(|spec, _| {
            if spec.category() == Category::Broad {
                Step::pass(&["fast"])
            } else {
                Step::hang(&[])
            }
        }));
        let mut controller = fixture.controller(config(2, 1, 0, false));
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            trigger.cancel();
        });

        let result = controller.run(cancel).await.unwrap();

        assert_eq!(result.state, BatchState::Failed);
        assert_eq!(result.outcome, BatchOutcome::Failure);
        assert!(result.report.is_none());
        assert_eq!(result.partial.len(), 2);
        assert!(matches!(
            result.error,
            Some(SchedulerError::Cancelled(BatchState::AwaitingResults))
        ));
        assert_eq!(fixture.sink.attempts(), 0);
    }

    #[tokio::test]
    async fn test_controller_runs_once() {
        let fixture = Fixture::new(ScriptedExecutor::all_pass());
        let mut controller = fixture.controller(config(1, 1, 0, false));

        controller.run(CancellationToken::new()).await.unwrap();
        let err = controller.run(CancellationToken::new()).await.unwrap_err();

        assert!(matches!(
            err,
            SchedulerError::IllegalTransition {
                from: BatchState::Published,
                to: BatchState::Building
            }
        ));
    }
}
