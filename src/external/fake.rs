//! In-memory collaborators for tests

use async_trait::async_trait;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use tokio::sync::mpsc::UnboundedSender;

use super::{
    ArtifactSink, BuildArtifact, Builder, ExecutionOutput, ExecutionRequest, Partitioner,
    TestEvent, TestExecutor,
};
use crate::error::{BuildError, RunnerError, SinkError};
use crate::models::{ExecutionMode, ShardSpec, TestId};

fn ids(items: &[&str]) -> BTreeSet<TestId> {
    items.iter().map(|s| s.to_string()).collect()
}

/// What a scripted shard attempt does
#[derive(Clone, Debug)]
pub enum Step {
    /// Finish with the given exit status and results
    Finish {
        exit_success: bool,
        passed: Vec<&'static str>,
        failed: Vec<&'static str>,
    },
    /// Report some results, then never finish
    Hang {
        passed: Vec<&'static str>,
        failed: Vec<&'static str>,
    },
    /// Return a runner error
    Error(&'static str),
    /// Panic inside the shard task
    Panic,
}

impl Step {
    pub fn pass(passed: &[&'static str]) -> Self {
        Step::Finish {
            exit_success: true,
            passed: passed.to_vec(),
            failed: Vec::new(),
        }
    }

    pub fn fail(passed: &[&'static str], failed: &[&'static str]) -> Self {
        Step::Finish {
            exit_success: false,
            passed: passed.to_vec(),
            failed: failed.to_vec(),
        }
    }

    pub fn hang(passed: &[&'static str]) -> Self {
        Step::Hang {
            passed: passed.to_vec(),
            failed: Vec::new(),
        }
    }
}

type Script = dyn Fn(&ShardSpec, u32) -> Step + Send + Sync;

/// Executor whose behaviour per `(shard, attempt)` is a closure
pub struct ScriptedExecutor {
    script: Box<Script>,
    calls: Mutex<Vec<(ShardSpec, u32)>>,
    artifacts: Mutex<BTreeSet<String>>,
}

impl ScriptedExecutor {
    pub fn new(script: impl Fn(&ShardSpec, u32) -> Step + Send + Sync + 'static) -> Self {
        Self {
            script: Box::new(script),
            calls: Mutex::new(Vec::new()),
            artifacts: Mutex::new(BTreeSet::new()),
        }
    }

    /// Every shard passes without reporting tests
    pub fn all_pass() -> Self {
        Self::new(|_, _| Step::pass(&[]))
    }

    pub fn calls(&self) -> Vec<(ShardSpec, u32)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_for(&self, spec: &ShardSpec) -> usize {
        self.calls().iter().filter(|(s, _)| s == spec).count()
    }

    /// Distinct artifact locations shards were run against
    pub fn artifacts(&self) -> BTreeSet<String> {
        self.artifacts.lock().unwrap().clone()
    }
}

#[async_trait]
impl TestExecutor for ScriptedExecutor {
    async fn execute(
        &self,
        request: &ExecutionRequest,
        events: UnboundedSender<TestEvent>,
    ) -> Result<ExecutionOutput, RunnerError> {
        self.calls
            .lock()
            .unwrap()
            .push((request.spec, request.attempt));
        self.artifacts
            .lock()
            .unwrap()
            .insert(request.artifact.location.clone());

        match (self.script)(&request.spec, request.attempt) {
            Step::Finish {
                exit_success,
                passed,
                failed,
            } => Ok(ExecutionOutput {
                exit_success,
                exit_code: Some(if exit_success { 0 } else { 1 }),
                passed: ids(&passed),
                failed: ids(&failed),
            }),
            Step::Hang { passed, failed } => {
                for id in passed {
                    let _ = events.send(TestEvent::Passed(id.to_string()));
                }
                for id in failed {
                    let _ = events.send(TestEvent::Failed(id.to_string()));
                }
                std::future::pending().await
            }
            Step::Error(message) => Err(RunnerError::Malformed(message.to_string())),
            Step::Panic => panic!("scripted panic in {}", request.spec),
        }
    }
}

/// Builder returning fixed locations, optionally failing one mode
#[derive(Default)]
pub struct StaticBuilder {
    fail_mode: Option<ExecutionMode>,
    calls: Mutex<Vec<ExecutionMode>>,
}

impl StaticBuilder {
    pub fn failing(mode: ExecutionMode) -> Self {
        Self {
            fail_mode: Some(mode),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<ExecutionMode> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Builder for StaticBuilder {
    async fn build(&self, mode: ExecutionMode) -> Result<BuildArtifact, BuildError> {
        self.calls.lock().unwrap().push(mode);
        if self.fail_mode == Some(mode) {
            return Err(BuildError::new(mode, "scripted build failure"));
        }
        Ok(BuildArtifact::new(mode, format!("/builds/{mode}")))
    }
}

/// Partitioner that hands every shard an empty list
pub struct NoopPartitioner;

impl Partitioner for NoopPartitioner {
    fn select(&self, _spec: &ShardSpec) -> Vec<TestId> {
        Vec::new()
    }
}

/// Sink that keeps artifacts in memory and can reject the first N writes
#[derive(Default)]
pub struct MemorySink {
    failures_left: AtomicU32,
    attempts: AtomicU32,
    published: Mutex<Vec<(String, Vec<u8>)>>,
}

impl MemorySink {
    pub fn failing_first(failures: u32) -> Self {
        Self {
            failures_left: AtomicU32::new(failures),
            ..Default::default()
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn names(&self) -> Vec<String> {
        self.published
            .lock()
            .unwrap()
            .iter()
            .map(|(name, _)| name.clone())
            .collect()
    }

    pub fn payload(&self, name: &str) -> Option<Vec<u8>> {
        self.published
            .lock()
            .unwrap()
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, payload)| payload.clone())
    }
}

#[async_trait]
impl ArtifactSink for MemorySink {
    async fn publish(&self, name: &str, payload: &[u8]) -> Result<String, SinkError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let rejected = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if rejected {
            return Err(SinkError::Rejected {
                name: name.to_string(),
                message: "scripted rejection".to_string(),
            });
        }
        self.published
            .lock()
            .unwrap()
            .push((name.to_string(), payload.to_vec()));
        Ok(format!("memory://{name}"))
    }
}
