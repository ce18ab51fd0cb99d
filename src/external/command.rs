//! Shell-command collaborators
//!
//! Runs configured build and test commands through `sh -c`. Each command
//! gets its own process group, and the whole group is killed once the
//! attempt or build that started it ends, including on timeout and
//! cancellation.

use async_trait::async_trait;
use serde::Deserialize;
use std::io::Write;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};

use super::{BuildArtifact, Builder, ExecutionOutput, ExecutionRequest, TestEvent, TestExecutor};
use crate::config::CommandConfig;
use crate::error::{BuildError, RunnerError};
use crate::models::ExecutionMode;

/// `sh -c command` in a fresh process group, killed when dropped
fn shell(command: &str) -> Command {
    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(command).kill_on_drop(true);
    #[cfg(unix)]
    cmd.process_group(0);
    cmd
}

/// Kills the process group of a spawned shell when dropped
///
/// `kill_on_drop` only reaches the shell itself; anything it started in
/// the background or as a pipeline would outlive the attempt.
struct ProcessGroup {
    pgid: Option<u32>,
}

impl ProcessGroup {
    fn of(child: &Child) -> Self {
        Self { pgid: child.id() }
    }
}

impl Drop for ProcessGroup {
    fn drop(&mut self) {
        if let Some(pgid) = self.pgid.take() {
            kill_group(pgid);
        }
    }
}

#[cfg(unix)]
fn kill_group(pgid: u32) {
    let Ok(pgid) = libc::pid_t::try_from(pgid) else {
        return;
    };
    // ESRCH just means every member already exited
    let result = unsafe { libc::killpg(pgid, libc::SIGKILL) };
    if result != 0 {
        let err = std::io::Error::last_os_error();
        if err.raw_os_error() != Some(libc::ESRCH) {
            warn!("Failed to kill process group {}: {}", pgid, err);
        }
    }
}

#[cfg(not(unix))]
fn kill_group(_pgid: u32) {}

/// Builds each mode with a configured shell command
///
/// The last non-empty stdout line names the artifact. Modes without a
/// command use the working directory as a prebuilt artifact.
pub struct CommandBuilder {
    commands: CommandConfig,
}

impl CommandBuilder {
    pub fn new(commands: CommandConfig) -> Self {
        Self { commands }
    }
}

#[async_trait]
impl Builder for CommandBuilder {
    async fn build(&self, mode: ExecutionMode) -> Result<BuildArtifact, BuildError> {
        let Some(command) = self.commands.build_command(mode) else {
            info!("No build command for {} mode, using working directory", mode);
            return Ok(BuildArtifact::new(mode, "."));
        };

        info!("Building {} artifact: {}", mode, command);
        let child = shell(command)
            .env("SHARDRUN_BUILD_MODE", mode.name())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| BuildError::new(mode, format!("failed to spawn build: {e}")))?;
        let _group = ProcessGroup::of(&child);

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| BuildError::new(mode, format!("failed to wait for build: {e}")))?;

        if !output.status.success() {
            return Err(BuildError::new(
                mode,
                format!("build exited with {}", output.status),
            ));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let location = stdout
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .last()
            .unwrap_or(".")
            .to_string();

        debug!("Built {} artifact at {}", mode, location);
        Ok(BuildArtifact::new(mode, location))
    }
}

/// One structured result line printed by the runner
#[derive(Debug, Deserialize)]
struct ResultLine {
    test: String,
    status: LineStatus,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
enum LineStatus {
    #[serde(alias = "pass")]
    Passed,
    #[serde(alias = "fail")]
    Failed,
    #[serde(alias = "skip")]
    Skipped,
}

/// Runs a shard through a configured shell command
///
/// The shard is described by `SHARDRUN_*` environment variables and a
/// file listing its tests. Stdout lines starting with `{` must be JSON
/// results such as `{"test": "a.test.ts", "status": "passed"}`; any other
/// line is treated as log output. Dropping the attempt on timeout kills
/// the runner's whole process group before a retry can start.
pub struct CommandExecutor {
    command: String,
}

impl CommandExecutor {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }

    fn write_tests_file(request: &ExecutionRequest) -> Result<tempfile::NamedTempFile, RunnerError> {
        let mut file = tempfile::Builder::new()
            .prefix(&format!(
                "shardrun-{}-{}-",
                request.spec.category(),
                request.spec.index()
            ))
            .suffix(".txt")
            .tempfile()?;
        for test in &request.tests {
            writeln!(file, "{test}")?;
        }
        file.flush()?;
        Ok(file)
    }
}

/// Parse one stdout line into an event, `None` for plain log output
fn parse_line(line: &str) -> Result<Option<TestEvent>, RunnerError> {
    let line = line.trim();
    if !line.starts_with('{') {
        return Ok(None);
    }
    let parsed: ResultLine = serde_json::from_str(line)
        .map_err(|e| RunnerError::Malformed(format!("{e} in line {line:?}")))?;
    if parsed.test.trim().is_empty() {
        return Err(RunnerError::Malformed(format!("empty test id in line {line:?}")));
    }
    Ok(match parsed.status {
        LineStatus::Passed => Some(TestEvent::Passed(parsed.test)),
        LineStatus::Failed => Some(TestEvent::Failed(parsed.test)),
        LineStatus::Skipped => None,
    })
}

#[async_trait]
impl TestExecutor for CommandExecutor {
    async fn execute(
        &self,
        request: &ExecutionRequest,
        events: UnboundedSender<TestEvent>,
    ) -> Result<ExecutionOutput, RunnerError> {
        let tests_file = Self::write_tests_file(request)?;

        let mut child = shell(&self.command)
            .env("SHARDRUN_CATEGORY", request.spec.category().name())
            .env("SHARDRUN_SHARD_INDEX", request.spec.index().to_string())
            .env("SHARDRUN_SHARD_TOTAL", request.spec.total().to_string())
            .env("SHARDRUN_ATTEMPT", request.attempt.to_string())
            .env("SHARDRUN_MODE", request.artifact.mode.name())
            .env("SHARDRUN_ARTIFACT", &request.artifact.location)
            .env("SHARDRUN_TESTS_FILE", tests_file.path())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| RunnerError::Launch(format!("{}: {e}", self.command)))?;
        let _group = ProcessGroup::of(&child);

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| RunnerError::Launch("runner stdout not captured".to_string()))?;

        let mut output = ExecutionOutput::default();
        let mut lines = BufReader::new(stdout).lines();
        while let Some(line) = lines.next_line().await? {
            match parse_line(&line)? {
                Some(TestEvent::Passed(id)) => {
                    output.passed.insert(id.clone());
                    let _ = events.send(TestEvent::Passed(id));
                }
                Some(TestEvent::Failed(id)) => {
                    output.failed.insert(id.clone());
                    let _ = events.send(TestEvent::Failed(id));
                }
                None => debug!("[{}] {}", request.spec, line),
            }
        }

        let status = child.wait().await?;
        output.exit_success = status.success();
        output.exit_code = status.code();
        Ok(output)
    }
}
