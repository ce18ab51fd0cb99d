//! Configuration module
//!
//! Handles loading, layering and validating scheduler configuration.
//! Precedence, lowest first: defaults, config file, environment, CLI.

pub mod env;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::SchedulerError;
use crate::models::{Category, ExecutionMode};
use crate::results::default_output_dir;

pub use env::EnvConfig;
use env::ENV_PREFIX;

/// Configuration file locations (in order of precedence)
const CONFIG_LOCATIONS: &[&str] = &[
    "./shardrun.yaml",
    "./shardrun.yml",
    "./shardrun.json",
    "./.shardrun/config.yaml",
    "~/.config/shardrun/config.yaml",
];

/// Scheduler configuration as read from file and environment
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Shard count for the broad category
    pub shards_broad: u32,

    /// Shard count for the legacy category
    pub shards_legacy: u32,

    /// Extra attempts allowed per shard
    pub retry_budget: u32,

    /// Per-attempt timeout in seconds
    pub shard_timeout_secs: u64,

    /// Build mode the shards run against
    pub mode: ExecutionMode,

    /// Keep the batch alive past failing shards and still publish
    pub continue_on_error: bool,

    /// Worker pool size
    pub max_concurrent: usize,

    /// Extra publish attempts when the sink rejects the report
    pub publish_retries: u32,

    /// Directory reports are written to
    pub output_dir: Option<PathBuf>,

    /// External commands
    pub commands: CommandConfig,

    /// Test corpus files
    pub corpus: CorpusConfig,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            shards_broad: 1,
            shards_legacy: 1,
            retry_budget: 1,
            shard_timeout_secs: 30 * 60,
            mode: ExecutionMode::default(),
            continue_on_error: false,
            max_concurrent: 4,
            publish_retries: 3,
            output_dir: None,
            commands: CommandConfig::default(),
            corpus: CorpusConfig::default(),
        }
    }
}

impl SchedulerConfig {
    /// Find configuration file in standard locations
    pub fn find() -> Option<PathBuf> {
        CONFIG_LOCATIONS
            .iter()
            .map(|location| expand_path(location))
            .find(|path| path.exists())
    }

    /// Load from an explicit path, a discovered file, or defaults
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path.map(Path::to_path_buf).or_else(Self::find) {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    /// Load configuration from file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Self = if is_yaml_file(path) {
            serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse YAML config: {}", path.display()))?
        } else {
            serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse JSON config: {}", path.display()))?
        };

        Ok(config)
    }

    /// Overlay values found in the environment
    ///
    /// Rejects the same values the command line rejects.
    pub fn apply_env(&mut self, env: &EnvConfig) -> Result<()> {
        if let Some(n) = env.shards_broad {
            self.shards_broad = n;
        }
        if let Some(n) = env.shards_legacy {
            self.shards_legacy = n;
        }
        if let Some(n) = env.retries {
            self.retry_budget = n;
        }
        if let Some(secs) = env.timeout {
            self.shard_timeout_secs = secs;
        }
        if let Some(mode) = env.mode.as_deref() {
            self.mode = ExecutionMode::from_str(mode)
                .ok_or_else(|| anyhow!("Unknown execution mode in {ENV_PREFIX}_MODE: {mode}"))?;
        }
        if let Some(flag) = env.continue_on_error {
            self.continue_on_error = flag;
        }
        if let Some(n) = env.concurrency {
            self.max_concurrent = n;
        }
        if let Some(n) = env.publish_retries {
            self.publish_retries = n;
        }
        if let Some(dir) = &env.output_dir {
            self.output_dir = Some(PathBuf::from(dir));
        }
        Ok(())
    }

    /// Validate and freeze the batch parameters
    pub fn run_config(&self) -> Result<RunConfig, SchedulerError> {
        let config = RunConfig {
            total_shards_broad: self.shards_broad,
            total_shards_legacy: self.shards_legacy,
            retry_budget: self.retry_budget,
            per_shard_timeout: Duration::from_secs(self.shard_timeout_secs),
            execution_mode: self.mode,
            continue_on_error: self.continue_on_error,
            max_concurrent: self.max_concurrent,
            publish_retries: self.publish_retries,
        };
        config.validate()?;
        Ok(config)
    }

    /// Directory reports are written to, falling back to the user data dir
    pub fn output_dir(&self) -> PathBuf {
        self.output_dir.clone().unwrap_or_else(default_output_dir)
    }
}

/// Shell commands for the external build and test collaborators
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandConfig {
    /// Build command for development mode
    pub build_development: Option<String>,

    /// Build command for production mode
    pub build_production: Option<String>,

    /// Command that runs one shard's tests
    pub runner: Option<String>,
}

impl CommandConfig {
    pub fn build_command(&self, mode: ExecutionMode) -> Option<&str> {
        match mode {
            ExecutionMode::Development => self.build_development.as_deref(),
            ExecutionMode::Production => self.build_production.as_deref(),
        }
    }
}

/// Files listing the test IDs of each category, one per line
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct CorpusConfig {
    pub broad: PathBuf,
    pub legacy: PathBuf,
}

impl Default for CorpusConfig {
    fn default() -> Self {
        Self {
            broad: PathBuf::from("tests/broad.txt"),
            legacy: PathBuf::from("tests/legacy.txt"),
        }
    }
}

impl CorpusConfig {
    pub fn path(&self, category: Category) -> &Path {
        match category {
            Category::Broad => &self.broad,
            Category::Legacy => &self.legacy,
        }
    }
}

/// Validated, read-only parameters of one batch
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunConfig {
    pub total_shards_broad: u32,
    pub total_shards_legacy: u32,
    pub retry_budget: u32,
    pub per_shard_timeout: Duration,
    pub execution_mode: ExecutionMode,
    pub continue_on_error: bool,
    pub max_concurrent: usize,
    pub publish_retries: u32,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            total_shards_broad: 1,
            total_shards_legacy: 1,
            retry_budget: 0,
            per_shard_timeout: Duration::from_secs(30 * 60),
            execution_mode: ExecutionMode::default(),
            continue_on_error: false,
            max_concurrent: 4,
            publish_retries: 3,
        }
    }
}

impl RunConfig {
    pub fn validate(&self) -> Result<(), SchedulerError> {
        if self.total_shards_broad < 1 {
            return Err(SchedulerError::invalid(
                "broad shard count must be at least 1",
            ));
        }
        if self.total_shards_legacy < 1 {
            return Err(SchedulerError::invalid(
                "legacy shard count must be at least 1",
            ));
        }
        if self.per_shard_timeout.is_zero() {
            return Err(SchedulerError::invalid("per-shard timeout must be non-zero"));
        }
        if self.max_concurrent < 1 {
            return Err(SchedulerError::invalid(
                "worker pool size must be at least 1",
            ));
        }
        Ok(())
    }
}

/// Check if file is YAML based on extension
fn is_yaml_file(path: &Path) -> bool {
    path.extension()
        .map(|e| e == "yaml" || e == "yml")
        .unwrap_or(false)
}

/// Expand ~ in path
fn expand_path(path: &str) -> PathBuf {
    match path.strip_prefix("~/") {
        Some(rest) => dirs::home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| PathBuf::from(path)),
        None => PathBuf::from(path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config_is_valid() {
        let config = SchedulerConfig::default();
        let run = config.run_config().unwrap();
        assert_eq!(run.total_shards_broad, 1);
        assert_eq!(run.per_shard_timeout, Duration::from_secs(1800));
        assert!(RunConfig::default().validate().is_ok());
    }

    #[test]
    fn test_invalid_shard_counts() {
        let config = SchedulerConfig {
            shards_legacy: 0,
            ..Default::default()
        };
        let err = config.run_config().unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidConfiguration(_)));
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let config = RunConfig {
            per_shard_timeout: Duration::ZERO,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let config = RunConfig {
            max_concurrent: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_load_yaml() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("shardrun.yaml");

        let config = SchedulerConfig {
            shards_broad: 6,
            shards_legacy: 3,
            mode: ExecutionMode::Development,
            commands: CommandConfig {
                runner: Some("./run-shard.sh".to_string()),
                ..Default::default()
            },
            ..Default::default()
        };
        std::fs::write(&path, serde_yaml::to_string(&config).unwrap()).unwrap();

        let loaded = SchedulerConfig::load(&path).unwrap();
        assert_eq!(loaded.shards_broad, 6);
        assert_eq!(loaded.shards_legacy, 3);
        assert_eq!(loaded.mode, ExecutionMode::Development);
        assert_eq!(loaded.commands.runner.as_deref(), Some("./run-shard.sh"));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("shardrun.json");
        std::fs::write(&path, r#"{"shards_broad": 8, "continue_on_error": true}"#).unwrap();

        let loaded = SchedulerConfig::load(&path).unwrap();
        assert_eq!(loaded.shards_broad, 8);
        assert_eq!(loaded.shards_legacy, 1);
        assert!(loaded.continue_on_error);
        assert_eq!(loaded.corpus.broad, PathBuf::from("tests/broad.txt"));
    }

    #[test]
    fn test_apply_env_overrides() {
        let mut config = SchedulerConfig::default();
        let env = EnvConfig {
            shards_broad: Some(5),
            mode: Some("dev".to_string()),
            continue_on_error: Some(true),
            ..Default::default()
        };
        config.apply_env(&env).unwrap();

        assert_eq!(config.shards_broad, 5);
        assert_eq!(config.shards_legacy, 1);
        assert_eq!(config.mode, ExecutionMode::Development);
        assert!(config.continue_on_error);
    }

    #[test]
    fn test_apply_env_rejects_unknown_mode() {
        let mut config = SchedulerConfig::default();
        let env = EnvConfig {
            mode: Some("staging".to_string()),
            ..Default::default()
        };
        let err = config.apply_env(&env).unwrap_err();
        assert!(err.to_string().contains("SHARDRUN_MODE"));
        assert_eq!(config.mode, ExecutionMode::Production);
    }

    #[test]
    fn test_apply_env_publish_retries() {
        let mut config = SchedulerConfig::default();
        let env = EnvConfig {
            publish_retries: Some(0),
            ..Default::default()
        };
        config.apply_env(&env).unwrap();
        assert_eq!(config.publish_retries, 0);
        assert_eq!(config.run_config().unwrap().publish_retries, 0);
    }

    #[test]
    fn test_expand_path() {
        assert_eq!(expand_path("./a.yaml"), PathBuf::from("./a.yaml"));
    }
}
