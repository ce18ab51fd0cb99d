//! Report storage and retrieval
//!
//! Published reports live under `<base>/<run-id>/`, one directory per batch.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use std::fs::{self, File};
use std::io::BufReader;
use std::path::{Component, Path, PathBuf};
use tracing::debug;

use crate::error::SinkError;
use crate::external::ArtifactSink;
use crate::models::ConsolidatedReport;

/// File name of the machine-readable report inside a run directory
pub const REPORT_FILE: &str = "report.json";

/// Generate unique run ID
pub fn generate_run_id() -> String {
    let timestamp = Utc::now().format("%Y%m%d_%H%M%S");
    let random: u32 = rand::random::<u32>() % 10000;
    format!("{timestamp}_{random:04}")
}

/// Default report directory
pub fn default_output_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("shardrun")
        .join("reports")
}

/// Artifact sink writing into a local run directory
pub struct FsSink {
    run_dir: PathBuf,
}

impl FsSink {
    pub fn new(run_dir: impl Into<PathBuf>) -> Self {
        Self {
            run_dir: run_dir.into(),
        }
    }

    /// Sink for `run_id` below `output_dir`
    pub fn for_run(output_dir: impl AsRef<Path>, run_id: &str) -> Self {
        Self::new(output_dir.as_ref().join(run_id))
    }

    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }
}

#[async_trait]
impl ArtifactSink for FsSink {
    async fn publish(&self, name: &str, payload: &[u8]) -> Result<String, SinkError> {
        let relative = Path::new(name);
        let plain = !name.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !plain {
            return Err(SinkError::Rejected {
                name: name.to_string(),
                message: "artifact names must be relative paths".to_string(),
            });
        }

        let path = self.run_dir.join(relative);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, payload).await?;

        debug!("Wrote {} ({} bytes)", path.display(), payload.len());
        Ok(path.display().to_string())
    }
}

/// Read access to previously published reports
pub struct ReportStore {
    base_dir: PathBuf,
}

impl ReportStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn report_path(&self, run_id: &str) -> PathBuf {
        self.base_dir.join(run_id).join(REPORT_FILE)
    }

    /// Load the report of one run
    pub fn load(&self, run_id: &str) -> Result<ConsolidatedReport> {
        let path = self.report_path(run_id);
        let file = File::open(&path)
            .with_context(|| format!("Failed to open report {}", path.display()))?;
        let report = serde_json::from_reader(BufReader::new(file))
            .with_context(|| format!("Failed to parse report {}", path.display()))?;

        debug!("Loaded report from {}", path.display());
        Ok(report)
    }

    /// Run IDs with a stored report, newest first
    pub fn list_runs(&self) -> Result<Vec<String>> {
        if !self.base_dir.exists() {
            return Ok(Vec::new());
        }

        let mut runs = Vec::new();
        for entry in fs::read_dir(&self.base_dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                if self.report_path(name).exists() {
                    runs.push(name.to_string());
                }
            }
        }

        // Run IDs start with a timestamp, so lexical order is chronological
        runs.sort_by(|a, b| b.cmp(a));
        Ok(runs)
    }

    /// Most recent run with its report
    pub fn latest(&self) -> Result<Option<(String, ConsolidatedReport)>> {
        match self.list_runs()?.into_iter().next() {
            Some(run_id) => {
                let report = self.load(&run_id)?;
                Ok(Some((run_id, report)))
            }
            None => Ok(None),
        }
    }
}
