//! Report publishing
//!
//! Serializes the consolidated report and hands every artifact to the
//! sink, retrying rejected writes a bounded number of times.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::SinkError;
use crate::external::ArtifactSink;
use crate::models::{ConsolidatedReport, TestId};
use crate::output::{markdown_summary, shard_statuses_csv};
use crate::utils::PhaseTimer;

use super::storage::REPORT_FILE;

/// Where a report ended up
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PublishedReport {
    /// Location of `report.json`
    pub location: String,
    /// Every artifact name with the location the sink returned
    pub artifacts: Vec<(String, String)>,
}

pub struct ReportPublisher {
    sink: Arc<dyn ArtifactSink>,
    retries: u32,
    retry_delay: Duration,
}

impl ReportPublisher {
    pub fn new(sink: Arc<dyn ArtifactSink>, retries: u32) -> Self {
        Self {
            sink,
            retries,
            retry_delay: Duration::from_millis(500),
        }
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Publish the report and its raw pass/fail lists
    ///
    /// `report.json` goes last so a reader that finds it can rely on the
    /// other artifacts being present.
    pub async fn publish(&self, report: &ConsolidatedReport) -> Result<PublishedReport, SinkError> {
        let mut timer = PhaseTimer::start();
        let artifacts = render_artifacts(report)?;

        let mut published = Vec::with_capacity(artifacts.len());
        for (name, payload) in &artifacts {
            let location = self.publish_one(name, payload).await?;
            published.push((name.to_string(), location));
        }

        let location = published
            .iter()
            .find(|(name, _)| name == REPORT_FILE)
            .map(|(_, location)| location.clone())
            .unwrap_or_default();

        info!(
            "Published {} artifacts in {}ms: {}",
            published.len(),
            timer.end_phase("publish").as_millis(),
            location
        );

        Ok(PublishedReport {
            location,
            artifacts: published,
        })
    }

    async fn publish_one(&self, name: &str, payload: &[u8]) -> Result<String, SinkError> {
        let max_attempts = self.retries.saturating_add(1);
        let mut attempt = 1;

        loop {
            match self.sink.publish(name, payload).await {
                Ok(location) => {
                    debug!("Sink accepted {} on attempt {}", name, attempt);
                    return Ok(location);
                }
                Err(e) if attempt < max_attempts => {
                    warn!(
                        "Sink rejected {} (attempt {}/{}): {}",
                        name, attempt, max_attempts, e
                    );
                    tokio::time::sleep(self.retry_delay * attempt).await;
                    attempt += 1;
                }
                Err(e) => {
                    warn!("Giving up on {} after {} attempts: {}", name, attempt, e);
                    return Err(SinkError::Exhausted {
                        attempts: attempt,
                        last: Box::new(e),
                    });
                }
            }
        }
    }
}

fn id_list(ids: &std::collections::BTreeSet<TestId>) -> Vec<u8> {
    let mut out = String::new();
    for id in ids {
        out.push_str(id);
        out.push('\n');
    }
    out.into_bytes()
}

fn render_artifacts(report: &ConsolidatedReport) -> Result<Vec<(&'static str, Vec<u8>)>, SinkError> {
    let json =
        serde_json::to_vec_pretty(report).map_err(|e| SinkError::Serialize(e.to_string()))?;
    let csv = shard_statuses_csv(report).map_err(|e| SinkError::Serialize(e.to_string()))?;

    Ok(vec![
        ("passed.txt", id_list(&report.passed)),
        ("failed.txt", id_list(&report.failed)),
        ("shards.csv", csv.into_bytes()),
        ("summary.md", markdown_summary(report).into_bytes()),
        (REPORT_FILE, json),
    ])
}
