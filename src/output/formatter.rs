//! Output formatters for batch reports
//!
//! Provides table, JSON, CSV, summary and markdown renderings of the
//! consolidated report and of the shard matrix.

use anyhow::{anyhow, Result};

use crate::matrix::JobMatrix;
use crate::models::{BatchOutcome, ConsolidatedReport, ShardStatus, ShardStatusEntry};

/// Output format options
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    Table,
    Json,
    JsonPretty,
    Csv,
    Summary,
    Markdown,
}

impl OutputFormat {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "table" => Some(OutputFormat::Table),
            "json" => Some(OutputFormat::Json),
            "json-pretty" | "jsonpretty" => Some(OutputFormat::JsonPretty),
            "csv" => Some(OutputFormat::Csv),
            "summary" => Some(OutputFormat::Summary),
            "markdown" | "md" => Some(OutputFormat::Markdown),
            _ => None,
        }
    }
}

/// Report formatter
pub struct ResultFormatter {
    format: OutputFormat,
    colorize: bool,
}

impl ResultFormatter {
    pub fn new(format: OutputFormat) -> Self {
        Self {
            format,
            colorize: true,
        }
    }

    pub fn no_color(mut self) -> Self {
        self.colorize = false;
        self
    }

    /// Format a consolidated report
    pub fn format_report(&self, report: &ConsolidatedReport) -> String {
        match self.format {
            OutputFormat::Table => self.format_report_table(report),
            OutputFormat::Json => serde_json::to_string(report).unwrap_or_default(),
            OutputFormat::JsonPretty => serde_json::to_string_pretty(report).unwrap_or_default(),
            OutputFormat::Csv => shard_statuses_csv(report).unwrap_or_default(),
            OutputFormat::Summary => self.format_report_summary(report),
            OutputFormat::Markdown => markdown_summary(report),
        }
    }

    fn status_str(&self, status: ShardStatus) -> String {
        let plain = format!("{} {}", status.symbol(), status);
        if !self.colorize {
            return plain;
        }
        match status {
            ShardStatus::Success => format!("\x1b[32m{plain}\x1b[0m"),
            ShardStatus::Failure => format!("\x1b[31m{plain}\x1b[0m"),
            ShardStatus::TimedOut => format!("\x1b[35m{plain}\x1b[0m"),
            ShardStatus::Missing => format!("\x1b[33m{plain}\x1b[0m"),
        }
    }

    fn format_shard_row(&self, entry: &ShardStatusEntry) -> String {
        format!(
            "║  {:14} {:22} attempt {:2} │ pass {:5} │ fail {:5}{}",
            entry.spec.to_string(),
            self.status_str(entry.status),
            entry.attempts,
            entry.passed,
            entry.failed,
            if entry.fatal { "  (fatal)" } else { "" }
        )
    }

    fn format_report_table(&self, report: &ConsolidatedReport) -> String {
        let mut output = String::new();

        let outcome = match (report.outcome, self.colorize) {
            (BatchOutcome::Success, true) => format!("\x1b[32m{}\x1b[0m", report.outcome),
            (BatchOutcome::Failure, true) => format!("\x1b[31m{}\x1b[0m", report.outcome),
            _ => report.outcome.to_string(),
        };

        output.push_str("\n╔══════════════════════════════════════════════════════════════╗\n");
        output.push_str(&format!(
            "║  Batch {}  ({} shards, continue-on-error: {})\n",
            outcome,
            report.shard_statuses.len(),
            report.continue_on_error
        ));
        output.push_str("╠══════════════════════════════════════════════════════════════╣\n");

        for entry in &report.shard_statuses {
            output.push_str(&self.format_shard_row(entry));
            output.push('\n');
            if let Some(note) = &entry.note {
                output.push_str(&format!("║      └─ {note}\n"));
            }
        }

        output.push_str("╠══════════════════════════════════════════════════════════════╣\n");
        output.push_str(&format!(
            "║  Tests: {} | Pass: {} | Fail: {} | Pass Rate: {:5.1}%\n",
            report.total_tests(),
            report.passed.len(),
            report.failed.len(),
            report.pass_rate()
        ));

        if !report.failed.is_empty() {
            output.push_str("║\n║  Failed tests:\n");
            for id in &report.failed {
                output.push_str(&format!("║    - {id}\n"));
            }
        }

        if !report.anomalies.is_empty() {
            output.push_str("║\n║  Consistency anomalies:\n");
            for anomaly in &report.anomalies {
                output.push_str(&format!("║    ! {anomaly}\n"));
            }
        }

        if !report.flaky.is_empty() {
            output.push_str("║\n║  Flaky (passed on retry):\n");
            for id in &report.flaky {
                output.push_str(&format!("║    ~ {id}\n"));
            }
        }

        output.push_str("╚══════════════════════════════════════════════════════════════╝\n");
        output
    }

    fn format_report_summary(&self, report: &ConsolidatedReport) -> String {
        let not_ok = report.shard_statuses.len() - report.count_status(ShardStatus::Success);
        format!(
            "Batch {}: {}/{} tests passed ({:.1}%), {} of {} shards not successful",
            report.outcome,
            report.passed.len(),
            report.total_tests(),
            report.pass_rate(),
            not_ok,
            report.shard_statuses.len()
        )
    }

    /// Format a CI job matrix
    pub fn format_matrix(&self, matrix: &JobMatrix) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string(matrix).unwrap_or_default(),
            OutputFormat::JsonPretty => serde_json::to_string_pretty(matrix).unwrap_or_default(),
            _ => {
                let join = |indices: &[u32]| {
                    indices
                        .iter()
                        .map(|i| i.to_string())
                        .collect::<Vec<_>>()
                        .join(" ")
                };
                format!(
                    "broad:  {}\nlegacy: {}",
                    join(&matrix.broad),
                    join(&matrix.legacy)
                )
            }
        }
    }
}

impl Default for ResultFormatter {
    fn default() -> Self {
        Self::new(OutputFormat::Table)
    }
}

/// Per-shard status table as CSV
pub fn shard_statuses_csv(report: &ConsolidatedReport) -> Result<String> {
    let mut writer = csv::Writer::from_writer(Vec::new());

    writer.write_record([
        "category", "index", "total", "status", "attempts", "fatal", "passed", "failed", "note",
    ])?;

    for entry in &report.shard_statuses {
        writer.write_record([
            entry.spec.category().name().to_string(),
            entry.spec.index().to_string(),
            entry.spec.total().to_string(),
            entry.status.name().to_string(),
            entry.attempts.to_string(),
            entry.fatal.to_string(),
            entry.passed.to_string(),
            entry.failed.to_string(),
            entry.note.clone().unwrap_or_default(),
        ])?;
    }

    let bytes = writer.into_inner().map_err(|e| anyhow!(e.to_string()))?;
    Ok(String::from_utf8(bytes)?)
}

/// Markdown summary suitable for a CI job summary page
pub fn markdown_summary(report: &ConsolidatedReport) -> String {
    let mut output = String::new();

    let icon = if report.outcome.is_success() { "✅" } else { "❌" };
    output.push_str(&format!("## {} Test batch {}\n\n", icon, report.outcome));
    output.push_str(&format!(
        "**{}** passed, **{}** failed, {:.1}% pass rate\n\n",
        report.passed.len(),
        report.failed.len(),
        report.pass_rate()
    ));

    output.push_str("| Shard | Status | Attempts | Passed | Failed | Note |\n");
    output.push_str("|-------|--------|----------|--------|--------|------|\n");
    for entry in &report.shard_statuses {
        output.push_str(&format!(
            "| {} | {} {} | {} | {} | {} | {} |\n",
            entry.spec,
            entry.status.symbol(),
            entry.status,
            entry.attempts,
            entry.passed,
            entry.failed,
            entry.note.as_deref().unwrap_or("").replace('|', "\\|")
        ));
    }

    if !report.failed.is_empty() {
        output.push_str("\n### Failed tests\n\n");
        for id in &report.failed {
            output.push_str(&format!("- `{id}`\n"));
        }
    }

    if !report.anomalies.is_empty() {
        output.push_str("\n### Consistency anomalies\n\n");
        for anomaly in &report.anomalies {
            output.push_str(&format!("- {anomaly}\n"));
        }
    }

    if !report.flaky.is_empty() {
        output.push_str("\n### Flaky tests\n\n");
        for id in &report.flaky {
            output.push_str(&format!("- `{id}`\n"));
        }
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::ShardMatrix;
    use crate::models::{Category, ShardSpec};
    use std::collections::BTreeSet;

    fn report() -> ConsolidatedReport {
        let spec = |index| ShardSpec::new(Category::Broad, index, 2).unwrap();
        ConsolidatedReport {
            outcome: BatchOutcome::Failure,
            continue_on_error: false,
            passed: BTreeSet::from(["a".to_string()]),
            failed: BTreeSet::from(["b".to_string()]),
            shard_statuses: vec![
                ShardStatusEntry {
                    spec: spec(1),
                    status: ShardStatus::Success,
                    attempts: 1,
                    fatal: false,
                    passed: 1,
                    failed: 0,
                    note: None,
                },
                ShardStatusEntry {
                    spec: spec(2),
                    status: ShardStatus::Failure,
                    attempts: 2,
                    fatal: true,
                    passed: 0,
                    failed: 1,
                    note: Some("runner exited with status 1".to_string()),
                },
            ],
            anomalies: Vec::new(),
            flaky: BTreeSet::new(),
            completed_at: None,
        }
    }

    #[test]
    fn test_output_format_from_str() {
        assert_eq!(OutputFormat::from_str("json"), Some(OutputFormat::Json));
        assert_eq!(OutputFormat::from_str("TABLE"), Some(OutputFormat::Table));
        assert_eq!(OutputFormat::from_str("md"), Some(OutputFormat::Markdown));
        assert_eq!(OutputFormat::from_str("unknown"), None);
    }

    #[test]
    fn test_formatter_creation() {
        let formatter = ResultFormatter::new(OutputFormat::Json).no_color();
        assert_eq!(formatter.format, OutputFormat::Json);
        assert!(!formatter.colorize);
    }

    #[test]
    fn test_table_lists_failures() {
        let output = ResultFormatter::default().no_color().format_report(&report());
        assert!(output.contains("broad 2/2"));
        assert!(output.contains("(fatal)"));
        assert!(output.contains("- b"));
        assert!(!output.contains("\x1b["));
    }

    #[test]
    fn test_json_round_trips() {
        let output = ResultFormatter::new(OutputFormat::Json).format_report(&report());
        let parsed: ConsolidatedReport = serde_json::from_str(&output).unwrap();
        assert_eq!(parsed, report());
    }

    #[test]
    fn test_csv_rows() {
        let csv = shard_statuses_csv(&report()).unwrap();
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("category,index,total,status"));
        assert_eq!(lines[2], "broad,2,2,failure,2,true,0,1,runner exited with status 1");
    }

    #[test]
    fn test_markdown_summary() {
        let md = markdown_summary(&report());
        assert!(md.starts_with("## ❌ Test batch FAILURE"));
        assert!(md.contains("| broad 1/2 | ✓ SUCCESS | 1 | 1 | 0 |  |"));
        assert!(md.contains("- `b`"));
    }

    #[test]
    fn test_format_matrix() {
        let matrix = ShardMatrix::new(2, 1).unwrap().to_job_matrix();
        let formatter = ResultFormatter::new(OutputFormat::Table);
        assert_eq!(formatter.format_matrix(&matrix), "broad:  1 2\nlegacy: 1");
    }
}
