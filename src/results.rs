//! # Run Results
//!
//! Turns a [`RunReport`] into the two things a user sees: a single summary
//! line on stdout, and (optionally) one JSON line appended to a results file.
//! Each invocation produces exactly one record; aggregating across runs is
//! left to whatever reads the file.

use anyhow::{Context, Result};
use colored::*;
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

use crate::{
    cli::{LaunchMode, Variant},
    harness::{RunConfig, RunOutcome, RunReport},
    utils::format_duration,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeKind {
    Measured,
    Timeout,
    Failed,
}

/// One invocation, as written to the results file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub variant: Variant,
    pub mode: LaunchMode,
    pub run_id: String,
    pub outcome: OutcomeKind,
    /// Server-reported duration when present, wall-clock otherwise
    pub measured_ms: Option<u64>,
    pub reported_ms: Option<u64>,
    pub wall_clock_ms: Option<u64>,
    pub timeout_ms: u64,
    pub run_duration_ms: u64,
    pub file_restored: bool,
    pub detail: Option<String>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub version: String,
}

impl RunRecord {
    pub fn new(config: &RunConfig, report: &RunReport) -> Self {
        let (outcome, measurement, detail) = match &report.outcome {
            RunOutcome::Measured(m) => (OutcomeKind::Measured, Some(*m), None),
            RunOutcome::TimedOut { phase } => (
                OutcomeKind::Timeout,
                None,
                Some(format!("last phase: {:?}", phase)),
            ),
            RunOutcome::Failed(reason) => (OutcomeKind::Failed, None, Some(reason.clone())),
        };

        Self {
            variant: config.variant,
            mode: config.mode,
            run_id: config.run_id.clone(),
            outcome,
            measured_ms: measurement.map(|m| m.measured_ms),
            reported_ms: measurement.and_then(|m| m.reported_ms),
            wall_clock_ms: measurement.map(|m| m.wall_clock_ms),
            timeout_ms: duration_ms(config.timeout),
            run_duration_ms: duration_ms(report.elapsed),
            file_restored: report.cleanup.restored,
            detail,
            timestamp: chrono::Utc::now(),
            version: crate::VERSION.to_string(),
        }
    }
}

/// The single human-readable line printed for every terminal state.
pub fn summary_line(config: &RunConfig, report: &RunReport) -> String {
    let what = match config.variant {
        Variant::ColdStart => "cold start",
        Variant::HotReload => "hot reload",
    };
    match &report.outcome {
        RunOutcome::Measured(m) => format!(
            "{}: {} {} ms",
            config.label(),
            what,
            m.measured_ms
        ),
        RunOutcome::TimedOut { .. } => {
            let signal = match config.variant {
                Variant::ColdStart => "server ready",
                Variant::HotReload => "hot reload",
            };
            format!(
                "{}: Timeout waiting for {} within {}",
                config.label(),
                signal,
                format_duration(config.timeout)
            )
        }
        RunOutcome::Failed(reason) => format!("{}: {} failed: {}", config.label(), what, reason),
    }
}

/// Print the summary line, green on success and red otherwise.
pub fn print_summary(config: &RunConfig, report: &RunReport) {
    let line = summary_line(config, report);
    if report.is_success() {
        println!("{}", line.green());
    } else {
        eprintln!("{}", line.red());
    }
}

/// Appends run records to a JSON-lines file
pub struct ResultsManager {
    output_file: PathBuf,
}

impl ResultsManager {
    pub fn new(output_file: &Path) -> Self {
        Self {
            output_file: output_file.to_path_buf(),
        }
    }

    pub fn append(&self, record: &RunRecord) -> Result<()> {
        if let Some(parent) = self.output_file.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create results directory {}", parent.display())
                })?;
            }
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.output_file)
            .with_context(|| format!("Failed to open {}", self.output_file.display()))?;

        let json = serde_json::to_string(record)?;
        writeln!(file, "{}", json)?;
        file.flush()?;

        debug!(outcome = ?record.outcome, "appended run record");
        info!("Results written to: {:?}", self.output_file);
        Ok(())
    }
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cleanup::CleanupReport;
    use crate::detector::Phase;
    use crate::harness::Measurement;

    fn config(variant: Variant) -> RunConfig {
        RunConfig {
            variant,
            mode: LaunchMode::Turbo,
            run_id: "2".to_string(),
            command: "npm run dev:turbo".to_string(),
            workdir: PathBuf::from("./app"),
            target_file: None,
            timeout: variant.default_timeout(),
            stabilization_delay: Duration::from_secs(3),
            warmup_url: "http://localhost:3000".to_string(),
        }
    }

    fn report(outcome: RunOutcome) -> RunReport {
        RunReport {
            outcome,
            elapsed: Duration::from_millis(1234),
            cleanup: CleanupReport {
                terminated: true,
                restored: true,
            },
        }
    }

    #[test]
    fn test_summary_lines() {
        let measured = report(RunOutcome::Measured(Measurement {
            measured_ms: 95,
            reported_ms: Some(95),
            wall_clock_ms: 140,
        }));
        assert_eq!(
            summary_line(&config(Variant::HotReload), &measured),
            "[TURBO] Run 2: hot reload 95 ms"
        );

        let timed_out = report(RunOutcome::TimedOut {
            phase: Phase::NotReady,
        });
        assert_eq!(
            summary_line(&config(Variant::ColdStart), &timed_out),
            "[TURBO] Run 2: Timeout waiting for server ready within 1m 0s"
        );
    }

    #[test]
    fn test_record_and_append() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("runs.jsonl");
        let manager = ResultsManager::new(&path);

        let cfg = config(Variant::ColdStart);
        let measured = report(RunOutcome::Measured(Measurement {
            measured_ms: 820,
            reported_ms: Some(820),
            wall_clock_ms: 870,
        }));
        manager.append(&RunRecord::new(&cfg, &measured)).unwrap();
        let failed = report(RunOutcome::Failed("boom".to_string()));
        manager.append(&RunRecord::new(&cfg, &failed)).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);

        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["variant"], "cold-start");
        assert_eq!(first["mode"], "turbo");
        assert_eq!(first["outcome"], "measured");
        assert_eq!(first["measured_ms"], 820);
        assert_eq!(first["timeout_ms"], 60_000);

        let second: RunRecord = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(second.outcome, OutcomeKind::Failed);
        assert_eq!(second.detail.as_deref(), Some("boom"));
        assert!(second.measured_ms.is_none());
    }
}
