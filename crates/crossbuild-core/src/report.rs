//! Run summary and exit status.

use crate::artifact::ArtifactRef;
use crate::job::{JobOutcome, StepOutcome};
use crate::orchestrator::RunResults;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use uuid::Uuid;

/// Summary of a finished run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunReport {
    pub run_id: Uuid,

    /// crossbuild version that produced the report.
    pub version: String,

    pub finished_at: DateTime<Utc>,
    pub succeeded: Vec<String>,
    pub failed: Vec<String>,
    pub cancelled: Vec<String>,

    /// Non-fatal step failures across all jobs.
    pub warnings: usize,

    pub artifacts: Vec<ArtifactRef>,
    pub results: RunResults,
}

impl RunReport {
    pub fn new(results: RunResults) -> Self {
        let mut succeeded = Vec::new();
        let mut failed = Vec::new();
        let mut cancelled = Vec::new();

        for (target, result) in &results {
            match result.outcome {
                JobOutcome::Succeeded => succeeded.push(target.clone()),
                JobOutcome::Failed => failed.push(target.clone()),
                JobOutcome::Cancelled => cancelled.push(target.clone()),
            }
        }

        let warnings = results.values().map(|r| r.warning_count()).sum();
        let artifacts = results
            .values()
            .filter_map(|r| r.artifact.clone())
            .collect();

        Self {
            run_id: Uuid::new_v4(),
            version: crate::VERSION.to_string(),
            finished_at: Utc::now(),
            succeeded,
            failed,
            cancelled,
            warnings,
            artifacts,
            results,
        }
    }

    /// Every job ran to completion and none failed.
    pub fn passed(&self) -> bool {
        self.failed.is_empty() && self.cancelled.is_empty()
    }

    /// Process exit status: 0 when every job succeeded, 1 otherwise.
    ///
    /// A cancelled job counts like a failed one, so an interrupted run that
    /// left targets unbuilt never reports success. Warnings from
    /// `continue_on_error` steps never affect the status.
    pub fn exit_code(&self) -> i32 {
        if self.passed() {
            0
        } else {
            1
        }
    }

    /// Human-readable multi-line summary.
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        for (target, result) in &self.results {
            let mark = match result.outcome {
                JobOutcome::Succeeded => "ok",
                JobOutcome::Failed => "FAILED",
                JobOutcome::Cancelled => "cancelled",
            };
            let _ = writeln!(out, "{:<40} {} ({} ms)", target, mark, result.duration_ms);
            for step in &result.steps {
                let status = match step.outcome {
                    StepOutcome::Succeeded => "ok",
                    StepOutcome::Failed if step.continue_on_error => "warning",
                    StepOutcome::Failed => "failed",
                    StepOutcome::Skipped => "skipped",
                };
                let _ = write!(out, "  {:<20} {}", step.step_name, status);
                if let Some(error) = &step.error {
                    let _ = write!(out, ": {}", error);
                }
                out.push('\n');
            }
            if let Some(artifact) = &result.artifact {
                let _ = writeln!(
                    out,
                    "  artifact {} ({} bytes, sha256 {})",
                    artifact.name,
                    artifact.size_bytes,
                    &artifact.digest[..12.min(artifact.digest.len())]
                );
            }
        }
        let _ = writeln!(
            out,
            "{} succeeded, {} failed, {} cancelled, {} warning(s)",
            self.succeeded.len(),
            self.failed.len(),
            self.cancelled.len(),
            self.warnings
        );
        out
    }
}
