// src/report.rs

//! Run results: per-step, per-job and per-run reports.
//!
//! The engine fills a [`RunReport`] while the run progresses; at the end it
//! is written as JSON to `<work_dir>/last-run.json` (which `--rerun-failed`
//! reads back) and summarised on stdout.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::Path;

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::workflow::{Job, JobId};
use crate::errors::Result;
use crate::types::{EventKind, JobStatus, RunStatus};

/// File name of the report inside the work directory.
pub const LAST_RUN_FILE: &str = "last-run.json";

/// Outcome of a single step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepOutcome {
    Success,
    Failure,
    Skipped,
    Cancelled,
}

impl StepOutcome {
    /// Value exposed as `steps.<id>.outcome` / `steps.<id>.conclusion`.
    pub fn as_str(&self) -> &'static str {
        match self {
            StepOutcome::Success => "success",
            StepOutcome::Failure => "failure",
            StepOutcome::Skipped => "skipped",
            StepOutcome::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepReport {
    pub index: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    /// What actually happened.
    pub outcome: StepOutcome,
    /// What the job sees (`continue_on_error` turns a failure into success).
    pub conclusion: StepOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub output_tail: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub outputs: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StepReport {
    pub fn skipped(index: usize, id: Option<String>, name: String, outcome: StepOutcome) -> Self {
        Self {
            index,
            id,
            name,
            outcome,
            conclusion: outcome,
            exit_code: None,
            duration_ms: 0,
            output_tail: Vec::new(),
            outputs: BTreeMap::new(),
            error: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobReport {
    pub id: JobId,
    pub name: String,
    pub runs_on: String,
    pub status: JobStatus,
    #[serde(default)]
    pub continue_on_error: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub duration_ms: u64,
    #[serde(default)]
    pub outputs: BTreeMap<String, String>,
    #[serde(default)]
    pub steps: Vec<StepReport>,
    /// Why the job failed, was cancelled or skipped.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
    /// Carried over from a previous run by `--rerun-failed`.
    #[serde(default)]
    pub reused: bool,
}

impl JobReport {
    /// Report for a job that never executed.
    pub fn not_executed(job: &Job, status: JobStatus, reason: impl Into<String>) -> Self {
        Self {
            id: job.id.clone(),
            name: job.display_name.clone(),
            runs_on: job.runs_on.clone(),
            status,
            continue_on_error: job.continue_on_error,
            started_at: None,
            finished_at: None,
            duration_ms: 0,
            outputs: BTreeMap::new(),
            steps: Vec::new(),
            failure: Some(reason.into()),
            reused: false,
        }
    }

    /// First step that did not conclude successfully.
    pub fn failed_step(&self) -> Option<&StepReport> {
        self.steps
            .iter()
            .find(|s| s.outcome == StepOutcome::Failure || s.outcome == StepOutcome::Cancelled)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: String,
    pub workflow: String,
    pub event: EventKind,
    pub git_ref: String,
    pub actor: String,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub jobs: BTreeMap<JobId, JobReport>,
}

impl RunReport {
    pub fn exit_code(&self) -> i32 {
        self.status.exit_code()
    }

    /// Jobs that succeeded, with their outputs (input to `--rerun-failed`).
    pub fn succeeded_jobs(&self) -> impl Iterator<Item = &JobReport> {
        self.jobs
            .values()
            .filter(|j| j.status == JobStatus::Succeeded)
    }

    pub fn write_json(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self).context("serialising run report")?;
        fs::write(path, json)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading previous run report {:?}", path))?;
        let report = serde_json::from_str(&text)
            .with_context(|| format!("parsing previous run report {:?}", path))?;
        Ok(report)
    }

    /// Human summary: one line per job, failure details, overall status.
    pub fn print_summary(&self, out: &mut dyn Write) -> std::io::Result<()> {
        writeln!(
            out,
            "workflow '{}' run {} ({} on {} by {})",
            self.workflow, self.run_id, self.event, self.git_ref, self.actor
        )?;

        for job in self.jobs.values() {
            let mut line = format!("  {:<10} {}", job.status.to_string(), job.name);
            if job.duration_ms > 0 {
                line.push_str(&format!(" ({:.1}s)", job.duration_ms as f64 / 1000.0));
            }
            if job.reused {
                line.push_str(" [reused]");
            }
            if job.continue_on_error && job.status == JobStatus::Failed {
                line.push_str(" [informational]");
            }
            writeln!(out, "{line}")?;

            if matches!(job.status, JobStatus::Failed | JobStatus::Cancelled) {
                if let Some(reason) = &job.failure {
                    writeln!(out, "      reason: {reason}")?;
                }
                if let Some(step) = job.failed_step() {
                    for l in step.output_tail.iter().rev().take(20).rev() {
                        writeln!(out, "      | {l}")?;
                    }
                }
            }
        }

        writeln!(out, "run status: {}", self.status)
    }
}
