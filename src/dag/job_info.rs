// src/dag/job_info.rs

//! Job metadata and per-run state.

use std::collections::BTreeMap;

use serde_json::Value as Json;

use crate::config::workflow::{Job, JobId, NeedGroup};
use crate::expr::Condition;
use crate::types::JobStatus;

/// Per-run state of a job (internal).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    /// Waiting for needs to become final.
    Pending,
    /// Condition held; waiting for a free execution slot.
    Ready,
    /// Dispatched to the executor.
    Running,
    /// Final. Never changes again.
    Done(JobStatus),
}

/// Public, read-only view of a job's per-run state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobRunState {
    /// Not selected for this run (e.g. excluded by `--job`).
    NotInRun,
    Pending,
    Ready,
    Running,
    Done(JobStatus),
}

impl From<Option<RunState>> for JobRunState {
    fn from(state: Option<RunState>) -> Self {
        match state {
            None => JobRunState::NotInRun,
            Some(RunState::Pending) => JobRunState::Pending,
            Some(RunState::Ready) => JobRunState::Ready,
            Some(RunState::Running) => JobRunState::Running,
            Some(RunState::Done(s)) => JobRunState::Done(s),
        }
    }
}

/// What the executor reports back for a finished job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobOutcome {
    pub status: JobStatus,
    pub outputs: BTreeMap<String, String>,
}

impl JobOutcome {
    pub fn new(status: JobStatus) -> Self {
        Self {
            status,
            outputs: BTreeMap::new(),
        }
    }

    pub fn with_output(mut self, name: &str, value: &str) -> Self {
        self.outputs.insert(name.to_string(), value.to_string());
        self
    }
}

/// Static job information plus per-run state.
#[derive(Debug, Clone)]
pub struct JobInfo {
    pub id: JobId,
    pub needs: Vec<NeedGroup>,
    pub condition: Condition,
    pub continue_on_error: bool,
    pub matrix: BTreeMap<String, String>,

    /// Per-run state (None if not participating in the current run).
    pub run_state: Option<RunState>,
    /// Outputs published when the job finished.
    pub outputs: BTreeMap<String, String>,
    /// Set when the final state was carried over from a previous run.
    pub seeded: bool,
}

impl JobInfo {
    pub fn from_job(job: &Job) -> Self {
        Self {
            id: job.id.clone(),
            needs: job.needs.clone(),
            condition: job.condition.clone(),
            continue_on_error: job.continue_on_error,
            matrix: job.matrix.clone(),
            run_state: None,
            outputs: BTreeMap::new(),
            seeded: false,
        }
    }

    pub fn status(&self) -> Option<JobStatus> {
        match self.run_state {
            Some(RunState::Done(s)) => Some(s),
            _ => None,
        }
    }

    /// Result as seen by dependents: a tolerated failure concludes success.
    pub fn conclusion(&self) -> Option<JobStatus> {
        self.status().map(|s| match s {
            JobStatus::Failed if self.continue_on_error => JobStatus::Succeeded,
            other => other,
        })
    }

    pub fn is_final(&self) -> bool {
        matches!(self.run_state, Some(RunState::Done(_)))
    }
}

/// A job the scheduler wants the executor to run now.
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduledJob {
    pub id: JobId,
    /// The `needs` expression namespace for this job.
    pub needs: Json,
}
