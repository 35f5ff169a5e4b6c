// src/dag/scheduler_step.rs

//! Step-by-step execution result types for the scheduler.

use crate::config::workflow::JobId;
use crate::dag::job_info::ScheduledJob;

/// Structured result of a single scheduler "step".
///
/// Tests step the DAG manually and make assertions about what changed.
#[derive(Debug, Clone, Default)]
pub struct SchedulerStep {
    /// Jobs whose condition held and which can now be dispatched.
    pub newly_ready: Vec<ScheduledJob>,
    /// Jobs finalised as skipped in this step (condition false).
    pub newly_skipped: Vec<JobId>,
    /// Jobs finalised as cancelled before they started.
    pub newly_cancelled: Vec<JobId>,
    /// Whether this step made every job in the run final.
    pub run_just_finished: bool,
}

impl SchedulerStep {
    pub fn ready_ids(&self) -> Vec<&str> {
        self.newly_ready.iter().map(|j| j.id.as_str()).collect()
    }
}
