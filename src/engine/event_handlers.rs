// src/engine/event_handlers.rs

//! Event handling logic for the core runtime.

use std::collections::BTreeMap;

use tracing::{info, warn};

use crate::config::workflow::{JobId, Workflow};
use crate::dag::{JobOutcome, ScheduledJob, Scheduler, SchedulerStep};
use crate::engine::queue::DispatchQueue;
use crate::report::JobReport;
use crate::types::JobStatus;

/// Command produced by the pure core, to be executed by the outer IO shell.
#[derive(Debug, Clone, PartialEq)]
pub enum CoreCommand {
    /// Send these jobs to the executor.
    DispatchJobs(Vec<ScheduledJob>),
    /// Kill every running job; they report back as cancelled.
    CancelRunning,
}

/// Decision returned by the core after handling a single event.
#[derive(Debug, Clone)]
pub struct CoreStep {
    /// Commands the IO shell should execute.
    pub commands: Vec<CoreCommand>,
    /// Whether the outer runtime loop should keep running.
    pub keep_running: bool,
}

/// Mutable state the handlers operate on.
pub struct HandlerState<'a> {
    pub workflow: &'a Workflow,
    pub scheduler: &'a mut Scheduler,
    pub queue: &'a mut DispatchQueue,
    pub reports: &'a mut BTreeMap<JobId, JobReport>,
}

/// Start the run: decide the initial jobs and dispatch what fits.
pub fn handle_start(state: HandlerState<'_>) -> CoreStep {
    let step = state.scheduler.start();
    apply_scheduler_step(state, step)
}

/// Handle the final report of a dispatched job.
pub fn handle_job_completed(state: HandlerState<'_>, job: JobId, report: JobReport) -> CoreStep {
    if !state.queue.complete(&job) {
        warn!(job = %job, "completion for job that is not running; ignoring");
        return CoreStep {
            commands: Vec::new(),
            keep_running: !state.scheduler.is_finished(),
        };
    }

    let outcome = JobOutcome {
        status: report.status,
        outputs: report.outputs.clone(),
    };
    state.reports.insert(job.clone(), report);

    let step = state.scheduler.handle_completion(&job, outcome);
    apply_scheduler_step(state, step)
}

/// Cancel the run: drop queued jobs and ask the executor to kill the rest.
pub fn handle_cancel(state: HandlerState<'_>) -> CoreStep {
    if state.scheduler.is_cancelled() {
        return CoreStep {
            commands: Vec::new(),
            keep_running: !state.scheduler.is_finished(),
        };
    }

    let dropped = state.queue.clear_queued();
    info!(
        dropped = dropped.len(),
        running = state.queue.running_count(),
        "cancelling run"
    );

    let step = state.scheduler.cancel();
    let running = state.queue.running_count() > 0;
    let mut result = apply_scheduler_step(state, step);
    if running {
        result.commands.push(CoreCommand::CancelRunning);
    }
    result
}

/// Record reports for jobs finalised without running, enqueue ready jobs
/// and dispatch as many as the concurrency limit allows.
fn apply_scheduler_step(state: HandlerState<'_>, step: SchedulerStep) -> CoreStep {
    let HandlerState {
        workflow,
        scheduler,
        queue,
        reports,
    } = state;

    for id in step.newly_skipped {
        if let Some(job) = workflow.job(&id) {
            let reason = format!("skipped: condition `{}` was false", job.condition.source());
            reports.insert(id, JobReport::not_executed(job, JobStatus::Skipped, reason));
        }
    }
    for id in step.newly_cancelled {
        if let Some(job) = workflow.job(&id) {
            reports.insert(
                id,
                JobReport::not_executed(job, JobStatus::Cancelled, "run cancelled before the job started"),
            );
        }
    }

    let mut commands = Vec::new();
    if !scheduler.is_cancelled() {
        queue.enqueue(step.newly_ready);

        let mut dispatch: Vec<ScheduledJob> = Vec::new();
        for job in queue.take_dispatchable() {
            if scheduler.mark_started(&job.id) {
                dispatch.push(job);
            } else {
                queue.complete(&job.id);
            }
        }

        if !dispatch.is_empty() {
            commands.push(CoreCommand::DispatchJobs(dispatch));
        }
    }

    CoreStep {
        commands,
        keep_running: !scheduler.is_finished(),
    }
}
