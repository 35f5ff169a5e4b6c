// src/engine/core.rs

//! Pure core runtime state machine.
//!
//! This module contains a synchronous, deterministic "core runtime" that
//! consumes [`RuntimeEvent`]s and produces:
//! - an updated core state
//! - a list of "commands" describing what the IO shell should do next
//!
//! The async shell (`engine::runtime::Runtime`) is responsible for:
//! - reading events from channels
//! - sending `ScheduledJob`s to the executor
//! - forwarding cancellation
//!
//! The core is unit tested without any Tokio, channels, filesystem, or
//! processes.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::config::workflow::{JobId, Workflow};
use crate::dag::Scheduler;
use crate::engine::event_handlers::{
    handle_cancel, handle_job_completed, handle_start, CoreStep, HandlerState,
};
use crate::engine::queue::DispatchQueue;
use crate::engine::{RunResult, RuntimeEvent, RuntimeOptions};
use crate::report::JobReport;

/// Pure core runtime state.
///
/// This owns:
/// - the DAG scheduler
/// - the dispatch queue
/// - the job reports collected so far
///
/// It has **no** channels, no Tokio types, and does not perform any IO.
#[derive(Debug)]
pub struct CoreRuntime {
    workflow: Arc<Workflow>,
    scheduler: Scheduler,
    queue: DispatchQueue,
    reports: BTreeMap<JobId, JobReport>,
}

impl CoreRuntime {
    pub fn new(workflow: Arc<Workflow>, scheduler: Scheduler, options: RuntimeOptions) -> Self {
        Self {
            workflow,
            scheduler,
            queue: DispatchQueue::new(options.max_parallel),
            reports: BTreeMap::new(),
        }
    }

    /// Attach the report of a job carried over from a previous run.
    pub fn add_reused_report(&mut self, mut report: JobReport) {
        report.reused = true;
        self.reports.insert(report.id.clone(), report);
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn is_finished(&self) -> bool {
        self.scheduler.is_finished()
    }

    pub fn running_count(&self) -> usize {
        self.queue.running_count()
    }

    pub fn queued_count(&self) -> usize {
        self.queue.queued_count()
    }

    fn state(&mut self) -> HandlerState<'_> {
        HandlerState {
            workflow: &self.workflow,
            scheduler: &mut self.scheduler,
            queue: &mut self.queue,
            reports: &mut self.reports,
        }
    }

    /// Start the run and return the first dispatch commands.
    pub fn start(&mut self) -> CoreStep {
        handle_start(self.state())
    }

    /// Handle a single runtime event, updating core state and returning the
    /// resulting commands for the IO shell.
    pub fn step(&mut self, event: RuntimeEvent) -> CoreStep {
        match event {
            RuntimeEvent::JobCompleted { job, report } => {
                handle_job_completed(self.state(), job, report)
            }
            RuntimeEvent::CancelRequested => handle_cancel(self.state()),
        }
    }

    /// Consume the core and produce the aggregated result.
    pub fn finish(self) -> RunResult {
        let mut jobs = self.reports;
        // Seeded jobs whose previous report was not supplied still get a line.
        for (id, status) in self.scheduler.final_statuses() {
            if jobs.contains_key(&id) {
                continue;
            }
            if let Some(job) = self.workflow.job(&id) {
                let mut report = JobReport::not_executed(job, status, "carried over from previous run");
                report.failure = None;
                report.reused = self.scheduler.is_seeded(&id);
                if let Some(outputs) = self.scheduler.outputs_of(&id) {
                    report.outputs = outputs.clone();
                }
                jobs.insert(id, report);
            }
        }

        RunResult {
            status: self.scheduler.run_status(),
            jobs,
        }
    }
}
