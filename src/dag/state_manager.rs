// src/dag/state_manager.rs

//! Per-run state transitions for jobs in the scheduler.

use std::collections::BTreeMap;

use serde_json::{json, Map, Value as Json};
use tracing::{debug, info, warn};

use crate::config::workflow::JobId;
use crate::dag::job_info::{JobInfo, RunState, ScheduledJob};
use crate::dag::DagGraph;
use crate::expr::{EvalContext, StatusView};
use crate::types::JobStatus;

/// Manages per-run state transitions for jobs.
pub struct StateManager<'a> {
    graph: &'a DagGraph,
    jobs: &'a mut BTreeMap<JobId, JobInfo>,
    base_context: &'a EvalContext,
    cancelled: bool,
}

/// Jobs whose state was decided by one resolution pass.
#[derive(Debug, Default)]
pub struct Resolution {
    pub ready: Vec<ScheduledJob>,
    pub skipped: Vec<JobId>,
}

impl<'a> StateManager<'a> {
    pub fn new(
        graph: &'a DagGraph,
        jobs: &'a mut BTreeMap<JobId, JobInfo>,
        base_context: &'a EvalContext,
        cancelled: bool,
    ) -> Self {
        Self {
            graph,
            jobs,
            base_context,
            cancelled,
        }
    }

    /// Decide every `Pending` job whose needs are all final, repeating until
    /// nothing changes so that skips cascade within a single call.
    ///
    /// Jobs are examined in lexical id order.
    pub fn resolve_pending(&mut self) -> Resolution {
        let mut resolution = Resolution::default();

        loop {
            let candidates: Vec<JobId> = {
                let ro = ReadOnlyStateManager::new(self.jobs);
                self.jobs
                    .values()
                    .filter(|info| matches!(info.run_state, Some(RunState::Pending)))
                    .filter(|info| ro.all_needs_final(self.graph, &info.id))
                    .map(|info| info.id.clone())
                    .collect()
            };

            if candidates.is_empty() {
                break;
            }

            for id in candidates {
                let (needs, status) = {
                    let ro = ReadOnlyStateManager::new(self.jobs);
                    let Some(info) = self.jobs.get(&id) else {
                        continue;
                    };
                    (ro.needs_context(info), ro.status_view(info, self.cancelled))
                };

                let Some(info) = self.jobs.get_mut(&id) else {
                    continue;
                };

                let mut ctx = self
                    .base_context
                    .clone()
                    .with_namespace("needs", needs.clone())
                    .with_namespace("matrix", json!(info.matrix));
                ctx.set_status(status);

                if info.condition.evaluate(&ctx) {
                    info!(job = %id, "needs satisfied; job is ready");
                    info.run_state = Some(RunState::Ready);
                    resolution.ready.push(ScheduledJob {
                        id: id.clone(),
                        needs,
                    });
                } else {
                    info!(
                        job = %id,
                        condition = %info.condition.source(),
                        "condition is false; skipping job"
                    );
                    info.run_state = Some(RunState::Done(JobStatus::Skipped));
                    resolution.skipped.push(id.clone());
                }
            }
        }

        resolution
    }

    /// Move a `Ready` job to `Running`. Returns false for any other state.
    pub fn mark_running(&mut self, id: &str) -> bool {
        match self.jobs.get_mut(id) {
            Some(info) if info.run_state == Some(RunState::Ready) => {
                debug!(job = %id, "dispatching; marking Running");
                info.run_state = Some(RunState::Running);
                true
            }
            Some(info) => {
                warn!(job = %id, state = ?info.run_state, "cannot start job that is not ready");
                false
            }
            None => {
                warn!(job = %id, "start requested for unknown job");
                false
            }
        }
    }

    /// Cancel every job that has not started yet.
    pub fn cancel_unstarted(&mut self) -> Vec<JobId> {
        let mut cancelled = Vec::new();
        for info in self.jobs.values_mut() {
            if matches!(
                info.run_state,
                Some(RunState::Pending) | Some(RunState::Ready)
            ) {
                debug!(job = %info.id, "cancelling job before it started");
                info.run_state = Some(RunState::Done(JobStatus::Cancelled));
                cancelled.push(info.id.clone());
            }
        }
        cancelled
    }

    /// Check if every job in the run is final.
    pub fn all_jobs_final(&self) -> bool {
        !self.jobs.values().any(|info| {
            matches!(
                info.run_state,
                Some(RunState::Pending) | Some(RunState::Ready) | Some(RunState::Running)
            )
        })
    }
}

/// Read-only queries over the jobs map.
pub struct ReadOnlyStateManager<'a> {
    jobs: &'a BTreeMap<JobId, JobInfo>,
}

impl<'a> ReadOnlyStateManager<'a> {
    pub fn new(jobs: &'a BTreeMap<JobId, JobInfo>) -> Self {
        Self { jobs }
    }

    /// Whether every need of `id` has reached a final state.
    pub fn all_needs_final(&self, graph: &DagGraph, id: &str) -> bool {
        graph.dependencies_of(id).iter().all(|dep| match self.jobs.get(dep) {
            Some(info) => info.is_final(),
            None => {
                warn!(job = %id, dep = %dep, "dependency missing from jobs map");
                false
            }
        })
    }

    /// Conclusions of the instances behind each declared need.
    fn need_conclusions<'b>(&'b self, info: &'b JobInfo) -> impl Iterator<Item = JobStatus> + 'b {
        info.needs
            .iter()
            .flat_map(|g| g.instances.iter())
            .filter_map(|dep| self.jobs.get(dep))
            .map(|d| d.conclusion().unwrap_or(JobStatus::Skipped))
    }

    /// Status flags used by the job's condition.
    ///
    /// A need that was skipped counts as not successful; a cancelled need
    /// (or a cancelled run) sets the cancelled flag.
    pub fn status_view(&self, info: &JobInfo, run_cancelled: bool) -> StatusView {
        let mut view = StatusView {
            any_failed: false,
            cancelled: run_cancelled,
        };
        for c in self.need_conclusions(info) {
            match c {
                JobStatus::Succeeded => {}
                JobStatus::Failed | JobStatus::Skipped => view.any_failed = true,
                JobStatus::Cancelled => view.cancelled = true,
            }
        }
        view
    }

    /// The `needs` namespace: `needs.<name>.result` and
    /// `needs.<name>.outputs.<key>`.
    ///
    /// Matrix groups report their worst result; outputs are merged in
    /// instance order.
    pub fn needs_context(&self, info: &JobInfo) -> Json {
        let mut needs = Map::new();
        for group in info.needs.iter() {
            let mut worst = JobStatus::Succeeded;
            let mut outputs = Map::new();
            for dep in group.instances.iter() {
                let Some(d) = self.jobs.get(dep) else {
                    continue;
                };
                let c = d.conclusion().unwrap_or(JobStatus::Skipped);
                if c.severity() > worst.severity() {
                    worst = c;
                }
                for (k, v) in d.outputs.iter() {
                    outputs.insert(k.clone(), Json::String(v.clone()));
                }
            }
            needs.insert(
                group.name.clone(),
                json!({ "result": worst.result_str(), "outputs": outputs }),
            );
        }
        Json::Object(needs)
    }
}
