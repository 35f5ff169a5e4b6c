// src/dag/scheduler.rs

use std::collections::{BTreeMap, BTreeSet};

use serde_json::Value as Json;
use tracing::{debug, info, warn};

use crate::config::workflow::{JobId, Workflow};
use crate::dag::graph::DagGraph;
use crate::dag::job_info::{JobInfo, JobOutcome, JobRunState, RunState};
use crate::dag::scheduler_step::SchedulerStep;
use crate::dag::state_manager::{ReadOnlyStateManager, StateManager};
use crate::errors::Result;
use crate::expr::EvalContext;
use crate::types::{JobStatus, RunStatus};

/// Scheduler holds the immutable job graph plus the mutable run state.
///
/// It is responsible for:
/// - deciding when a job's needs are final and evaluating its condition
/// - cascading skips when conditions do not hold
/// - finalising each job exactly once
/// - cancelling jobs that have not started
#[derive(Debug)]
pub struct Scheduler {
    graph: DagGraph,
    jobs: BTreeMap<JobId, JobInfo>,
    /// Namespaces shared by every job condition (`event`, `env`, ...).
    base_context: EvalContext,
    /// Jobs taking part in the run; `None` means all of them.
    selection: Option<BTreeSet<JobId>>,
    started: bool,
    cancelled: bool,
    finished: bool,
}

impl Scheduler {
    /// Construct a scheduler from a validated [`Workflow`].
    pub fn from_workflow(wf: &Workflow) -> Self {
        let graph = DagGraph::from_workflow(wf);
        let jobs = wf
            .jobs()
            .iter()
            .map(|(id, job)| (id.clone(), JobInfo::from_job(job)))
            .collect();

        Self {
            graph,
            jobs,
            base_context: EvalContext::default(),
            selection: None,
            started: false,
            cancelled: false,
            finished: false,
        }
    }

    /// Namespaces available to every job condition.
    pub fn with_context(mut self, ctx: EvalContext) -> Self {
        self.base_context = ctx;
        self
    }

    /// Restrict the run to `job` and everything it transitively needs.
    pub fn select_job(&mut self, job: &str) -> Result<()> {
        self.select_jobs([job])
    }

    /// Restrict the run to several jobs (e.g. all instances of a matrix job)
    /// and everything they transitively need.
    pub fn select_jobs<'a, I>(&mut self, jobs: I) -> Result<()>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut selected = BTreeSet::new();
        for job in jobs {
            selected.extend(self.graph.with_transitive_needs(job)?);
        }
        info!(selected = selected.len(), "restricting run to selected jobs and their needs");
        self.selection = Some(selected);
        Ok(())
    }

    /// Carry a success over from a previous run; the job will not execute.
    ///
    /// Returns false for unknown jobs or once the run has started.
    pub fn seed_succeeded(&mut self, job: &str, outputs: BTreeMap<String, String>) -> bool {
        if self.started {
            warn!(job = %job, "cannot seed a job after the run started");
            return false;
        }
        match self.jobs.get_mut(job) {
            Some(info) => {
                debug!(job = %job, "seeding success from previous run");
                info.run_state = Some(RunState::Done(JobStatus::Succeeded));
                info.outputs = outputs;
                info.seeded = true;
                true
            }
            None => {
                warn!(job = %job, "previous run mentions unknown job; ignoring");
                false
            }
        }
    }

    /// Begin the run: every selected job becomes pending and the ones
    /// without unmet needs are decided right away.
    pub fn start(&mut self) -> SchedulerStep {
        if self.started {
            warn!("scheduler already started");
            return SchedulerStep::default();
        }
        self.started = true;

        for info in self.jobs.values_mut() {
            let selected = self
                .selection
                .as_ref()
                .is_none_or(|s| s.contains(&info.id));
            if !selected {
                info.run_state = None;
                info.seeded = false;
            } else if !info.seeded {
                info.run_state = Some(RunState::Pending);
            }
        }

        self.resolve()
    }

    /// Record that a ready job was handed to the executor.
    pub fn mark_started(&mut self, job: &str) -> bool {
        let mut manager =
            StateManager::new(&self.graph, &mut self.jobs, &self.base_context, self.cancelled);
        manager.mark_running(job)
    }

    /// Handle the final outcome of a running job.
    ///
    /// Completions for jobs that are not running (late, duplicate or
    /// unknown) are logged and ignored.
    pub fn handle_completion(&mut self, job: &str, outcome: JobOutcome) -> SchedulerStep {
        match self.jobs.get_mut(job) {
            Some(info) if info.run_state == Some(RunState::Running) => {
                info!(job = %job, status = %outcome.status, "job finished");
                info.run_state = Some(RunState::Done(outcome.status));
                info.outputs = outcome.outputs;
            }
            Some(info) => {
                warn!(
                    job = %job,
                    state = ?info.run_state,
                    "ignoring completion for job that is not running"
                );
                return SchedulerStep::default();
            }
            None => {
                warn!(job = %job, "completion for unknown job; ignoring");
                return SchedulerStep::default();
            }
        }

        self.resolve()
    }

    /// Cancel the run: jobs that have not started become cancelled. Running
    /// jobs are expected to report `Cancelled` themselves.
    pub fn cancel(&mut self) -> SchedulerStep {
        if self.cancelled {
            return SchedulerStep::default();
        }
        self.cancelled = true;
        info!("run cancelled; cancelling jobs that have not started");

        let newly_cancelled = {
            let mut manager =
                StateManager::new(&self.graph, &mut self.jobs, &self.base_context, true);
            manager.cancel_unstarted()
        };

        SchedulerStep {
            newly_cancelled,
            run_just_finished: self.maybe_finish_run(),
            ..Default::default()
        }
    }

    fn resolve(&mut self) -> SchedulerStep {
        let resolution = {
            let mut manager =
                StateManager::new(&self.graph, &mut self.jobs, &self.base_context, self.cancelled);
            manager.resolve_pending()
        };

        SchedulerStep {
            newly_ready: resolution.ready,
            newly_skipped: resolution.skipped,
            newly_cancelled: Vec::new(),
            run_just_finished: self.maybe_finish_run(),
        }
    }

    /// Returns `true` if this call made the run finished.
    fn maybe_finish_run(&mut self) -> bool {
        if self.finished || !self.started {
            return false;
        }
        let manager =
            StateManager::new(&self.graph, &mut self.jobs, &self.base_context, self.cancelled);
        if manager.all_jobs_final() {
            info!("all jobs final; run finished");
            self.finished = true;
            true
        } else {
            false
        }
    }

    pub fn graph(&self) -> &DagGraph {
        &self.graph
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    /// Read-only view of the given job's run state.
    pub fn run_state_of(&self, job: &str) -> Option<JobRunState> {
        let info = self.jobs.get(job)?;
        Some(info.run_state.into())
    }

    pub fn status_of(&self, job: &str) -> Option<JobStatus> {
        self.jobs.get(job)?.status()
    }

    pub fn outputs_of(&self, job: &str) -> Option<&BTreeMap<String, String>> {
        self.jobs.get(job).map(|i| &i.outputs)
    }

    /// Whether the job's final state came from a previous run.
    pub fn is_seeded(&self, job: &str) -> bool {
        self.jobs.get(job).is_some_and(|i| i.seeded)
    }

    /// The `needs` namespace a job sees.
    pub fn needs_context_for(&self, job: &str) -> Option<Json> {
        let info = self.jobs.get(job)?;
        Some(ReadOnlyStateManager::new(&self.jobs).needs_context(info))
    }

    /// Final status of every job that took part in the run.
    pub fn final_statuses(&self) -> BTreeMap<JobId, JobStatus> {
        self.jobs
            .iter()
            .filter_map(|(id, info)| info.status().map(|s| (id.clone(), s)))
            .collect()
    }

    /// Overall result: failure if a non-informational job failed, otherwise
    /// cancelled if the run was cancelled, otherwise success.
    pub fn run_status(&self) -> RunStatus {
        let failed = self
            .jobs
            .values()
            .any(|i| i.status() == Some(JobStatus::Failed) && !i.continue_on_error);
        if failed {
            RunStatus::Failure
        } else if self.cancelled {
            RunStatus::Cancelled
        } else {
            RunStatus::Success
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::model::RawWorkflowFile;
    use serde_json::json;

    fn workflow(src: &str) -> Workflow {
        let raw: RawWorkflowFile = toml::from_str(src).unwrap();
        Workflow::try_from(raw).unwrap()
    }

    fn run_started(sched: &mut Scheduler, ids: &[&str]) {
        for id in ids {
            assert!(sched.mark_started(id), "could not start {id}");
        }
    }

    const DIAMOND: &str = r#"
[job.a]
steps = [{ run = "true" }]

[job.b]
needs = ["a"]
steps = [{ run = "true" }]

[job.c]
needs = ["a"]
steps = [{ run = "true" }]

[job.d]
needs = ["b", "c"]
steps = [{ run = "true" }]
"#;

    #[test]
    fn roots_are_ready_at_start_in_lexical_order() {
        let wf = workflow(
            r#"
[job.zeta]
steps = [{ run = "true" }]

[job.alpha]
steps = [{ run = "true" }]
"#,
        );
        let mut s = Scheduler::from_workflow(&wf);
        let step = s.start();
        assert_eq!(step.ready_ids(), vec!["alpha", "zeta"]);
    }

    #[test]
    fn failure_skips_dependents_transitively() {
        let mut s = Scheduler::from_workflow(&workflow(DIAMOND));
        assert_eq!(s.start().ready_ids(), vec!["a"]);
        run_started(&mut s, &["a"]);

        let step = s.handle_completion("a", JobOutcome::new(JobStatus::Failed));
        assert!(step.newly_ready.is_empty());
        assert_eq!(step.newly_skipped, vec!["b", "c", "d"]);
        assert!(step.run_just_finished);
        assert_eq!(s.run_status(), RunStatus::Failure);
    }

    #[test]
    fn always_condition_runs_after_failure() {
        let wf = workflow(
            r#"
[job.test]
steps = [{ run = "false" }]

[job.report]
needs = ["test"]
if = "always()"
steps = [{ run = "true" }]

[job.deploy]
needs = ["test"]
steps = [{ run = "true" }]
"#,
        );
        let mut s = Scheduler::from_workflow(&wf);
        s.start();
        run_started(&mut s, &["test"]);
        let step = s.handle_completion("test", JobOutcome::new(JobStatus::Failed));
        assert_eq!(step.ready_ids(), vec!["report"]);
        assert_eq!(step.newly_skipped, vec!["deploy"]);
        assert_eq!(
            s.needs_context_for("report").unwrap()["test"]["result"],
            "failure"
        );
    }

    #[test]
    fn informational_failure_concludes_success() {
        let wf = workflow(
            r#"
[job.lint]
continue_on_error = true
steps = [{ run = "false" }]

[job.build]
needs = ["lint"]
steps = [{ run = "true" }]
"#,
        );
        let mut s = Scheduler::from_workflow(&wf);
        s.start();
        run_started(&mut s, &["lint"]);
        let step = s.handle_completion("lint", JobOutcome::new(JobStatus::Failed));
        assert_eq!(step.ready_ids(), vec!["build"]);
        run_started(&mut s, &["build"]);
        s.handle_completion("build", JobOutcome::new(JobStatus::Succeeded));
        assert!(s.is_finished());
        assert_eq!(s.status_of("lint"), Some(JobStatus::Failed));
        assert_eq!(s.run_status(), RunStatus::Success);
    }

    #[test]
    fn duplicate_completion_is_ignored() {
        let mut s = Scheduler::from_workflow(&workflow(DIAMOND));
        s.start();
        run_started(&mut s, &["a"]);
        s.handle_completion("a", JobOutcome::new(JobStatus::Succeeded));
        let again = s.handle_completion("a", JobOutcome::new(JobStatus::Failed));
        assert!(again.newly_ready.is_empty());
        assert_eq!(s.status_of("a"), Some(JobStatus::Succeeded));
    }

    #[test]
    fn outputs_flow_into_needs_context() {
        let mut s = Scheduler::from_workflow(&workflow(DIAMOND));
        s.start();
        run_started(&mut s, &["a"]);
        let step = s.handle_completion(
            "a",
            JobOutcome::new(JobStatus::Succeeded).with_output("version", "1.2.3"),
        );
        let b = step.newly_ready.iter().find(|j| j.id == "b").unwrap();
        assert_eq!(
            b.needs,
            json!({ "a": { "result": "success", "outputs": { "version": "1.2.3" } } })
        );
    }

    #[test]
    fn cancel_finalises_unstarted_jobs() {
        let mut s = Scheduler::from_workflow(&workflow(DIAMOND));
        s.start();
        run_started(&mut s, &["a"]);

        let step = s.cancel();
        assert_eq!(step.newly_cancelled, vec!["b", "c", "d"]);
        assert!(!step.run_just_finished);

        let done = s.handle_completion("a", JobOutcome::new(JobStatus::Cancelled));
        assert!(done.run_just_finished);
        assert_eq!(s.run_status(), RunStatus::Cancelled);
    }

    #[test]
    fn selection_limits_run_to_transitive_needs() {
        let mut s = Scheduler::from_workflow(&workflow(DIAMOND));
        s.select_job("b").unwrap();
        s.start();
        assert_eq!(s.run_state_of("c"), Some(JobRunState::NotInRun));
        assert_eq!(s.run_state_of("d"), Some(JobRunState::NotInRun));

        run_started(&mut s, &["a"]);
        let step = s.handle_completion("a", JobOutcome::new(JobStatus::Succeeded));
        assert_eq!(step.ready_ids(), vec!["b"]);
        assert!(s.select_job("nope").is_err());
    }

    #[test]
    fn seeded_jobs_are_not_rerun() {
        let mut s = Scheduler::from_workflow(&workflow(DIAMOND));
        assert!(s.seed_succeeded("a", BTreeMap::new()));
        assert!(s.seed_succeeded("b", BTreeMap::new()));
        let step = s.start();
        assert_eq!(step.ready_ids(), vec!["c"]);
        assert!(s.is_seeded("a"));
    }

    #[test]
    fn matrix_group_reports_worst_result() {
        let wf = workflow(
            r#"
[job.test]
matrix = { py = ["3.9", "3.12"] }
steps = [{ run = "pytest" }]

[job.summary]
needs = ["test"]
if = "always()"
steps = [{ run = "true" }]
"#,
        );
        let mut s = Scheduler::from_workflow(&wf);
        assert_eq!(s.start().ready_ids(), vec!["test (3.12)", "test (3.9)"]);
        run_started(&mut s, &["test (3.12)", "test (3.9)"]);
        s.handle_completion("test (3.9)", JobOutcome::new(JobStatus::Succeeded));
        let step = s.handle_completion("test (3.12)", JobOutcome::new(JobStatus::Failed));
        assert_eq!(step.newly_ready[0].needs["test"]["result"], "failure");
    }
}
