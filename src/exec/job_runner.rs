// src/exec/job_runner.rs

//! Runs the steps of one job and reports the result to the runtime.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use serde_json::{json, Map, Value as Json};
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::actions::{run_action, ActionContext, PostAction};
use crate::cache::SaveOutcome;
use crate::config::workflow::{Job, Step, StepKind};
use crate::dag::ScheduledJob;
use crate::engine::RuntimeEvent;
use crate::exec::context::RunContext;
use crate::exec::env_file::parse_env_file;
use crate::exec::step_runner::{run_shell, ShellCommand, ShellExit};
use crate::expr::{interpolate, EvalContext, StatusView};
use crate::fs::snapshot_files_skipping;
use crate::report::{JobReport, StepOutcome, StepReport};
use crate::types::{format_duration, JobStatus};

/// Why a job stopped before running all its steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Interrupt {
    Cancelled,
    TimedOut,
}

/// Run a dispatched job and send exactly one `JobCompleted` for it.
pub async fn run_job(
    ctx: Arc<RunContext>,
    scheduled: ScheduledJob,
    runtime_tx: mpsc::Sender<RuntimeEvent>,
    cancel_rx: watch::Receiver<bool>,
) {
    let job_id = scheduled.id.clone();

    let report = match ctx.workflow.job(&job_id) {
        Some(job) => execute_job(&ctx, job, scheduled.needs, cancel_rx).await,
        None => {
            error!(job = %job_id, "dispatched job is not part of the workflow");
            JobReport {
                id: job_id.clone(),
                name: job_id.clone(),
                runs_on: String::new(),
                status: JobStatus::Failed,
                continue_on_error: false,
                started_at: None,
                finished_at: None,
                duration_ms: 0,
                outputs: BTreeMap::new(),
                steps: Vec::new(),
                failure: Some(format!("job '{}' not found", job_id)),
                reused: false,
            }
        }
    };

    if runtime_tx
        .send(RuntimeEvent::JobCompleted {
            job: job_id.clone(),
            report,
        })
        .await
        .is_err()
    {
        warn!(job = %job_id, "runtime is gone; dropping job completion");
    }
}

/// Run all steps of `job` and build its report.
pub async fn execute_job(
    ctx: &RunContext,
    job: &Job,
    needs: Json,
    mut cancel_rx: watch::Receiver<bool>,
) -> JobReport {
    let started_at = Utc::now();
    let clock = std::time::Instant::now();
    let deadline = job_deadline(Instant::now(), job.timeout);

    info!(job = %job.id, run_id = %ctx.run_id, runs_on = %job.runs_on, "job started");

    let mut exec = JobExecution::new(ctx, job, needs);
    let (status, failure) = match exec.prepare_env() {
        Ok(()) => exec.run_steps(deadline, &mut cancel_rx).await,
        Err(err) => (
            JobStatus::Failed,
            Some(ctx.secrets.mask(&format!("{:#}", err))),
        ),
    };

    let outputs = exec.job_outputs(status);
    if status == JobStatus::Succeeded {
        exec.run_post_actions();
    } else if !exec.post.is_empty() {
        debug!(job = %job.id, "job did not succeed; skipping cache saves");
    }

    let duration_ms = clock.elapsed().as_millis() as u64;
    info!(
        job = %job.id,
        status = %status,
        duration_ms,
        "job finished"
    );

    JobReport {
        id: job.id.clone(),
        name: job.display_name.clone(),
        runs_on: job.runs_on.clone(),
        status,
        continue_on_error: job.continue_on_error,
        started_at: Some(started_at),
        finished_at: Some(Utc::now()),
        duration_ms,
        outputs,
        steps: exec.reports,
        failure,
        reused: false,
    }
}

/// Per-job mutable state: the env map, step results and deferred actions.
struct JobExecution<'a> {
    ctx: &'a RunContext,
    job: &'a Job,
    needs: Json,
    env: BTreeMap<String, String>,
    steps: Map<String, Json>,
    reports: Vec<StepReport>,
    post: Vec<PostAction>,
    job_dir: PathBuf,
    engine_dirs: Vec<PathBuf>,
}

/// What a step that ran produced.
struct StepRun {
    success: bool,
    exit_code: Option<i32>,
    tail: Vec<String>,
    outputs: BTreeMap<String, String>,
    interrupt: Option<Interrupt>,
}

impl<'a> JobExecution<'a> {
    fn new(ctx: &'a RunContext, job: &'a Job, needs: Json) -> Self {
        Self {
            ctx,
            job,
            needs,
            env: BTreeMap::new(),
            steps: Map::new(),
            reports: Vec::new(),
            post: Vec::new(),
            job_dir: ctx.run_dir.join(dir_name(&job.id)),
            engine_dirs: ctx.engine_dirs(),
        }
    }

    fn eval_context(&self, status: StatusView, job_status: &str) -> EvalContext {
        let env: Map<String, Json> = self
            .env
            .iter()
            .map(|(k, v)| (k.clone(), Json::String(v.clone())))
            .collect();
        let matrix: Map<String, Json> = self
            .job
            .matrix
            .iter()
            .map(|(k, v)| (k.clone(), Json::String(v.clone())))
            .collect();

        EvalContext::new(status)
            .with_namespace("event", self.ctx.event.to_json())
            .with_namespace("needs", self.needs.clone())
            .with_namespace("matrix", Json::Object(matrix))
            .with_namespace("secrets", self.ctx.secrets.to_json())
            .with_namespace("env", Json::Object(env))
            .with_namespace("steps", Json::Object(self.steps.clone()))
            .with_namespace("ciflow", self.ctx.to_json())
            .with_namespace(
                "job",
                json!({
                    "id": self.job.id,
                    "name": self.job.display_name,
                    "runs_on": self.job.runs_on,
                    "status": job_status,
                }),
            )
    }

    /// Workflow env, then job env on top. Values may reference earlier ones.
    fn prepare_env(&mut self) -> Result<()> {
        let (ctx, job) = (self.ctx, self.job);
        for layer in [&ctx.workflow.env, &job.env] {
            let ectx = self.eval_context(StatusView::default(), "success");
            for (key, value) in layer {
                let value = interpolate(value, &ectx)
                    .with_context(|| format!("evaluating env '{}'", key))?;
                self.env.insert(key.clone(), value);
            }
        }
        Ok(())
    }

    async fn run_steps(
        &mut self,
        deadline: Instant,
        cancel_rx: &mut watch::Receiver<bool>,
    ) -> (JobStatus, Option<String>) {
        let mut any_failed = false;
        let mut interrupt: Option<Interrupt> = None;
        let mut failure: Option<String> = None;

        let job = self.job;
        for step in &job.steps {
            if interrupt.is_none() {
                if *cancel_rx.borrow() {
                    interrupt = Some(Interrupt::Cancelled);
                } else if Instant::now() >= deadline {
                    interrupt = Some(Interrupt::TimedOut);
                }
            }
            if interrupt.is_some() {
                let skipped = StepReport::skipped(
                    step.index,
                    step.id.clone(),
                    step.name.clone(),
                    StepOutcome::Skipped,
                );
                self.record(step, skipped);
                continue;
            }

            let status = StatusView {
                any_failed,
                cancelled: false,
            };
            let ectx = self.eval_context(status, if any_failed { "failure" } else { "success" });
            if !step.condition.evaluate(&ectx) {
                debug!(job = %self.job.id, step = %step.name, condition = %step.condition.source(), "step condition false; skipping");
                let skipped = StepReport::skipped(
                    step.index,
                    step.id.clone(),
                    step.name.clone(),
                    StepOutcome::Skipped,
                );
                self.record(step, skipped);
                continue;
            }

            let (report, step_interrupt) = self.run_step(step, &ectx, deadline, cancel_rx).await;

            if let Some(i) = step_interrupt {
                interrupt = Some(i);
            }
            if report.conclusion == StepOutcome::Failure {
                any_failed = true;
                if failure.is_none() {
                    let detail = report
                        .error
                        .clone()
                        .or_else(|| report.exit_code.map(|c| format!("exit code {}", c)))
                        .unwrap_or_else(|| "failed".to_string());
                    failure = Some(format!("step '{}' failed: {}", step.name, detail));
                }
            }
            self.record(step, report);
        }

        match interrupt {
            Some(Interrupt::Cancelled) => (JobStatus::Cancelled, Some("run cancelled".to_string())),
            Some(Interrupt::TimedOut) => (
                JobStatus::Failed,
                Some(format!("timed out after {}", format_duration(job.timeout))),
            ),
            None if any_failed => (JobStatus::Failed, failure),
            None => (JobStatus::Succeeded, None),
        }
    }

    /// Store the report and expose `steps.<id>.*` to later steps.
    fn record(&mut self, step: &Step, report: StepReport) {
        if let Some(id) = &step.id {
            self.steps.insert(
                id.clone(),
                json!({
                    "outputs": report.outputs,
                    "outcome": report.outcome.as_str(),
                    "conclusion": report.conclusion.as_str(),
                }),
            );
        }
        self.reports.push(report);
    }

    async fn run_step(
        &mut self,
        step: &Step,
        ectx: &EvalContext,
        deadline: Instant,
        cancel_rx: &mut watch::Receiver<bool>,
    ) -> (StepReport, Option<Interrupt>) {
        let clock = std::time::Instant::now();
        info!(job = %self.job.id, step = %step.name, "step started");

        let mut report = StepReport::skipped(
            step.index,
            step.id.clone(),
            step.name.clone(),
            StepOutcome::Success,
        );

        let run = self.try_run_step(step, ectx, deadline, cancel_rx).await;
        report.duration_ms = clock.elapsed().as_millis() as u64;

        let interrupt = match run {
            Ok(run) => {
                report.exit_code = run.exit_code;
                report.output_tail = run.tail;
                report.outputs = run.outputs;
                report.outcome = match run.interrupt {
                    Some(Interrupt::Cancelled) => StepOutcome::Cancelled,
                    Some(Interrupt::TimedOut) => {
                        report.error = Some(format!(
                            "timed out after {}",
                            format_duration(self.job.timeout)
                        ));
                        StepOutcome::Failure
                    }
                    None if run.success => StepOutcome::Success,
                    None => StepOutcome::Failure,
                };
                run.interrupt
            }
            Err(err) => {
                let msg = self.ctx.secrets.mask(&format!("{:#}", err));
                warn!(job = %self.job.id, step = %step.name, error = %msg, "step failed to run");
                report.error = Some(msg);
                report.outcome = StepOutcome::Failure;
                None
            }
        };

        report.conclusion = match report.outcome {
            StepOutcome::Failure if step.continue_on_error && interrupt.is_none() => {
                info!(job = %self.job.id, step = %step.name, "step failed; continue_on_error is set");
                StepOutcome::Success
            }
            other => other,
        };

        info!(
            job = %self.job.id,
            step = %step.name,
            outcome = report.outcome.as_str(),
            duration_ms = report.duration_ms,
            "step finished"
        );
        (report, interrupt)
    }

    async fn try_run_step(
        &mut self,
        step: &Step,
        ectx: &EvalContext,
        deadline: Instant,
        cancel_rx: &mut watch::Receiver<bool>,
    ) -> Result<StepRun> {
        let fs = self.ctx.fs.as_ref();
        let step_dir = self.job_dir.join(format!("step-{}", step.index));
        let env_path = step_dir.join("env");
        let output_path = step_dir.join("output");
        fs.write(&env_path, b"")?;
        fs.write(&output_path, b"")?;

        let mut env = self.env.clone();
        for (key, value) in &step.env {
            let value =
                interpolate(value, ectx).with_context(|| format!("evaluating env '{}'", key))?;
            env.insert(key.clone(), value);
        }
        env.extend(self.builtin_env(&env_path, &output_path));

        let working_dir = match step
            .working_directory
            .as_ref()
            .or(self.job.working_directory.as_ref())
        {
            Some(dir) => self.ctx.workspace.join(
                interpolate(dir, ectx).context("evaluating working_directory")?,
            ),
            None => self.ctx.workspace.clone(),
        };

        let mut run = match &step.kind {
            StepKind::Run(script) => {
                let script = interpolate(script, ectx).context("evaluating run command")?;
                let cmd = ShellCommand {
                    job: &self.job.id,
                    step: &step.name,
                    script: &script,
                    env: &env,
                    working_dir: &working_dir,
                };
                let res = run_shell(cmd, &self.ctx.secrets, deadline, cancel_rx).await?;
                let (exit_code, interrupt) = match res.exit {
                    ShellExit::Exited(code) => (Some(code), None),
                    ShellExit::Cancelled => (None, Some(Interrupt::Cancelled)),
                    ShellExit::TimedOut => (None, Some(Interrupt::TimedOut)),
                };
                StepRun {
                    success: res.success(),
                    exit_code,
                    tail: res.tail,
                    outputs: BTreeMap::new(),
                    interrupt,
                }
            }
            StepKind::Uses { action, with } => {
                let mut params = BTreeMap::new();
                for (key, value) in with {
                    let value = interpolate(value, ectx)
                        .with_context(|| format!("evaluating with.{}", key))?;
                    params.insert(key.clone(), value);
                }
                let actx = ActionContext {
                    job: &self.job.id,
                    workspace: &self.ctx.workspace,
                    working_dir: &working_dir,
                    fs,
                    cache: &self.ctx.cache,
                    artifacts: self.ctx.artifacts.as_ref(),
                    engine_dirs: &self.engine_dirs,
                };
                let result = run_action(action, &params, &actx)?;
                self.post.extend(result.post);
                StepRun {
                    success: true,
                    exit_code: None,
                    tail: result
                        .messages
                        .iter()
                        .map(|m| self.ctx.secrets.mask(m))
                        .collect(),
                    outputs: result.outputs,
                    interrupt: None,
                }
            }
        };

        if run.interrupt.is_none() {
            let env_updates = parse_env_file(&fs.read_to_string(&env_path)?)
                .context("parsing CIFLOW_ENV file")?;
            for (key, value) in env_updates {
                debug!(job = %self.job.id, step = %step.name, key = %key, "env updated by step");
                self.env.insert(key, value);
            }
            let outputs = parse_env_file(&fs.read_to_string(&output_path)?)
                .context("parsing CIFLOW_OUTPUT file")?;
            run.outputs.extend(outputs);
        }

        Ok(run)
    }

    fn builtin_env(&self, env_path: &Path, output_path: &Path) -> Vec<(String, String)> {
        let event = self.ctx.event.event();
        [
            ("CI", "true".to_string()),
            ("CIFLOW", "true".to_string()),
            ("CIFLOW_WORKFLOW", self.ctx.workflow.name.clone()),
            ("CIFLOW_JOB", self.job.id.clone()),
            ("CIFLOW_RUN_ID", self.ctx.run_id.clone()),
            ("CIFLOW_EVENT", event.kind.as_str().to_string()),
            ("CIFLOW_REF", event.git_ref.clone()),
            ("CIFLOW_BRANCH", event.branch().unwrap_or_default().to_string()),
            ("CIFLOW_ACTOR", event.actor.clone()),
            ("CIFLOW_WORKSPACE", self.ctx.workspace.to_string_lossy().into_owned()),
            ("CIFLOW_OUTPUT", output_path.to_string_lossy().into_owned()),
            ("CIFLOW_ENV", env_path.to_string_lossy().into_owned()),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
    }

    /// Evaluate the declared job outputs against the final step results.
    fn job_outputs(&self, status: JobStatus) -> BTreeMap<String, String> {
        let ectx = self.eval_context(
            StatusView {
                any_failed: status == JobStatus::Failed,
                cancelled: status == JobStatus::Cancelled,
            },
            status.result_str(),
        );
        let mut outputs = BTreeMap::new();
        for (name, template) in &self.job.outputs {
            match interpolate(template, &ectx) {
                Ok(value) => {
                    outputs.insert(name.clone(), value);
                }
                Err(err) => {
                    warn!(job = %self.job.id, output = %name, error = %err, "failed to evaluate job output");
                }
            }
        }
        outputs
    }

    /// Cache saves queued by `cache` steps. Failures only warn.
    fn run_post_actions(&self) {
        for action in &self.post {
            match action {
                PostAction::SaveCache { key, root, paths } => {
                    let tree = match snapshot_files_skipping(
                        self.ctx.fs.as_ref(),
                        root,
                        paths,
                        &self.engine_dirs,
                    ) {
                        Ok(tree) => tree,
                        Err(err) => {
                            warn!(job = %self.job.id, key = %key, error = %err, "failed to read cache paths; not saving");
                            continue;
                        }
                    };
                    if tree.is_empty() {
                        warn!(job = %self.job.id, key = %key, "no files matched cache paths; not saving");
                        continue;
                    }
                    match self.ctx.cache.save(key, tree) {
                        Ok(SaveOutcome::Saved) => info!(job = %self.job.id, key = %key, "cache saved"),
                        Ok(SaveOutcome::AlreadyExists) => {
                            debug!(job = %self.job.id, key = %key, "cache key already saved by another job")
                        }
                        Err(err) => warn!(job = %self.job.id, key = %key, error = %err, "cache save failed"),
                    }
                }
            }
        }
    }
}

/// `now + timeout`, saturating at roughly a century for huge timeouts.
fn job_deadline(now: Instant, timeout: Duration) -> Instant {
    now.checked_add(timeout)
        .or_else(|| now.checked_add(FAR_FUTURE))
        .unwrap_or(now)
}

const FAR_FUTURE: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// Directory-safe form of a job id: `test (linux, 3.9)` ->
/// `test__linux__3_9_-<hash>`. The hash keeps ids that sanitise alike apart.
fn dir_name(id: &str) -> String {
    let safe: String = id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    let hash = blake3::hash(id.as_bytes()).to_hex();
    format!("{}-{}", safe, &hash[..8])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dir_names_are_path_safe() {
        let name = dir_name("test (linux, 3.9)");
        assert!(name.starts_with("test__linux__3_9_-"), "{name}");
        assert!(name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
        assert!(dir_name("lint").starts_with("lint-"));
        assert_eq!(dir_name("lint"), dir_name("lint"));
    }

    #[test]
    fn huge_timeouts_do_not_overflow_the_deadline() {
        let now = Instant::now();
        assert!(job_deadline(now, Duration::from_secs(u64::MAX)) > now);
        assert_eq!(job_deadline(now, Duration::from_secs(5)), now + Duration::from_secs(5));
    }

    #[test]
    fn ids_that_sanitise_alike_get_distinct_dirs() {
        assert_ne!(dir_name("test (3.1)"), dir_name("test (3_1)"));
        assert_ne!(dir_name("a.b"), dir_name("a_b"));
    }
}
