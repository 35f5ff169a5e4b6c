// src/lib.rs

pub mod actions;
pub mod artifact;
pub mod cache;
pub mod cli;
pub mod config;
pub mod dag;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod expr;
pub mod fs;
pub mod logging;
pub mod report;
pub mod secrets;
pub mod trigger;
pub mod types;

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use serde_json::Value as Json;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::artifact::FileArtifactStore;
use crate::cache::{CacheManager, FileCacheStore};
use crate::cli::CliArgs;
use crate::config::loader::load_and_validate;
use crate::config::workflow::{JobId, StepKind, Workflow};
use crate::dag::{DagGraph, Scheduler};
use crate::engine::{CoreRuntime, Runtime, RuntimeEvent, RuntimeOptions};
use crate::errors::{CiflowError, Result};
use crate::exec::{RealExecutorBackend, RunContext};
use crate::expr::EvalContext;
use crate::fs::{FileSystem, RealFileSystem};
use crate::report::{RunReport, LAST_RUN_FILE};
use crate::secrets::SecretStore;
use crate::trigger::{Event, TriggerDecision};

/// High-level entry point used by `main.rs`. Returns the process exit code.
///
/// This wires together:
/// - workflow loading and validation
/// - event construction and trigger evaluation
/// - secrets, cache and artifact stores
/// - scheduler / queue / runtime
/// - executor
/// - Ctrl-C handling
/// - the run report
pub async fn run(args: CliArgs) -> Result<i32> {
    let config_path = PathBuf::from(&args.config);
    let workflow = load_and_validate(&config_path)?;

    let event = build_event(&args)?;
    event.validate()?;

    let decision = trigger::evaluate(&workflow.on, &event)?;

    if args.dry_run {
        print_dry_run(&workflow, &decision)?;
        return Ok(0);
    }

    let event_ctx = match decision {
        TriggerDecision::Activated(ctx) => ctx,
        TriggerDecision::NotActivated(reason) => {
            info!(reason = %reason, "workflow not activated");
            println!("workflow '{}' not activated: {}", workflow.name, reason);
            return Ok(0);
        }
    };

    let workspace = config_root_dir(&config_path);
    let run_id = uuid::Uuid::new_v4().to_string();
    let work_dir = workspace.join(&workflow.config.work_dir);
    info!(run_id = %run_id, workflow = %workflow.name, workspace = ?workspace, "starting run");

    let mut secrets = SecretStore::from_process_env();
    if let Some(file) = &args.secrets_file {
        secrets.load_file(Path::new(file))?;
    }
    debug!(count = secrets.len(), "secrets loaded");

    // Scheduler with the namespaces every job condition can see.
    let base_context = EvalContext::default()
        .with_namespace("event", event_ctx.to_json())
        .with_namespace("secrets", secrets.to_json())
        .with_namespace("env", string_map_json(&workflow.env));
    let mut scheduler = Scheduler::from_workflow(&workflow).with_context(base_context);

    if let Some(job) = &args.job {
        let ids = resolve_job_selection(&workflow, job)?;
        scheduler.select_jobs(ids.iter().map(String::as_str))?;
    }

    let previous = if args.rerun_failed {
        load_previous_run(&work_dir)
    } else {
        None
    };
    let mut reused = Vec::new();
    if let Some(prev) = &previous {
        for report in prev.succeeded_jobs() {
            if scheduler.seed_succeeded(&report.id, report.outputs.clone()) {
                reused.push(report.clone());
            }
        }
        info!(reused = reused.len(), "re-running jobs that did not succeed previously");
    }

    let max_parallel = args.max_parallel.unwrap_or(workflow.config.max_parallel);
    if max_parallel == 0 {
        return Err(CiflowError::ConfigError(
            "--max-parallel must be at least 1".to_string(),
        ));
    }

    let fs: Arc<dyn FileSystem> = Arc::new(RealFileSystem);
    let workflow = Arc::new(workflow);
    let ctx = Arc::new(RunContext {
        run_id: run_id.clone(),
        workflow: workflow.clone(),
        event: event_ctx.clone(),
        secrets,
        cache: CacheManager::new(Arc::new(FileCacheStore::new(
            workspace.join(&workflow.config.cache_dir),
            fs.clone(),
        ))),
        artifacts: Arc::new(FileArtifactStore::new(
            &workspace.join(&workflow.config.artifact_dir),
            &run_id,
            fs.clone(),
        )),
        fs,
        workspace: workspace.clone(),
        run_dir: work_dir.join(&run_id),
    });

    // Runtime event channel.
    let (rt_tx, rt_rx) = mpsc::channel::<RuntimeEvent>(64);

    // Job executor backend (real implementation in production).
    let executor = RealExecutorBackend::new(ctx, rt_tx.clone());

    // Ctrl-C → cancel the run.
    {
        let tx = rt_tx.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "failed to listen for Ctrl+C");
                return;
            }
            let _ = tx.send(RuntimeEvent::CancelRequested).await;
        });
    }

    let started_at = Utc::now();

    // Construct the pure core runtime (single source of truth for semantics).
    let mut core = CoreRuntime::new(workflow.clone(), scheduler, RuntimeOptions { max_parallel });
    for report in reused {
        core.add_reused_report(report);
    }

    // Construct the async IO shell around the core.
    let result = Runtime::new(core, rt_rx, executor).run().await?;

    let event = event_ctx.event();
    let report = RunReport {
        run_id,
        workflow: workflow.name.clone(),
        event: event.kind,
        git_ref: event.git_ref.clone(),
        actor: event.actor.clone(),
        status: result.status,
        started_at,
        finished_at: Utc::now(),
        jobs: result.jobs,
    };

    let report_path = work_dir.join(LAST_RUN_FILE);
    if let Err(err) = report.write_json(&report_path) {
        warn!(path = ?report_path, error = %err, "failed to write run report");
    }

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    report.print_summary(&mut out)?;

    Ok(report.exit_code())
}

fn build_event(args: &CliArgs) -> Result<Event> {
    let mut event = Event::new(args.event, args.git_ref.clone(), args.actor.clone());
    if let Some(base) = &args.base_ref {
        event = event.with_base_ref(base.clone());
    }
    if let Some(path) = &args.event_payload {
        let text = std::fs::read_to_string(path).map_err(|e| {
            CiflowError::Event(format!("reading event payload {:?}: {}", path, e))
        })?;
        let payload: Json = serde_json::from_str(&text).map_err(|e| {
            CiflowError::Event(format!("parsing event payload {:?}: {}", path, e))
        })?;
        event = event.with_payload(payload);
    }
    Ok(event)
}

/// `--job` accepts an instance id (`test (3.12)`) or a declared job id,
/// which selects all of its matrix instances.
fn resolve_job_selection(workflow: &Workflow, job: &str) -> Result<Vec<JobId>> {
    if workflow.job(job).is_some() {
        return Ok(vec![job.to_string()]);
    }
    let instances: Vec<JobId> = workflow.instances_of(job).map(|j| j.id.clone()).collect();
    if instances.is_empty() {
        return Err(CiflowError::JobNotFound(job.to_string()));
    }
    Ok(instances)
}

fn load_previous_run(work_dir: &Path) -> Option<RunReport> {
    let path = work_dir.join(LAST_RUN_FILE);
    if !path.exists() {
        warn!(path = ?path, "--rerun-failed: no previous run report; running everything");
        return None;
    }
    match RunReport::load(&path) {
        Ok(report) => Some(report),
        Err(err) => {
            warn!(path = ?path, error = %err, "--rerun-failed: unreadable previous run report; running everything");
            None
        }
    }
}

fn string_map_json(map: &BTreeMap<String, String>) -> Json {
    Json::Object(
        map.iter()
            .map(|(k, v)| (k.clone(), Json::String(v.clone())))
            .collect(),
    )
}

/// Figure out the workspace root.
///
/// - If the config path has a non-empty parent (e.g. "ci/Ciflow.toml"),
///   we use that directory.
/// - If it's just a bare filename like "Ciflow.toml" (parent = ""),
///   we fall back to the current working directory "."
fn config_root_dir(config_path: &Path) -> PathBuf {
    match config_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
    }
}

/// Dry-run output: trigger decision, jobs with needs and steps, and the
/// layered execution plan.
fn print_dry_run(workflow: &Workflow, decision: &TriggerDecision) -> Result<()> {
    let stdout = std::io::stdout();
    let mut out = stdout.lock();

    writeln!(out, "ciflow dry-run: workflow '{}'", workflow.name)?;
    match decision {
        TriggerDecision::Activated(_) => writeln!(out, "  trigger: activated")?,
        TriggerDecision::NotActivated(reason) => {
            writeln!(out, "  trigger: not activated ({reason})")?
        }
    }
    writeln!(out, "  config.max_parallel = {}", workflow.config.max_parallel)?;
    writeln!(out)?;

    writeln!(out, "jobs ({}):", workflow.jobs().len())?;
    for (id, job) in workflow.jobs() {
        writeln!(out, "  - {id}")?;
        if job.runs_on != "local" {
            writeln!(out, "      runs_on: {}", job.runs_on)?;
        }
        let needs = job.needed_instances();
        if !needs.is_empty() {
            writeln!(out, "      needs: {:?}", needs)?;
        }
        if job.condition.source() != "success()" {
            writeln!(out, "      if: {}", job.condition.source())?;
        }
        if job.continue_on_error {
            writeln!(out, "      continue_on_error: true")?;
        }
        for step in &job.steps {
            let what = match &step.kind {
                StepKind::Run(cmd) => format!("run {}", cmd.lines().next().unwrap_or_default()),
                StepKind::Uses { action, .. } => format!("uses {action}"),
            };
            writeln!(out, "      step {}: {}", step.index, what)?;
        }
    }
    writeln!(out)?;

    writeln!(out, "plan:")?;
    let layers = DagGraph::from_workflow(workflow).layers()?;
    for (i, layer) in layers.iter().enumerate() {
        writeln!(out, "  {}: {}", i + 1, layer.join(", "))?;
    }

    debug!("dry-run complete (no execution)");
    Ok(())
}
