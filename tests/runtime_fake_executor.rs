// tests/runtime_fake_executor.rs

mod common;
use crate::common::{init_tracing, workflow};

use ciflow_test_utils::builders::{JobBuilder, WorkflowBuilder};
use ciflow_test_utils::fake_executor::{report, FakeExecutor};

use std::collections::BTreeMap;
use std::error::Error;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tokio::time::{timeout, Duration};

use ciflow::config::Workflow;
use ciflow::dag::{ScheduledJob, Scheduler};
use ciflow::engine::{CoreRuntime, RunResult, Runtime, RuntimeEvent, RuntimeOptions};
use ciflow::exec::ExecutorBackend;
use ciflow::types::{JobStatus, RunStatus};

type TestResult = Result<(), Box<dyn Error>>;

async fn run_with(
    wf: Workflow,
    max_parallel: usize,
    make: impl FnOnce(mpsc::Sender<RuntimeEvent>, Arc<Mutex<Vec<String>>>) -> FakeExecutor,
) -> Result<(RunResult, Vec<String>), Box<dyn Error>> {
    let wf = Arc::new(wf);
    let scheduler = Scheduler::from_workflow(&wf);
    let (rt_tx, rt_rx) = mpsc::channel::<RuntimeEvent>(64);
    let executed = Arc::new(Mutex::new(Vec::new()));
    let executor = make(rt_tx, executed.clone());

    let core = CoreRuntime::new(wf, scheduler, RuntimeOptions { max_parallel });
    let runtime = Runtime::new(core, rt_rx, executor);

    let result = match timeout(Duration::from_secs(3), runtime.run()).await {
        Ok(res) => res?,
        Err(_) => panic!("runtime did not finish within 3 seconds"),
    };
    let order = executed.lock().unwrap().clone();
    Ok((result, order))
}

#[tokio::test]
async fn runs_chain_in_dependency_order() -> TestResult {
    init_tracing();

    let wf = WorkflowBuilder::new()
        .with_job("a", JobBuilder::new("echo a").build())
        .with_job("b", JobBuilder::new("echo b").needs("a").build())
        .with_job("c", JobBuilder::new("echo c").needs("b").build())
        .build();

    let (result, order) = run_with(wf, 4, FakeExecutor::new).await?;

    assert_eq!(order, vec!["a", "b", "c"]);
    assert_eq!(result.status, RunStatus::Success);
    assert!(result.jobs.values().all(|j| j.status == JobStatus::Succeeded));
    Ok(())
}

#[tokio::test]
async fn failure_skips_dependents_and_fails_run() -> TestResult {
    init_tracing();

    let wf = WorkflowBuilder::new()
        .with_job("a", JobBuilder::new("exit 1").build())
        .with_job("b", JobBuilder::new("echo b").needs("a").build())
        .with_job("c", JobBuilder::new("echo c").needs("a").build())
        .build();

    let (result, order) = run_with(wf, 4, |tx, ex| {
        FakeExecutor::new(tx, ex).with_status("a", JobStatus::Failed)
    })
    .await?;

    assert_eq!(order, vec!["a"]);
    assert_eq!(result.jobs["b"].status, JobStatus::Skipped);
    assert_eq!(result.jobs["c"].status, JobStatus::Skipped);
    assert_eq!(result.status, RunStatus::Failure);
    Ok(())
}

#[tokio::test]
async fn informational_job_never_fails_the_run() -> TestResult {
    init_tracing();

    let wf = WorkflowBuilder::new()
        .with_job("lint", JobBuilder::new("ruff").continue_on_error(true).build())
        .with_job("test", JobBuilder::new("pytest").needs("lint").build())
        .build();

    let (result, order) = run_with(wf, 4, |tx, ex| {
        FakeExecutor::new(tx, ex).with_status("lint", JobStatus::Failed)
    })
    .await?;

    assert_eq!(order, vec!["lint", "test"]);
    assert_eq!(result.jobs["lint"].status, JobStatus::Failed);
    assert_eq!(result.jobs["test"].status, JobStatus::Succeeded);
    assert_eq!(result.status, RunStatus::Success);
    Ok(())
}

#[tokio::test]
async fn cleanup_job_runs_after_failure() -> TestResult {
    init_tracing();

    let wf = workflow(
        r#"
        [job.build]
        steps = [{ run = "make" }]

        [job.notify]
        needs = "build"
        if = "failure()"
        steps = [{ run = "notify" }]

        [job.deploy]
        needs = "build"
        steps = [{ run = "deploy" }]
        "#,
    );

    let (result, order) = run_with(wf, 4, |tx, ex| {
        FakeExecutor::new(tx, ex).with_status("build", JobStatus::Failed)
    })
    .await?;

    assert_eq!(order, vec!["build", "notify"]);
    assert_eq!(result.jobs["notify"].status, JobStatus::Succeeded);
    assert_eq!(result.jobs["deploy"].status, JobStatus::Skipped);
    assert_eq!(result.status, RunStatus::Failure);
    Ok(())
}

#[tokio::test]
async fn needs_outputs_drive_conditions() -> TestResult {
    init_tracing();

    let wf = workflow(
        r#"
        [job.check]
        steps = [{ run = "true" }]

        [job.publish]
        needs = "check"
        if = "needs.check.outputs.release == 'yes'"
        steps = [{ run = "publish" }]

        [job.preview]
        needs = "check"
        if = "needs.check.outputs.release != 'yes'"
        steps = [{ run = "preview" }]
        "#,
    );

    let (result, order) = run_with(wf, 4, |tx, ex| {
        FakeExecutor::new(tx, ex).with_output("check", "release", "yes")
    })
    .await?;

    assert_eq!(order, vec!["check", "publish"]);
    assert_eq!(result.jobs["preview"].status, JobStatus::Skipped);
    assert_eq!(result.status, RunStatus::Success);
    Ok(())
}

#[tokio::test]
async fn ready_jobs_dispatch_in_lexical_order() -> TestResult {
    init_tracing();

    let wf = WorkflowBuilder::new()
        .with_job("zeta", JobBuilder::new("true").build())
        .with_job("alpha", JobBuilder::new("true").build())
        .with_job("mid", JobBuilder::new("true").build())
        .build();

    let (_, order) = run_with(wf, 1, FakeExecutor::new).await?;
    assert_eq!(order, vec!["alpha", "mid", "zeta"]);
    Ok(())
}

/// Holds every dispatched job until `cancel_all`, then reports them as
/// cancelled, like the real executor does.
struct HoldingExecutor {
    runtime_tx: mpsc::Sender<RuntimeEvent>,
    held: Arc<Mutex<Vec<String>>>,
}

impl ExecutorBackend for HoldingExecutor {
    fn spawn_ready_jobs(
        &mut self,
        jobs: Vec<ScheduledJob>,
    ) -> Pin<Box<dyn Future<Output = ciflow::errors::Result<()>> + Send + '_>> {
        let held = Arc::clone(&self.held);
        Box::pin(async move {
            held.lock().unwrap().extend(jobs.into_iter().map(|j| j.id));
            Ok(())
        })
    }

    fn cancel_all(
        &mut self,
    ) -> Pin<Box<dyn Future<Output = ciflow::errors::Result<()>> + Send + '_>> {
        let tx = self.runtime_tx.clone();
        let held: Vec<String> = self.held.lock().unwrap().drain(..).collect();
        Box::pin(async move {
            for id in held {
                tx.send(RuntimeEvent::JobCompleted {
                    report: report(&id, JobStatus::Cancelled, BTreeMap::new()),
                    job: id,
                })
                .await
                .map_err(anyhow::Error::from)?;
            }
            Ok(())
        })
    }
}

#[tokio::test]
async fn cancel_finalises_running_and_pending_jobs() -> TestResult {
    init_tracing();

    let wf = Arc::new(
        WorkflowBuilder::new()
            .with_job("build", JobBuilder::new("sleep 100").build())
            .with_job("test", JobBuilder::new("pytest").needs("build").build())
            .build(),
    );
    let scheduler = Scheduler::from_workflow(&wf);
    let (rt_tx, rt_rx) = mpsc::channel::<RuntimeEvent>(16);
    let executor = HoldingExecutor {
        runtime_tx: rt_tx.clone(),
        held: Arc::new(Mutex::new(Vec::new())),
    };

    let core = CoreRuntime::new(wf, scheduler, RuntimeOptions { max_parallel: 2 });
    let runtime = Runtime::new(core, rt_rx, executor);

    rt_tx.send(RuntimeEvent::CancelRequested).await?;
    let result = timeout(Duration::from_secs(3), runtime.run())
        .await
        .expect("runtime did not finish within 3 seconds")?;

    assert_eq!(result.jobs["build"].status, JobStatus::Cancelled);
    assert_eq!(result.jobs["test"].status, JobStatus::Cancelled);
    assert_eq!(result.status, RunStatus::Cancelled);
    Ok(())
}

#[tokio::test]
async fn duplicate_completions_are_ignored() -> TestResult {
    init_tracing();

    let wf = Arc::new(
        WorkflowBuilder::new()
            .with_job("a", JobBuilder::new("true").build())
            .with_job("b", JobBuilder::new("true").needs("a").build())
            .build(),
    );
    let mut core = CoreRuntime::new(
        wf.clone(),
        Scheduler::from_workflow(&wf),
        RuntimeOptions { max_parallel: 1 },
    );

    core.start();
    let ok = report("a", JobStatus::Succeeded, BTreeMap::new());
    core.step(RuntimeEvent::JobCompleted { job: "a".into(), report: ok });

    let late = report("a", JobStatus::Failed, BTreeMap::new());
    let step = core.step(RuntimeEvent::JobCompleted { job: "a".into(), report: late });
    assert!(step.commands.is_empty());
    assert!(step.keep_running);
    assert_eq!(core.scheduler().status_of("a"), Some(JobStatus::Succeeded));
    Ok(())
}
