use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use ciflow::dag::ScheduledJob;
use ciflow::engine::RuntimeEvent;
use ciflow::errors::Result;
use ciflow::exec::ExecutorBackend;
use ciflow::report::JobReport;
use ciflow::types::JobStatus;

/// A fake executor that:
/// - records which jobs were "run", in dispatch order
/// - immediately reports `JobCompleted` for each scheduled job, with
///   `Succeeded` unless a different outcome was scripted.
pub struct FakeExecutor {
    runtime_tx: mpsc::Sender<RuntimeEvent>,
    executed: Arc<Mutex<Vec<String>>>,
    outcomes: HashMap<String, (JobStatus, BTreeMap<String, String>)>,
    cancel_requests: Arc<Mutex<usize>>,
}

impl FakeExecutor {
    pub fn new(
        runtime_tx: mpsc::Sender<RuntimeEvent>,
        executed: Arc<Mutex<Vec<String>>>,
    ) -> Self {
        Self {
            runtime_tx,
            executed,
            outcomes: HashMap::new(),
            cancel_requests: Arc::new(Mutex::new(0)),
        }
    }

    /// Report `status` for `job` instead of success.
    pub fn with_status(mut self, job: &str, status: JobStatus) -> Self {
        self.outcomes
            .entry(job.to_string())
            .or_insert_with(|| (status, BTreeMap::new()))
            .0 = status;
        self
    }

    /// Publish a job output when `job` completes.
    pub fn with_output(mut self, job: &str, name: &str, value: &str) -> Self {
        self.outcomes
            .entry(job.to_string())
            .or_insert_with(|| (JobStatus::Succeeded, BTreeMap::new()))
            .1
            .insert(name.to_string(), value.to_string());
        self
    }

    /// Number of `cancel_all` calls seen so far.
    pub fn cancel_counter(&self) -> Arc<Mutex<usize>> {
        Arc::clone(&self.cancel_requests)
    }
}

/// A minimal report for a job that ran with `status`.
pub fn report(job: &str, status: JobStatus, outputs: BTreeMap<String, String>) -> JobReport {
    JobReport {
        id: job.to_string(),
        name: job.to_string(),
        runs_on: "local".to_string(),
        status,
        continue_on_error: false,
        started_at: None,
        finished_at: None,
        duration_ms: 1,
        outputs,
        steps: Vec::new(),
        failure: (status != JobStatus::Succeeded).then(|| format!("{job} {status}")),
        reused: false,
    }
}

impl ExecutorBackend for FakeExecutor {
    fn spawn_ready_jobs(
        &mut self,
        jobs: Vec<ScheduledJob>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let tx = self.runtime_tx.clone();
        let executed = Arc::clone(&self.executed);
        let outcomes = self.outcomes.clone();

        Box::pin(async move {
            for j in jobs {
                {
                    let mut guard = executed.lock().unwrap();
                    guard.push(j.id.clone());
                }

                let (status, outputs) = outcomes
                    .get(&j.id)
                    .cloned()
                    .unwrap_or((JobStatus::Succeeded, BTreeMap::new()));

                tx.send(RuntimeEvent::JobCompleted {
                    job: j.id.clone(),
                    report: report(&j.id, status, outputs),
                })
                .await
                .map_err(anyhow::Error::from)?;
            }
            Ok(())
        })
    }

    fn cancel_all(&mut self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        *self.cancel_requests.lock().unwrap() += 1;
        Box::pin(async { Ok(()) })
    }
}
