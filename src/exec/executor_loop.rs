// src/exec/executor_loop.rs

//! Main executor loop that spawns one task per dispatched job.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::workflow::JobId;
use crate::dag::ScheduledJob;
use crate::engine::RuntimeEvent;
use crate::exec::context::RunContext;
use crate::exec::job_runner::run_job;

/// Spawn the background executor loop.
///
/// The returned `mpsc::Sender<ScheduledJob>` is what `RealExecutorBackend`
/// uses to dispatch jobs. Each job runs in its own Tokio task with its own
/// environment; **per job id there is never more than one task**, a second
/// dispatch of a running job is ignored.
///
/// All job tasks watch `cancel_rx`; when it flips to `true` they kill their
/// current step and report `cancelled`.
pub fn spawn_executor(
    ctx: Arc<RunContext>,
    runtime_tx: mpsc::Sender<RuntimeEvent>,
    cancel_rx: watch::Receiver<bool>,
) -> mpsc::Sender<ScheduledJob> {
    let (tx, mut rx) = mpsc::channel::<ScheduledJob>(32);

    tokio::spawn(async move {
        info!(run_id = %ctx.run_id, "executor loop started");

        let mut active: HashMap<JobId, JoinHandle<()>> = HashMap::new();

        while let Some(job) = rx.recv().await {
            active.retain(|_, handle| !handle.is_finished());

            if active.contains_key(&job.id) {
                warn!(job = %job.id, "job already running; ignoring duplicate dispatch");
                continue;
            }

            let id = job.id.clone();
            let handle = tokio::spawn(run_job(
                ctx.clone(),
                job,
                runtime_tx.clone(),
                cancel_rx.clone(),
            ));
            debug!(job = %id, "job task spawned");
            active.insert(id, handle);
        }

        info!("executor loop finished (channel closed)");
    });

    tx
}
