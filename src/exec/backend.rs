// src/exec/backend.rs

//! Pluggable executor backend abstraction.
//!
//! The runtime talks to an `ExecutorBackend` instead of a raw mpsc sender.
//! This makes it easy to swap in a fake executor in tests while keeping the
//! production executor implementation in [`executor_loop`](super::executor_loop).
//!
//! - `RealExecutorBackend` is the default implementation used by `ciflow`.
//!   It wraps the `spawn_executor` loop, forwards scheduled jobs over an mpsc
//!   channel and broadcasts cancellation over a watch channel.
//! - Tests can provide their own `ExecutorBackend` that, for example, records
//!   which jobs were scheduled and directly emits `JobCompleted` events.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::{mpsc, watch};

use crate::dag::ScheduledJob;
use crate::engine::RuntimeEvent;
use crate::errors::{Error, Result};
use crate::exec::context::RunContext;

use super::executor_loop::spawn_executor;

/// Trait abstracting how scheduled jobs are executed.
///
/// Production code uses [`RealExecutorBackend`]; tests can provide their own
/// implementation that doesn't spawn real processes.
pub trait ExecutorBackend: Send {
    /// Dispatch the given jobs for execution.
    ///
    /// Every dispatched job must eventually be answered with exactly one
    /// `RuntimeEvent::JobCompleted`.
    fn spawn_ready_jobs(
        &mut self,
        jobs: Vec<ScheduledJob>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Ask every running job to stop. Running jobs still report completion
    /// (as cancelled).
    fn cancel_all(&mut self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;
}

/// Real executor backend used in production.
pub struct RealExecutorBackend {
    tx: mpsc::Sender<ScheduledJob>,
    cancel_tx: watch::Sender<bool>,
}

impl RealExecutorBackend {
    /// Create a new real executor backend, wiring it to the given runtime
    /// event sender.
    ///
    /// This spawns the background executor loop immediately.
    pub fn new(ctx: Arc<RunContext>, runtime_tx: mpsc::Sender<RuntimeEvent>) -> Self {
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let tx = spawn_executor(ctx, runtime_tx, cancel_rx);
        Self { tx, cancel_tx }
    }
}

impl ExecutorBackend for RealExecutorBackend {
    fn spawn_ready_jobs(
        &mut self,
        jobs: Vec<ScheduledJob>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        // Clone the sender so the future doesn't borrow `self` across `await`.
        let tx = self.tx.clone();

        Box::pin(async move {
            for job in jobs {
                tx.send(job).await.map_err(Error::from)?;
            }
            Ok(())
        })
    }

    fn cancel_all(&mut self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        // Ignore the error: no receivers means nothing is running.
        let _ = self.cancel_tx.send(true);
        Box::pin(async { Ok(()) })
    }
}
