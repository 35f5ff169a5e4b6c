// src/engine/mod.rs

//! Orchestration engine for ciflow.
//!
//! This module ties together:
//! - the DAG scheduler
//! - the dispatch queue (bounded concurrency)
//! - the result aggregation for the run report
//! - the main runtime event loop that reacts to job completions and
//!   cancellation requests
//!
//! The pure core state machine lives in [`core`]; the async/IO shell is
//! implemented in [`runtime`].

use std::collections::BTreeMap;

use crate::config::workflow::JobId;
use crate::report::JobReport;
use crate::types::RunStatus;

/// Runtime options used by the core.
#[derive(Debug, Clone, Copy)]
pub struct RuntimeOptions {
    /// Maximum number of jobs running at the same time.
    pub max_parallel: usize,
}

/// Events flowing into the runtime from executors and signal handlers.
#[derive(Debug, Clone)]
pub enum RuntimeEvent {
    /// A dispatched job reached its final state.
    JobCompleted { job: JobId, report: JobReport },
    /// Cancel the run (e.g. Ctrl-C).
    CancelRequested,
}

/// Final result of a run as produced by the engine.
#[derive(Debug, Clone)]
pub struct RunResult {
    pub status: RunStatus,
    pub jobs: BTreeMap<JobId, JobReport>,
}

pub mod core;
pub mod event_handlers;
pub mod queue;
pub mod runtime;

pub use core::CoreRuntime;
pub use event_handlers::{CoreCommand, CoreStep};
pub use queue::DispatchQueue;
pub use runtime::Runtime;
