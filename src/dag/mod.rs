// src/dag/mod.rs

//! Job graph representation and scheduling.
//!
//! - [`graph`] holds the directed acyclic graph of job instances.
//! - [`scheduler`] contains the per-run state machine that decides which
//!   jobs are ready, skipped or cancelled.
//! - [`job_info`] provides job metadata and scheduled job types.
//! - [`scheduler_step`] defines the result type for scheduler steps.
//! - [`state_manager`] manages per-run state transitions.

pub mod graph;
pub mod job_info;
pub mod scheduler;
pub mod scheduler_step;
pub mod state_manager;

pub use graph::DagGraph;
pub use job_info::{JobOutcome, JobRunState, ScheduledJob};
pub use scheduler::Scheduler;
pub use scheduler_step::SchedulerStep;
