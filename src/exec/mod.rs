// src/exec/mod.rs

//! Job execution layer.
//!
//! This module is responsible for actually running the steps of dispatched
//! jobs, using `tokio::process::Command` for shell steps and the built-in
//! [`actions`](crate::actions) for `uses` steps, and reporting back to the
//! orchestration runtime via `RuntimeEvent`s.
//!
//! - [`context`] holds everything shared by the jobs of one run.
//! - [`executor_loop`] owns the loop that spawns one task per job.
//! - [`job_runner`] runs the steps of a single job.
//! - [`step_runner`] runs a single shell step process.
//! - [`env_file`] parses the `CIFLOW_ENV` / `CIFLOW_OUTPUT` files.
//! - [`backend`] provides the `ExecutorBackend` trait and a concrete
//!   `RealExecutorBackend` that the runtime uses in production, and which
//!   tests can replace with a fake implementation.

pub mod backend;
pub mod context;
pub mod env_file;
pub mod executor_loop;
pub mod job_runner;
pub mod step_runner;

pub use backend::{ExecutorBackend, RealExecutorBackend};
pub use context::RunContext;
pub use executor_loop::spawn_executor;
