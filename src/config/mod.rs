// src/config/mod.rs

//! Workflow loading and validation.
//!
//! Responsibilities:
//! - Define the serde data model (`model.rs`).
//! - Load a workflow file from disk (`loader.rs`).
//! - Validate it and expand job matrices (`validate.rs`, `matrix.rs`) into
//!   the immutable [`Workflow`] (`workflow.rs`).

pub mod loader;
pub mod matrix;
pub mod model;
pub mod validate;
pub mod workflow;

pub use loader::{default_config_path, load_and_validate, load_from_path};
pub use model::{BranchFilter, EngineSection, JobConfig, RawWorkflowFile, StepConfig, TriggerSection};
pub use validate::validate_raw;
pub use workflow::{Job, JobId, NeedGroup, Step, StepKind, Workflow};
