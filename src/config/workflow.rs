// src/config/workflow.rs

//! Validated, matrix-expanded workflow model.
//!
//! Built from a [`RawWorkflowFile`](crate::config::model::RawWorkflowFile)
//! by `TryFrom` in [`validate`](crate::config::validate). Immutable for the
//! duration of a run.

use std::collections::BTreeMap;
use std::time::Duration;

use crate::config::model::{EngineSection, TriggerSection};
use crate::expr::Condition;

/// Canonical job identifier (matrix instances carry their values, e.g.
/// `"test (3.12)"`).
pub type JobId = String;

#[derive(Debug, Clone)]
pub struct Workflow {
    pub name: String,
    pub on: TriggerSection,
    pub config: EngineSection,
    pub env: BTreeMap<String, String>,
    pub(crate) jobs: BTreeMap<JobId, Job>,
}

impl Workflow {
    pub fn jobs(&self) -> &BTreeMap<JobId, Job> {
        &self.jobs
    }

    pub fn job(&self, id: &str) -> Option<&Job> {
        self.jobs.get(id)
    }

    /// Job instances expanded from the declared job `template`.
    pub fn instances_of<'a>(&'a self, template: &'a str) -> impl Iterator<Item = &'a Job> + 'a {
        self.jobs.values().filter(move |j| j.template == template)
    }
}

/// A declared need and the job instances it expands to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NeedGroup {
    pub name: String,
    pub instances: Vec<JobId>,
}

#[derive(Debug, Clone)]
pub struct Job {
    pub id: JobId,
    /// The id declared in the workflow file (equal to `id` without a matrix).
    pub template: String,
    pub display_name: String,
    pub runs_on: String,
    pub needs: Vec<NeedGroup>,
    pub condition: Condition,
    pub continue_on_error: bool,
    pub timeout: Duration,
    pub env: BTreeMap<String, String>,
    pub working_directory: Option<String>,
    pub outputs: BTreeMap<String, String>,
    /// Values of this matrix instance (empty without a matrix).
    pub matrix: BTreeMap<String, String>,
    pub steps: Vec<Step>,
}

impl Job {
    /// All job instances this job waits for.
    pub fn needed_instances(&self) -> Vec<JobId> {
        self.needs
            .iter()
            .flat_map(|g| g.instances.iter().cloned())
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StepKind {
    Run(String),
    Uses {
        action: String,
        with: BTreeMap<String, String>,
    },
}

#[derive(Debug, Clone)]
pub struct Step {
    pub index: usize,
    pub id: Option<String>,
    pub name: String,
    pub kind: StepKind,
    pub env: BTreeMap<String, String>,
    pub condition: Condition,
    pub continue_on_error: bool,
    pub working_directory: Option<String>,
}
