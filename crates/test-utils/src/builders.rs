#![allow(dead_code)]

use std::collections::BTreeMap;

use ciflow::config::{JobConfig, RawWorkflowFile, StepConfig, Workflow};

/// Builder for `Workflow` to simplify test setup.
pub struct WorkflowBuilder {
    raw: RawWorkflowFile,
}

impl WorkflowBuilder {
    pub fn new() -> Self {
        Self {
            raw: RawWorkflowFile {
                name: Some("test".to_string()),
                ..RawWorkflowFile::default()
            },
        }
    }

    pub fn with_job(mut self, id: &str, job: JobConfig) -> Self {
        self.raw.job.insert(id.to_string(), job);
        self
    }

    pub fn max_parallel(mut self, n: usize) -> Self {
        self.raw.config.max_parallel = n;
        self
    }

    pub fn env(mut self, key: &str, value: &str) -> Self {
        self.raw.env.insert(key.to_string(), value.to_string());
        self
    }

    pub fn raw(self) -> RawWorkflowFile {
        self.raw
    }

    pub fn build(self) -> Workflow {
        Workflow::try_from(self.raw).expect("Failed to build valid workflow from builder")
    }
}

impl Default for WorkflowBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for `JobConfig`.
pub struct JobBuilder {
    job: JobConfig,
}

impl JobBuilder {
    /// A job with a single `run` step.
    pub fn new(cmd: &str) -> Self {
        Self::empty().run(cmd)
    }

    pub fn empty() -> Self {
        Self {
            job: JobConfig {
                runs_on: "local".to_string(),
                ..JobConfig::default()
            },
        }
    }

    pub fn needs(mut self, dep: &str) -> Self {
        self.job.needs.push(dep.to_string());
        self
    }

    pub fn if_cond(mut self, cond: &str) -> Self {
        self.job.if_cond = Some(cond.to_string());
        self
    }

    pub fn continue_on_error(mut self, val: bool) -> Self {
        self.job.continue_on_error = val;
        self
    }

    pub fn timeout(mut self, t: &str) -> Self {
        self.job.timeout = Some(t.to_string());
        self
    }

    pub fn env(mut self, key: &str, value: &str) -> Self {
        self.job.env.insert(key.to_string(), value.to_string());
        self
    }

    pub fn output(mut self, name: &str, template: &str) -> Self {
        self.job.outputs.insert(name.to_string(), template.to_string());
        self
    }

    pub fn matrix(mut self, axis: &str, values: &[&str]) -> Self {
        self.job
            .matrix
            .insert(axis.to_string(), values.iter().map(|v| v.to_string()).collect());
        self
    }

    pub fn run(mut self, cmd: &str) -> Self {
        self.job.steps.push(StepBuilder::run(cmd).build());
        self
    }

    pub fn step(mut self, step: StepConfig) -> Self {
        self.job.steps.push(step);
        self
    }

    pub fn build(self) -> JobConfig {
        self.job
    }
}

/// Builder for `StepConfig`.
pub struct StepBuilder {
    step: StepConfig,
}

impl StepBuilder {
    pub fn run(cmd: &str) -> Self {
        Self {
            step: StepConfig {
                run: Some(cmd.to_string()),
                ..StepConfig::default()
            },
        }
    }

    pub fn uses(action: &str) -> Self {
        Self {
            step: StepConfig {
                uses: Some(action.to_string()),
                ..StepConfig::default()
            },
        }
    }

    pub fn id(mut self, id: &str) -> Self {
        self.step.id = Some(id.to_string());
        self
    }

    pub fn name(mut self, name: &str) -> Self {
        self.step.name = Some(name.to_string());
        self
    }

    pub fn with(mut self, key: &str, value: &str) -> Self {
        self.step.with.insert(key.to_string(), value.to_string());
        self
    }

    pub fn env(mut self, key: &str, value: &str) -> Self {
        self.step.env.insert(key.to_string(), value.to_string());
        self
    }

    pub fn if_cond(mut self, cond: &str) -> Self {
        self.step.if_cond = Some(cond.to_string());
        self
    }

    pub fn continue_on_error(mut self, val: bool) -> Self {
        self.step.continue_on_error = val;
        self
    }

    pub fn working_directory(mut self, dir: &str) -> Self {
        self.step.working_directory = Some(dir.to_string());
        self
    }

    pub fn build(self) -> StepConfig {
        self.step
    }
}

/// Convenience for `with = { ... }` maps in tests.
pub fn params(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}
