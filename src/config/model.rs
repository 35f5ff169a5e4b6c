// src/config/model.rs

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};

/// Top-level workflow file as read from TOML (or YAML).
///
/// ```toml
/// name = "tests"
///
/// [on.push]
/// branches = ["main"]
///
/// [config]
/// max_parallel = 4
///
/// [job.lint]
/// steps = [{ run = "ruff check ." }]
///
/// [job.test]
/// needs = ["lint"]
/// matrix = { python = ["3.9", "3.12"] }
///
/// [[job.test.steps]]
/// run = "pytest"
/// ```
///
/// All sections except `job` are optional and have reasonable defaults.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawWorkflowFile {
    /// Display name; defaults to the file stem.
    #[serde(default)]
    pub name: Option<String>,

    /// Events that activate the workflow, from `[on]`.
    #[serde(default)]
    pub on: TriggerSection,

    /// Engine behaviour from `[config]`.
    #[serde(default)]
    pub config: EngineSection,

    /// Workflow-wide environment variables.
    #[serde(default, deserialize_with = "scalar_map")]
    pub env: BTreeMap<String, String>,

    /// All jobs from `[job.<id>]` (or `jobs:` in YAML).
    #[serde(default, alias = "jobs")]
    pub job: BTreeMap<String, JobConfig>,
}

/// `[on]` section.
///
/// An entirely empty section means "activate on any event".
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
pub struct TriggerSection {
    #[serde(default, deserialize_with = "declared")]
    pub push: Option<BranchFilter>,

    #[serde(default, deserialize_with = "declared")]
    pub pull_request: Option<BranchFilter>,

    #[serde(default, deserialize_with = "declared")]
    pub workflow_dispatch: Option<DispatchTrigger>,
}

impl TriggerSection {
    pub fn is_empty(&self) -> bool {
        self.push.is_none() && self.pull_request.is_none() && self.workflow_dispatch.is_none()
    }
}

/// Branch / tag filter for `push` and `pull_request`.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
pub struct BranchFilter {
    /// Glob patterns; `None` means "any branch".
    #[serde(default)]
    pub branches: Option<Vec<String>>,

    /// Branches that never activate the workflow.
    #[serde(default, alias = "branches-ignore")]
    pub branches_ignore: Vec<String>,

    /// Tag glob patterns; tag pushes only activate when this is set.
    #[serde(default)]
    pub tags: Option<Vec<String>>,
}

/// `[on.workflow_dispatch]` takes no options.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
pub struct DispatchTrigger {}

/// `[config]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineSection {
    /// Maximum number of jobs running at the same time.
    #[serde(default = "default_max_parallel", alias = "max-parallel")]
    pub max_parallel: usize,

    /// Where cache entries are stored, relative to the workspace.
    #[serde(default = "default_cache_dir", alias = "cache-dir")]
    pub cache_dir: String,

    /// Where artifacts are stored, relative to the workspace.
    #[serde(default = "default_artifact_dir", alias = "artifact-dir")]
    pub artifact_dir: String,

    /// Per-run scratch space and run reports, relative to the workspace.
    #[serde(default = "default_work_dir", alias = "work-dir")]
    pub work_dir: String,

    /// Job timeout used when a job has none (e.g. `"360m"`).
    #[serde(default = "default_timeout", alias = "default-timeout")]
    pub default_timeout: String,
}

fn default_max_parallel() -> usize {
    4
}

fn default_cache_dir() -> String {
    ".ciflow/cache".to_string()
}

fn default_artifact_dir() -> String {
    ".ciflow/artifacts".to_string()
}

fn default_work_dir() -> String {
    ".ciflow/runs".to_string()
}

fn default_timeout() -> String {
    "360m".to_string()
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            max_parallel: default_max_parallel(),
            cache_dir: default_cache_dir(),
            artifact_dir: default_artifact_dir(),
            work_dir: default_work_dir(),
            default_timeout: default_timeout(),
        }
    }
}

/// `[job.<id>]` section.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct JobConfig {
    /// Human-readable name used in logs and the report.
    #[serde(default)]
    pub name: Option<String>,

    /// Target environment descriptor. The local executor accepts any label.
    #[serde(default = "default_runs_on", alias = "runs-on")]
    pub runs_on: String,

    /// Jobs that must reach a final state before this one is considered.
    #[serde(default, deserialize_with = "one_or_many")]
    pub needs: Vec<String>,

    /// Condition deciding whether the job runs once its needs are final.
    #[serde(default, rename = "if")]
    pub if_cond: Option<String>,

    /// Informational job: its failure never fails the run.
    #[serde(default, alias = "continue-on-error")]
    pub continue_on_error: bool,

    /// Wall-clock limit, e.g. `"30m"`.
    #[serde(default)]
    pub timeout: Option<String>,

    #[serde(default, deserialize_with = "scalar_map")]
    pub env: BTreeMap<String, String>,

    /// Default working directory for all steps of this job.
    #[serde(default, alias = "working-directory")]
    pub working_directory: Option<String>,

    /// Job outputs: name -> `${{ steps.<id>.outputs.<name> }}` template.
    #[serde(default, deserialize_with = "scalar_map")]
    pub outputs: BTreeMap<String, String>,

    /// Matrix axes; the job is instantiated once per combination.
    #[serde(default, deserialize_with = "scalar_lists")]
    pub matrix: BTreeMap<String, Vec<String>>,

    #[serde(default)]
    pub steps: Vec<StepConfig>,
}

fn default_runs_on() -> String {
    "local".to_string()
}

/// One entry of `[[job.<id>.steps]]`.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct StepConfig {
    /// Identifier used to reference this step's outputs.
    #[serde(default)]
    pub id: Option<String>,

    #[serde(default)]
    pub name: Option<String>,

    /// Shell command. Exactly one of `run` / `uses` must be set.
    #[serde(default)]
    pub run: Option<String>,

    /// Built-in action reference (`cache`, `upload-artifact`, ...).
    #[serde(default)]
    pub uses: Option<String>,

    /// Action parameters.
    #[serde(default, deserialize_with = "scalar_map")]
    pub with: BTreeMap<String, String>,

    #[serde(default, deserialize_with = "scalar_map")]
    pub env: BTreeMap<String, String>,

    #[serde(default, rename = "if")]
    pub if_cond: Option<String>,

    #[serde(default, alias = "continue-on-error")]
    pub continue_on_error: bool,

    #[serde(default, alias = "working-directory")]
    pub working_directory: Option<String>,
}

/// Deserialize an optional section whose mere presence matters.
///
/// YAML writes `workflow_dispatch:` with a null body; that still counts as
/// declared.
fn declared<'de, D, T>(d: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Some(Option::<T>::deserialize(d)?.unwrap_or_default()))
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Scalar {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl From<Scalar> for String {
    fn from(s: Scalar) -> Self {
        match s {
            Scalar::Bool(b) => b.to_string(),
            Scalar::Int(i) => i.to_string(),
            Scalar::Float(f) => f.to_string(),
            Scalar::Str(s) => s,
        }
    }
}

fn scalar_map<'de, D>(d: D) -> Result<BTreeMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: BTreeMap<String, Scalar> = BTreeMap::deserialize(d)?;
    Ok(raw.into_iter().map(|(k, v)| (k, v.into())).collect())
}

fn scalar_lists<'de, D>(d: D) -> Result<BTreeMap<String, Vec<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: BTreeMap<String, Vec<Scalar>> = BTreeMap::deserialize(d)?;
    Ok(raw
        .into_iter()
        .map(|(k, vs)| (k, vs.into_iter().map(String::from).collect()))
        .collect())
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

fn one_or_many<'de, D>(d: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match OneOrMany::deserialize(d)? {
        OneOrMany::One(s) => vec![s],
        OneOrMany::Many(v) => v,
    })
}
