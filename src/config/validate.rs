// src/config/validate.rs

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

use petgraph::algo::tarjan_scc;
use petgraph::graphmap::DiGraphMap;
use tracing::warn;

use crate::actions::is_builtin_action;
use crate::config::matrix::{combinations, instance_id};
use crate::config::model::{JobConfig, RawWorkflowFile, StepConfig};
use crate::config::workflow::{Job, NeedGroup, Step, StepKind, Workflow};
use crate::errors::{CiflowError, Result};
use crate::expr::{check_template, Condition};
use crate::types::parse_duration;

impl TryFrom<RawWorkflowFile> for Workflow {
    type Error = crate::errors::CiflowError;

    fn try_from(raw: RawWorkflowFile) -> std::result::Result<Self, Self::Error> {
        validate_raw(&raw)?;

        let default_timeout = parse_duration(&raw.config.default_timeout).map_err(|e| {
            CiflowError::ConfigError(format!("[config].default_timeout: {e}"))
        })?;

        // Instance ids per declared job, needed to expand `needs`.
        let mut instance_ids: HashMap<&str, Vec<String>> = HashMap::new();
        for (name, job) in raw.job.iter() {
            let ids = combinations(&job.matrix)
                .iter()
                .map(|c| instance_id(name, c))
                .collect();
            instance_ids.insert(name.as_str(), ids);
        }

        let mut jobs = BTreeMap::new();
        for (name, cfg) in raw.job.iter() {
            for combo in combinations(&cfg.matrix) {
                let job = build_job(name, cfg, combo, &instance_ids, default_timeout)?;
                jobs.insert(job.id.clone(), job);
            }
        }

        Ok(Workflow {
            name: raw.name.clone().unwrap_or_else(|| "workflow".to_string()),
            on: raw.on,
            config: raw.config,
            env: raw.env,
            jobs,
        })
    }
}

fn build_job(
    name: &str,
    cfg: &JobConfig,
    matrix: BTreeMap<String, String>,
    instance_ids: &HashMap<&str, Vec<String>>,
    default_timeout: std::time::Duration,
) -> Result<Job> {
    let id = instance_id(name, &matrix);

    let condition = match &cfg.if_cond {
        Some(src) => Condition::parse(src)?,
        None => Condition::success(),
    };

    let timeout = match &cfg.timeout {
        Some(s) => parse_duration(s)
            .map_err(|e| CiflowError::ConfigError(format!("job '{name}' timeout: {e}")))?,
        None => default_timeout,
    };

    let needs = cfg
        .needs
        .iter()
        .map(|n| NeedGroup {
            name: n.clone(),
            instances: instance_ids.get(n.as_str()).cloned().unwrap_or_default(),
        })
        .collect();

    let steps = cfg
        .steps
        .iter()
        .enumerate()
        .map(|(i, s)| build_step(i, s))
        .collect::<Result<Vec<_>>>()?;

    let display_name = match &cfg.name {
        Some(n) if matrix.is_empty() => n.clone(),
        Some(n) => {
            let values: Vec<&str> = matrix.values().map(String::as_str).collect();
            format!("{} ({})", n, values.join(", "))
        }
        None => id.clone(),
    };

    Ok(Job {
        id,
        template: name.to_string(),
        display_name,
        runs_on: cfg.runs_on.clone(),
        needs,
        condition,
        continue_on_error: cfg.continue_on_error,
        timeout,
        env: cfg.env.clone(),
        working_directory: cfg.working_directory.clone(),
        outputs: cfg.outputs.clone(),
        matrix,
        steps,
    })
}

fn build_step(index: usize, cfg: &StepConfig) -> Result<Step> {
    let kind = match (&cfg.run, &cfg.uses) {
        (Some(cmd), None) => StepKind::Run(cmd.clone()),
        (None, Some(action)) => StepKind::Uses {
            action: action.clone(),
            with: cfg.with.clone(),
        },
        // Rejected by `validate_steps`.
        _ => StepKind::Run(String::new()),
    };

    let name = cfg.name.clone().unwrap_or_else(|| match &kind {
        StepKind::Run(cmd) => {
            let first = cmd.lines().next().unwrap_or("").trim();
            format!("run: {first}")
        }
        StepKind::Uses { action, .. } => format!("uses: {action}"),
    });

    let condition = match &cfg.if_cond {
        Some(src) => Condition::parse(src)?,
        None => Condition::success(),
    };

    Ok(Step {
        index,
        id: cfg.id.clone(),
        name,
        kind,
        env: cfg.env.clone(),
        condition,
        continue_on_error: cfg.continue_on_error,
        working_directory: cfg.working_directory.clone(),
    })
}

/// Check a raw workflow for everything that can be decided before a run.
pub fn validate_raw(cfg: &RawWorkflowFile) -> Result<()> {
    ensure_has_jobs(cfg)?;
    validate_engine_config(cfg)?;
    validate_job_ids(cfg)?;
    validate_job_dependencies(cfg)?;
    validate_dag(cfg)?;
    for (name, job) in cfg.job.iter() {
        validate_job(name, job)?;
    }
    Ok(())
}

fn ensure_has_jobs(cfg: &RawWorkflowFile) -> Result<()> {
    if cfg.job.is_empty() {
        return Err(CiflowError::ConfigError(
            "workflow must contain at least one [job.<id>] section".to_string(),
        ));
    }
    Ok(())
}

fn validate_engine_config(cfg: &RawWorkflowFile) -> Result<()> {
    if cfg.config.max_parallel == 0 {
        return Err(CiflowError::ConfigError(
            "[config].max_parallel must be >= 1 (got 0)".to_string(),
        ));
    }
    parse_duration(&cfg.config.default_timeout)
        .map_err(|e| CiflowError::ConfigError(format!("[config].default_timeout: {e}")))?;
    Ok(())
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

fn validate_job_ids(cfg: &RawWorkflowFile) -> Result<()> {
    for name in cfg.job.keys() {
        if !is_identifier(name) {
            return Err(CiflowError::ConfigError(format!(
                "invalid job id '{name}': use letters, digits, '_' or '-', starting with a letter or '_'"
            )));
        }
    }
    Ok(())
}

fn validate_job_dependencies(cfg: &RawWorkflowFile) -> Result<()> {
    for (name, job) in cfg.job.iter() {
        for dep in job.needs.iter() {
            if dep == name {
                return Err(CiflowError::ConfigError(format!(
                    "job '{}' cannot depend on itself in `needs`",
                    name
                )));
            }
            if !cfg.job.contains_key(dep) {
                return Err(CiflowError::ConfigError(format!(
                    "job '{}' has unknown dependency '{}' in `needs`",
                    name, dep
                )));
            }
        }
    }
    Ok(())
}

fn validate_dag(cfg: &RawWorkflowFile) -> Result<()> {
    // Edge direction: dep -> job.
    let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();

    for name in cfg.job.keys() {
        graph.add_node(name.as_str());
    }
    for (name, job) in cfg.job.iter() {
        for dep in job.needs.iter() {
            graph.add_edge(dep.as_str(), name.as_str(), ());
        }
    }

    for scc in tarjan_scc(&graph) {
        if scc.len() > 1 {
            let path = cycle_path(&graph, &scc);
            return Err(CiflowError::DagCycle(format!(
                "cycle detected in job graph: {}",
                path.join(" -> ")
            )));
        }
    }

    Ok(())
}

/// Shortest cycle through the lexically smallest job of a strongly
/// connected component, as a list starting and ending at that job.
fn cycle_path<'a>(graph: &DiGraphMap<&'a str, ()>, scc: &[&'a str]) -> Vec<&'a str> {
    let members: HashSet<&str> = scc.iter().copied().collect();
    let start = scc.iter().copied().min().unwrap_or_default();

    let mut parent: HashMap<&str, &str> = HashMap::new();
    let mut queue = VecDeque::from([start]);

    while let Some(node) = queue.pop_front() {
        let mut next: Vec<&str> = graph
            .neighbors(node)
            .filter(|n| members.contains(n))
            .collect();
        next.sort();
        for n in next {
            if n == start {
                let mut path = vec![start];
                let mut cur = node;
                while cur != start {
                    path.push(cur);
                    cur = parent[cur];
                }
                path.push(start);
                path[1..].reverse();
                return path;
            }
            if !parent.contains_key(n) {
                parent.insert(n, node);
                queue.push_back(n);
            }
        }
    }

    let mut path: Vec<&str> = scc.to_vec();
    path.push(start);
    path
}

fn validate_job(name: &str, job: &JobConfig) -> Result<()> {
    if job.steps.is_empty() {
        return Err(CiflowError::ConfigError(format!(
            "job '{name}' must have at least one step"
        )));
    }

    if let Some(src) = &job.if_cond {
        Condition::parse(src)?;
    }

    if let Some(t) = &job.timeout {
        parse_duration(t)
            .map_err(|e| CiflowError::ConfigError(format!("job '{name}' timeout: {e}")))?;
    }

    for (axis, values) in job.matrix.iter() {
        if values.is_empty() {
            return Err(CiflowError::ConfigError(format!(
                "job '{name}' matrix axis '{axis}' has no values"
            )));
        }
    }

    for value in job.env.values().chain(job.outputs.values()) {
        check_template(value)?;
    }

    let mut step_ids = HashSet::new();
    for (i, step) in job.steps.iter().enumerate() {
        validate_step(name, i, step, &mut step_ids)?;
    }

    Ok(())
}

fn validate_step<'a>(
    job: &str,
    index: usize,
    step: &'a StepConfig,
    step_ids: &mut HashSet<&'a str>,
) -> Result<()> {
    let label = step
        .id
        .clone()
        .or_else(|| step.name.clone())
        .unwrap_or_else(|| format!("#{}", index + 1));

    match (&step.run, &step.uses) {
        (Some(cmd), None) => check_template(cmd)?,
        (None, Some(action)) => {
            if !is_builtin_action(action) {
                warn!(
                    job = %job,
                    step = %label,
                    action = %action,
                    "step uses an unknown action; it will fail when executed"
                );
            }
        }
        (Some(_), Some(_)) => {
            return Err(CiflowError::ConfigError(format!(
                "job '{job}' step {label}: `run` and `uses` are mutually exclusive"
            )));
        }
        (None, None) => {
            return Err(CiflowError::ConfigError(format!(
                "job '{job}' step {label}: one of `run` or `uses` is required"
            )));
        }
    }

    if let Some(id) = &step.id {
        if !is_identifier(id) {
            return Err(CiflowError::ConfigError(format!(
                "job '{job}' step id '{id}' is not a valid identifier"
            )));
        }
        if !step_ids.insert(id.as_str()) {
            return Err(CiflowError::ConfigError(format!(
                "job '{job}' has duplicate step id '{id}'"
            )));
        }
    }

    if let Some(src) = &step.if_cond {
        Condition::parse(src)?;
    }

    for value in step.with.values().chain(step.env.values()) {
        check_template(value)?;
    }

    Ok(())
}
