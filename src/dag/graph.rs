// src/dag/graph.rs

use std::collections::{BTreeMap, BTreeSet};

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;

use crate::config::workflow::{JobId, Workflow};
use crate::errors::{CiflowError, Result};

/// In-memory job graph keyed by job instance id.
///
/// Acyclicity is already checked in `config::validate`; this keeps the
/// direct dependencies of each job for scheduling, selection and plan
/// output.
#[derive(Debug, Clone)]
pub struct DagGraph {
    /// Job instance id -> the instances it needs.
    nodes: BTreeMap<JobId, Vec<JobId>>,
}

impl DagGraph {
    /// Build the graph from a validated [`Workflow`].
    pub fn from_workflow(wf: &Workflow) -> Self {
        let nodes = wf
            .jobs()
            .iter()
            .map(|(id, job)| (id.clone(), job.needed_instances()))
            .collect();
        Self { nodes }
    }

    /// All job ids, in lexical order.
    pub fn jobs(&self) -> impl Iterator<Item = &str> {
        self.nodes.keys().map(|s| s.as_str())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    /// Immediate dependencies of a job.
    pub fn dependencies_of(&self, id: &str) -> &[JobId] {
        self.nodes.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// `id` plus everything it transitively needs.
    pub fn with_transitive_needs(&self, id: &str) -> Result<BTreeSet<JobId>> {
        if !self.contains(id) {
            return Err(CiflowError::JobNotFound(id.to_string()));
        }
        let mut seen = BTreeSet::new();
        let mut stack = vec![id.to_string()];
        while let Some(cur) = stack.pop() {
            if seen.insert(cur.clone()) {
                stack.extend(self.dependencies_of(&cur).iter().cloned());
            }
        }
        Ok(seen)
    }

    /// Group jobs into layers: every job sits one layer after its deepest
    /// dependency. Jobs within a layer may run concurrently.
    pub fn layers(&self) -> Result<Vec<Vec<JobId>>> {
        let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();
        for id in self.nodes.keys() {
            graph.add_node(id.as_str());
        }
        for (id, deps) in self.nodes.iter() {
            for dep in deps.iter() {
                graph.add_edge(dep.as_str(), id.as_str(), ());
            }
        }

        let order = toposort(&graph, None).map_err(|cycle| {
            CiflowError::DagCycle(format!("job '{}' is part of a cycle", cycle.node_id()))
        })?;

        let mut depth: BTreeMap<&str, usize> = BTreeMap::new();
        for id in order {
            let d = self
                .dependencies_of(id)
                .iter()
                .filter_map(|dep| depth.get(dep.as_str()))
                .map(|d| d + 1)
                .max()
                .unwrap_or(0);
            depth.insert(id, d);
        }

        let mut layers: Vec<Vec<JobId>> = Vec::new();
        for (id, d) in depth {
            if layers.len() <= d {
                layers.resize_with(d + 1, Vec::new);
            }
            layers[d].push(id.to_string());
        }
        Ok(layers)
    }
}
