// src/engine/queue.rs

use std::collections::{BTreeSet, VecDeque};

use tracing::debug;

use crate::config::workflow::JobId;
use crate::dag::ScheduledJob;

/// FIFO of ready jobs waiting for a free execution slot.
///
/// Semantics:
/// - Jobs are dispatched in the order they became ready (the scheduler
///   reports simultaneously-ready jobs in lexical id order).
/// - At most `max_parallel` jobs are running at any time.
/// - A job leaves the running set exactly once, when its completion arrives.
#[derive(Debug)]
pub struct DispatchQueue {
    max_parallel: usize,
    queued: VecDeque<ScheduledJob>,
    running: BTreeSet<JobId>,
}

impl DispatchQueue {
    /// `max_parallel` is clamped to at least 1.
    pub fn new(max_parallel: usize) -> Self {
        Self {
            max_parallel: max_parallel.max(1),
            queued: VecDeque::new(),
            running: BTreeSet::new(),
        }
    }

    pub fn max_parallel(&self) -> usize {
        self.max_parallel
    }

    pub fn enqueue(&mut self, jobs: Vec<ScheduledJob>) {
        for job in jobs {
            debug!(job = %job.id, queued = self.queued.len(), "job queued for dispatch");
            self.queued.push_back(job);
        }
    }

    /// Pop as many queued jobs as there are free slots and count them as
    /// running.
    pub fn take_dispatchable(&mut self) -> Vec<ScheduledJob> {
        let mut out = Vec::new();
        while self.running.len() < self.max_parallel {
            let Some(job) = self.queued.pop_front() else {
                break;
            };
            self.running.insert(job.id.clone());
            out.push(job);
        }
        out
    }

    /// Free the slot held by `job`. Returns false if it was not running.
    pub fn complete(&mut self, job: &str) -> bool {
        self.running.remove(job)
    }

    /// Drop every job still waiting for a slot.
    pub fn clear_queued(&mut self) -> Vec<ScheduledJob> {
        self.queued.drain(..).collect()
    }

    pub fn running_count(&self) -> usize {
        self.running.len()
    }

    pub fn queued_count(&self) -> usize {
        self.queued.len()
    }

    pub fn is_idle(&self) -> bool {
        self.running.is_empty() && self.queued.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value as Json;

    fn job(id: &str) -> ScheduledJob {
        ScheduledJob {
            id: id.to_string(),
            needs: Json::Null,
        }
    }

    #[test]
    fn respects_max_parallel_and_fifo_order() {
        let mut q = DispatchQueue::new(2);
        q.enqueue(vec![job("a"), job("b"), job("c")]);

        let first: Vec<_> = q.take_dispatchable().into_iter().map(|j| j.id).collect();
        assert_eq!(first, vec!["a", "b"]);
        assert!(q.take_dispatchable().is_empty());

        assert!(q.complete("b"));
        let next: Vec<_> = q.take_dispatchable().into_iter().map(|j| j.id).collect();
        assert_eq!(next, vec!["c"]);
        assert_eq!(q.running_count(), 2);
    }

    #[test]
    fn completion_of_unknown_job_is_rejected() {
        let mut q = DispatchQueue::new(1);
        assert!(!q.complete("ghost"));
        q.enqueue(vec![job("a")]);
        q.take_dispatchable();
        assert!(q.complete("a"));
        assert!(!q.complete("a"));
        assert!(q.is_idle());
    }

    #[test]
    fn zero_parallelism_is_clamped() {
        assert_eq!(DispatchQueue::new(0).max_parallel(), 1);
    }
}
