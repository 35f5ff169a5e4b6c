// tests/scheduler_properties.rs

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;

use proptest::prelude::*;

use ciflow::dag::{DagGraph, Scheduler};
use ciflow::engine::{CoreCommand, CoreRuntime, RuntimeEvent, RuntimeOptions};
use ciflow::types::JobStatus;
use ciflow_test_utils::builders::{JobBuilder, WorkflowBuilder};
use ciflow_test_utils::fake_executor::report;

/// Random DAG: job `i` may only need jobs with a smaller index.
fn dag_strategy() -> impl Strategy<Value = Vec<Vec<usize>>> {
    (1usize..10).prop_flat_map(|n| {
        let per_job: Vec<_> = (0..n)
            .map(|i| proptest::collection::btree_set(0..i.max(1), 0..=i.min(3)))
            .collect();
        per_job.prop_map(|sets| {
            sets.into_iter()
                .enumerate()
                .map(|(i, s)| s.into_iter().filter(|d| *d < i).collect())
                .collect()
        })
    })
}

fn job_id(i: usize) -> String {
    format!("j{i:02}")
}

fn build(needs: &[Vec<usize>]) -> ciflow::config::Workflow {
    let mut wf = WorkflowBuilder::new();
    for (i, deps) in needs.iter().enumerate() {
        let mut job = JobBuilder::new("true");
        for d in deps {
            job = job.needs(&job_id(*d));
        }
        wf = wf.with_job(&job_id(i), job.build());
    }
    wf.build()
}

/// Drive the core synchronously, completing dispatched jobs in FIFO order.
fn simulate(
    needs: &[Vec<usize>],
    failing: &BTreeSet<usize>,
    max_parallel: usize,
) -> (Vec<String>, ciflow::engine::RunResult) {
    let wf = Arc::new(build(needs));
    let scheduler = Scheduler::from_workflow(&wf);
    let mut core = CoreRuntime::new(wf, scheduler, RuntimeOptions { max_parallel });

    let mut order = Vec::new();
    let mut running = VecDeque::new();
    let mut step = core.start();

    loop {
        for command in step.commands {
            if let CoreCommand::DispatchJobs(jobs) = command {
                for j in jobs {
                    order.push(j.id.clone());
                    running.push_back(j.id);
                }
            }
        }
        assert!(running.len() <= max_parallel);
        if !step.keep_running {
            break;
        }
        let id = running.pop_front().expect("core keeps running with nothing in flight");
        let index: usize = id[1..].parse().unwrap();
        let status = if failing.contains(&index) {
            JobStatus::Failed
        } else {
            JobStatus::Succeeded
        };
        step = core.step(RuntimeEvent::JobCompleted {
            report: report(&id, status, BTreeMap::new()),
            job: id,
        });
    }

    (order, core.finish())
}

proptest! {
    #[test]
    fn execution_order_respects_needs(
        needs in dag_strategy(),
        max_parallel in 1usize..4,
    ) {
        let (order, result) = simulate(&needs, &BTreeSet::new(), max_parallel);

        prop_assert_eq!(order.len(), needs.len());
        let position: BTreeMap<&str, usize> =
            order.iter().enumerate().map(|(p, id)| (id.as_str(), p)).collect();
        for (i, deps) in needs.iter().enumerate() {
            for d in deps {
                prop_assert!(position[job_id(*d).as_str()] < position[job_id(i).as_str()]);
            }
        }
        prop_assert!(result.jobs.values().all(|j| j.status == JobStatus::Succeeded));
    }

    #[test]
    fn every_job_ends_final_and_failures_skip_dependents(
        needs in dag_strategy(),
        failing in proptest::collection::btree_set(0usize..10, 0..3),
    ) {
        let (order, result) = simulate(&needs, &failing, 2);

        prop_assert_eq!(result.jobs.len(), needs.len());
        for (i, deps) in needs.iter().enumerate() {
            let id = job_id(i);
            let status = result.jobs[&id].status;
            let blocked = deps
                .iter()
                .any(|d| result.jobs[&job_id(*d)].status != JobStatus::Succeeded);
            if blocked {
                prop_assert_eq!(status, JobStatus::Skipped);
                prop_assert!(!order.contains(&id));
            } else if failing.contains(&i) {
                prop_assert_eq!(status, JobStatus::Failed);
            } else {
                prop_assert_eq!(status, JobStatus::Succeeded);
            }
        }
    }

    #[test]
    fn layers_place_jobs_after_their_needs(needs in dag_strategy()) {
        let wf = build(&needs);
        let layers = DagGraph::from_workflow(&wf).layers().unwrap();
        let layer_of: BTreeMap<String, usize> = layers
            .iter()
            .enumerate()
            .flat_map(|(l, ids)| ids.iter().map(move |id| (id.clone(), l)))
            .collect();

        prop_assert_eq!(layer_of.len(), needs.len());
        for (i, deps) in needs.iter().enumerate() {
            for d in deps {
                prop_assert!(layer_of[&job_id(*d)] < layer_of[&job_id(i)]);
            }
        }
    }
}
