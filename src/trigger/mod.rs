// src/trigger/mod.rs

//! Decide whether an event activates a workflow.

pub mod event;

pub use event::{Event, EventContext};

use tracing::debug;

use crate::config::model::{BranchFilter, TriggerSection};
use crate::errors::{CiflowError, Result};
use crate::fs::build_globset;
use crate::types::EventKind;

/// Outcome of matching an event against a workflow's `[on]` section.
#[derive(Debug, Clone, PartialEq)]
pub enum TriggerDecision {
    Activated(EventContext),
    NotActivated(String),
}

impl TriggerDecision {
    pub fn is_activated(&self) -> bool {
        matches!(self, TriggerDecision::Activated(_))
    }
}

/// Match `event` against `on`.
///
/// Returns `Err(CiflowError::Event)` for malformed events and
/// `Err(CiflowError::ConfigError)` for invalid filter globs.
pub fn evaluate(on: &TriggerSection, event: &Event) -> Result<TriggerDecision> {
    event.validate()?;

    if on.is_empty() {
        debug!(kind = %event.kind, "empty [on] section; any event activates");
        return Ok(TriggerDecision::Activated(EventContext::new(event.clone())));
    }

    let decision = match event.kind {
        EventKind::Push => match &on.push {
            None => not_declared(event.kind),
            Some(filter) => match_push(filter, event)?,
        },
        EventKind::PullRequest => match &on.pull_request {
            None => not_declared(event.kind),
            Some(filter) => match_pull_request(filter, event)?,
        },
        EventKind::WorkflowDispatch => match &on.workflow_dispatch {
            None => not_declared(event.kind),
            Some(_) => None,
        },
    };

    Ok(match decision {
        None => TriggerDecision::Activated(EventContext::new(event.clone())),
        Some(reason) => TriggerDecision::NotActivated(reason),
    })
}

fn not_declared(kind: EventKind) -> Option<String> {
    Some(format!("workflow has no [on.{kind}] trigger"))
}

/// `None` when activated, otherwise the reason it is not.
fn match_push(filter: &BranchFilter, event: &Event) -> Result<Option<String>> {
    if let Some(tag) = event.tag() {
        return Ok(match &filter.tags {
            None => Some(format!("tag '{tag}' pushed but no `tags` filter declared")),
            Some(patterns) if any_match(patterns, tag)? => None,
            Some(_) => Some(format!("tag '{tag}' does not match `tags`")),
        });
    }

    match event.branch() {
        Some(branch) => match_branch(filter, branch),
        None => Ok(Some(format!(
            "ref '{}' is neither a branch nor a tag",
            event.git_ref
        ))),
    }
}

fn match_pull_request(filter: &BranchFilter, event: &Event) -> Result<Option<String>> {
    let target = event
        .base_branch()
        .or_else(|| event.branch())
        .unwrap_or(event.git_ref.as_str());
    match_branch(filter, target)
}

fn match_branch(filter: &BranchFilter, branch: &str) -> Result<Option<String>> {
    if let Some(patterns) = &filter.branches {
        if !any_match(patterns, branch)? {
            return Ok(Some(format!("branch '{branch}' does not match `branches`")));
        }
    }
    if any_match(&filter.branches_ignore, branch)? {
        return Ok(Some(format!("branch '{branch}' matches `branches_ignore`")));
    }
    Ok(None)
}

fn any_match(patterns: &[String], value: &str) -> Result<bool> {
    if patterns.is_empty() {
        return Ok(false);
    }
    let set = build_globset(patterns)
        .map_err(|e| CiflowError::ConfigError(format!("invalid [on] filter: {e:#}")))?;
    Ok(set.is_match(value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::model::DispatchTrigger;

    fn push_on(branches: &[&str], ignore: &[&str], tags: Option<&[&str]>) -> TriggerSection {
        TriggerSection {
            push: Some(BranchFilter {
                branches: Some(branches.iter().map(|s| s.to_string()).collect()),
                branches_ignore: ignore.iter().map(|s| s.to_string()).collect(),
                tags: tags.map(|t| t.iter().map(|s| s.to_string()).collect()),
            }),
            ..Default::default()
        }
    }

    #[test]
    fn push_to_matching_branch_activates() {
        let on = push_on(&["main", "release/**"], &[], None);
        let ev = Event::new(EventKind::Push, "refs/heads/release/1.2", "alice");
        let d = evaluate(&on, &ev).unwrap();
        match d {
            TriggerDecision::Activated(ctx) => assert_eq!(ctx.to_json()["branch"], "release/1.2"),
            other => panic!("expected activation, got {other:?}"),
        }
    }

    #[test]
    fn ignored_branch_does_not_activate() {
        let on = push_on(&["**"], &["wip/**"], None);
        let ev = Event::new(EventKind::Push, "refs/heads/wip/x", "alice");
        assert!(!evaluate(&on, &ev).unwrap().is_activated());
    }

    #[test]
    fn tags_only_activate_with_tag_filter() {
        let ev = Event::new(EventKind::Push, "refs/tags/v1.0.0", "alice");
        assert!(!evaluate(&push_on(&["main"], &[], None), &ev).unwrap().is_activated());
        assert!(evaluate(&push_on(&["main"], &[], Some(&["v*"])), &ev)
            .unwrap()
            .is_activated());
    }

    #[test]
    fn pull_request_filters_on_base_branch() {
        let on = TriggerSection {
            pull_request: Some(BranchFilter {
                branches: Some(vec!["main".to_string()]),
                ..Default::default()
            }),
            ..Default::default()
        };
        let into_main = Event::new(EventKind::PullRequest, "refs/heads/feature", "bob")
            .with_base_ref("main");
        let into_dev = Event::new(EventKind::PullRequest, "refs/heads/feature", "bob")
            .with_base_ref("refs/heads/dev");
        assert!(evaluate(&on, &into_main).unwrap().is_activated());
        assert!(!evaluate(&on, &into_dev).unwrap().is_activated());
    }

    #[test]
    fn undeclared_kind_is_not_activated() {
        let on = TriggerSection {
            workflow_dispatch: Some(DispatchTrigger {}),
            ..Default::default()
        };
        let ev = Event::new(EventKind::Push, "refs/heads/main", "alice");
        match evaluate(&on, &ev).unwrap() {
            TriggerDecision::NotActivated(reason) => assert!(reason.contains("on.push")),
            other => panic!("unexpected {other:?}"),
        }
        let manual = Event::new(EventKind::WorkflowDispatch, "refs/heads/main", "alice");
        assert!(evaluate(&on, &manual).unwrap().is_activated());
    }

    #[test]
    fn empty_on_section_accepts_anything() {
        let ev = Event::new(EventKind::Push, "refs/heads/anything", "alice");
        assert!(evaluate(&TriggerSection::default(), &ev).unwrap().is_activated());
    }

    #[test]
    fn malformed_event_is_an_error() {
        let ev = Event::new(EventKind::Push, "refs/heads/main", "");
        assert!(matches!(
            evaluate(&TriggerSection::default(), &ev),
            Err(CiflowError::Event(_))
        ));
    }
}
