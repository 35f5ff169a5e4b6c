// src/trigger/event.rs

use serde_json::{json, Value as Json};

use crate::errors::{CiflowError, Result};
use crate::types::EventKind;

/// An incoming event, as described on the command line.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub kind: EventKind,
    /// Full git ref, e.g. `refs/heads/main` or `refs/tags/v1.2.0`.
    pub git_ref: String,
    /// Target branch of a pull request.
    pub base_ref: Option<String>,
    pub actor: String,
    /// Arbitrary JSON payload, exposed as `event.payload.*`.
    pub payload: Json,
}

impl Event {
    pub fn new(kind: EventKind, git_ref: impl Into<String>, actor: impl Into<String>) -> Self {
        Self {
            kind,
            git_ref: git_ref.into(),
            base_ref: None,
            actor: actor.into(),
            payload: Json::Null,
        }
    }

    pub fn with_base_ref(mut self, base_ref: impl Into<String>) -> Self {
        self.base_ref = Some(base_ref.into());
        self
    }

    pub fn with_payload(mut self, payload: Json) -> Self {
        self.payload = payload;
        self
    }

    /// Reject events that cannot be matched meaningfully.
    pub fn validate(&self) -> Result<()> {
        if self.actor.trim().is_empty() {
            return Err(CiflowError::Event("actor must not be empty".to_string()));
        }
        match self.kind {
            EventKind::Push | EventKind::PullRequest => {
                if !self.git_ref.starts_with("refs/") {
                    return Err(CiflowError::Event(format!(
                        "{} ref '{}' must start with 'refs/'",
                        self.kind, self.git_ref
                    )));
                }
            }
            EventKind::WorkflowDispatch => {}
        }
        if !(self.payload.is_null() || self.payload.is_object()) {
            return Err(CiflowError::Event(
                "event payload must be a JSON object".to_string(),
            ));
        }
        Ok(())
    }

    /// Branch name when the ref is `refs/heads/<branch>`.
    pub fn branch(&self) -> Option<&str> {
        self.git_ref.strip_prefix("refs/heads/")
    }

    /// Tag name when the ref is `refs/tags/<tag>`.
    pub fn tag(&self) -> Option<&str> {
        self.git_ref.strip_prefix("refs/tags/")
    }

    /// Base branch name with any `refs/heads/` prefix removed.
    pub fn base_branch(&self) -> Option<&str> {
        self.base_ref
            .as_deref()
            .map(|r| r.strip_prefix("refs/heads/").unwrap_or(r))
    }
}

/// The event bound to a run; the `event` expression namespace.
#[derive(Debug, Clone, PartialEq)]
pub struct EventContext {
    event: Event,
}

impl EventContext {
    pub fn new(event: Event) -> Self {
        Self { event }
    }

    pub fn event(&self) -> &Event {
        &self.event
    }

    /// JSON tree for `event.*` lookups.
    pub fn to_json(&self) -> Json {
        let e = &self.event;
        json!({
            "kind": e.kind.as_str(),
            "ref": e.git_ref,
            "branch": e.branch(),
            "tag": e.tag(),
            "base_ref": e.base_branch(),
            "actor": e.actor,
            "payload": e.payload,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_ref_must_be_qualified() {
        let ev = Event::new(EventKind::Push, "main", "alice");
        assert!(matches!(ev.validate(), Err(CiflowError::Event(_))));

        let ev = Event::new(EventKind::Push, "refs/heads/main", "alice");
        assert!(ev.validate().is_ok());
        assert_eq!(ev.branch(), Some("main"));
        assert_eq!(ev.tag(), None);
    }

    #[test]
    fn empty_actor_is_rejected() {
        let ev = Event::new(EventKind::WorkflowDispatch, "main", " ");
        assert!(ev.validate().is_err());
    }

    #[test]
    fn context_exposes_payload() {
        let ev = Event::new(EventKind::PullRequest, "refs/pull/7/merge", "bob")
            .with_base_ref("refs/heads/main")
            .with_payload(json!({ "number": 7 }));
        let ctx = EventContext::new(ev).to_json();
        assert_eq!(ctx["base_ref"], "main");
        assert_eq!(ctx["payload"]["number"], 7);
        assert_eq!(ctx["branch"], Json::Null);
    }
}
