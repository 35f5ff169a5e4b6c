// src/expr/mod.rs

//! Typed expressions used by `if` conditions and `${{ }}` templates.
//!
//! - [`parser`] turns source text into an [`Expr`] tree.
//! - [`eval`] evaluates a tree against an [`EvalContext`].
//! - [`interpolate`] substitutes `${{ }}` placeholders in strings.

pub mod eval;
pub mod interpolate;
pub mod parser;

pub use eval::{EvalContext, StatusView, Value};
pub use interpolate::{check_template, has_placeholders, interpolate};
pub use parser::{parse_expression, Expr};

use crate::errors::Result;

/// A compiled `if` condition.
///
/// A condition that does not mention any status function (`success()`,
/// `failure()`, `always()`, `cancelled()`) is implicitly
/// `success() && (<expr>)`.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    source: String,
    expr: Expr,
    checks_status: bool,
}

impl Condition {
    /// Compile a condition. Surrounding `${{ }}` is optional.
    pub fn parse(src: &str) -> Result<Self> {
        let trimmed = src.trim();
        let inner = trimmed
            .strip_prefix("${{")
            .and_then(|s| s.strip_suffix("}}"))
            .unwrap_or(trimmed)
            .trim();
        let expr = parse_expression(inner)?;
        let checks_status = expr.uses_status_function();
        Ok(Self {
            source: inner.to_string(),
            expr,
            checks_status,
        })
    }

    /// The default condition: `success()`.
    pub fn success() -> Self {
        Self {
            source: "success()".to_string(),
            expr: Expr::Call {
                func: parser::Function::Success,
                args: Vec::new(),
            },
            checks_status: true,
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Whether the condition explicitly inspects the status.
    pub fn checks_status(&self) -> bool {
        self.checks_status
    }

    pub fn evaluate(&self, ctx: &EvalContext) -> bool {
        if !self.checks_status {
            let status = ctx.status();
            if status.any_failed || status.cancelled {
                return false;
            }
        }
        ctx.evaluate(&self.expr).is_truthy()
    }
}

impl Default for Condition {
    fn default() -> Self {
        Self::success()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn implicit_success_is_prepended() {
        let cond = Condition::parse("${{ event.branch == 'main' }}").unwrap();
        assert!(!cond.checks_status());

        let ok = EvalContext::new(StatusView::default())
            .with_namespace("event", json!({ "branch": "main" }));
        assert!(cond.evaluate(&ok));

        let failed = EvalContext::new(StatusView {
            any_failed: true,
            cancelled: false,
        })
        .with_namespace("event", json!({ "branch": "main" }));
        assert!(!cond.evaluate(&failed));
    }

    #[test]
    fn always_runs_after_failure() {
        let cond = Condition::parse("always()").unwrap();
        let failed = EvalContext::new(StatusView {
            any_failed: true,
            cancelled: true,
        });
        assert!(cond.evaluate(&failed));
    }

    #[test]
    fn default_condition_is_success() {
        let cond = Condition::default();
        assert_eq!(cond.source(), "success()");
        assert!(cond.evaluate(&EvalContext::default()));
        assert!(!cond.evaluate(&EvalContext::new(StatusView {
            any_failed: true,
            cancelled: false
        })));
    }
}
