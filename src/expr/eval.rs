// src/expr/eval.rs

//! Expression values and evaluation against a run context.

use std::fmt;

use serde_json::{Map, Value as Json};

use crate::expr::parser::{BinaryOp, Expr, Function};

/// Runtime value of an expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Number(f64),
    String(String),
}

impl Value {
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Number(n) => *n != 0.0 && !n.is_nan(),
            Value::String(s) => !s.is_empty(),
        }
    }

    fn as_number(&self) -> Option<f64> {
        match self {
            Value::Null => Some(0.0),
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Value::Number(n) => Some(*n),
            Value::String(s) if s.trim().is_empty() => Some(0.0),
            Value::String(s) => s.trim().parse().ok(),
        }
    }

    /// Loose equality: strings compare case-insensitively, mixed types are
    /// compared numerically when both sides coerce to a number.
    pub fn loose_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::String(a), Value::String(b)) => a.eq_ignore_ascii_case(b),
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (a, b) => match (a.as_number(), b.as_number()) {
                (Some(x), Some(y)) => x == y,
                _ => false,
            },
        }
    }

    fn from_json(json: &Json) -> Self {
        match json {
            Json::Null => Value::Null,
            Json::Bool(b) => Value::Bool(*b),
            Json::Number(n) => n.as_f64().map(Value::Number).unwrap_or(Value::Null),
            Json::String(s) => Value::String(s.clone()),
            other => Value::String(other.to_string()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => write!(f, "{}", *n as i64),
            Value::Number(n) => write!(f, "{n}"),
            Value::String(s) => f.write_str(s),
        }
    }
}

/// Status flags consulted by `success()`, `failure()` and `cancelled()`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusView {
    /// For a job condition: some needed job did not conclude successfully.
    /// For a step condition: an earlier step in the job failed.
    pub any_failed: bool,
    /// The run has been cancelled.
    pub cancelled: bool,
}

/// Context an expression is evaluated against.
///
/// Namespaces (`event`, `needs`, `steps`, `env`, `matrix`, `secrets`, `job`,
/// ...) are stored as JSON trees and looked up by dotted path.
#[derive(Debug, Clone, Default)]
pub struct EvalContext {
    data: Map<String, Json>,
    status: StatusView,
}

impl EvalContext {
    pub fn new(status: StatusView) -> Self {
        Self {
            data: Map::new(),
            status,
        }
    }

    pub fn with_namespace(mut self, name: &str, value: Json) -> Self {
        self.set_namespace(name, value);
        self
    }

    pub fn set_namespace(&mut self, name: &str, value: Json) {
        self.data.insert(name.to_string(), value);
    }

    pub fn set_status(&mut self, status: StatusView) {
        self.status = status;
    }

    pub fn status(&self) -> StatusView {
        self.status
    }

    /// Resolve a dotted path. Missing segments resolve to `Null`.
    pub fn lookup(&self, path: &[String]) -> Value {
        let Some((head, rest)) = path.split_first() else {
            return Value::Null;
        };
        let mut current = match self.data.get(head) {
            Some(v) => v,
            None => return Value::Null,
        };
        for seg in rest {
            current = match current {
                Json::Object(map) => match map.get(seg) {
                    Some(v) => v,
                    None => return Value::Null,
                },
                Json::Array(items) => match seg.parse::<usize>().ok().and_then(|i| items.get(i)) {
                    Some(v) => v,
                    None => return Value::Null,
                },
                _ => return Value::Null,
            };
        }
        Value::from_json(current)
    }

    pub fn evaluate(&self, expr: &Expr) -> Value {
        match expr {
            Expr::Literal(v) => v.clone(),
            Expr::Path(path) => self.lookup(path),
            Expr::Not(inner) => Value::Bool(!self.evaluate(inner).is_truthy()),
            Expr::Binary { op, lhs, rhs } => match op {
                BinaryOp::And => {
                    let l = self.evaluate(lhs);
                    if !l.is_truthy() {
                        return l;
                    }
                    self.evaluate(rhs)
                }
                BinaryOp::Or => {
                    let l = self.evaluate(lhs);
                    if l.is_truthy() {
                        return l;
                    }
                    self.evaluate(rhs)
                }
                BinaryOp::Eq => Value::Bool(self.evaluate(lhs).loose_eq(&self.evaluate(rhs))),
                BinaryOp::Ne => Value::Bool(!self.evaluate(lhs).loose_eq(&self.evaluate(rhs))),
            },
            Expr::Call { func, args } => self.call(*func, args),
        }
    }

    fn call(&self, func: Function, args: &[Expr]) -> Value {
        let status = self.status;
        match func {
            Function::Success => Value::Bool(!status.any_failed && !status.cancelled),
            Function::Failure => Value::Bool(status.any_failed),
            Function::Always => Value::Bool(true),
            Function::Cancelled => Value::Bool(status.cancelled),
            Function::Contains | Function::StartsWith | Function::EndsWith => {
                let haystack = self.evaluate(&args[0]).to_string().to_lowercase();
                let needle = self.evaluate(&args[1]).to_string().to_lowercase();
                let hit = match func {
                    Function::Contains => haystack.contains(&needle),
                    Function::StartsWith => haystack.starts_with(&needle),
                    _ => haystack.ends_with(&needle),
                };
                Value::Bool(hit)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::parser::parse_expression;
    use serde_json::json;

    fn ctx() -> EvalContext {
        EvalContext::new(StatusView::default())
            .with_namespace("event", json!({ "branch": "main", "payload": { "number": 42 } }))
            .with_namespace("needs", json!({ "build": { "result": "success", "outputs": { "version": "1.2" } } }))
    }

    fn eval(src: &str, ctx: &EvalContext) -> Value {
        ctx.evaluate(&parse_expression(src).unwrap())
    }

    #[test]
    fn looks_up_nested_paths() {
        let c = ctx();
        assert_eq!(eval("needs.build.outputs.version", &c), Value::String("1.2".into()));
        assert_eq!(eval("event.payload.number", &c), Value::Number(42.0));
        assert_eq!(eval("event.nope.deeper", &c), Value::Null);
    }

    #[test]
    fn comparisons_are_loose() {
        let c = ctx();
        assert!(eval("event.branch == 'MAIN'", &c).is_truthy());
        assert!(eval("event.payload.number == '42'", &c).is_truthy());
        assert!(eval("event.branch != 'dev'", &c).is_truthy());
    }

    #[test]
    fn status_functions_follow_status_view() {
        let mut c = ctx();
        assert!(eval("success()", &c).is_truthy());
        c.set_status(StatusView {
            any_failed: true,
            cancelled: false,
        });
        assert!(!eval("success()", &c).is_truthy());
        assert!(eval("failure()", &c).is_truthy());
        assert!(eval("always()", &c).is_truthy());
        assert!(!eval("cancelled()", &c).is_truthy());
    }

    #[test]
    fn string_functions() {
        let c = ctx();
        assert!(eval("startsWith(event.branch, 'ma')", &c).is_truthy());
        assert!(eval("endsWith(event.branch, 'IN')", &c).is_truthy());
        assert!(!eval("contains(event.branch, 'x')", &c).is_truthy());
    }

    #[test]
    fn numbers_render_without_fraction() {
        assert_eq!(Value::Number(3.0).to_string(), "3");
        assert_eq!(Value::Number(2.5).to_string(), "2.5");
        assert_eq!(Value::Null.to_string(), "");
    }
}
