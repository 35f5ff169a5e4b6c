// src/expr/interpolate.rs

//! `${{ expr }}` substitution in strings (commands, `with` values, env values,
//! job outputs).

use std::sync::OnceLock;

use regex::Regex;

use crate::errors::Result;
use crate::expr::eval::EvalContext;
use crate::expr::parser::parse_expression;

fn template_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\$\{\{(.*?)\}\}").expect("static template regex"))
}

/// Returns true if `text` contains at least one `${{ }}` placeholder.
pub fn has_placeholders(text: &str) -> bool {
    template_regex().is_match(text)
}

/// Check that every placeholder in `text` parses, without evaluating it.
pub fn check_template(text: &str) -> Result<()> {
    for caps in template_regex().captures_iter(text) {
        parse_expression(caps[1].trim())?;
    }
    Ok(())
}

/// Replace every `${{ expr }}` in `text` with the evaluated value.
pub fn interpolate(text: &str, ctx: &EvalContext) -> Result<String> {
    let re = template_regex();
    let mut out = String::with_capacity(text.len());
    let mut last = 0;

    for caps in re.captures_iter(text) {
        let whole = caps.get(0).expect("capture 0 always present");
        out.push_str(&text[last..whole.start()]);
        let expr = parse_expression(caps[1].trim())?;
        out.push_str(&ctx.evaluate(&expr).to_string());
        last = whole.end();
    }
    out.push_str(&text[last..]);

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::eval::StatusView;
    use serde_json::json;

    #[test]
    fn substitutes_placeholders() {
        let ctx = EvalContext::new(StatusView::default())
            .with_namespace("matrix", json!({ "python": "3.12" }))
            .with_namespace("env", json!({ "NAME": "ciflow" }));
        let out = interpolate("py${{ matrix.python }}-${{env.NAME}}-${{ missing.x }}!", &ctx).unwrap();
        assert_eq!(out, "py3.12-ciflow-!");
    }

    #[test]
    fn text_without_placeholders_is_unchanged() {
        let ctx = EvalContext::default();
        assert_eq!(interpolate("echo $HOME", &ctx).unwrap(), "echo $HOME");
        assert!(!has_placeholders("echo $HOME"));
    }

    #[test]
    fn check_template_reports_parse_errors() {
        assert!(check_template("${{ a == }}").is_err());
        assert!(check_template("${{ a.b }} and ${{ 'x' }}").is_ok());
    }
}
