// src/exec/env_file.rs

//! Parsing of the files steps write to `$CIFLOW_ENV` and `$CIFLOW_OUTPUT`.
//!
//! Two forms are accepted, one entry per line:
//!
//! ```text
//! VERSION=1.2.3
//! NOTES<<EOF
//! first line
//! second line
//! EOF
//! ```

use std::collections::BTreeMap;

use anyhow::{bail, Result};

pub fn parse_env_file(text: &str) -> Result<BTreeMap<String, String>> {
    let mut out = BTreeMap::new();
    let mut lines = text.lines().enumerate();

    while let Some((lineno, line)) = lines.next() {
        let line = line.trim_end_matches('\r');
        if line.trim().is_empty() {
            continue;
        }

        let heredoc = line.find("<<");
        let assign = line.find('=');
        let is_heredoc = match (heredoc, assign) {
            (Some(h), Some(a)) => h < a,
            (Some(_), None) => true,
            _ => false,
        };

        if is_heredoc {
            let (name, delim) = line.split_once("<<").unwrap_or_default();
            let name = name.trim();
            let delim = delim.trim();
            check_name(name, lineno)?;
            if delim.is_empty() {
                bail!("line {}: empty heredoc delimiter for '{}'", lineno + 1, name);
            }

            let mut body: Vec<&str> = Vec::new();
            let mut closed = false;
            for (_, l) in lines.by_ref() {
                let l = l.trim_end_matches('\r');
                if l == delim {
                    closed = true;
                    break;
                }
                body.push(l);
            }
            if !closed {
                bail!("line {}: heredoc for '{}' is missing its '{}' terminator", lineno + 1, name, delim);
            }
            out.insert(name.to_string(), body.join("\n"));
        } else if let Some((name, value)) = line.split_once('=') {
            let name = name.trim();
            check_name(name, lineno)?;
            out.insert(name.to_string(), value.to_string());
        } else {
            bail!("line {}: expected NAME=VALUE or NAME<<DELIMITER", lineno + 1);
        }
    }

    Ok(out)
}

fn check_name(name: &str, lineno: usize) -> Result<()> {
    if name.is_empty() || name.chars().any(|c| c.is_whitespace()) {
        bail!("line {}: invalid name '{}'", lineno + 1, name);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_assignments_and_heredocs() {
        let text = "A=1\n\nB=x=y\nNOTES<<END\nline one\nline two\nEND\nC=\n";
        let parsed = parse_env_file(text).unwrap();
        assert_eq!(parsed["A"], "1");
        assert_eq!(parsed["B"], "x=y");
        assert_eq!(parsed["NOTES"], "line one\nline two");
        assert_eq!(parsed["C"], "");
    }

    #[test]
    fn later_entries_override_earlier_ones() {
        let parsed = parse_env_file("A=1\nA=2\n").unwrap();
        assert_eq!(parsed["A"], "2");
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_env_file("just words").is_err());
        assert!(parse_env_file("=value").is_err());
        assert!(parse_env_file("X<<EOF\nnever closed").is_err());
    }
}
