// src/cli.rs

//! CLI argument parsing using `clap`.

use clap::{Parser, ValueEnum};

use crate::types::EventKind;

/// Command-line arguments for `ciflow`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "ciflow",
    version,
    about = "Run a declarative CI workflow locally: triggers, job DAG, caches and artifacts.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the workflow file (TOML, or YAML by `.yml` / `.yaml` extension).
    ///
    /// Default: `Ciflow.toml` in the current working directory.
    #[arg(long, value_name = "PATH", default_value = "Ciflow.toml", env = "CIFLOW_CONFIG")]
    pub config: String,

    /// Kind of event to simulate (push, pull_request, workflow_dispatch).
    #[arg(long, value_name = "KIND", default_value = "push", value_parser = parse_event_kind)]
    pub event: EventKind,

    /// Git ref of the event, e.g. `refs/heads/main` or `refs/tags/v1.0`.
    #[arg(long = "ref", value_name = "REF", default_value = "refs/heads/main", env = "CIFLOW_REF")]
    pub git_ref: String,

    /// Target branch of a pull request.
    #[arg(long, value_name = "REF")]
    pub base_ref: Option<String>,

    /// Who triggered the event.
    #[arg(long, value_name = "NAME", env = "CIFLOW_ACTOR", default_value = "local")]
    pub actor: String,

    /// JSON file exposed as `event.payload`.
    #[arg(long, value_name = "FILE")]
    pub event_payload: Option<String>,

    /// Dotenv-style file with additional secrets.
    #[arg(long, value_name = "FILE", env = "CIFLOW_SECRETS_FILE")]
    pub secrets_file: Option<String>,

    /// Run only this job (and the jobs it transitively needs).
    #[arg(long, value_name = "ID")]
    pub job: Option<String>,

    /// Override `[config].max_parallel`.
    #[arg(long, value_name = "N")]
    pub max_parallel: Option<usize>,

    /// Re-run only the jobs that did not succeed in the previous run.
    #[arg(long)]
    pub rerun_failed: bool,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `CIFLOW_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Parse + validate, print the job graph and execution plan, but don't
    /// run anything.
    #[arg(long)]
    pub dry_run: bool,
}

fn parse_event_kind(s: &str) -> Result<EventKind, String> {
    s.parse()
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let args = CliArgs::try_parse_from(["ciflow"]).unwrap();
        assert_eq!(args.event, EventKind::Push);
        assert_eq!(args.git_ref, "refs/heads/main");
        assert!(!args.dry_run);
        assert!(args.job.is_none());
    }

    #[test]
    fn parses_event_flags() {
        let args = CliArgs::try_parse_from([
            "ciflow",
            "--event",
            "pull-request",
            "--ref",
            "refs/heads/feature",
            "--base-ref",
            "main",
            "--max-parallel",
            "2",
            "--rerun-failed",
        ])
        .unwrap();
        assert_eq!(args.event, EventKind::PullRequest);
        assert_eq!(args.base_ref.as_deref(), Some("main"));
        assert_eq!(args.max_parallel, Some(2));
        assert!(args.rerun_failed);
    }

    #[test]
    fn rejects_unknown_event() {
        assert!(CliArgs::try_parse_from(["ciflow", "--event", "merge"]).is_err());
    }
}
