// src/exec/step_runner.rs

//! Shell step process runner.

use std::collections::{BTreeMap, VecDeque};
use std::path::Path;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::secrets::{SecretStore, SECRET_ENV_PREFIX};

/// Number of output lines kept per step.
pub const OUTPUT_TAIL_LINES: usize = 200;

/// How long to wait for output readers after the process is gone. Background
/// processes started by a step may keep the pipes open.
const DRAIN_GRACE: Duration = Duration::from_millis(500);

/// One shell command to run.
#[derive(Debug, Clone, Copy)]
pub struct ShellCommand<'a> {
    pub job: &'a str,
    pub step: &'a str,
    pub script: &'a str,
    pub env: &'a BTreeMap<String, String>,
    pub working_dir: &'a Path,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShellExit {
    Exited(i32),
    TimedOut,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellResult {
    pub exit: ShellExit,
    /// Last lines of combined stdout/stderr, secrets masked.
    pub tail: Vec<String>,
}

impl ShellResult {
    pub fn success(&self) -> bool {
        self.exit == ShellExit::Exited(0)
    }
}

type Tail = Arc<Mutex<VecDeque<String>>>;

/// Run `cmd` through the platform shell.
///
/// - The process is killed when `deadline` passes (`TimedOut`) or when the
///   cancel flag flips to `true` (`Cancelled`).
/// - stdout and stderr are read line by line, masked, logged at debug and
///   kept in a bounded tail.
pub async fn run_shell(
    cmd: ShellCommand<'_>,
    secrets: &SecretStore,
    deadline: Instant,
    cancel_rx: &mut watch::Receiver<bool>,
) -> Result<ShellResult> {
    info!(job = %cmd.job, step = %cmd.step, "starting step process");

    // Build a shell command appropriate for the platform.
    let mut command = if cfg!(windows) {
        let mut c = Command::new("cmd");
        c.arg("/C").arg(cmd.script);
        c
    } else {
        let mut c = Command::new("sh");
        c.arg("-c").arg(cmd.script);
        c
    };

    for (key, _) in std::env::vars_os() {
        if key.to_string_lossy().starts_with(SECRET_ENV_PREFIX) {
            command.env_remove(&key);
        }
    }

    command
        .envs(cmd.env)
        .current_dir(cmd.working_dir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    // Own process group, so a kill reaches everything the script started.
    #[cfg(unix)]
    command.process_group(0);

    let mut child = command.spawn().with_context(|| {
        format!(
            "spawning process for step '{}' in {:?}",
            cmd.step, cmd.working_dir
        )
    })?;

    let tail: Tail = Arc::new(Mutex::new(VecDeque::with_capacity(OUTPUT_TAIL_LINES)));
    let mut readers: Vec<JoinHandle<()>> = Vec::new();
    if let Some(stdout) = child.stdout.take() {
        readers.push(spawn_reader(stdout, "stdout", &cmd, secrets, tail.clone()));
    }
    if let Some(stderr) = child.stderr.take() {
        readers.push(spawn_reader(stderr, "stderr", &cmd, secrets, tail.clone()));
    }

    // Either the process exits on its own (normal case), the job deadline
    // passes, or the run is cancelled.
    let exit = tokio::select! {
        status_res = child.wait() => {
            let status = status_res.with_context(|| {
                format!("waiting for process of step '{}'", cmd.step)
            })?;
            let code = status.code().unwrap_or(-1);
            info!(
                job = %cmd.job,
                step = %cmd.step,
                exit_code = code,
                success = status.success(),
                "step process exited"
            );
            ShellExit::Exited(code)
        }

        _ = wait_cancelled(cancel_rx) => {
            info!(job = %cmd.job, step = %cmd.step, "cancellation requested; killing step process");
            kill(&mut child, &cmd).await;
            ShellExit::Cancelled
        }

        _ = tokio::time::sleep_until(deadline) => {
            info!(job = %cmd.job, step = %cmd.step, "job timeout reached; killing step process");
            kill(&mut child, &cmd).await;
            ShellExit::TimedOut
        }
    };

    for reader in readers {
        let abort = reader.abort_handle();
        if tokio::time::timeout(DRAIN_GRACE, reader).await.is_err() {
            debug!(job = %cmd.job, step = %cmd.step, "output still open after exit; detaching reader");
            abort.abort();
        }
    }

    let tail: Vec<String> = tail
        .lock()
        .map(|t| t.iter().cloned().collect())
        .unwrap_or_default();

    Ok(ShellResult { exit, tail })
}

/// Resolves once the cancel flag is `true`. Never resolves if the sender is
/// gone.
pub async fn wait_cancelled(cancel_rx: &mut watch::Receiver<bool>) {
    if cancel_rx.wait_for(|c| *c).await.is_err() {
        std::future::pending::<()>().await;
    }
}

async fn kill(child: &mut tokio::process::Child, cmd: &ShellCommand<'_>) {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        kill_process_group(pid, cmd);
    }
    if let Err(e) = child.kill().await {
        warn!(
            job = %cmd.job,
            step = %cmd.step,
            error = %e,
            "failed to kill step process"
        );
    }
}

#[cfg(unix)]
fn kill_process_group(pid: u32, cmd: &ShellCommand<'_>) {
    use nix::errno::Errno;
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        return;
    };
    match killpg(Pid::from_raw(raw), Signal::SIGKILL) {
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(e) => warn!(
            job = %cmd.job,
            step = %cmd.step,
            pid,
            error = %e,
            "failed to kill step process group"
        ),
    }
}

fn spawn_reader<R>(
    stream: R,
    label: &'static str,
    cmd: &ShellCommand<'_>,
    secrets: &SecretStore,
    tail: Tail,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let job = cmd.job.to_string();
    let step = cmd.step.to_string();
    let secrets = secrets.clone();

    tokio::spawn(async move {
        let reader = BufReader::new(stream);
        let mut lines = reader.lines();

        while let Ok(Some(line)) = lines.next_line().await {
            let line = secrets.mask(&line);
            debug!(job = %job, step = %step, "{}: {}", label, line);
            if let Ok(mut t) = tail.lock() {
                if t.len() == OUTPUT_TAIL_LINES {
                    t.pop_front();
                }
                t.push_back(line);
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn far() -> Instant {
        Instant::now() + Duration::from_secs(30)
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn captures_output_and_exit_code() {
        let dir = tempfile::tempdir().unwrap();
        let mut env = BTreeMap::new();
        env.insert("GREETING".to_string(), "hello".to_string());
        let mut secrets = SecretStore::new();
        secrets.insert("TOKEN", "s3cr3t");
        let (_tx, mut rx) = watch::channel(false);

        let cmd = ShellCommand {
            job: "j",
            step: "s",
            script: "echo $GREETING; echo token=s3cr3t 1>&2; exit 3",
            env: &env,
            working_dir: dir.path(),
        };
        let res = run_shell(cmd, &secrets, far(), &mut rx).await.unwrap();

        assert_eq!(res.exit, ShellExit::Exited(3));
        assert!(!res.success());
        assert!(res.tail.contains(&"hello".to_string()));
        assert!(res.tail.contains(&"token=***".to_string()));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn tail_is_bounded() {
        let dir = tempfile::tempdir().unwrap();
        let env = BTreeMap::new();
        let (_tx, mut rx) = watch::channel(false);
        let cmd = ShellCommand {
            job: "j",
            step: "s",
            script: "i=0; while [ $i -lt 250 ]; do echo line$i; i=$((i+1)); done",
            env: &env,
            working_dir: dir.path(),
        };
        let res = run_shell(cmd, &SecretStore::new(), far(), &mut rx)
            .await
            .unwrap();
        assert!(res.success());
        assert_eq!(res.tail.len(), OUTPUT_TAIL_LINES);
        assert_eq!(res.tail.last().map(String::as_str), Some("line249"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn deadline_kills_the_process() {
        let dir = tempfile::tempdir().unwrap();
        let env = BTreeMap::new();
        let (_tx, mut rx) = watch::channel(false);
        let cmd = ShellCommand {
            job: "j",
            step: "s",
            script: "sleep 30",
            env: &env,
            working_dir: dir.path(),
        };
        let deadline = Instant::now() + Duration::from_millis(200);
        let res = run_shell(cmd, &SecretStore::new(), deadline, &mut rx)
            .await
            .unwrap();
        assert_eq!(res.exit, ShellExit::TimedOut);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn deadline_kills_background_children_too() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("marker");
        let env = BTreeMap::new();
        let (_tx, mut rx) = watch::channel(false);
        let cmd = ShellCommand {
            job: "j",
            step: "s",
            script: "(sleep 1; touch marker) & sleep 30",
            env: &env,
            working_dir: dir.path(),
        };
        let deadline = Instant::now() + Duration::from_millis(200);
        let res = run_shell(cmd, &SecretStore::new(), deadline, &mut rx)
            .await
            .unwrap();
        assert_eq!(res.exit, ShellExit::TimedOut);

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(!marker.exists(), "background child outlived the step");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn cancellation_kills_the_process() {
        let dir = tempfile::tempdir().unwrap();
        let env = BTreeMap::new();
        let (tx, mut rx) = watch::channel(false);
        let cmd = ShellCommand {
            job: "j",
            step: "s",
            script: "sleep 30",
            env: &env,
            working_dir: dir.path(),
        };
        let secrets = SecretStore::new();
        let cancel = async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            let _ = tx.send(true);
        };
        let (res, ()) = tokio::join!(run_shell(cmd, &secrets, far(), &mut rx), cancel);
        assert_eq!(res.unwrap().exit, ShellExit::Cancelled);
    }
}
