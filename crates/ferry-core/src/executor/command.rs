//! Runs a shell command for a task and captures its output.
//!
//! # Design
//! - One pump per pipe: stdin is written and closed, stdout and stderr are read line by
//!   line into the task.
//! - Pumps are joined after exit with a bounded grace period so output is complete
//!   unless a descendant keeps a pipe open.
//! - Spawn and wait failures land in the task's stderr; the exit code stays unset.

use std::collections::BTreeMap;
use std::fmt;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ferry_repo::{FileRef, LocalFileRepo, Location, Repo, RepoKind};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{CoreError, error_chain};
use crate::task::TaskHandle;

const PUMP_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy)]
enum Capture {
    Stdout,
    Stderr,
}

/// Carries a command task from submission to its exit code.
#[async_trait]
pub trait CommandRunner: Send + Sync + fmt::Debug {
    /// Command vector recorded on the task for `cmd`.
    fn argv(&self, cmd: &str) -> Vec<String>;

    /// Run the task's command to completion and return its exit code.
    ///
    /// `None` means there is no exit status to report.
    async fn run(&self, task: &Arc<TaskHandle>, env: &BTreeMap<String, String>) -> Option<i32>;
}

/// Spawns task commands through a shell.
#[derive(Debug, Clone)]
pub struct CommandExecutor {
    shell: String,
}

impl CommandExecutor {
    /// Executor that runs commands with `shell -e -c`.
    #[must_use]
    pub fn new(shell: impl Into<String>) -> Self {
        Self {
            shell: shell.into(),
        }
    }
}

#[async_trait]
impl CommandRunner for CommandExecutor {
    fn argv(&self, cmd: &str) -> Vec<String> {
        vec![
            self.shell.clone(),
            "-e".to_string(),
            "-c".to_string(),
            cmd.to_string(),
        ]
    }

    /// `None` means the process could not be started or awaited, or ended by a signal.
    async fn run(&self, task: &Arc<TaskHandle>, env: &BTreeMap<String, String>) -> Option<i32> {
        let Some((program, args)) = task.command().split_first() else {
            task.append_stderr("Exception: empty command\n");
            return None;
        };
        let mut command = Command::new(program);
        command
            .args(args)
            .envs(env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(source) => {
                record_failure(task, &CoreError::Process {
                    operation: "spawn",
                    program: program.clone(),
                    source,
                });
                return None;
            }
        };
        task.set_pid(child.id());
        debug!(pid = ?child.id(), "spawned command");

        let mut pumps: Vec<JoinHandle<()>> = Vec::with_capacity(3);
        if let Some(mut pipe) = child.stdin.take() {
            let input = task.stdin().to_string();
            pumps.push(tokio::spawn(async move {
                if !input.is_empty() {
                    if let Err(err) = pipe.write_all(input.as_bytes()).await {
                        debug!(error = %err, "command closed stdin early");
                    }
                }
                if let Err(err) = pipe.shutdown().await {
                    debug!(error = %err, "failed to close command stdin");
                }
            }));
        }
        if let Some(pipe) = child.stdout.take() {
            pumps.push(tokio::spawn(capture(pipe, Arc::clone(task), Capture::Stdout)));
        }
        if let Some(pipe) = child.stderr.take() {
            pumps.push(tokio::spawn(capture(pipe, Arc::clone(task), Capture::Stderr)));
        }

        let status = tokio::select! {
            status = child.wait() => status,
            () = task.kill_requested() => {
                info!(pid = ?child.id(), "killing command");
                if let Err(err) = child.start_kill() {
                    warn!(error = %err, "failed to signal command");
                }
                child.wait().await
            }
        };
        let exit_code = match status {
            Ok(status) => status.code(),
            Err(source) => {
                record_failure(task, &CoreError::Process {
                    operation: "wait",
                    program: program.clone(),
                    source,
                });
                None
            }
        };

        for pump in pumps {
            join_pump(pump).await;
        }
        debug!(exit_code = ?exit_code, "command exited");
        exit_code
    }
}

async fn capture<R>(pipe: R, task: Arc<TaskHandle>, target: Capture)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(pipe);
    let mut line = Vec::new();
    loop {
        line.clear();
        match reader.read_until(b'\n', &mut line).await {
            Ok(0) => break,
            Ok(_) => {
                let text = String::from_utf8_lossy(&line);
                match target {
                    Capture::Stdout => task.append_stdout(&text),
                    Capture::Stderr => task.append_stderr(&text),
                }
            }
            Err(err) => {
                debug!(error = %err, stream = ?target, "output pump stopped");
                break;
            }
        }
    }
}

async fn join_pump(mut pump: JoinHandle<()>) {
    match tokio::time::timeout(PUMP_GRACE, &mut pump).await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => warn!(error = %err, "output pump failed"),
        Err(_) => {
            warn!("output pump still running after exit; abandoning");
            pump.abort();
        }
    }
}

fn record_failure(task: &TaskHandle, err: &CoreError) {
    let rendered = error_chain(err);
    warn!(error = %rendered, "command failed to run");
    task.append_stderr(&format!("Exception: {rendered}\n"));
}

/// Re-read length and modification time of local manifest entries.
///
/// Entries that cannot be read are returned unchanged.
#[must_use]
pub fn refresh_local_files(manifest: Vec<FileRef>) -> Vec<FileRef> {
    manifest
        .into_iter()
        .map(|mut file| {
            if file.kind != RepoKind::File {
                return file;
            }
            let location = Location::local(file.root.clone(), file.key.clone());
            let mut repo = LocalFileRepo::new(location, file.tag.clone(), file.description.clone());
            match (repo.length(), repo.modification_time()) {
                (Ok(length), Ok(modified)) => {
                    file.length = length;
                    file.modified = modified;
                }
                (Err(err), _) | (_, Err(err)) => {
                    debug!(key = %file.key, error = %err, "left manifest entry unchanged");
                }
            }
            file
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn argv_wraps_command_in_shell() {
        let executor = CommandExecutor::new("/bin/sh");
        assert_eq!(executor.argv("ls -l"), vec!["/bin/sh", "-e", "-c", "ls -l"]);
    }

    #[test]
    fn refresh_updates_local_entries_only() -> anyhow::Result<()> {
        let dir = tempfile::Builder::new().prefix("ferry-refresh-").tempdir()?;
        fs::write(dir.path().join("out.txt"), b"12345")?;
        let root = dir.path().to_string_lossy().into_owned();
        let local = FileRef {
            tag: "t".into(),
            description: String::new(),
            source: None,
            root: root.clone(),
            key: "out.txt".into(),
            kind: RepoKind::File,
            length: 0,
            modified: None,
            content_type: None,
        };
        let missing = FileRef {
            key: "missing.txt".into(),
            ..local.clone()
        };
        let remote = FileRef {
            kind: RepoKind::S3Standard,
            ..local.clone()
        };
        let refreshed = refresh_local_files(vec![local, missing.clone(), remote.clone()]);
        assert_eq!(refreshed[0].length, 5);
        assert!(refreshed[0].modified.is_some());
        assert_eq!(refreshed[1], missing);
        assert_eq!(refreshed[2], remote);
        Ok(())
    }
}
