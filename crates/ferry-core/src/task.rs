//! The shared record for one unit of work.
//!
//! # Design
//! - Identity, command, and input are fixed at creation; output lives behind a mutex.
//! - Progress is an atomic so status queries never contend with the executor.
//! - Once `finished_at` is stamped the record no longer changes.
//! - `settled` flips after the completion notification attempt so waiters observe a
//!   fully finalized task.

use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use ferry_repo::FileRef;
use serde::Serialize;
use tokio::sync::{Notify, watch};
use tracing::error;
use url::Url;

use crate::progress::{ProgressSink, PERMILLE_COMPLETE};

/// Task identity.
pub type TaskId = u64;

/// What a task does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskKind {
    /// Runs a shell command.
    Command,
    /// Moves data between backends.
    Transfer,
}

impl TaskKind {
    /// Label used in spans and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Command => "command",
            Self::Transfer => "transfer",
        }
    }
}

#[derive(Debug, Default)]
struct TaskState {
    exit_code: Option<i32>,
    stdout: String,
    stderr: String,
    finished_at: Option<DateTime<Utc>>,
    manifest: Vec<FileRef>,
    pid: Option<u32>,
}

/// Live task shared between its executor, the registry, and status queries.
#[derive(Debug)]
pub struct TaskHandle {
    id: TaskId,
    kind: TaskKind,
    command: Vec<String>,
    stdin: String,
    notification: Option<Url>,
    progress: AtomicU16,
    state: Mutex<TaskState>,
    kill: Notify,
    settled: watch::Sender<bool>,
}

/// Point-in-time copy of a task, safe to serialize while the task runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSnapshot {
    /// Task identity.
    pub id: TaskId,
    /// Task kind.
    pub kind: TaskKind,
    /// Command vector.
    pub cmd: Vec<String>,
    /// Input written to the process.
    pub stdin: String,
    /// Completion notification target.
    pub notification: Option<Url>,
    /// Permille progress.
    pub progress: u16,
    /// Exit code, once known.
    pub exit_code: Option<i32>,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error and transfer diagnostics.
    pub stderr: String,
    /// Completion time.
    pub finished_at: Option<DateTime<Utc>>,
    /// Produced artifacts.
    pub manifest: Vec<FileRef>,
}

impl TaskSnapshot {
    /// Whether the task has been finalized.
    #[must_use]
    pub const fn is_finished(&self) -> bool {
        self.finished_at.is_some()
    }
}

impl TaskHandle {
    pub(crate) fn new(
        id: TaskId,
        kind: TaskKind,
        command: Vec<String>,
        stdin: String,
        notification: Option<Url>,
        manifest: Vec<FileRef>,
    ) -> Self {
        let (settled, _) = watch::channel(false);
        Self {
            id,
            kind,
            command,
            stdin,
            notification,
            progress: AtomicU16::new(0),
            state: Mutex::new(TaskState {
                manifest,
                ..TaskState::default()
            }),
            kill: Notify::new(),
            settled,
        }
    }

    /// Task identity.
    #[must_use]
    pub const fn id(&self) -> TaskId {
        self.id
    }

    /// Task kind.
    #[must_use]
    pub const fn kind(&self) -> TaskKind {
        self.kind
    }

    /// Command vector.
    #[must_use]
    pub fn command(&self) -> &[String] {
        &self.command
    }

    /// Input for the process.
    #[must_use]
    pub fn stdin(&self) -> &str {
        &self.stdin
    }

    /// Completion notification target.
    #[must_use]
    pub const fn notification(&self) -> Option<&Url> {
        self.notification.as_ref()
    }

    /// Current permille progress.
    #[must_use]
    pub fn progress(&self) -> u16 {
        self.progress.load(Ordering::Acquire)
    }

    fn lock(&self) -> MutexGuard<'_, TaskState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                error!(task_id = self.id, "task state mutex poisoned; continuing with recovered guard");
                poisoned.into_inner()
            }
        }
    }

    /// Copy the current state.
    #[must_use]
    pub fn snapshot(&self) -> TaskSnapshot {
        let state = self.lock();
        TaskSnapshot {
            id: self.id,
            kind: self.kind,
            cmd: self.command.clone(),
            stdin: self.stdin.clone(),
            notification: self.notification.clone(),
            progress: self.progress(),
            exit_code: state.exit_code,
            stdout: state.stdout.clone(),
            stderr: state.stderr.clone(),
            finished_at: state.finished_at,
            manifest: state.manifest.clone(),
        }
    }

    pub fn append_stdout(&self, text: &str) {
        self.lock().stdout.push_str(text);
    }

    pub(crate) fn append_stderr(&self, text: &str) {
        self.lock().stderr.push_str(text);
    }

    pub(crate) fn set_pid(&self, pid: Option<u32>) {
        self.lock().pid = pid;
    }

    /// OS process id while a command is running.
    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        self.lock().pid
    }

    pub(crate) fn manifest(&self) -> Vec<FileRef> {
        self.lock().manifest.clone()
    }

    /// Stamp completion. Later calls are ignored so a finalized task stays immutable.
    pub(crate) fn finish(&self, exit_code: Option<i32>, manifest: Vec<FileRef>, complete_progress: bool) {
        let mut state = self.lock();
        if state.finished_at.is_some() {
            return;
        }
        if complete_progress {
            self.progress.store(PERMILLE_COMPLETE, Ordering::Release);
        }
        state.exit_code = exit_code;
        state.manifest = manifest;
        state.pid = None;
        state.finished_at = Some(Utc::now());
    }

    /// Ask the executor to destroy the running process.
    pub fn request_kill(&self) {
        self.kill.notify_one();
    }

    pub(crate) async fn kill_requested(&self) {
        self.kill.notified().await;
    }

    pub(crate) fn settle(&self) {
        self.settled.send_replace(true);
    }

    /// Resolve once the task is finalized and its notification has been attempted.
    pub async fn settled(&self) {
        let mut receiver = self.settled.subscribe();
        // The sender lives in `self`, so the channel cannot close while we wait.
        let _ = receiver.wait_for(|settled| *settled).await;
    }
}

impl ProgressSink for TaskHandle {
    fn update(&self, permille: u16) {
        self.progress.store(permille, Ordering::Release);
    }
}
