//! The agent facade: accepts tasks, runs each on its own worker, and finalizes them.
//!
//! # Design
//! - Submission returns the task id immediately; work continues on a spawned worker.
//! - Commands run on their own Tokio task; transfers run on the blocking pool because
//!   backends use blocking IO.
//! - Finalization runs on every path, including a panicked worker, and always attempts
//!   the completion notification before waiters are released.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use ferry_config::AgentConfig;
use ferry_repo::{Backends, ClientPool, FileRef, PoolSettings, RepoProvider};
use ferry_telemetry::{Metrics, Outcome, task_span};
use tracing::{Instrument, info, warn};

use crate::error::{CoreError, CoreResult, error_chain};
use crate::executor::{
    CommandExecutor, CommandRunner, TransferExecutor, TransferPlan, TransferSettings,
    refresh_local_files,
};
use crate::notify::{CompletionNotifier, HttpNotifier};
use crate::registry::TaskRegistry;
use crate::request::{CommandRequest, TransferRequest};
use crate::task::{TaskHandle, TaskId, TaskKind, TaskSnapshot};

/// Collaborators an [`Agent`] is assembled from.
#[derive(Debug)]
pub struct AgentParts {
    /// Runner for command tasks.
    pub commands: Arc<dyn CommandRunner>,
    /// Backend provider for transfers.
    pub provider: Arc<dyn RepoProvider>,
    /// Transfer tuning.
    pub transfer: TransferSettings,
    /// Completion trigger.
    pub notifier: Arc<dyn CompletionNotifier>,
    /// Metrics registry.
    pub metrics: Metrics,
}

/// Accepts command and transfer tasks and tracks them until deleted.
#[derive(Debug, Clone)]
pub struct Agent {
    inner: Arc<AgentInner>,
}

#[derive(Debug)]
struct AgentInner {
    registry: TaskRegistry,
    commands: Arc<dyn CommandRunner>,
    transfers: TransferExecutor,
    notifier: Arc<dyn CompletionNotifier>,
    metrics: Metrics,
}

impl Agent {
    /// Assemble an agent from explicit collaborators.
    #[must_use]
    pub fn new(parts: AgentParts) -> Self {
        let transfers =
            TransferExecutor::new(parts.provider, parts.transfer, parts.metrics.clone());
        Self {
            inner: Arc::new(AgentInner {
                registry: TaskRegistry::new(),
                commands: parts.commands,
                transfers,
                notifier: parts.notifier,
                metrics: parts.metrics,
            }),
        }
    }

    /// Agent using the shipped backends and the HTTP notifier.
    ///
    /// # Errors
    ///
    /// Fails when the notification client cannot be built.
    pub fn from_config(config: &AgentConfig, metrics: Metrics) -> CoreResult<Self> {
        let pool = ClientPool::new(PoolSettings {
            timeout: config.http_timeout,
            s3_region: config.s3_region.clone(),
            s3_part_bytes: config.s3_part_bytes,
        });
        let client = reqwest::Client::builder()
            .timeout(config.http_timeout)
            .build()
            .map_err(|source| CoreError::NotifyClient { source })?;
        Ok(Self::new(AgentParts {
            commands: Arc::new(CommandExecutor::new(config.shell.clone())),
            provider: Arc::new(Backends::new(Arc::new(pool))),
            transfer: TransferSettings {
                attempts: config.transfer_attempts,
                buffer_bytes: config.copy_buffer_bytes,
            },
            notifier: Arc::new(HttpNotifier::new(
                client,
                config.agent_uri.clone(),
                config.notify_delay,
            )),
            metrics,
        }))
    }

    /// Metrics shared by every task.
    #[must_use]
    pub fn metrics(&self) -> &Metrics {
        &self.inner.metrics
    }

    /// Register a command task and start it. Must be called inside a Tokio runtime.
    pub fn submit_command(&self, request: CommandRequest) -> TaskId {
        let CommandRequest {
            cmd,
            stdin,
            notification,
            files,
            env,
        } = request;
        let argv = self.inner.commands.argv(&cmd);
        let task = self
            .inner
            .registry
            .register(TaskKind::Command, argv, stdin, notification, files);
        let id = task.id();
        self.inner.metrics.task_submitted(TaskKind::Command.as_str());
        info!(task_id = id, "accepted command task");

        let inner = Arc::clone(&self.inner);
        let span = task_span(id, TaskKind::Command.as_str());
        tokio::spawn(async move { inner.run_command(task, env).await }.instrument(span));
        id
    }

    /// Register a transfer task and start it. Must be called inside a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnknownKind`] before anything is registered when either
    /// side names an unknown backend kind.
    pub fn submit_transfer(&self, request: TransferRequest) -> CoreResult<TaskId> {
        let plan = TransferPlan::from_request(&request)?;
        let task = self.inner.registry.register(
            TaskKind::Transfer,
            plan.command(),
            String::new(),
            request.notification,
            Vec::new(),
        );
        let id = task.id();
        self.inner.metrics.task_submitted(TaskKind::Transfer.as_str());
        info!(
            task_id = id,
            source = %plan.source,
            destination = %plan.destination,
            "accepted transfer task"
        );

        let inner = Arc::clone(&self.inner);
        let span = task_span(id, TaskKind::Transfer.as_str());
        tokio::spawn(async move { inner.run_transfer(task, plan).await }.instrument(span));
        Ok(id)
    }

    fn handle(&self, id: TaskId) -> CoreResult<Arc<TaskHandle>> {
        self.inner
            .registry
            .get(id)
            .ok_or(CoreError::UnknownTask { id })
    }

    /// Snapshot of the task under `id`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnknownTask`] when no such task is registered.
    pub fn get(&self, id: TaskId) -> CoreResult<TaskSnapshot> {
        Ok(self.handle(id)?.snapshot())
    }

    /// Snapshots of every registered task.
    #[must_use]
    pub fn list(&self) -> Vec<TaskSnapshot> {
        self.inner
            .registry
            .list()
            .iter()
            .map(|task| task.snapshot())
            .collect()
    }

    /// Destroy the task's process, if any, and unregister it.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnknownTask`] when no such task is registered.
    pub fn delete(&self, id: TaskId) -> CoreResult<()> {
        self.kill(id).map(drop)
    }

    /// Like [`Agent::delete`], returning the task as it was before removal.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnknownTask`] when no such task is registered.
    pub fn kill(&self, id: TaskId) -> CoreResult<TaskSnapshot> {
        let task = self
            .inner
            .registry
            .remove(id)
            .ok_or(CoreError::UnknownTask { id })?;
        let snapshot = task.snapshot();
        if !snapshot.is_finished() {
            info!(task_id = id, pid = ?task.pid(), "destroying task process");
            task.request_kill();
        }
        Ok(snapshot)
    }

    /// Wait until the task under `id` is finalized and return its final state.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnknownTask`] when no such task is registered.
    pub async fn wait(&self, id: TaskId) -> CoreResult<TaskSnapshot> {
        let task = self.handle(id)?;
        task.settled().await;
        Ok(task.snapshot())
    }

    /// Current agent time, for liveness checks.
    #[must_use]
    pub fn date(&self) -> String {
        Utc::now().to_rfc3339()
    }
}

impl AgentInner {
    async fn run_command(&self, task: Arc<TaskHandle>, env: BTreeMap<String, String>) {
        let runner = Arc::clone(&self.commands);
        let worker_task = Arc::clone(&task);
        let joined =
            tokio::spawn(async move { runner.run(&worker_task, &env).await }.in_current_span())
                .await;
        let exit_code = joined.unwrap_or_else(|source| {
            let err = CoreError::Worker { source };
            task.append_stderr(&format!("Exception: {}\n", error_chain(&err)));
            None
        });
        let manifest = refresh_local_files(task.manifest());
        self.finalize(&task, exit_code, manifest, false).await;
    }

    async fn run_transfer(&self, task: Arc<TaskHandle>, plan: TransferPlan) {
        let executor = self.transfers.clone();
        let worker_task = Arc::clone(&task);
        let span = tracing::Span::current();
        let joined =
            tokio::task::spawn_blocking(move || span.in_scope(|| executor.run(&worker_task, &plan)))
                .await;
        let (exit_code, manifest) = match joined {
            Ok(outcome) => (outcome.exit_code, outcome.manifest),
            Err(source) => {
                let err = CoreError::Worker { source };
                task.append_stderr(&format!("Exception: {}\n", error_chain(&err)));
                (1, Vec::new())
            }
        };
        self.finalize(&task, Some(exit_code), manifest, true).await;
    }

    async fn finalize(
        &self,
        task: &TaskHandle,
        exit_code: Option<i32>,
        manifest: Vec<FileRef>,
        complete_progress: bool,
    ) {
        task.finish(exit_code, manifest, complete_progress);
        self.metrics
            .task_finished(task.kind().as_str(), Outcome::from_exit_code(exit_code));
        info!(exit_code = ?exit_code, "task finished");
        if let Some(target) = task.notification() {
            if let Err(err) = self.notifier.notify(target, exit_code).await {
                self.metrics.inc_notification_failure();
                warn!(url = %target, error = %error_chain(&err), "completion notification failed");
            }
        }
        task.settle();
    }
}
