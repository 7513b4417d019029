//! In-memory task list.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use ferry_repo::FileRef;
use tracing::error;
use url::Url;

use crate::task::{TaskHandle, TaskId, TaskKind};

/// Tasks accepted by this agent, in submission order.
///
/// One lock guards every read, append, and removal; listing copies the handles out so
/// callers never serialize while holding it.
#[derive(Debug)]
pub struct TaskRegistry {
    next_id: AtomicU64,
    tasks: Mutex<Vec<Arc<TaskHandle>>>,
}

impl Default for TaskRegistry {
    fn default() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            tasks: Mutex::new(Vec::new()),
        }
    }
}

impl TaskRegistry {
    /// Empty registry; ids start at 1.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Arc<TaskHandle>>> {
        match self.tasks.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                error!("task registry mutex poisoned; continuing with recovered guard");
                poisoned.into_inner()
            }
        }
    }

    /// Create and register a task.
    pub fn register(
        &self,
        kind: TaskKind,
        command: Vec<String>,
        stdin: String,
        notification: Option<Url>,
        manifest: Vec<FileRef>,
    ) -> Arc<TaskHandle> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let task = Arc::new(TaskHandle::new(
            id,
            kind,
            command,
            stdin,
            notification,
            manifest,
        ));
        self.lock().push(Arc::clone(&task));
        task
    }

    /// Task registered under `id`.
    #[must_use]
    pub fn get(&self, id: TaskId) -> Option<Arc<TaskHandle>> {
        self.lock().iter().find(|task| task.id() == id).cloned()
    }

    /// Copy of every registered task.
    #[must_use]
    pub fn list(&self) -> Vec<Arc<TaskHandle>> {
        self.lock().clone()
    }

    /// Unregister the task under `id`.
    pub fn remove(&self, id: TaskId) -> Option<Arc<TaskHandle>> {
        let mut tasks = self.lock();
        let index = tasks.iter().position(|task| task.id() == id)?;
        Some(tasks.remove(index))
    }

    /// Number of registered tasks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether no task is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
