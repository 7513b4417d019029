//! # Design
//!
//! - Provide structured, constant-message errors for task execution.
//! - Capture the operation and the object involved without interpolating context.
//! - Preserve source errors so task logs can render the full chain.

use std::error::Error as StdError;
use std::io;

use ferry_repo::RepoError;
use ferry_zip::ZipError;
use thiserror::Error;

use crate::task::TaskId;

/// Result type for task execution.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors produced while accepting and running tasks.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A transfer named a backend kind that does not exist.
    #[error("unknown backend kind")]
    UnknownKind {
        /// Which side of the transfer carried the kind.
        side: &'static str,
        /// Kind supplied by the caller.
        value: String,
    },
    /// No task is registered under the id.
    #[error("unknown task")]
    UnknownTask {
        /// Requested task id.
        id: TaskId,
    },
    /// A storage backend failed.
    #[error("transfer backend failure")]
    Repo {
        /// Operation that triggered the failure.
        operation: &'static str,
        /// Underlying backend error.
        source: RepoError,
    },
    /// Archive decoding failed.
    #[error("transfer archive failure")]
    Zip {
        /// Operation that triggered the failure.
        operation: &'static str,
        /// Underlying codec error.
        source: ZipError,
    },
    /// The requested archive member does not exist.
    #[error("archive member not found")]
    MemberNotFound {
        /// Archive key.
        archive: String,
        /// Member path inside the archive.
        member: String,
    },
    /// The child process could not be started or awaited.
    #[error("command process failure")]
    Process {
        /// Operation that triggered the failure.
        operation: &'static str,
        /// Program being run.
        program: String,
        /// Underlying IO error.
        source: io::Error,
    },
    /// A blocking worker panicked or was cancelled.
    #[error("task worker failure")]
    Worker {
        /// Underlying join error.
        source: tokio::task::JoinError,
    },
    /// The notification HTTP client could not be built.
    #[error("notification client setup failure")]
    NotifyClient {
        /// Underlying client error.
        source: reqwest::Error,
    },
    /// The notification request could not be sent.
    #[error("notification delivery failure")]
    Notify {
        /// Notification URL.
        url: String,
        /// Underlying client error.
        source: reqwest::Error,
    },
    /// The notification endpoint answered with a failure status.
    #[error("notification rejected with status {status}")]
    NotifyStatus {
        /// Notification URL.
        url: String,
        /// Status code returned.
        status: u16,
    },
}

impl CoreError {
    pub(crate) const fn repo(operation: &'static str, source: RepoError) -> Self {
        Self::Repo { operation, source }
    }

    pub(crate) const fn zip(operation: &'static str, source: ZipError) -> Self {
        Self::Zip { operation, source }
    }
}

/// Render `err` and its sources as `outer: inner: root`.
#[must_use]
pub fn error_chain(err: &(dyn StdError + 'static)) -> String {
    let mut rendered = err.to_string();
    let mut current = err.source();
    while let Some(cause) = current {
        rendered.push_str(": ");
        rendered.push_str(&cause.to_string());
        current = cause.source();
    }
    rendered
}
