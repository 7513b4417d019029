//! Task execution engine: command and transfer tasks, progress tracking, and completion
//! notification.
//!
//! Layout: `task.rs` and `registry.rs` (task records), `request.rs` (inbound requests),
//! `progress.rs` and `pipeline.rs` (stream stages), `executor/` (command and transfer
//! executors), `notify.rs` (completion trigger), `agent.rs` (facade), `error.rs`.
#![forbid(unsafe_code)]
#![deny(
    unused_must_use,
    clippy::all,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls
)]
#![warn(missing_docs, unreachable_pub, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod agent;
pub mod error;
pub mod executor;
pub mod notify;
pub mod pipeline;
pub mod progress;
pub mod registry;
pub mod request;
pub mod task;

pub use agent::{Agent, AgentParts};
pub use error::{CoreError, CoreResult, error_chain};
pub use executor::{
    CommandExecutor, CommandRunner, TransferExecutor, TransferMode, TransferOutcome, TransferPlan,
    TransferSettings,
};
pub use notify::{CompletionNotifier, CompletionStatus, HttpNotifier};
pub use pipeline::ReadPipeline;
pub use progress::{LoggingProgress, PERMILLE_COMPLETE, ProgressReader, ProgressSink};
pub use registry::TaskRegistry;
pub use request::{CommandRequest, Endpoint, TransferRequest};
pub use task::{TaskHandle, TaskId, TaskKind, TaskSnapshot};
