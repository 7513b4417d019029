//! Executors that carry tasks from running to finished.

pub mod command;
pub mod transfer;

pub use command::{CommandExecutor, CommandRunner, refresh_local_files};
pub use transfer::{TransferExecutor, TransferMode, TransferOutcome, TransferPlan, TransferSettings};
