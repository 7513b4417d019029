#![forbid(unsafe_code)]
#![deny(
    unused_must_use,
    clippy::all,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls
)]
#![warn(missing_docs, unreachable_pub, clippy::pedantic, clippy::nursery)]
#![allow(clippy::redundant_pub_crate)]

//! Command-line entry point that runs one task through an in-process agent.
//!
//! Layout:
//! - `cli.rs`: argument parsing and command dispatch
//! - `error.rs`: user-facing errors and exit codes
//! - `output.rs`: task rendering
//! - `main.rs`: thin entrypoint delegating to `run()`

pub(crate) mod cli;
pub(crate) mod error;
pub(crate) mod output;

pub use cli::run;
