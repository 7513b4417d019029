//! Environment-driven agent configuration.
//!
//! Layout: `model.rs` (typed settings and defaults), `env.rs` (loading and validation
//! from environment variables), `error.rs`.
#![forbid(unsafe_code)]
#![deny(
    unused_must_use,
    clippy::all,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls
)]
#![warn(missing_docs, unreachable_pub, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod env;
pub mod error;
pub mod model;

pub use env::{load_from_env, load_with};
pub use error::{ConfigError, ConfigResult};
pub use model::{AgentConfig, LogSettings};
