#![forbid(unsafe_code)]
#![deny(
    unused_must_use,
    clippy::all,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls
)]
#![warn(missing_docs, unreachable_pub, clippy::pedantic, clippy::nursery)]

//! Shared test helpers used across integration suites.
//! Layout: fixtures.rs (temp dirs and archive builders), memory.rs (in-memory backend
//! and fault-injecting provider).

pub mod fixtures;
pub mod memory;

pub use fixtures::{temp_dir, zip_archive};
pub use memory::{MemoryObject, MemoryProvider, MemoryRepo, MemoryStore};
