//! Streaming ZIP codec with ZIP64 support.
//!
//! Layout: `format.rs` (record constants and field codecs), `entry.rs` (entry metadata),
//! `reader.rs` (forward-only archive reader), `writer.rs` (archive writer).
#![forbid(unsafe_code)]
#![deny(
    unused_must_use,
    clippy::all,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls
)]
#![warn(missing_docs, unreachable_pub, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod entry;
pub mod error;
mod format;
pub mod reader;
pub mod writer;

pub use entry::{CompressionMethod, ZipEntry};
pub use error::{ZipError, ZipResult};
pub use format::ZIP64_MAGIC;
pub use reader::ZipReader;
pub use writer::ZipWriter;
