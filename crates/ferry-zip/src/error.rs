//! # Design
//!
//! - Provide structured, constant-message errors for archive encoding and decoding.
//! - Carry the entry name and the expected/observed values for integrity failures.
//! - Convert into `std::io::Error` so codec streams compose with `Read`/`Write` consumers.

use std::io;

use thiserror::Error;

/// Result type for ZIP codec operations.
pub type ZipResult<T> = Result<T, ZipError>;

/// Errors produced while reading or writing ZIP archives.
#[derive(Debug, Error)]
pub enum ZipError {
    /// IO failures on the underlying byte stream.
    #[error("zip io failure")]
    Io {
        /// Operation that triggered the IO failure.
        operation: &'static str,
        /// Underlying IO error.
        source: io::Error,
    },
    /// The stream ended inside a header or entry body.
    #[error("unexpected end of zip stream")]
    UnexpectedEof {
        /// Entry being decoded when the stream ended.
        name: String,
    },
    /// Entry is encrypted, which is not supported.
    #[error("encrypted zip entry")]
    Encrypted {
        /// Entry name.
        name: String,
    },
    /// Data descriptor flag set on a non-deflated entry.
    #[error("data descriptor flag on non-deflated entry")]
    DescriptorOnStored {
        /// Entry name.
        name: String,
    },
    /// Compression method other than STORED or DEFLATED.
    #[error("unsupported compression method")]
    UnsupportedMethod {
        /// Entry name.
        name: String,
        /// Raw method code from the header.
        method: u16,
    },
    /// CRC-32 of the entry data did not match the recorded value.
    #[error("zip entry crc mismatch")]
    CrcMismatch {
        /// Entry name.
        name: String,
        /// Recorded CRC-32.
        expected: u32,
        /// Computed CRC-32.
        actual: u32,
    },
    /// Uncompressed size did not match the recorded value.
    #[error("zip entry size mismatch")]
    SizeMismatch {
        /// Entry name.
        name: String,
        /// Recorded size.
        expected: u64,
        /// Observed size.
        actual: u64,
    },
    /// Compressed size did not match the recorded value.
    #[error("zip entry compressed size mismatch")]
    CompressedSizeMismatch {
        /// Entry name.
        name: String,
        /// Recorded compressed size.
        expected: u64,
        /// Observed compressed size.
        actual: u64,
    },
    /// Inflating entry data failed.
    #[error("zip entry inflate failure")]
    Inflate {
        /// Entry name.
        name: String,
        /// Underlying decompression error.
        source: flate2::DecompressError,
    },
    /// Deflating entry data failed.
    #[error("zip entry deflate failure")]
    Deflate {
        /// Entry name.
        name: String,
        /// Underlying compression error.
        source: flate2::CompressError,
    },
    /// An entry with the same name was already written.
    #[error("duplicate zip entry")]
    DuplicateEntry {
        /// Entry name.
        name: String,
    },
    /// STORED entries need size and CRC before the header is written.
    #[error("stored zip entry missing size or crc")]
    StoredEntryIncomplete {
        /// Entry name.
        name: String,
    },
    /// More bytes were written to a STORED entry than declared.
    #[error("stored zip entry overflow")]
    StoredOverflow {
        /// Entry name.
        name: String,
        /// Declared size.
        declared: u64,
    },
    /// A header field exceeded its 16-bit length limit.
    #[error("zip field too long")]
    FieldTooLong {
        /// Field that overflowed.
        field: &'static str,
        /// Actual length in bytes.
        len: usize,
    },
    /// Data was written without an open entry.
    #[error("no current zip entry")]
    NoCurrentEntry,
    /// The archive has already been finished.
    #[error("zip archive already finished")]
    Finished,
}

impl ZipError {
    pub(crate) const fn io(operation: &'static str, source: io::Error) -> Self {
        Self::Io { operation, source }
    }
}

impl From<ZipError> for io::Error {
    fn from(err: ZipError) -> Self {
        match err {
            ZipError::Io { source, .. } => source,
            eof @ ZipError::UnexpectedEof { .. } => Self::new(io::ErrorKind::UnexpectedEof, eof),
            other => Self::new(io::ErrorKind::InvalidData, other),
        }
    }
}
