//! # Design
//!
//! - Provide structured, constant-message errors for every storage backend.
//! - Capture the operation, the path or URL involved, and the offending value.
//! - Preserve source errors so callers can render the full chain.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Result type for storage backend operations.
pub type RepoResult<T> = Result<T, RepoError>;

/// Errors produced by storage backends.
#[derive(Debug, Error)]
pub enum RepoError {
    /// Backend kind string is not recognised.
    #[error("unknown repository kind")]
    UnknownKind {
        /// Kind supplied by the caller.
        value: String,
    },
    /// Remote backends require an explicit endpoint.
    #[error("repository endpoint missing")]
    MissingEndpoint {
        /// Kind that required the endpoint.
        kind: &'static str,
    },
    /// The object does not exist.
    #[error("repository object not found")]
    NotFound {
        /// Root (bucket, container, or directory).
        root: String,
        /// Key within the root.
        key: String,
    },
    /// Local filesystem IO failed.
    #[error("repository io failure")]
    Io {
        /// Operation that triggered the failure.
        operation: &'static str,
        /// Path involved.
        path: PathBuf,
        /// Underlying IO error.
        source: io::Error,
    },
    /// Directory traversal failed while listing.
    #[error("repository walk failure")]
    Walkdir {
        /// Operation that triggered the failure.
        operation: &'static str,
        /// Directory being walked.
        path: PathBuf,
        /// Underlying walkdir error.
        source: walkdir::Error,
    },
    /// HTTP transport failed.
    #[error("repository http failure")]
    Http {
        /// Operation that triggered the failure.
        operation: &'static str,
        /// Request URL.
        url: String,
        /// Underlying client error.
        source: reqwest::Error,
    },
    /// Provider answered with an unexpected status.
    #[error("unexpected http status {status}")]
    HttpStatus {
        /// Operation that triggered the failure.
        operation: &'static str,
        /// Request URL.
        url: String,
        /// Status code returned.
        status: u16,
    },
    /// A required response header was absent or unparsable.
    #[error("repository response header invalid")]
    Header {
        /// Operation that triggered the failure.
        operation: &'static str,
        /// Header name.
        header: &'static str,
    },
    /// Provider reported a failure inside a successful response body.
    #[error("repository provider rejected request")]
    Rejected {
        /// Operation that triggered the failure.
        operation: &'static str,
        /// Provider error body, truncated.
        detail: String,
    },
    /// XML response decoding failed.
    #[error("repository xml decode failure")]
    Xml {
        /// Operation that triggered the failure.
        operation: &'static str,
        /// Underlying decoder error.
        source: quick_xml::DeError,
    },
    /// JSON response decoding failed.
    #[error("repository json decode failure")]
    Json {
        /// Operation that triggered the failure.
        operation: &'static str,
        /// Underlying decoder error.
        source: serde_json::Error,
    },
    /// Wildcard pattern produced an invalid regular expression.
    #[error("invalid wildcard pattern")]
    Pattern {
        /// Pattern supplied by the caller.
        pattern: String,
        /// Underlying regex error.
        source: regex::Error,
    },
}

impl RepoError {
    pub(crate) fn io(operation: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            operation,
            path: path.into(),
            source,
        }
    }

    pub(crate) fn http(operation: &'static str, url: impl ToString, source: reqwest::Error) -> Self {
        Self::Http {
            operation,
            url: url.to_string(),
            source,
        }
    }

    pub(crate) fn status(operation: &'static str, url: impl ToString, status: u16) -> Self {
        Self::HttpStatus {
            operation,
            url: url.to_string(),
            status,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn io_helper_keeps_context() {
        let err = RepoError::io("open", "/tmp/x", io::Error::other("boom"));
        assert_eq!(err.to_string(), "repository io failure");
        assert!(err.source().is_some());
        match err {
            RepoError::Io {
                operation, path, ..
            } => {
                assert_eq!(operation, "open");
                assert_eq!(path, PathBuf::from("/tmp/x"));
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn status_message_names_the_code() {
        let err = RepoError::status("s3.head", "http://h/b/k", 403);
        assert_eq!(err.to_string(), "unexpected http status 403");
    }
}
