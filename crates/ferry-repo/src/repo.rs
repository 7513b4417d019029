//! The storage backend contract.
//!
//! # Design
//! - One handle per object address; handles are not shared across transfers.
//! - Metadata is fetched lazily and cached until `select_next` repoints the handle.
//! - Streams are owned boxes so pipelines can be assembled and dropped as a unit.

use std::io::Read;

use chrono::{DateTime, Utc};

use crate::artifact::FileRef;
use crate::error::RepoResult;
use crate::location::Location;
use crate::wildcard::{has_wildcard, wildcard_base};

/// Readable object stream.
pub type ObjectStream = Box<dyn Read + Send>;

/// Uniform interface over local and remote object storage.
pub trait Repo: Send {
    /// Address this handle currently points at.
    fn location(&self) -> &Location;

    /// Open the object for reading, refreshing the cached content type.
    ///
    /// # Errors
    ///
    /// Fails when the object is missing or the provider cannot be reached.
    fn open(&mut self) -> RepoResult<ObjectStream>;

    /// Write `input` to the object and describe the result. `length` is `None` when the
    /// size is not known in advance. The stream is dropped before returning.
    ///
    /// # Errors
    ///
    /// Fails on provider or IO errors; partial objects may remain.
    fn put(
        &mut self,
        input: ObjectStream,
        length: Option<u64>,
        content_type: Option<&str>,
    ) -> RepoResult<FileRef>;

    /// Object length in bytes.
    ///
    /// # Errors
    ///
    /// Fails when metadata cannot be fetched.
    fn length(&mut self) -> RepoResult<u64>;

    /// MIME type, when the provider knows one.
    ///
    /// # Errors
    ///
    /// Fails when metadata cannot be fetched.
    fn content_type(&mut self) -> RepoResult<Option<String>>;

    /// Whether the object exists.
    ///
    /// # Errors
    ///
    /// Fails when the provider cannot answer.
    fn exists(&mut self) -> RepoResult<bool>;

    /// Modification time; a time set through `set_modification_time` takes precedence.
    ///
    /// # Errors
    ///
    /// Fails when metadata cannot be fetched.
    fn modification_time(&mut self) -> RepoResult<Option<DateTime<Utc>>>;

    /// Record the modification time to apply on the next `put`.
    fn set_modification_time(&mut self, modified: DateTime<Utc>);

    /// Keys (relative to the root) matching the wildcard key, accumulating their total
    /// length. Empty when the key has no wildcard.
    ///
    /// # Errors
    ///
    /// Fails when the listing cannot be produced.
    fn list_matching(&mut self) -> RepoResult<Vec<String>>;

    /// Repoint the handle at `key`, dropping cached metadata for the previous key.
    ///
    /// # Errors
    ///
    /// Backends that hold per-key connections report failures closing them.
    fn select_next(&mut self, key: &str) -> RepoResult<()>;

    /// Length to report progress against: the wildcard aggregate after a listing,
    /// otherwise the object length.
    ///
    /// # Errors
    ///
    /// Fails when metadata cannot be fetched.
    fn total_length(&mut self) -> RepoResult<u64>;
}

/// Lazily populated metadata for the current key.
#[derive(Debug, Default, Clone)]
pub(crate) struct MetaCache {
    pub(crate) length: Option<u64>,
    pub(crate) content_type: Option<Option<String>>,
    pub(crate) modified: Option<Option<DateTime<Utc>>>,
    pub(crate) exists: Option<bool>,
}

impl MetaCache {
    pub(crate) fn clear(&mut self) {
        *self = Self::default();
    }
}

/// Wildcard iteration state shared by every backend.
#[derive(Debug, Default, Clone)]
pub(crate) struct Listing {
    pub(crate) pattern: Option<String>,
    pub(crate) total: Option<u64>,
    pub(crate) matches: Vec<String>,
}

impl Listing {
    /// Start a listing for `key`; returns the wildcard base when `key` has a wildcard.
    pub(crate) fn begin(&mut self, key: &str) -> Option<String> {
        self.total = None;
        self.matches.clear();
        if has_wildcard(key) {
            self.pattern = Some(key.to_string());
            Some(wildcard_base(key).to_string())
        } else {
            self.pattern = None;
            None
        }
    }

    pub(crate) fn record(&mut self, matches: Vec<(String, u64)>) -> Vec<String> {
        self.total = Some(matches.iter().map(|(_, len)| len).sum());
        self.matches = matches.into_iter().map(|(key, _)| key).collect();
        self.matches.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn listing_without_wildcard_clears_state() {
        let mut listing = Listing::default();
        listing.record(vec![("a".to_string(), 4)]);
        assert!(listing.begin("plain/key").is_none());
        assert!(listing.total.is_none());
        assert!(listing.matches.is_empty());
    }

    #[test]
    fn listing_totals_match_lengths() {
        let mut listing = Listing::default();
        assert_eq!(listing.begin("a/*.txt").as_deref(), Some("a/"));
        let keys = listing.record(vec![("a/1.txt".to_string(), 3), ("a/2.txt".to_string(), 5)]);
        assert_eq!(keys, vec!["a/1.txt", "a/2.txt"]);
        assert_eq!(listing.total, Some(8));
    }
}
