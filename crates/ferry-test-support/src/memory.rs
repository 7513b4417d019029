//! In-memory backend and a provider that can inject write failures.

use std::collections::BTreeMap;
use std::io::{Cursor, Read};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use ferry_repo::{
    FileRef, KeyMatcher, Location, ObjectStream, Repo, RepoError, RepoProvider, RepoResult,
    guess_content_type, wildcard_base,
};

/// One stored object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryObject {
    /// Object bytes.
    pub data: Vec<u8>,
    /// MIME type recorded at write time.
    pub content_type: Option<String>,
    /// Modification time recorded at write time.
    pub modified: Option<DateTime<Utc>>,
}

/// Objects keyed by `(root, key)`, shared between handles.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    objects: Arc<Mutex<BTreeMap<(String, String), MemoryObject>>>,
}

impl MemoryStore {
    /// Empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<(String, String), MemoryObject>> {
        self.objects
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Store `data` under `root`/`key`.
    pub fn insert(&self, root: &str, key: &str, data: impl Into<Vec<u8>>) {
        self.insert_object(
            root,
            key,
            MemoryObject {
                data: data.into(),
                content_type: guess_content_type(key),
                modified: None,
            },
        );
    }

    /// Store a fully described object.
    pub fn insert_object(&self, root: &str, key: &str, object: MemoryObject) {
        self.lock()
            .insert((root.to_string(), key.to_string()), object);
    }

    /// Object stored under `root`/`key`.
    #[must_use]
    pub fn get(&self, root: &str, key: &str) -> Option<MemoryObject> {
        self.lock()
            .get(&(root.to_string(), key.to_string()))
            .cloned()
    }

    /// Keys stored under `root`, in order.
    #[must_use]
    pub fn keys(&self, root: &str) -> Vec<String> {
        self.lock()
            .keys()
            .filter(|(r, _)| r == root)
            .map(|(_, key)| key.clone())
            .collect()
    }
}

/// Backend handle over a [`MemoryStore`].
#[derive(Debug)]
pub struct MemoryRepo {
    store: MemoryStore,
    location: Location,
    tag: String,
    description: String,
    desired_mtime: Option<DateTime<Utc>>,
    listing_total: Option<u64>,
    failures: Option<Arc<AtomicU32>>,
}

impl MemoryRepo {
    /// Handle for `location` inside `store`.
    #[must_use]
    pub fn new(store: MemoryStore, location: Location, tag: &str, description: &str) -> Self {
        Self {
            store,
            location,
            tag: tag.to_string(),
            description: description.to_string(),
            desired_mtime: None,
            listing_total: None,
            failures: None,
        }
    }

    fn current(&self) -> RepoResult<MemoryObject> {
        self.store
            .get(&self.location.root, &self.location.key)
            .ok_or_else(|| RepoError::NotFound {
                root: self.location.root.clone(),
                key: self.location.key.clone(),
            })
    }

    fn take_failure(&self) -> bool {
        self.failures.as_ref().is_some_and(|left| {
            left.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
        })
    }

    fn describe(&self, object: &MemoryObject) -> FileRef {
        FileRef {
            tag: self.tag.clone(),
            description: self.description.clone(),
            source: self.location.endpoint.clone(),
            root: self.location.root.clone(),
            key: self.location.key.clone(),
            kind: self.location.kind,
            length: object.data.len() as u64,
            modified: object.modified,
            content_type: object.content_type.clone(),
        }
    }
}

impl Repo for MemoryRepo {
    fn location(&self) -> &Location {
        &self.location
    }

    fn open(&mut self) -> RepoResult<ObjectStream> {
        let object = self.current()?;
        Ok(Box::new(Cursor::new(object.data)))
    }

    fn put(
        &mut self,
        mut input: ObjectStream,
        _length: Option<u64>,
        content_type: Option<&str>,
    ) -> RepoResult<FileRef> {
        let mut data = Vec::new();
        input
            .read_to_end(&mut data)
            .map_err(|source| RepoError::Io {
                operation: "read_input",
                path: self.location.key.clone().into(),
                source,
            })?;
        drop(input);
        if self.take_failure() {
            return Err(RepoError::Rejected {
                operation: "put",
                detail: "injected failure".to_string(),
            });
        }
        let object = MemoryObject {
            data,
            content_type: content_type
                .map(ToString::to_string)
                .or_else(|| guess_content_type(&self.location.key)),
            modified: Some(self.desired_mtime.unwrap_or_else(Utc::now)),
        };
        self.store
            .insert_object(&self.location.root, &self.location.key, object.clone());
        Ok(self.describe(&object))
    }

    fn length(&mut self) -> RepoResult<u64> {
        Ok(self.current()?.data.len() as u64)
    }

    fn content_type(&mut self) -> RepoResult<Option<String>> {
        Ok(self.current()?.content_type)
    }

    fn exists(&mut self) -> RepoResult<bool> {
        Ok(self
            .store
            .get(&self.location.root, &self.location.key)
            .is_some())
    }

    fn modification_time(&mut self) -> RepoResult<Option<DateTime<Utc>>> {
        if self.desired_mtime.is_some() {
            return Ok(self.desired_mtime);
        }
        Ok(self.current()?.modified)
    }

    fn set_modification_time(&mut self, modified: DateTime<Utc>) {
        self.desired_mtime = Some(modified);
    }

    fn list_matching(&mut self) -> RepoResult<Vec<String>> {
        self.listing_total = None;
        if !ferry_repo::has_wildcard(&self.location.key) {
            return Ok(Vec::new());
        }
        let matcher = KeyMatcher::new(&self.location.key)?;
        let base = wildcard_base(&self.location.key);
        let mut total = 0;
        let mut matches = Vec::new();
        for key in self.store.keys(&self.location.root) {
            if key.starts_with(base) && matcher.is_match(&key) {
                if let Some(object) = self.store.get(&self.location.root, &key) {
                    total += object.data.len() as u64;
                }
                matches.push(key);
            }
        }
        self.listing_total = Some(total);
        Ok(matches)
    }

    fn select_next(&mut self, key: &str) -> RepoResult<()> {
        self.location.key = key.to_string();
        self.desired_mtime = None;
        Ok(())
    }

    fn total_length(&mut self) -> RepoResult<u64> {
        match self.listing_total {
            Some(total) => Ok(total),
            None => self.length(),
        }
    }
}

/// Provider that opens every location inside one [`MemoryStore`].
///
/// The first `failing_puts` writes across all handles it opens are rejected after the
/// input has been drained.
#[derive(Debug, Default)]
pub struct MemoryProvider {
    store: MemoryStore,
    failing_puts: Arc<AtomicU32>,
    opened: AtomicU32,
}

impl MemoryProvider {
    /// Provider over `store` that never fails.
    #[must_use]
    pub fn new(store: MemoryStore) -> Self {
        Self::flaky(store, 0)
    }

    /// Provider whose first `failing_puts` writes fail.
    #[must_use]
    pub fn flaky(store: MemoryStore, failing_puts: u32) -> Self {
        Self {
            store,
            failing_puts: Arc::new(AtomicU32::new(failing_puts)),
            opened: AtomicU32::new(0),
        }
    }

    /// Backing store.
    #[must_use]
    pub const fn store(&self) -> &MemoryStore {
        &self.store
    }

    /// Handles opened so far.
    #[must_use]
    pub fn opened(&self) -> u32 {
        self.opened.load(Ordering::SeqCst)
    }
}

impl RepoProvider for MemoryProvider {
    fn open(&self, location: Location, tag: &str, description: &str) -> RepoResult<Box<dyn Repo>> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        let mut repo = MemoryRepo::new(self.store.clone(), location, tag, description);
        repo.failures = Some(Arc::clone(&self.failing_puts));
        Ok(Box::new(repo))
    }
}
