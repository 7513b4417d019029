//! Local filesystem backend.

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use tracing::debug;
use walkdir::WalkDir;

use crate::artifact::{FileRef, guess_content_type};
use crate::error::{RepoError, RepoResult};
use crate::location::Location;
use crate::repo::{Listing, MetaCache, ObjectStream, Repo};
use crate::wildcard::KeyMatcher;

/// Files under a root directory; an empty root is the working directory.
#[derive(Debug)]
pub struct LocalFileRepo {
    location: Location,
    tag: String,
    description: String,
    cache: MetaCache,
    desired_mtime: Option<DateTime<Utc>>,
    listing: Listing,
}

impl LocalFileRepo {
    /// Handle for `location`, labelled for the descriptors it produces.
    #[must_use]
    pub fn new(location: Location, tag: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            location,
            tag: tag.into(),
            description: description.into(),
            cache: MetaCache::default(),
            desired_mtime: None,
            listing: Listing::default(),
        }
    }

    /// Absolute or root-relative path of the current key.
    #[must_use]
    pub fn path(&self) -> PathBuf {
        self.location.local_root().join(&self.location.key)
    }

    fn metadata(&self) -> RepoResult<fs::Metadata> {
        let path = self.path();
        fs::metadata(&path).map_err(|source| {
            if source.kind() == io::ErrorKind::NotFound {
                RepoError::NotFound {
                    root: self.location.root.clone(),
                    key: self.location.key.clone(),
                }
            } else {
                RepoError::io("metadata", path, source)
            }
        })
    }

    fn describe(&mut self, content_type: Option<&str>) -> RepoResult<FileRef> {
        self.cache.clear();
        let metadata = self.metadata()?;
        let modified = metadata.modified().ok().map(DateTime::<Utc>::from);
        Ok(FileRef {
            tag: self.tag.clone(),
            description: self.description.clone(),
            source: self.location.endpoint.clone(),
            root: self.location.root.clone(),
            key: self.location.key.clone(),
            kind: self.location.kind,
            length: metadata.len(),
            modified,
            content_type: content_type
                .map(ToString::to_string)
                .or_else(|| guess_content_type(&self.location.key)),
        })
    }
}

impl Repo for LocalFileRepo {
    fn location(&self) -> &Location {
        &self.location
    }

    fn open(&mut self) -> RepoResult<ObjectStream> {
        let path = self.path();
        let file = File::open(&path).map_err(|source| RepoError::io("open", path, source))?;
        self.cache.content_type = Some(guess_content_type(&self.location.key));
        Ok(Box::new(file))
    }

    fn put(
        &mut self,
        mut input: ObjectStream,
        length: Option<u64>,
        content_type: Option<&str>,
    ) -> RepoResult<FileRef> {
        let path = self.path();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|source| RepoError::io("create_parent", parent, source))?;
        }
        let mut file =
            File::create(&path).map_err(|source| RepoError::io("create", &path, source))?;
        let copied = io::copy(&mut input, &mut file)
            .map_err(|source| RepoError::io("write", &path, source))?;
        drop(input);
        if let Some(modified) = self.desired_mtime {
            file.set_modified(SystemTime::from(modified))
                .map_err(|source| RepoError::io("set_modified", &path, source))?;
        }
        file.sync_all()
            .map_err(|source| RepoError::io("sync", &path, source))?;
        debug!(
            path = %path.display(),
            bytes = copied,
            declared = ?length,
            "wrote local file"
        );
        self.describe(content_type)
    }

    fn length(&mut self) -> RepoResult<u64> {
        if let Some(length) = self.cache.length {
            return Ok(length);
        }
        let length = self.metadata()?.len();
        self.cache.length = Some(length);
        Ok(length)
    }

    fn content_type(&mut self) -> RepoResult<Option<String>> {
        Ok(self
            .cache
            .content_type
            .get_or_insert_with(|| guess_content_type(&self.location.key))
            .clone())
    }

    fn exists(&mut self) -> RepoResult<bool> {
        if let Some(exists) = self.cache.exists {
            return Ok(exists);
        }
        let exists = self.path().exists();
        self.cache.exists = Some(exists);
        Ok(exists)
    }

    fn modification_time(&mut self) -> RepoResult<Option<DateTime<Utc>>> {
        if let Some(desired) = self.desired_mtime {
            return Ok(Some(desired));
        }
        if let Some(modified) = self.cache.modified {
            return Ok(modified);
        }
        let modified = self.metadata()?.modified().ok().map(DateTime::<Utc>::from);
        self.cache.modified = Some(modified);
        Ok(modified)
    }

    fn set_modification_time(&mut self, modified: DateTime<Utc>) {
        self.desired_mtime = Some(modified);
    }

    fn list_matching(&mut self) -> RepoResult<Vec<String>> {
        let Some(base) = self.listing.begin(&self.location.key) else {
            return Ok(Vec::new());
        };
        let matcher = KeyMatcher::new(&self.location.key)?;
        let root = self.location.local_root();
        let start = root.join(&base);
        if !start.is_dir() {
            return Ok(self.listing.record(Vec::new()));
        }
        let mut matches = Vec::new();
        for entry in WalkDir::new(&start).sort_by_file_name() {
            let entry = entry.map_err(|source| RepoError::Walkdir {
                operation: "list_matching",
                path: start.clone(),
                source,
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let Some(key) = relative_key(&root, entry.path()) else {
                continue;
            };
            if matcher.is_match(&key) {
                let length = entry
                    .metadata()
                    .map_err(|source| RepoError::Walkdir {
                        operation: "list_metadata",
                        path: entry.path().to_path_buf(),
                        source,
                    })?
                    .len();
                matches.push((key, length));
            }
        }
        Ok(self.listing.record(matches))
    }

    fn select_next(&mut self, key: &str) -> RepoResult<()> {
        self.location.key = key.to_string();
        self.cache.clear();
        Ok(())
    }

    fn total_length(&mut self) -> RepoResult<u64> {
        match self.listing.total {
            Some(total) => Ok(total),
            None => self.length(),
        }
    }
}

fn relative_key(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let parts: Vec<String> = relative
        .components()
        .map(|part| part.as_os_str().to_string_lossy().into_owned())
        .collect();
    Some(parts.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Read};

    fn temp_root() -> tempfile::TempDir {
        tempfile::Builder::new()
            .prefix("ferry-local-")
            .tempdir()
            .expect("tempdir")
    }

    fn seed(root: &Path, key: &str, body: &[u8]) {
        let path = root.join(key);
        fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
        fs::write(path, body).expect("write");
    }

    #[test]
    fn put_creates_parents_and_describes_result() -> RepoResult<()> {
        let dir = temp_root();
        let root = dir.path().to_string_lossy().into_owned();
        let mut repo = LocalFileRepo::new(Location::local(&root, "deep/dir/out.txt"), "t", "d");
        let when = DateTime::parse_from_rfc3339("2020-01-02T03:04:05Z")
            .expect("timestamp")
            .with_timezone(&Utc);
        repo.set_modification_time(when);
        let file = repo.put(Box::new(Cursor::new(b"hello".to_vec())), Some(5), None)?;
        assert_eq!(file.length, 5);
        assert_eq!(file.key, "deep/dir/out.txt");
        assert_eq!(file.modified, Some(when));
        assert_eq!(file.content_type.as_deref(), Some("text/plain"));

        let mut body = String::new();
        repo.open()?
            .read_to_string(&mut body)
            .map_err(|source| RepoError::io("read", repo.path(), source))?;
        assert_eq!(body, "hello");
        Ok(())
    }

    #[test]
    fn wildcard_listing_filters_and_totals() -> RepoResult<()> {
        let dir = temp_root();
        seed(dir.path(), "a/1.txt", b"one");
        seed(dir.path(), "a/2.txt", b"three");
        seed(dir.path(), "b/3.txt", b"x");
        let root = dir.path().to_string_lossy().into_owned();
        let mut repo = LocalFileRepo::new(Location::local(&root, "a/*.txt"), "t", "d");
        let keys = repo.list_matching()?;
        assert_eq!(keys, vec!["a/1.txt", "a/2.txt"]);
        assert_eq!(repo.total_length()?, 8);

        repo.select_next("a/2.txt")?;
        assert_eq!(repo.length()?, 5);
        assert_eq!(repo.total_length()?, 8);
        Ok(())
    }

    #[test]
    fn plain_key_lists_nothing() -> RepoResult<()> {
        let dir = temp_root();
        seed(dir.path(), "a/1.txt", b"one");
        let root = dir.path().to_string_lossy().into_owned();
        let mut repo = LocalFileRepo::new(Location::local(&root, "a/1.txt"), "t", "d");
        assert!(repo.list_matching()?.is_empty());
        assert_eq!(repo.total_length()?, 3);
        Ok(())
    }

    #[test]
    fn select_next_invalidates_cached_metadata() -> RepoResult<()> {
        let dir = temp_root();
        seed(dir.path(), "x.bin", b"12");
        seed(dir.path(), "y.bin", b"12345");
        let root = dir.path().to_string_lossy().into_owned();
        let mut repo = LocalFileRepo::new(Location::local(&root, "x.bin"), "t", "d");
        assert_eq!(repo.length()?, 2);
        repo.select_next("y.bin")?;
        assert_eq!(repo.length()?, 5);
        Ok(())
    }

    #[test]
    fn missing_file_reports_not_found() {
        let dir = temp_root();
        let root = dir.path().to_string_lossy().into_owned();
        let mut repo = LocalFileRepo::new(Location::local(&root, "nope"), "t", "d");
        assert!(matches!(repo.length(), Err(RepoError::NotFound { .. })));
        assert!(!repo.exists().expect("exists"));
    }
}
