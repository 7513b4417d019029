//! S3-compatible object storage.
//!
//! # Design
//! - Requests are path-style (`{endpoint}/{bucket}/{key}`) and signed with SigV4.
//! - Both S3 kinds share [`S3Repo`]; they differ only in their [`UploadStrategy`].
//! - One `HEAD` fills every cached metadata field for the current key.

mod client;
mod large;
mod sign;
mod standard;

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::debug;

pub use client::S3Client;
pub(crate) use client::ObjectHead;
pub use large::{MIN_PART_BYTES, MultipartUpload};
pub use standard::SinglePut;

use crate::artifact::{FileRef, guess_content_type};
use crate::error::{RepoError, RepoResult};
use crate::location::Location;
use crate::pool::ClientPool;
use crate::repo::{Listing, MetaCache, ObjectStream, Repo};
use crate::wildcard::KeyMatcher;

/// Single-request S3 backend (`S3Standard`).
pub type S3StandardRepo = S3Repo<SinglePut>;
/// Multipart S3 backend (`S3`).
pub type S3LargeRepo = S3Repo<MultipartUpload>;

/// How object bodies reach the store.
pub trait UploadStrategy: Send + Sync + fmt::Debug {
    /// Upload `input` to `bucket/key`. `headers` carry content type and user metadata and
    /// must be sent with the request that creates the object.
    ///
    /// # Errors
    ///
    /// Fails on transport or provider errors.
    fn upload(
        &self,
        client: &S3Client,
        bucket: &str,
        key: &str,
        input: ObjectStream,
        length: Option<u64>,
        headers: &[(&str, String)],
    ) -> RepoResult<()>;
}

/// One object in an S3-compatible bucket.
#[derive(Debug)]
pub struct S3Repo<U> {
    client: Arc<S3Client>,
    uploader: U,
    location: Location,
    tag: String,
    description: String,
    cache: MetaCache,
    desired_mtime: Option<DateTime<Utc>>,
    listing: Listing,
}

impl S3StandardRepo {
    /// Standard backend for `location`, using a pooled client.
    ///
    /// # Errors
    ///
    /// Fails when the location has no endpoint or the client cannot be built.
    pub fn standard(
        pool: &ClientPool,
        location: Location,
        tag: impl Into<String>,
        description: impl Into<String>,
    ) -> RepoResult<Self> {
        let client = pool.s3(location.require_endpoint()?, &location.credentials)?;
        Ok(Self::with_client(client, SinglePut, location, tag, description))
    }
}

impl S3LargeRepo {
    /// Multipart backend for `location`, using a pooled client.
    ///
    /// # Errors
    ///
    /// Fails when the location has no endpoint or the client cannot be built.
    pub fn large(
        pool: &ClientPool,
        location: Location,
        tag: impl Into<String>,
        description: impl Into<String>,
    ) -> RepoResult<Self> {
        let client = pool.s3(location.require_endpoint()?, &location.credentials)?;
        let uploader = MultipartUpload::new(pool.settings().s3_part_bytes);
        Ok(Self::with_client(client, uploader, location, tag, description))
    }
}

impl<U: UploadStrategy> S3Repo<U> {
    /// Backend over an existing client.
    #[must_use]
    pub fn with_client(
        client: Arc<S3Client>,
        uploader: U,
        location: Location,
        tag: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            client,
            uploader,
            location,
            tag: tag.into(),
            description: description.into(),
            cache: MetaCache::default(),
            desired_mtime: None,
            listing: Listing::default(),
        }
    }

    fn load(&mut self) -> RepoResult<()> {
        if self.cache.exists.is_none() {
            let head = self.client.head(&self.location.root, &self.location.key)?;
            absorb_head(&mut self.cache, head);
        }
        Ok(())
    }

    fn not_found(&self) -> RepoError {
        RepoError::NotFound {
            root: self.location.root.clone(),
            key: self.location.key.clone(),
        }
    }
}

/// Copy one `HEAD` result into the metadata cache.
pub(crate) fn absorb_head(cache: &mut MetaCache, head: Option<ObjectHead>) {
    match head {
        Some(head) => {
            cache.exists = Some(true);
            cache.modified = Some(head.modified());
            cache.length = Some(head.length);
            cache.content_type = Some(head.content_type);
        }
        None => {
            cache.exists = Some(false);
            cache.length = None;
            cache.content_type = None;
            cache.modified = None;
        }
    }
}

/// Headers that carry content type and modification time to the store.
pub(crate) fn upload_headers<'a>(
    content_type_header: &'a str,
    mtime_header: &'a str,
    content_type: Option<String>,
    mtime: Option<DateTime<Utc>>,
) -> Vec<(&'a str, String)> {
    let mut headers = Vec::new();
    if let Some(content_type) = content_type {
        headers.push((content_type_header, content_type));
    }
    if let Some(mtime) = mtime {
        headers.push((mtime_header, mtime.timestamp().to_string()));
    }
    headers
}

impl<U: UploadStrategy> Repo for S3Repo<U> {
    fn location(&self) -> &Location {
        &self.location
    }

    fn open(&mut self) -> RepoResult<ObjectStream> {
        let response = self.client.get(&self.location.root, &self.location.key)?;
        self.cache.content_type = Some(
            response
                .headers()
                .get(reqwest::header::CONTENT_TYPE)
                .and_then(|value| value.to_str().ok())
                .map(str::to_string),
        );
        Ok(Box::new(response))
    }

    fn put(
        &mut self,
        input: ObjectStream,
        length: Option<u64>,
        content_type: Option<&str>,
    ) -> RepoResult<FileRef> {
        let content_type = content_type
            .map(str::to_string)
            .or_else(|| guess_content_type(&self.location.key));
        let headers = upload_headers(
            "content-type",
            client::MTIME_HEADER,
            content_type.clone(),
            self.desired_mtime,
        );
        self.uploader.upload(
            &self.client,
            &self.location.root,
            &self.location.key,
            input,
            length,
            &headers,
        )?;
        debug!(
            bucket = %self.location.root,
            key = %self.location.key,
            strategy = ?self.uploader,
            "stored s3 object"
        );

        self.cache.clear();
        self.load()?;
        if self.cache.exists != Some(true) {
            return Err(self.not_found());
        }
        Ok(FileRef {
            tag: self.tag.clone(),
            description: self.description.clone(),
            source: Some(self.client.endpoint().clone()),
            root: self.location.root.clone(),
            key: self.location.key.clone(),
            kind: self.location.kind,
            length: self.cache.length.unwrap_or_default(),
            modified: self.desired_mtime.or(self.cache.modified.flatten()),
            content_type: self.cache.content_type.clone().flatten().or(content_type),
        })
    }

    fn length(&mut self) -> RepoResult<u64> {
        self.load()?;
        self.cache.length.ok_or_else(|| self.not_found())
    }

    fn content_type(&mut self) -> RepoResult<Option<String>> {
        if let Some(content_type) = &self.cache.content_type {
            return Ok(content_type.clone());
        }
        self.load()?;
        Ok(self.cache.content_type.clone().flatten())
    }

    fn exists(&mut self) -> RepoResult<bool> {
        self.load()?;
        Ok(self.cache.exists == Some(true))
    }

    fn modification_time(&mut self) -> RepoResult<Option<DateTime<Utc>>> {
        if let Some(desired) = self.desired_mtime {
            return Ok(Some(desired));
        }
        self.load()?;
        if self.cache.exists != Some(true) {
            return Err(self.not_found());
        }
        Ok(self.cache.modified.flatten())
    }

    fn set_modification_time(&mut self, modified: DateTime<Utc>) {
        self.desired_mtime = Some(modified);
    }

    fn list_matching(&mut self) -> RepoResult<Vec<String>> {
        let Some(base) = self.listing.begin(&self.location.key) else {
            return Ok(Vec::new());
        };
        let matcher = KeyMatcher::new(&self.location.key)?;
        let matches = self
            .client
            .list(&self.location.root, &base)?
            .into_iter()
            .filter(|(key, _)| !key.ends_with('/') && matcher.is_match(key))
            .collect();
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
