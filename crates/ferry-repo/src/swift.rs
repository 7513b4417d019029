//! OpenStack Swift object storage (v1 auth).

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use reqwest::blocking::{Body, Client, RequestBuilder, Response};
use serde::Deserialize;
use tracing::{debug, warn};
use url::Url;

use crate::artifact::{FileRef, guess_content_type};
use crate::error::{RepoError, RepoResult};
use crate::location::{Credentials, Location};
use crate::pool::ClientPool;
use crate::repo::{Listing, MetaCache, ObjectStream, Repo};
use crate::s3::{ObjectHead, absorb_head, upload_headers};
use crate::wildcard::KeyMatcher;

const AUTH_TOKEN: &str = "x-auth-token";
const STORAGE_URL: &str = "x-storage-url";
const MTIME_HEADER: &str = "x-object-meta-mtime";
const LIST_PAGE: &str = "10000";

/// Authenticated Swift account: storage URL plus token.
pub struct SwiftSession {
    http: Client,
    storage_url: Url,
    token: String,
}

impl fmt::Debug for SwiftSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SwiftSession")
            .field("storage_url", &self.storage_url.as_str())
            .field("token", &"<redacted>")
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Deserialize)]
struct ListedObject {
    name: String,
    #[serde(default)]
    bytes: u64,
}

impl SwiftSession {
    /// Authenticate against a v1 auth endpoint.
    ///
    /// # Errors
    ///
    /// Fails when the service rejects the credentials or omits the session headers.
    pub fn authenticate(http: Client, endpoint: &Url, credentials: &Credentials) -> RepoResult<Self> {
        let response = http
            .get(endpoint.as_str())
            .header("x-auth-user", &credentials.account)
            .header("x-auth-key", &credentials.secret)
            .send()
            .map_err(|source| RepoError::http("swift.auth", endpoint, source))?;
        if !response.status().is_success() {
            return Err(RepoError::status(
                "swift.auth",
                endpoint,
                response.status().as_u16(),
            ));
        }
        let header = |name: &'static str| {
            response
                .headers()
                .get(name)
                .and_then(|value| value.to_str().ok())
                .map(str::to_string)
                .ok_or(RepoError::Header {
                    operation: "swift.auth",
                    header: name,
                })
        };
        let storage_url = Url::parse(&header(STORAGE_URL)?).map_err(|_| RepoError::Header {
            operation: "swift.auth",
            header: STORAGE_URL,
        })?;
        let token = header(AUTH_TOKEN)?;
        debug!(storage_url = %storage_url, "authenticated swift session");
        Ok(Self {
            http,
            storage_url,
            token,
        })
    }

    fn url(&self, container: &str, key: &str) -> Url {
        let mut url = self.storage_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().push(container);
            if !key.is_empty() {
                segments.extend(key.split('/'));
            }
        }
        url
    }

    fn request(&self, method: reqwest::Method, url: &Url) -> RequestBuilder {
        self.http
            .request(method, url.as_str())
            .header(AUTH_TOKEN, &self.token)
    }

    fn send(operation: &'static str, url: &Url, builder: RequestBuilder) -> RepoResult<Response> {
        let response = builder
            .send()
            .map_err(|source| RepoError::http(operation, url, source))?;
        if response.status().is_success() {
            Ok(response)
        } else {
            Err(RepoError::status(operation, url, response.status().as_u16()))
        }
    }

    fn head(&self, container: &str, key: &str) -> RepoResult<Option<ObjectHead>> {
        let url = self.url(container, key);
        let response = self
            .request(reqwest::Method::HEAD, &url)
            .send()
            .map_err(|source| RepoError::http("swift.head", &url, source))?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => Ok(Some(ObjectHead::from_headers(
                response.headers(),
                MTIME_HEADER,
            ))),
            status => Err(RepoError::status("swift.head", &url, status.as_u16())),
        }
    }

    fn get(&self, container: &str, key: &str) -> RepoResult<Response> {
        let url = self.url(container, key);
        let response = self
            .request(reqwest::Method::GET, &url)
            .send()
            .map_err(|source| RepoError::http("swift.get", &url, source))?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(RepoError::NotFound {
                root: container.to_string(),
                key: key.to_string(),
            });
        }
        Self::send_checked("swift.get", &url, response)
    }

    fn send_checked(operation: &'static str, url: &Url, response: Response) -> RepoResult<Response> {
        if response.status().is_success() {
            Ok(response)
        } else {
            Err(RepoError::status(operation, url, response.status().as_u16()))
        }
    }

    fn put(
        &self,
        container: &str,
        key: &str,
        input: ObjectStream,
        length: Option<u64>,
        headers: &[(&str, String)],
    ) -> RepoResult<()> {
        let url = self.url(container, key);
        let body = match length {
            Some(length) => Body::sized(input, length),
            None => Body::new(input),
        };
        let mut builder = self.request(reqwest::Method::PUT, &url).body(body);
        for (name, value) in headers {
            builder = builder.header(*name, value);
        }
        Self::send("swift.put", &url, builder)?;
        Ok(())
    }

    fn list(&self, container: &str, prefix: &str) -> RepoResult<Vec<(String, u64)>> {
        let url = self.url(container, "");
        let mut objects = Vec::new();
        let mut marker = String::new();
        loop {
            let builder = self.request(reqwest::Method::GET, &url).query(&[
                ("format", "json"),
                ("prefix", prefix),
                ("marker", marker.as_str()),
                ("limit", LIST_PAGE),
            ]);
            let response = builder
                .send()
                .map_err(|source| RepoError::http("swift.list", &url, source))?;
            if response.status() == StatusCode::NO_CONTENT {
                break;
            }
            let body = Self::send_checked("swift.list", &url, response)?
                .text()
                .map_err(|source| RepoError::http("swift.list_body", &url, source))?;
            let page: Vec<ListedObject> =
                serde_json::from_str(&body).map_err(|source| RepoError::Json {
                    operation: "swift.list",
                    source,
                })?;
            let Some(last) = page.last() else {
                break;
            };
            marker.clone_from(&last.name);
            objects.extend(page.into_iter().map(|item| (item.name, item.bytes)));
        }
        Ok(objects)
    }
}

/// One object in a Swift container.
#[derive(Debug)]
pub struct SwiftRepo {
    pool: Arc<ClientPool>,
    session: Arc<SwiftSession>,
    location: Location,
    tag: String,
    description: String,
    cache: MetaCache,
    desired_mtime: Option<DateTime<Utc>>,
    listing: Listing,
}

impl SwiftRepo {
    /// Backend for `location`, authenticating through the pool on first use.
    ///
    /// # Errors
    ///
    /// Fails when the location has no endpoint or authentication fails.
    pub fn new(
        pool: Arc<ClientPool>,
        location: Location,
        tag: impl Into<String>,
        description: impl Into<String>,
    ) -> RepoResult<Self> {
        let session = pool.swift(location.require_endpoint()?, &location.credentials)?;
        Ok(Self {
            pool,
            session,
            location,
            tag: tag.into(),
            description: description.into(),
            cache: MetaCache::default(),
            desired_mtime: None,
            listing: Listing::default(),
        })
    }

    /// Drop the pooled session when the token was rejected so the next attempt
    /// re-authenticates.
    fn observe<T>(&self, result: RepoResult<T>) -> RepoResult<T> {
        if let Err(RepoError::HttpStatus { status: 401, .. }) = &result {
            if let Some(endpoint) = &self.location.endpoint {
                warn!(endpoint = %endpoint, "swift token rejected; evicting session");
                self.pool.evict_swift(endpoint, &self.location.credentials);
            }
        }
        result
    }

    fn load(&mut self) -> RepoResult<()> {
        if self.cache.exists.is_none() {
            let head = self.session.head(&self.location.root, &self.location.key);
            let head = self.observe(head)?;
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

impl Repo for SwiftRepo {
    fn location(&self) -> &Location {
        &self.location
    }

    fn open(&mut self) -> RepoResult<ObjectStream> {
        let response = self.session.get(&self.location.root, &self.location.key);
        let response = self.observe(response)?;
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
            MTIME_HEADER,
            content_type.clone(),
            self.desired_mtime,
        );
        let stored = self.session.put(
            &self.location.root,
            &self.location.key,
            input,
            length,
            &headers,
        );
        self.observe(stored)?;
        debug!(
            container = %self.location.root,
            key = %self.location.key,
            "stored swift object"
        );

        self.cache.clear();
        self.load()?;
        if self.cache.exists != Some(true) {
            return Err(self.not_found());
        }
        Ok(FileRef {
            tag: self.tag.clone(),
            description: self.description.clone(),
            source: self.location.endpoint.clone(),
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
        let listed = self.session.list(&self.location.root, &base);
        let matches = self
            .observe(listed)?
            .into_iter()
            .filter(|(key, _)| matcher.is_match(key))
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
