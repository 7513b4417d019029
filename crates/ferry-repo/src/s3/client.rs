//! Path-style S3 REST client over blocking `reqwest`.

use std::fmt;

use chrono::{DateTime, Utc};
use reqwest::blocking::{Body, Client, RequestBuilder, Response};
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE, ETAG, HeaderMap, LAST_MODIFIED};
use reqwest::{Method, StatusCode};
use serde::Deserialize;
use tracing::{debug, warn};
use url::Url;

use super::sign::{self, CanonicalRequest, UNSIGNED_PAYLOAD};
use crate::error::{RepoError, RepoResult};
use crate::location::Credentials;

/// User metadata header carrying the modification time in epoch seconds.
pub(crate) const MTIME_HEADER: &str = "x-amz-meta-mtime";

/// Metadata returned by `HEAD`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct ObjectHead {
    pub(crate) length: u64,
    pub(crate) content_type: Option<String>,
    pub(crate) last_modified: Option<DateTime<Utc>>,
    pub(crate) meta_mtime: Option<DateTime<Utc>>,
}

impl ObjectHead {
    pub(crate) fn from_headers(headers: &HeaderMap, meta_header: &str) -> Self {
        let text = |name: &str| {
            headers
                .get(name)
                .and_then(|value| value.to_str().ok())
                .map(str::to_string)
        };
        Self {
            length: text(CONTENT_LENGTH.as_str())
                .and_then(|value| value.parse().ok())
                .unwrap_or_default(),
            content_type: text(CONTENT_TYPE.as_str()),
            last_modified: text(LAST_MODIFIED.as_str())
                .and_then(|value| DateTime::parse_from_rfc2822(&value).ok())
                .map(|value| value.with_timezone(&Utc)),
            meta_mtime: text(meta_header).and_then(|value| parse_epoch(&value)),
        }
    }

    /// Metadata time when present, otherwise the provider's `Last-Modified`.
    pub(crate) fn modified(&self) -> Option<DateTime<Utc>> {
        self.meta_mtime.or(self.last_modified)
    }
}

fn parse_epoch(value: &str) -> Option<DateTime<Utc>> {
    value
        .trim()
        .parse::<i64>()
        .ok()
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ListBucketResult {
    #[serde(default)]
    contents: Vec<ListedObject>,
    #[serde(default)]
    is_truncated: bool,
    #[serde(default)]
    next_continuation_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ListedObject {
    key: String,
    #[serde(default)]
    size: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InitiateMultipartUploadResult {
    upload_id: String,
}

/// Signed requests against one endpoint with one credential pair.
pub struct S3Client {
    http: Client,
    endpoint: Url,
    credentials: Credentials,
    region: String,
}

impl fmt::Debug for S3Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("S3Client")
            .field("endpoint", &self.endpoint.as_str())
            .field("credentials", &self.credentials)
            .field("region", &self.region)
            .finish_non_exhaustive()
    }
}

impl S3Client {
    pub(crate) const fn new(
        http: Client,
        endpoint: Url,
        credentials: Credentials,
        region: String,
    ) -> Self {
        Self {
            http,
            endpoint,
            credentials,
            region,
        }
    }

    /// Endpoint this client signs for.
    #[must_use]
    pub const fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    fn canonical_path(&self, bucket: &str, key: &str) -> String {
        let prefix = self.endpoint.path().trim_end_matches('/');
        let mut path = format!("{prefix}/{}", sign::uri_encode(bucket, false));
        if !key.is_empty() {
            path.push('/');
            path.push_str(&sign::uri_encode(key, true));
        }
        path
    }

    fn host(&self) -> String {
        let host = self.endpoint.host_str().unwrap_or_default();
        match self.endpoint.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        }
    }

    /// Build a signed request; `headers` are lower-case names and are signed too.
    fn request(
        &self,
        method: &Method,
        bucket: &str,
        key: &str,
        params: &[(&str, &str)],
        headers: &[(&str, String)],
    ) -> (String, RequestBuilder) {
        let path = self.canonical_path(bucket, key);
        let query = sign::canonical_query(params);
        let origin = self.endpoint.origin().ascii_serialization();
        let url = if query.is_empty() {
            format!("{origin}{path}")
        } else {
            format!("{origin}{path}?{query}")
        };

        let now = Utc::now();
        let amz_date = sign::amz_date(now);
        let mut signed: Vec<(String, String)> = vec![
            ("host".to_string(), self.host()),
            ("x-amz-content-sha256".to_string(), UNSIGNED_PAYLOAD.to_string()),
            ("x-amz-date".to_string(), amz_date.clone()),
        ];
        signed.extend(
            headers
                .iter()
                .map(|(name, value)| ((*name).to_string(), value.clone())),
        );
        let canonical = CanonicalRequest {
            method: method.as_str(),
            path: &path,
            query: &query,
            headers: signed,
            payload_hash: UNSIGNED_PAYLOAD,
        };
        let authorization = sign::authorization(&canonical, &self.credentials, &self.region, now);

        let mut builder = self
            .http
            .request(method.clone(), url.as_str())
            .header("x-amz-content-sha256", UNSIGNED_PAYLOAD)
            .header("x-amz-date", amz_date)
            .header("authorization", authorization);
        for (name, value) in headers {
            builder = builder.header(*name, value);
        }
        (url, builder)
    }

    fn send(
        operation: &'static str,
        url: &str,
        builder: RequestBuilder,
    ) -> RepoResult<Response> {
        builder
            .send()
            .map_err(|source| RepoError::http(operation, url, source))
    }

    fn expect_success(
        operation: &'static str,
        url: &str,
        response: Response,
    ) -> RepoResult<Response> {
        if response.status().is_success() {
            Ok(response)
        } else {
            Err(RepoError::status(operation, url, response.status().as_u16()))
        }
    }

    /// `HEAD` the object; `None` when it does not exist.
    pub(crate) fn head(&self, bucket: &str, key: &str) -> RepoResult<Option<ObjectHead>> {
        let (url, builder) = self.request(&Method::HEAD, bucket, key, &[], &[]);
        let response = Self::send("s3.head", &url, builder)?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = Self::expect_success("s3.head", &url, response)?;
        Ok(Some(ObjectHead::from_headers(
            response.headers(),
            MTIME_HEADER,
        )))
    }

    /// Streaming `GET` of the object body.
    pub(crate) fn get(&self, bucket: &str, key: &str) -> RepoResult<Response> {
        let (url, builder) = self.request(&Method::GET, bucket, key, &[], &[]);
        let response = Self::send("s3.get", &url, builder)?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(RepoError::NotFound {
                root: bucket.to_string(),
                key: key.to_string(),
            });
        }
        Self::expect_success("s3.get", &url, response)
    }

    /// Single-request upload.
    pub(crate) fn put(
        &self,
        bucket: &str,
        key: &str,
        body: Body,
        headers: &[(&str, String)],
    ) -> RepoResult<()> {
        let (url, builder) = self.request(&Method::PUT, bucket, key, &[], headers);
        let response = Self::send("s3.put", &url, builder.body(body))?;
        Self::expect_success("s3.put", &url, response)?;
        debug!(bucket, key, "uploaded object");
        Ok(())
    }

    /// Every key under `prefix` with its size, following continuation tokens.
    pub(crate) fn list(&self, bucket: &str, prefix: &str) -> RepoResult<Vec<(String, u64)>> {
        let mut objects = Vec::new();
        let mut token: Option<String> = None;
        loop {
            let mut params = vec![("list-type", "2"), ("prefix", prefix)];
            if let Some(token) = token.as_deref() {
                params.push(("continuation-token", token));
            }
            let (url, builder) = self.request(&Method::GET, bucket, "", &params, &[]);
            let response = Self::send("s3.list", &url, builder)?;
            let body = Self::expect_success("s3.list", &url, response)?
                .text()
                .map_err(|source| RepoError::http("s3.list_body", &url, source))?;
            let page: ListBucketResult = quick_xml::de::from_str(&body).map_err(|source| {
                RepoError::Xml {
                    operation: "s3.list",
                    source,
                }
            })?;
            objects.extend(page.contents.into_iter().map(|item| (item.key, item.size)));
            match page.next_continuation_token {
                Some(next) if page.is_truncated => token = Some(next),
                _ => break,
            }
        }
        Ok(objects)
    }

    /// Start a multipart upload and return its id.
    pub(crate) fn create_multipart(
        &self,
        bucket: &str,
        key: &str,
        headers: &[(&str, String)],
    ) -> RepoResult<String> {
        let (url, builder) = self.request(&Method::POST, bucket, key, &[("uploads", "")], headers);
        let response = Self::send("s3.create_multipart", &url, builder)?;
        let body = Self::expect_success("s3.create_multipart", &url, response)?
            .text()
            .map_err(|source| RepoError::http("s3.create_multipart_body", &url, source))?;
        let result: InitiateMultipartUploadResult =
            quick_xml::de::from_str(&body).map_err(|source| RepoError::Xml {
                operation: "s3.create_multipart",
                source,
            })?;
        Ok(result.upload_id)
    }

    /// Upload one part and return its `ETag`.
    pub(crate) fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: u32,
        bytes: Vec<u8>,
    ) -> RepoResult<String> {
        let number = part_number.to_string();
        let params = [("partNumber", number.as_str()), ("uploadId", upload_id)];
        let (url, builder) = self.request(&Method::PUT, bucket, key, &params, &[]);
        let response = Self::send("s3.upload_part", &url, builder.body(bytes))?;
        let response = Self::expect_success("s3.upload_part", &url, response)?;
        response
            .headers()
            .get(ETAG)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
            .ok_or(RepoError::Header {
                operation: "s3.upload_part",
                header: "etag",
            })
    }

    /// Complete a multipart upload from its part list.
    pub(crate) fn complete_multipart(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: &[(u32, String)],
    ) -> RepoResult<()> {
        let body = completion_body(parts);
        let (url, builder) =
            self.request(&Method::POST, bucket, key, &[("uploadId", upload_id)], &[]);
        let response = Self::send("s3.complete_multipart", &url, builder.body(body))?;
        let text = Self::expect_success("s3.complete_multipart", &url, response)?
            .text()
            .map_err(|source| RepoError::http("s3.complete_multipart_body", &url, source))?;
        // Completion can fail after the 200 status line has been sent.
        if text.contains("<Error>") {
            return Err(RepoError::Rejected {
                operation: "s3.complete_multipart",
                detail: text.chars().take(512).collect(),
            });
        }
        Ok(())
    }

    /// Abort a multipart upload; failures are logged.
    pub(crate) fn abort_multipart(&self, bucket: &str, key: &str, upload_id: &str) {
        let (url, builder) =
            self.request(&Method::DELETE, bucket, key, &[("uploadId", upload_id)], &[]);
        match Self::send("s3.abort_multipart", &url, builder) {
            Ok(response) if response.status().is_success() => {
                debug!(bucket, key, upload_id, "aborted multipart upload");
            }
            Ok(response) => {
                warn!(
                    bucket,
                    key,
                    upload_id,
                    status = response.status().as_u16(),
                    "multipart abort rejected"
                );
            }
            Err(err) => warn!(error = %err, bucket, key, upload_id, "multipart abort failed"),
        }
    }
}

fn completion_body(parts: &[(u32, String)]) -> String {
    let mut body = String::from("<CompleteMultipartUpload>");
    for (number, etag) in parts {
        body.push_str(&format!(
            "<Part><PartNumber>{number}</PartNumber><ETag>{}</ETag></Part>",
            quick_xml::escape::escape(etag.as_str())
        ));
    }
    body.push_str("</CompleteMultipartUpload>");
    body
}
