use std::io::Read;

use reqwest::blocking::Body;
use tracing::{debug, warn};

use super::{S3Client, UploadStrategy};
use crate::error::{RepoError, RepoResult};
use crate::repo::ObjectStream;

/// Smallest part S3 accepts for every part except the last.
pub const MIN_PART_BYTES: usize = 5 * 1024 * 1024;

/// Managed multipart upload. Objects that fit in one part are sent with a single `PUT`.
/// The call returns only after the upload is completed or aborted.
#[derive(Debug, Clone, Copy)]
pub struct MultipartUpload {
    part_bytes: usize,
}

impl MultipartUpload {
    /// Strategy using parts of `part_bytes`, raised to the provider minimum.
    #[must_use]
    pub fn new(part_bytes: usize) -> Self {
        Self {
            part_bytes: part_bytes.max(MIN_PART_BYTES),
        }
    }

    /// Configured part size.
    #[must_use]
    pub const fn part_bytes(&self) -> usize {
        self.part_bytes
    }

    fn next_part(&self, input: &mut ObjectStream, key: &str) -> RepoResult<Vec<u8>> {
        let mut part = Vec::with_capacity(self.part_bytes);
        input
            .by_ref()
            .take(self.part_bytes as u64)
            .read_to_end(&mut part)
            .map_err(|source| RepoError::io("s3.read_part", key, source))?;
        Ok(part)
    }

    fn send_parts(
        &self,
        client: &S3Client,
        bucket: &str,
        key: &str,
        upload_id: &str,
        first: Vec<u8>,
        input: &mut ObjectStream,
    ) -> RepoResult<Vec<(u32, String)>> {
        let mut parts = Vec::new();
        let mut part = first;
        let mut number = 1_u32;
        while !part.is_empty() {
            let etag = client.upload_part(bucket, key, upload_id, number, part)?;
            debug!(bucket, key, part = number, "uploaded part");
            parts.push((number, etag));
            number += 1;
            part = self.next_part(input, key)?;
        }
        Ok(parts)
    }
}

impl Default for MultipartUpload {
    fn default() -> Self {
        Self::new(8 * 1024 * 1024)
    }
}

impl UploadStrategy for MultipartUpload {
    fn upload(
        &self,
        client: &S3Client,
        bucket: &str,
        key: &str,
        mut input: ObjectStream,
        _length: Option<u64>,
        headers: &[(&str, String)],
    ) -> RepoResult<()> {
        let first = self.next_part(&mut input, key)?;
        if first.len() < self.part_bytes {
            drop(input);
            return client.put(bucket, key, Body::from(first), headers);
        }

        let upload_id = client.create_multipart(bucket, key, headers)?;
        let sent = self.send_parts(client, bucket, key, &upload_id, first, &mut input);
        drop(input);
        let result = sent.and_then(|parts| {
            let count = parts.len();
            client.complete_multipart(bucket, key, &upload_id, &parts)?;
            debug!(bucket, key, parts = count, "completed multipart upload");
            Ok(())
        });
        if let Err(err) = &result {
            warn!(error = %err, bucket, key, upload_id = %upload_id, "multipart upload failed");
            client.abort_multipart(bucket, key, &upload_id);
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn part_size_is_raised_to_minimum() {
        assert_eq!(MultipartUpload::new(1024).part_bytes(), MIN_PART_BYTES);
        assert_eq!(MultipartUpload::default().part_bytes(), 8 * 1024 * 1024);
    }
}
