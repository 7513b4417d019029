use std::io::{self, Seek, SeekFrom};

use reqwest::blocking::Body;

use super::{S3Client, UploadStrategy};
use crate::error::{RepoError, RepoResult};
use crate::repo::ObjectStream;

/// One `PUT` per object. Bodies of unknown length are spooled to a temporary file first
/// because S3 rejects chunked uploads without a declared length.
#[derive(Debug, Clone, Copy, Default)]
pub struct SinglePut;

impl UploadStrategy for SinglePut {
    fn upload(
        &self,
        client: &S3Client,
        bucket: &str,
        key: &str,
        input: ObjectStream,
        length: Option<u64>,
        headers: &[(&str, String)],
    ) -> RepoResult<()> {
        let body = match length {
            Some(length) => Body::sized(input, length),
            None => spool(input, key)?,
        };
        client.put(bucket, key, body, headers)
    }
}

fn spool(mut input: ObjectStream, key: &str) -> RepoResult<Body> {
    let mut file = tempfile::tempfile().map_err(|source| RepoError::io("spool_create", key, source))?;
    let length =
        io::copy(&mut input, &mut file).map_err(|source| RepoError::io("spool_write", key, source))?;
    drop(input);
    file.seek(SeekFrom::Start(0))
        .map_err(|source| RepoError::io("spool_rewind", key, source))?;
    Ok(Body::sized(file, length))
}
