use std::io::{Cursor, Read};

use anyhow::Result;
use chrono::DateTime;
use ferry_repo::s3::MIN_PART_BYTES;
use ferry_repo::{
    ClientPool, Credentials, Location, PoolSettings, Repo, RepoError, RepoKind, S3LargeRepo,
    S3StandardRepo,
};
use httpmock::Method::HEAD;
use httpmock::prelude::*;
use url::Url;

type TestResult<T> = Result<T>;

fn location(server: &MockServer, kind: RepoKind, key: &str) -> TestResult<Location> {
    Ok(Location {
        kind,
        endpoint: Some(Url::parse(&server.base_url())?),
        credentials: Credentials::new("AKID", "secret"),
        root: "bucket".to_string(),
        key: key.to_string(),
    })
}

fn pool() -> ClientPool {
    ClientPool::new(PoolSettings {
        s3_part_bytes: MIN_PART_BYTES,
        ..PoolSettings::default()
    })
}

#[test]
fn head_and_get_are_signed_and_cached() -> TestResult<()> {
    let server = MockServer::start();
    let head = server.mock(|when, then| {
        when.method(HEAD)
            .path("/bucket/dir/a.txt")
            .header_exists("authorization")
            .header("x-amz-content-sha256", "UNSIGNED-PAYLOAD");
        then.status(200)
            .header("content-length", "5")
            .header("content-type", "text/plain")
            .header("x-amz-meta-mtime", "1600000000")
            .body("hello");
    });
    let get = server.mock(|when, then| {
        when.method(GET).path("/bucket/dir/a.txt");
        then.status(200)
            .header("content-type", "text/plain")
            .body("hello");
    });

    let pool = pool();
    let mut repo = S3StandardRepo::standard(
        &pool,
        location(&server, RepoKind::S3Standard, "dir/a.txt")?,
        "t",
        "d",
    )?;
    assert!(repo.exists()?);
    assert_eq!(repo.length()?, 5);
    assert_eq!(
        repo.modification_time()?,
        DateTime::from_timestamp(1_600_000_000, 0)
    );
    head.assert_hits(1);

    let mut body = String::new();
    repo.open()?.read_to_string(&mut body)?;
    assert_eq!(body, "hello");
    assert_eq!(repo.content_type()?.as_deref(), Some("text/plain"));
    get.assert();
    Ok(())
}

#[test]
fn missing_object_reports_absent() -> TestResult<()> {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(HEAD).path("/bucket/missing");
        then.status(404);
    });
    let pool = pool();
    let mut repo =
        S3StandardRepo::standard(&pool, location(&server, RepoKind::S3Standard, "missing")?, "t", "d")?;
    assert!(!repo.exists()?);
    assert!(matches!(repo.length(), Err(RepoError::NotFound { .. })));
    Ok(())
}

#[test]
fn standard_put_sends_metadata_and_describes_object() -> TestResult<()> {
    let server = MockServer::start();
    let put = server.mock(|when, then| {
        when.method(PUT)
            .path("/bucket/out/b.txt")
            .header("content-type", "text/plain")
            .header("x-amz-meta-mtime", "1600000000")
            .body("hello");
        then.status(200);
    });
    server.mock(|when, then| {
        when.method(HEAD).path("/bucket/out/b.txt");
        then.status(200)
            .header("content-length", "5")
            .header("content-type", "text/plain")
            .header("x-amz-meta-mtime", "1600000000")
            .body("hello");
    });

    let pool = pool();
    let mut repo =
        S3StandardRepo::standard(&pool, location(&server, RepoKind::S3Standard, "out/b.txt")?, "t", "d")?;
    let mtime = DateTime::from_timestamp(1_600_000_000, 0).ok_or_else(|| anyhow::anyhow!("ts"))?;
    repo.set_modification_time(mtime);
    let file = repo.put(Box::new(Cursor::new(b"hello".to_vec())), Some(5), None)?;
    put.assert();
    assert_eq!(file.length, 5);
    assert_eq!(file.kind, RepoKind::S3Standard);
    assert_eq!(file.root, "bucket");
    assert_eq!(file.modified, Some(mtime));
    assert_eq!(file.content_type.as_deref(), Some("text/plain"));
    Ok(())
}

#[test]
fn wildcard_listing_follows_continuation() -> TestResult<()> {
    let server = MockServer::start();
    let first = server.mock(|when, then| {
        when.method(GET)
            .path("/bucket")
            .query_param("list-type", "2")
            .query_param("prefix", "a/")
            .query_param_missing("continuation-token");
        then.status(200).body(
            "<ListBucketResult><IsTruncated>true</IsTruncated>\
             <NextContinuationToken>next</NextContinuationToken>\
             <Contents><Key>a/1.txt</Key><Size>3</Size></Contents>\
             <Contents><Key>a/sub/x.bin</Key><Size>1</Size></Contents>\
             </ListBucketResult>",
        );
    });
    let second = server.mock(|when, then| {
        when.method(GET)
            .path("/bucket")
            .query_param("continuation-token", "next");
        then.status(200).body(
            "<ListBucketResult><IsTruncated>false</IsTruncated>\
             <Contents><Key>a/2.txt</Key><Size>5</Size></Contents>\
             </ListBucketResult>",
        );
    });

    let pool = pool();
    let mut repo =
        S3StandardRepo::standard(&pool, location(&server, RepoKind::S3Standard, "a/*.txt")?, "t", "d")?;
    assert_eq!(repo.list_matching()?, vec!["a/1.txt", "a/2.txt"]);
    assert_eq!(repo.total_length()?, 8);
    first.assert();
    second.assert();
    Ok(())
}

#[test]
fn large_upload_splits_into_parts() -> TestResult<()> {
    let server = MockServer::start();
    let create = server.mock(|when, then| {
        when.method(POST)
            .path("/bucket/big.bin")
            .query_param_exists("uploads");
        then.status(200).body(
            "<InitiateMultipartUploadResult><Bucket>bucket</Bucket><Key>big.bin</Key>\
             <UploadId>u-1</UploadId></InitiateMultipartUploadResult>",
        );
    });
    let part_one = server.mock(|when, then| {
        when.method(PUT)
            .path("/bucket/big.bin")
            .query_param("partNumber", "1")
            .query_param("uploadId", "u-1");
        then.status(200).header("etag", "\"e1\"");
    });
    let part_two = server.mock(|when, then| {
        when.method(PUT)
            .path("/bucket/big.bin")
            .query_param("partNumber", "2")
            .query_param("uploadId", "u-1")
            .body("tail");
        then.status(200).header("etag", "\"e2\"");
    });
    let complete = server.mock(|when, then| {
        when.method(POST)
            .path("/bucket/big.bin")
            .query_param("uploadId", "u-1")
            .body_includes("<PartNumber>2</PartNumber>");
        then.status(200)
            .body("<CompleteMultipartUploadResult><Key>big.bin</Key></CompleteMultipartUploadResult>");
    });
    let total = MIN_PART_BYTES + 4;
    let length = total.to_string();
    server.mock(move |when, then| {
        when.method(HEAD).path("/bucket/big.bin");
        then.status(200)
            .header("content-length", length.as_str())
            .body(vec![b'x'; total]);
    });

    let mut body = vec![b'x'; MIN_PART_BYTES];
    body.extend_from_slice(b"tail");
    let pool = pool();
    let mut repo =
        S3LargeRepo::large(&pool, location(&server, RepoKind::S3, "big.bin")?, "t", "d")?;
    let file = repo.put(Box::new(Cursor::new(body)), None, None)?;
    assert_eq!(file.length, total as u64);
    create.assert();
    part_one.assert();
    part_two.assert();
    complete.assert();
    Ok(())
}

#[test]
fn large_upload_of_small_object_uses_single_put() -> TestResult<()> {
    let server = MockServer::start();
    let create = server.mock(|when, then| {
        when.method(POST).path("/bucket/small.txt");
        then.status(500);
    });
    let put = server.mock(|when, then| {
        when.method(PUT).path("/bucket/small.txt").body("tiny");
        then.status(200);
    });
    server.mock(|when, then| {
        when.method(HEAD).path("/bucket/small.txt");
        then.status(200).header("content-length", "4").body("tiny");
    });

    let pool = pool();
    let mut repo =
        S3LargeRepo::large(&pool, location(&server, RepoKind::S3, "small.txt")?, "t", "d")?;
    let file = repo.put(Box::new(Cursor::new(b"tiny".to_vec())), None, None)?;
    assert_eq!(file.length, 4);
    put.assert();
    create.assert_hits(0);
    Ok(())
}

#[test]
fn rejected_completion_aborts_upload() -> TestResult<()> {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(POST)
            .path("/bucket/big.bin")
            .query_param_exists("uploads");
        then.status(200)
            .body("<InitiateMultipartUploadResult><UploadId>u-2</UploadId></InitiateMultipartUploadResult>");
    });
    server.mock(|when, then| {
        when.method(PUT)
            .path("/bucket/big.bin")
            .query_param("uploadId", "u-2");
        then.status(200).header("etag", "\"e\"");
    });
    server.mock(|when, then| {
        when.method(POST)
            .path("/bucket/big.bin")
            .query_param("uploadId", "u-2");
        then.status(200)
            .body("<Error><Code>InternalError</Code><Message>boom</Message></Error>");
    });
    let abort = server.mock(|when, then| {
        when.method(DELETE)
            .path("/bucket/big.bin")
            .query_param("uploadId", "u-2");
        then.status(204);
    });

    let pool = pool();
    let mut repo =
        S3LargeRepo::large(&pool, location(&server, RepoKind::S3, "big.bin")?, "t", "d")?;
    let body = vec![b'y'; MIN_PART_BYTES + 1];
    let err = repo
        .put(Box::new(Cursor::new(body)), None, None)
        .err()
        .ok_or_else(|| anyhow::anyhow!("upload should fail"))?;
    assert!(matches!(err, RepoError::Rejected { .. }));
    abort.assert();
    Ok(())
}
