use std::io::{self, Cursor, Read, Write};
use std::sync::mpsc;
use std::thread;

use anyhow::{Context, Result, anyhow};
use ferry_zip::{CompressionMethod, ZipEntry, ZipError, ZipReader, ZipWriter};

type TestResult<T> = Result<T>;

struct Member {
    name: &'static str,
    body: Vec<u8>,
    method: CompressionMethod,
}

fn members() -> Vec<Member> {
    vec![
        Member {
            name: "readme.txt",
            body: b"plain text body\n".repeat(40),
            method: CompressionMethod::Deflated,
        },
        Member {
            name: "data/raw.bin",
            body: (0..=255u8).cycle().take(5000).collect(),
            method: CompressionMethod::Stored,
        },
        Member {
            name: "empty.txt",
            body: Vec::new(),
            method: CompressionMethod::Deflated,
        },
        Member {
            name: "data/nested/notes.md",
            body: b"# notes\n- one\n- two\n".to_vec(),
            method: CompressionMethod::Deflated,
        },
    ]
}

fn crc_of(data: &[u8]) -> u32 {
    let mut crc = flate2::Crc::new();
    crc.update(data);
    crc.sum()
}

fn write_archive(members: &[Member]) -> TestResult<Vec<u8>> {
    let mut writer = ZipWriter::new(Vec::new());
    for member in members {
        let mut entry = ZipEntry::new(member.name);
        entry.set_method(member.method);
        if member.method == CompressionMethod::Stored {
            entry.set_size(member.body.len() as u64);
            entry.set_crc(crc_of(&member.body));
        }
        writer.put_entry(entry)?;
        writer.write_all(&member.body)?;
    }
    Ok(writer.into_inner()?)
}

#[test]
fn round_trip_preserves_names_sizes_and_crcs() -> TestResult<()> {
    let members = members();
    let bytes = write_archive(&members)?;

    let mut reader = ZipReader::new(Cursor::new(bytes));
    for member in &members {
        let entry = reader.next_entry()?.context("missing entry")?;
        assert_eq!(entry.name(), member.name);
        let mut body = Vec::new();
        reader.read_to_end(&mut body)?;
        assert_eq!(body, member.body);
        let resolved = reader.current_entry().context("entry still open")?;
        assert_eq!(resolved.size(), Some(member.body.len() as u64));
        assert_eq!(resolved.crc(), Some(crc_of(&member.body)));
    }
    assert!(reader.next_entry()?.is_none());
    Ok(())
}

#[test]
fn archives_are_readable_by_independent_implementation() -> TestResult<()> {
    let members = members();
    let bytes = write_archive(&members)?;

    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))?;
    assert_eq!(archive.len(), members.len());
    for member in &members {
        let mut file = archive.by_name(member.name)?;
        assert_eq!(file.size(), member.body.len() as u64);
        assert_eq!(file.crc32(), crc_of(&member.body));
        let mut body = Vec::new();
        file.read_to_end(&mut body)?;
        assert_eq!(body, member.body);
    }
    Ok(())
}

#[test]
fn reads_archives_from_independent_implementation() -> TestResult<()> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let options =
        zip::write::FileOptions::default().compression_method(zip::CompressionMethod::Deflated);
    writer.start_file("first.txt", options)?;
    writer.write_all(b"first body")?;
    writer.add_directory("folder/", options)?;
    writer.start_file("folder/second.txt", options)?;
    writer.write_all(&b"second body ".repeat(100))?;
    let bytes = writer.finish()?.into_inner();

    let mut reader = ZipReader::new(Cursor::new(bytes));
    let mut seen = Vec::new();
    while let Some(entry) = reader.next_entry()? {
        let mut body = Vec::new();
        reader.read_to_end(&mut body)?;
        seen.push((entry.name().to_string(), entry.is_dir(), body.len()));
    }
    assert_eq!(
        seen,
        vec![
            ("first.txt".to_string(), false, 10),
            ("folder/".to_string(), true, 0),
            ("folder/second.txt".to_string(), false, 1200),
        ]
    );
    Ok(())
}

#[test]
fn corrupted_deflate_data_fails_instead_of_succeeding() -> TestResult<()> {
    let body = b"corruptible payload with some repetition repetition repetition".repeat(20);
    let mut writer = ZipWriter::new(Vec::new());
    writer.put_entry(ZipEntry::new("c.txt"))?;
    writer.write_all(&body)?;
    let mut bytes = writer.into_inner()?;

    let data_start = 30 + "c.txt".len();
    let target = data_start + 10;
    bytes[target] ^= 0xff;

    let mut reader = ZipReader::new(Cursor::new(bytes));
    reader.next_entry()?.context("entry")?;
    let mut out = Vec::new();
    let outcome = reader.read_to_end(&mut out);
    assert!(outcome.is_err(), "corruption was not detected");
    Ok(())
}

#[test]
fn corrupted_stored_data_reports_crc_mismatch() -> TestResult<()> {
    let members = vec![Member {
        name: "s.bin",
        body: b"stored bytes to damage".to_vec(),
        method: CompressionMethod::Stored,
    }];
    let mut bytes = write_archive(&members)?;
    let target = 30 + "s.bin".len() + 4;
    bytes[target] ^= 0x01;

    let mut reader = ZipReader::new(Cursor::new(bytes));
    reader.next_entry()?.context("entry")?;
    match reader.close_entry() {
        Err(ZipError::CrcMismatch { name, .. }) => assert_eq!(name, "s.bin"),
        other => return Err(anyhow!("expected crc mismatch, got {other:?}")),
    }
    Ok(())
}

fn streamed_archive(name: &str, body: &[u8]) -> TestResult<Vec<u8>> {
    let mut writer = ZipWriter::new(Vec::new());
    writer.put_entry(ZipEntry::new(name))?;
    writer.write_all(body)?;
    Ok(writer.into_inner()?)
}

/// Offset of the 16-byte data descriptor that precedes the central directory.
fn descriptor_offset(bytes: &[u8]) -> TestResult<usize> {
    let central = bytes
        .windows(4)
        .position(|window| window == [0x50, 0x4b, 0x01, 0x02])
        .context("central directory")?;
    let offset = central - 16;
    assert_eq!(&bytes[offset..offset + 4], &[0x50, 0x4b, 0x07, 0x08]);
    Ok(offset)
}

#[test]
fn deflated_entry_with_wrong_crc_fails_at_end_of_entry() -> TestResult<()> {
    let body = b"inflates cleanly but the recorded checksum is wrong\n".repeat(30);
    let mut bytes = streamed_archive("d.txt", &body)?;
    let descriptor = descriptor_offset(&bytes)?;
    bytes[descriptor + 4] ^= 0x5a;

    let mut reader = ZipReader::new(Cursor::new(bytes));
    reader.next_entry()?.context("entry")?;
    let mut out = vec![0u8; body.len() + 64];
    let mut total = 0;
    let failure = loop {
        match reader.read_entry(&mut out[total..]) {
            Ok(0) => return Err(anyhow!("corrupt checksum was accepted")),
            Ok(read) => total += read,
            Err(err) => break err,
        }
    };
    assert_eq!(total, body.len(), "inflate itself should succeed");
    assert_eq!(&out[..total], body.as_slice());
    match failure {
        ZipError::CrcMismatch { name, actual, .. } => {
            assert_eq!(name, "d.txt");
            assert_eq!(actual, crc_of(&body));
        }
        other => return Err(anyhow!("expected crc mismatch, got {other:?}")),
    }
    Ok(())
}

#[test]
fn deflated_entry_with_wrong_size_fails_at_end_of_entry() -> TestResult<()> {
    let body = b"size recorded in the descriptor is off by one".repeat(12);
    let mut bytes = streamed_archive("s.txt", &body)?;
    let descriptor = descriptor_offset(&bytes)?;
    bytes[descriptor + 12] = bytes[descriptor + 12].wrapping_add(1);

    let mut reader = ZipReader::new(Cursor::new(bytes));
    reader.next_entry()?.context("entry")?;
    match reader.close_entry() {
        Err(ZipError::SizeMismatch {
            name,
            expected,
            actual,
        }) => {
            assert_eq!(name, "s.txt");
            assert_eq!(actual, body.len() as u64);
            assert_ne!(expected, actual);
        }
        other => return Err(anyhow!("expected size mismatch, got {other:?}")),
    }
    Ok(())
}

fn is_crc_mismatch(err: &io::Error) -> bool {
    err.get_ref()
        .and_then(|inner| inner.downcast_ref::<ZipError>())
        .is_some_and(|inner| matches!(inner, ZipError::CrcMismatch { .. }))
}

#[test]
fn integrity_failure_is_reported_on_every_later_access() -> TestResult<()> {
    let members = vec![
        Member {
            name: "bad.bin",
            body: b"stored bytes that will be damaged".to_vec(),
            method: CompressionMethod::Stored,
        },
        Member {
            name: "next.txt",
            body: b"never reached".to_vec(),
            method: CompressionMethod::Stored,
        },
    ];
    let mut bytes = write_archive(&members)?;
    bytes[30 + "bad.bin".len() + 3] ^= 0x10;

    let mut reader = ZipReader::new(Cursor::new(bytes));
    reader.next_entry()?.context("entry")?;
    let mut out = Vec::new();
    let first = reader.read_to_end(&mut out).err().context("first read")?;
    assert!(is_crc_mismatch(&first));
    let second = reader.read_to_end(&mut out).err().context("second read")?;
    assert!(is_crc_mismatch(&second));
    assert!(matches!(
        reader.close_entry(),
        Err(ZipError::CrcMismatch { ref name, .. }) if name == "bad.bin"
    ));
    assert!(matches!(
        reader.next_entry(),
        Err(ZipError::CrcMismatch { ref name, .. }) if name == "bad.bin"
    ));
    assert_eq!(reader.current_entry().map(ZipEntry::name), Some("bad.bin"));
    Ok(())
}

struct ChannelWriter(mpsc::SyncSender<Vec<u8>>);

impl Write for ChannelWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0
            .send(buf.to_vec())
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "reader gone"))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

struct ChannelReader {
    rx: mpsc::Receiver<Vec<u8>>,
    chunk: Vec<u8>,
    pos: usize,
}

impl Read for ChannelReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        while self.pos == self.chunk.len() {
            match self.rx.recv() {
                Ok(chunk) => {
                    self.chunk = chunk;
                    self.pos = 0;
                }
                Err(_) => return Ok(0),
            }
        }
        let count = buf.len().min(self.chunk.len() - self.pos);
        buf[..count].copy_from_slice(&self.chunk[self.pos..self.pos + count]);
        self.pos += count;
        Ok(count)
    }
}

#[test]
#[ignore = "streams more than 4 GiB through the codec"]
fn entries_past_four_gib_round_trip() -> TestResult<()> {
    const SIZE: u64 = (1 << 32) + 4096;
    const CHUNK: usize = 1 << 20;
    let (tx, rx) = mpsc::sync_channel(16);

    let producer = thread::spawn(move || -> Result<(), ZipError> {
        let zeros = vec![0u8; CHUNK];
        let mut writer = ZipWriter::new(ChannelWriter(tx));
        writer.put_entry(ZipEntry::new("small.txt"))?;
        writer.write_entry(b"small")?;
        writer.put_entry(ZipEntry::new("huge.bin"))?;
        let mut left = SIZE;
        while left > 0 {
            let step = usize::try_from(left).map_or(CHUNK, |l| l.min(CHUNK));
            writer.write_entry(&zeros[..step])?;
            left -= step as u64;
        }
        writer.finish()
    });

    let mut reader = ZipReader::new(ChannelReader {
        rx,
        chunk: Vec::new(),
        pos: 0,
    });
    let first = reader.next_entry()?.context("small entry")?;
    assert_eq!(first.name(), "small.txt");
    let second = reader.next_entry()?.context("huge entry")?;
    assert_eq!(second.name(), "huge.bin");
    let copied = io::copy(&mut reader, &mut io::sink())?;
    assert_eq!(copied, SIZE);
    let resolved = reader.current_entry().context("resolved")?;
    assert_eq!(resolved.size(), Some(SIZE));
    assert!(reader.next_entry()?.is_none());

    producer
        .join()
        .map_err(|_| anyhow!("producer panicked"))??;
    Ok(())
}
