//! Streaming archive writer.
//!
//! # Design
//! - Entries whose sizes or CRC are unknown up front are DEFLATED with a trailing data
//!   descriptor, so any `Write` sink works (no seeking back to patch headers).
//! - ZIP64 extras are emitted per entry once a size or header offset reaches the 32-bit
//!   sentinel, and a ZIP64 end record plus locator once archive-level counters do.
//! - `finish` writes the central directory exactly once; later calls are no-ops.

use std::collections::HashSet;
use std::io::Write;

use chrono::Local;
use flate2::{Compress, Compression, Crc, FlushCompress, Status};

use crate::entry::{CompressionMethod, ZipEntry};
use crate::error::{ZipError, ZipResult};
use crate::format::{
    CENSIG, ENDSIG, EXTSIG, FLAG_DATA_DESCRIPTOR, FLAG_UTF8, LOCSIG, PutLe, VERSION_DEFLATED,
    VERSION_STORED, VERSION_ZIP64, ZIP64_ENDHDR, ZIP64_ENDSIG, ZIP64_EXTID, ZIP64_LOCSIG,
    ZIP64_MAGIC, ZIP64_MAGICCOUNT, clamp16, clamp32,
};

const DEFLATE_CHUNK: usize = 16 * 1024;

struct WrittenEntry {
    entry: ZipEntry,
    method: CompressionMethod,
    flags: u16,
    offset: u64,
    data_start: u64,
}

/// Streaming ZIP writer over any byte sink.
pub struct ZipWriter<W: Write> {
    inner: W,
    written: u64,
    current: Option<WrittenEntry>,
    entries: Vec<WrittenEntry>,
    names: HashSet<String>,
    crc: Crc,
    deflater: Compress,
    scratch: Box<[u8]>,
    method: CompressionMethod,
    comment: Option<String>,
    finished: bool,
}

impl<W: Write> ZipWriter<W> {
    /// Start an archive at the beginning of `inner`.
    pub fn new(inner: W) -> Self {
        Self::with_offset(inner, 0)
    }

    /// Start an archive whose first byte lands `offset` bytes into the final file, for
    /// archives appended after a preamble that was already written.
    pub fn with_offset(inner: W, offset: u64) -> Self {
        Self {
            inner,
            written: offset,
            current: None,
            entries: Vec::new(),
            names: HashSet::new(),
            crc: Crc::new(),
            deflater: Compress::new(Compression::default(), false),
            scratch: vec![0; DEFLATE_CHUNK].into_boxed_slice(),
            method: CompressionMethod::Deflated,
            comment: None,
            finished: false,
        }
    }

    /// Method used for entries that do not choose one.
    pub const fn set_default_method(&mut self, method: CompressionMethod) {
        self.method = method;
    }

    /// Archive comment written into the end record.
    ///
    /// # Errors
    ///
    /// Fails if the comment exceeds 65535 bytes.
    pub fn set_comment(&mut self, comment: impl Into<String>) -> ZipResult<()> {
        let comment = comment.into();
        if comment.len() > usize::from(u16::MAX) {
            return Err(ZipError::FieldTooLong {
                field: "archive_comment",
                len: comment.len(),
            });
        }
        self.comment = Some(comment);
        Ok(())
    }

    /// Close the open entry, if any, and write the local header for `entry`.
    ///
    /// # Errors
    ///
    /// Fails on duplicate names, STORED entries without size and CRC, oversized header
    /// fields, IO errors, and after `finish`.
    pub fn put_entry(&mut self, mut entry: ZipEntry) -> ZipResult<()> {
        self.ensure_open()?;
        if self.current.is_some() {
            self.close_entry()?;
        }
        if entry.dos_time().is_none() {
            entry.set_modified(Local::now().naive_local());
        }
        let method = entry.method().unwrap_or(self.method);
        entry.set_method(method);
        let mut flags = match method {
            CompressionMethod::Deflated => {
                if entry.size().is_none()
                    || entry.compressed_size().is_none()
                    || entry.crc().is_none()
                {
                    FLAG_DATA_DESCRIPTOR
                } else {
                    0
                }
            }
            CompressionMethod::Stored => {
                reconcile_stored(&mut entry)?;
                0
            }
        };
        if !entry.name().is_ascii() {
            flags |= FLAG_UTF8;
        }
        for (field, len) in [
            ("name", entry.name().len()),
            ("comment", entry.comment().map_or(0, str::len)),
        ] {
            if len > usize::from(u16::MAX) {
                return Err(ZipError::FieldTooLong { field, len });
            }
        }
        if self.names.contains(entry.name()) {
            return Err(ZipError::DuplicateEntry {
                name: entry.name().to_string(),
            });
        }

        let offset = self.written;
        let header = encode_local_header(&entry, method, flags, offset)?;
        self.write_raw(&header, "write_local_header")?;
        self.names.insert(entry.name().to_string());
        self.current = Some(WrittenEntry {
            entry,
            method,
            flags,
            offset,
            data_start: self.written,
        });
        Ok(())
    }

    /// Append uncompressed bytes to the open entry.
    ///
    /// # Errors
    ///
    /// Fails without an open entry, when a STORED entry would exceed its declared size,
    /// and on IO or deflate errors.
    pub fn write_entry(&mut self, data: &[u8]) -> ZipResult<()> {
        let Some(current) = self.current.as_ref() else {
            return Err(ZipError::NoCurrentEntry);
        };
        match current.method {
            CompressionMethod::Deflated => self.deflate(data, FlushCompress::None)?,
            CompressionMethod::Stored => {
                let declared = current.entry.size().unwrap_or_default();
                let used = self.written - current.data_start;
                if used + data.len() as u64 > declared {
                    return Err(ZipError::StoredOverflow {
                        name: current.entry.name().to_string(),
                        declared,
                    });
                }
                self.write_raw(data, "write_entry")?;
            }
        }
        self.crc.update(data);
        Ok(())
    }

    /// Finish the open entry, verifying declared sizes and CRC or writing a data
    /// descriptor when they were unknown.
    ///
    /// # Errors
    ///
    /// Fails on size or CRC mismatches and IO errors.
    pub fn close_entry(&mut self) -> ZipResult<()> {
        let Some(mut current) = self.current.take() else {
            return Ok(());
        };
        let actual_crc = self.crc.sum();
        self.crc.reset();
        let name = current.entry.name().to_string();
        match current.method {
            CompressionMethod::Deflated => {
                self.deflate(&[], FlushCompress::Finish)?;
                let size = self.deflater.total_in();
                let compressed = self.deflater.total_out();
                self.deflater.reset();
                if current.flags & FLAG_DATA_DESCRIPTOR == 0 {
                    check_declared(&current.entry, size, compressed, actual_crc)?;
                } else {
                    current.entry.set_size(size);
                    current.entry.set_compressed_size(compressed);
                    current.entry.set_crc(actual_crc);
                    let descriptor = encode_descriptor(&current.entry);
                    self.write_raw(&descriptor, "write_data_descriptor")?;
                }
            }
            CompressionMethod::Stored => {
                let size = self.written - current.data_start;
                let declared = current.entry.size().unwrap_or_default();
                if size != declared {
                    return Err(ZipError::SizeMismatch {
                        name,
                        expected: declared,
                        actual: size,
                    });
                }
                check_declared(&current.entry, size, size, actual_crc)?;
            }
        }
        self.entries.push(current);
        Ok(())
    }

    /// Close any open entry and write the central directory and end records.
    ///
    /// # Errors
    ///
    /// Fails on IO errors or when the open entry does not verify.
    pub fn finish(&mut self) -> ZipResult<()> {
        if self.finished {
            return Ok(());
        }
        self.close_entry()?;
        let cen_offset = self.written;
        for written in &self.entries {
            let record = encode_central_header(written)?;
            self.inner
                .write_all(&record)
                .map_err(|source| ZipError::io("write_central_header", source))?;
            self.written += record.len() as u64;
        }
        let cen_len = self.written - cen_offset;
        let end = self.encode_end(cen_offset, cen_len);
        self.write_raw(&end, "write_end_record")?;
        self.inner
            .flush()
            .map_err(|source| ZipError::io("flush", source))?;
        self.finished = true;
        Ok(())
    }

    /// Bytes written so far, including the starting offset.
    #[must_use]
    pub const fn written(&self) -> u64 {
        self.written
    }

    /// Borrow the underlying sink.
    pub const fn get_ref(&self) -> &W {
        &self.inner
    }

    /// Finish the archive and return the sink.
    ///
    /// # Errors
    ///
    /// Propagates errors from [`ZipWriter::finish`].
    pub fn into_inner(mut self) -> ZipResult<W> {
        self.finish()?;
        Ok(self.inner)
    }

    const fn ensure_open(&self) -> ZipResult<()> {
        if self.finished {
            return Err(ZipError::Finished);
        }
        Ok(())
    }

    fn write_raw(&mut self, bytes: &[u8], operation: &'static str) -> ZipResult<()> {
        self.inner
            .write_all(bytes)
            .map_err(|source| ZipError::io(operation, source))?;
        self.written += bytes.len() as u64;
        Ok(())
    }

    fn deflate(&mut self, mut input: &[u8], flush: FlushCompress) -> ZipResult<()> {
        loop {
            let before_in = self.deflater.total_in();
            let before_out = self.deflater.total_out();
            let status = self
                .deflater
                .compress(input, &mut self.scratch, flush)
                .map_err(|source| ZipError::Deflate {
                    name: self
                        .current
                        .as_ref()
                        .map(|c| c.entry.name().to_string())
                        .unwrap_or_default(),
                    source,
                })?;
            let consumed = usize::try_from(self.deflater.total_in() - before_in).unwrap_or(0);
            let produced = usize::try_from(self.deflater.total_out() - before_out).unwrap_or(0);
            input = &input[consumed..];
            if produced > 0 {
                self.inner
                    .write_all(&self.scratch[..produced])
                    .map_err(|source| ZipError::io("write_entry", source))?;
                self.written += produced as u64;
            }
            let drained = produced < self.scratch.len();
            let done = match flush {
                FlushCompress::Finish => status == Status::StreamEnd,
                _ => input.is_empty() && drained,
            };
            if done {
                return Ok(());
            }
        }
    }

    fn encode_end(&self, cen_offset: u64, cen_len: u64) -> Vec<u8> {
        let count = self.entries.len();
        let zip64 = cen_len >= ZIP64_MAGIC || cen_offset >= ZIP64_MAGIC || count >= ZIP64_MAGICCOUNT;
        let comment = self.comment.as_deref().unwrap_or_default().as_bytes();
        let mut out = Vec::with_capacity(22 + 76 + comment.len());
        if zip64 {
            let end64_offset = self.written;
            out.put32(ZIP64_ENDSIG);
            out.put64(ZIP64_ENDHDR - 12);
            out.put16(VERSION_ZIP64);
            out.put16(VERSION_ZIP64);
            out.put32(0);
            out.put32(0);
            out.put64(count as u64);
            out.put64(count as u64);
            out.put64(cen_len);
            out.put64(cen_offset);

            out.put32(ZIP64_LOCSIG);
            out.put32(0);
            out.put64(end64_offset);
            out.put32(1);
        }
        let short_count = clamp16(count);
        out.put32(ENDSIG);
        out.put16(0);
        out.put16(0);
        out.put16(short_count);
        out.put16(short_count);
        out.put32(clamp32(cen_len));
        out.put32(clamp32(cen_offset));
        out.put16(clamp16(comment.len()));
        out.extend_from_slice(comment);
        out
    }
}

fn reconcile_stored(entry: &mut ZipEntry) -> ZipResult<()> {
    match (entry.size(), entry.compressed_size()) {
        (None, Some(compressed)) => entry.set_size(compressed),
        (Some(size), None) => entry.set_compressed_size(size),
        (Some(size), Some(compressed)) if size != compressed => {
            return Err(ZipError::SizeMismatch {
                name: entry.name().to_string(),
                expected: size,
                actual: compressed,
            });
        }
        (None, None) => {
            return Err(ZipError::StoredEntryIncomplete {
                name: entry.name().to_string(),
            });
        }
        _ => {}
    }
    if entry.crc().is_none() {
        return Err(ZipError::StoredEntryIncomplete {
            name: entry.name().to_string(),
        });
    }
    Ok(())
}

fn check_declared(entry: &ZipEntry, size: u64, compressed: u64, crc: u32) -> ZipResult<()> {
    let name = entry.name().to_string();
    let declared_size = entry.size().unwrap_or_default();
    if declared_size != size {
        return Err(ZipError::SizeMismatch {
            name,
            expected: declared_size,
            actual: size,
        });
    }
    let declared_compressed = entry.compressed_size().unwrap_or_default();
    if declared_compressed != compressed {
        return Err(ZipError::CompressedSizeMismatch {
            name,
            expected: declared_compressed,
            actual: compressed,
        });
    }
    let declared_crc = entry.crc().unwrap_or_default();
    if declared_crc != crc {
        return Err(ZipError::CrcMismatch {
            name,
            expected: declared_crc,
            actual: crc,
        });
    }
    Ok(())
}

const fn version_for(method: CompressionMethod) -> u16 {
    match method {
        CompressionMethod::Stored => VERSION_STORED,
        CompressionMethod::Deflated => VERSION_DEFLATED,
    }
}

fn encode_local_header(
    entry: &ZipEntry,
    method: CompressionMethod,
    flags: u16,
    offset: u64,
) -> ZipResult<Vec<u8>> {
    let name = entry.name().as_bytes();
    let mut extra_len = entry.extra().len();
    let mut out = Vec::with_capacity(30 + name.len() + extra_len + 20);
    out.put32(LOCSIG);
    let mut wide = None;
    if flags & FLAG_DATA_DESCRIPTOR == FLAG_DATA_DESCRIPTOR {
        out.put16(version_for(method));
        out.put16(flags);
        out.put16(method.code());
        out.put32(entry.dos_time().unwrap_or_default());
        out.put32(0);
        out.put32(0);
        out.put32(0);
    } else {
        let size = entry.size().unwrap_or_default();
        let compressed = entry.compressed_size().unwrap_or_default();
        let zip64 = size >= ZIP64_MAGIC || compressed >= ZIP64_MAGIC || offset >= ZIP64_MAGIC;
        out.put16(if zip64 { VERSION_ZIP64 } else { version_for(method) });
        out.put16(flags);
        out.put16(method.code());
        out.put32(entry.dos_time().unwrap_or_default());
        out.put32(entry.crc().unwrap_or_default());
        if zip64 {
            out.put32(u32::MAX);
            out.put32(u32::MAX);
            extra_len += 20;
            wide = Some((size, compressed));
        } else {
            out.put32(clamp32(compressed));
            out.put32(clamp32(size));
        }
    }
    if extra_len > usize::from(u16::MAX) {
        return Err(ZipError::FieldTooLong {
            field: "extra",
            len: extra_len,
        });
    }
    out.put16(clamp16(name.len()));
    out.put16(clamp16(extra_len));
    out.extend_from_slice(name);
    if let Some((size, compressed)) = wide {
        out.put16(ZIP64_EXTID);
        out.put16(16);
        out.put64(size);
        out.put64(compressed);
    }
    out.extend_from_slice(entry.extra());
    Ok(out)
}

fn encode_descriptor(entry: &ZipEntry) -> Vec<u8> {
    let size = entry.size().unwrap_or_default();
    let compressed = entry.compressed_size().unwrap_or_default();
    let mut out = Vec::with_capacity(24);
    out.put32(EXTSIG);
    out.put32(entry.crc().unwrap_or_default());
    if size >= ZIP64_MAGIC || compressed >= ZIP64_MAGIC {
        out.put64(compressed);
        out.put64(size);
    } else {
        out.put32(clamp32(compressed));
        out.put32(clamp32(size));
    }
    out
}

fn encode_central_header(written: &WrittenEntry) -> ZipResult<Vec<u8>> {
    let entry = &written.entry;
    let size = entry.size().unwrap_or_default();
    let compressed = entry.compressed_size().unwrap_or_default();
    let mut wide = Vec::with_capacity(24);
    if size >= ZIP64_MAGIC {
        wide.put64(size);
    }
    if compressed >= ZIP64_MAGIC {
        wide.put64(compressed);
    }
    if written.offset >= ZIP64_MAGIC {
        wide.put64(written.offset);
    }
    let name = entry.name().as_bytes();
    let comment = entry.comment().unwrap_or_default().as_bytes();
    let extra_len = entry.extra().len() + if wide.is_empty() { 0 } else { wide.len() + 4 };
    if extra_len > usize::from(u16::MAX) {
        return Err(ZipError::FieldTooLong {
            field: "extra",
            len: extra_len,
        });
    }
    let version = if wide.is_empty() {
        version_for(written.method)
    } else {
        VERSION_ZIP64
    };

    let mut out = Vec::with_capacity(46 + name.len() + extra_len + comment.len());
    out.put32(CENSIG);
    out.put16(version);
    out.put16(version);
    out.put16(written.flags);
    out.put16(written.method.code());
    out.put32(entry.dos_time().unwrap_or_default());
    out.put32(entry.crc().unwrap_or_default());
    out.put32(clamp32(compressed));
    out.put32(clamp32(size));
    out.put16(clamp16(name.len()));
    out.put16(clamp16(extra_len));
    out.put16(clamp16(comment.len()));
    out.put16(0);
    out.put16(0);
    out.put32(0);
    out.put32(clamp32(written.offset));
    out.extend_from_slice(name);
    if !wide.is_empty() {
        out.put16(ZIP64_EXTID);
        out.put16(clamp16(wide.len()));
        out.extend_from_slice(&wide);
    }
    out.extend_from_slice(entry.extra());
    out.extend_from_slice(comment);
    Ok(out)
}

impl<W: Write> Write for ZipWriter<W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.write_entry(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::get32;
    use crate::reader::ZipReader;
    use std::io::{Cursor, Read};

    fn contains(haystack: &[u8], signature: u32) -> bool {
        haystack
            .windows(4)
            .any(|window| get32(window, 0) == signature)
    }

    #[test]
    fn duplicate_names_are_rejected() -> ZipResult<()> {
        let mut writer = ZipWriter::new(Vec::new());
        writer.put_entry(ZipEntry::new("same.txt"))?;
        writer.write_entry(b"one")?;
        assert!(matches!(
            writer.put_entry(ZipEntry::new("same.txt")),
            Err(ZipError::DuplicateEntry { name }) if name == "same.txt"
        ));
        Ok(())
    }

    #[test]
    fn rejected_header_does_not_reserve_the_name() -> ZipResult<()> {
        let mut writer = ZipWriter::new(Vec::new());
        let mut oversized = ZipEntry::new("retry.txt");
        oversized.set_extra(vec![0; usize::from(u16::MAX) + 1]);
        assert!(matches!(
            writer.put_entry(oversized),
            Err(ZipError::FieldTooLong { field: "extra", .. })
        ));
        assert!(writer.get_ref().is_empty());

        writer.put_entry(ZipEntry::new("retry.txt"))?;
        writer.write_entry(b"second try")?;
        let bytes = writer.into_inner()?;
        let mut reader = ZipReader::new(Cursor::new(bytes));
        assert_eq!(reader.next_entry()?.expect("entry").name(), "retry.txt");
        Ok(())
    }

    #[test]
    fn stored_entry_needs_size_and_crc() {
        let mut writer = ZipWriter::new(Vec::new());
        let mut entry = ZipEntry::new("raw.bin");
        entry.set_method(CompressionMethod::Stored);
        entry.set_size(3);
        assert!(matches!(
            writer.put_entry(entry),
            Err(ZipError::StoredEntryIncomplete { .. })
        ));
    }

    #[test]
    fn stored_entry_rejects_overflow() -> ZipResult<()> {
        let mut writer = ZipWriter::new(Vec::new());
        let mut entry = ZipEntry::new("raw.bin");
        entry.set_method(CompressionMethod::Stored);
        entry.set_size(2);
        entry.set_crc(0);
        writer.put_entry(entry)?;
        assert!(matches!(
            writer.write_entry(b"abc"),
            Err(ZipError::StoredOverflow { declared: 2, .. })
        ));
        Ok(())
    }

    #[test]
    fn write_without_entry_fails() {
        let mut writer = ZipWriter::new(Vec::new());
        assert!(matches!(
            writer.write_entry(b"x"),
            Err(ZipError::NoCurrentEntry)
        ));
    }

    #[test]
    fn finish_is_idempotent() -> ZipResult<()> {
        let mut writer = ZipWriter::new(Vec::new());
        writer.put_entry(ZipEntry::new("a.txt"))?;
        writer.write_entry(b"alpha")?;
        writer.finish()?;
        let length = writer.get_ref().len();
        writer.finish()?;
        assert_eq!(writer.get_ref().len(), length);
        assert!(matches!(
            writer.put_entry(ZipEntry::new("b.txt")),
            Err(ZipError::Finished)
        ));
        Ok(())
    }

    #[test]
    fn unknown_sizes_use_data_descriptor() -> ZipResult<()> {
        let mut writer = ZipWriter::new(Vec::new());
        writer.put_entry(ZipEntry::new("stream.txt"))?;
        writer.write_entry(b"streamed content")?;
        let bytes = writer.into_inner()?;
        assert_eq!(
            crate::format::get16(&bytes, crate::format::LOCFLG) & FLAG_DATA_DESCRIPTOR,
            FLAG_DATA_DESCRIPTOR
        );
        assert!(contains(&bytes, EXTSIG));
        assert!(!contains(&bytes, ZIP64_ENDSIG));
        Ok(())
    }

    #[test]
    fn high_offsets_emit_zip64_records() -> ZipResult<()> {
        let mut writer = ZipWriter::with_offset(Vec::new(), 5 * (1 << 30));
        writer.put_entry(ZipEntry::new("far.txt"))?;
        writer.write_entry(b"far away")?;
        let bytes = writer.into_inner()?;
        assert!(contains(&bytes, ZIP64_ENDSIG));
        assert!(contains(&bytes, ZIP64_LOCSIG));

        let mut reader = ZipReader::new(Cursor::new(bytes));
        let entry = reader.next_entry()?.expect("entry");
        assert_eq!(entry.name(), "far.txt");
        let mut body = String::new();
        reader
            .read_to_string(&mut body)
            .map_err(|source| ZipError::io("test", source))?;
        assert_eq!(body, "far away");
        Ok(())
    }

    #[test]
    fn declared_four_gib_entry_header_reads_back() -> ZipResult<()> {
        let declared = 4 * (1u64 << 30) + 17;
        let mut writer = ZipWriter::new(Vec::new());
        let mut big = ZipEntry::new("big.bin");
        big.set_method(CompressionMethod::Stored);
        big.set_size(declared);
        big.set_crc(0x1234_5678);
        writer.put_entry(big)?;

        let mut reader = ZipReader::new(Cursor::new(writer.get_ref().clone()));
        let entry = reader.next_entry()?.expect("entry");
        assert_eq!(entry.name(), "big.bin");
        assert_eq!(entry.size(), Some(declared));
        assert_eq!(entry.compressed_size(), Some(declared));
        assert_eq!(entry.crc(), Some(0x1234_5678));
        Ok(())
    }
}
