//! Forward-only archive reader.
//!
//! # Design
//! - Walks local file headers in stream order; the central directory is never consulted,
//!   so archives can be read straight off a network stream.
//! - Owns a small read-ahead window so inflate input and trailing data descriptors can be
//!   consumed without pushing bytes back into the source.
//! - Entry data is verified at end-of-entry: CRC-32 for every entry, plus compressed and
//!   uncompressed sizes for DEFLATED entries.

use std::io::{self, Read};

use flate2::{Crc, Decompress, FlushDecompress, Status};

use crate::entry::{CompressionMethod, ZipEntry};
use crate::error::{ZipError, ZipResult};
use crate::format::{
    EXTHDR, EXTSIG, FLAG_DATA_DESCRIPTOR, FLAG_ENCRYPTED, LOCCRC, LOCEXT, LOCFLG, LOCHDR, LOCHOW,
    LOCLEN, LOCNAM, LOCSIG, LOCSIZ, LOCTIM, ZIP64_EXTHDR, ZIP64_MAGIC, get16, get32, get64,
    zip64_sizes,
};

const WINDOW: usize = 8 * 1024;

struct OpenEntry {
    entry: ZipEntry,
    flags: u16,
    method: CompressionMethod,
    remaining: u64,
    stream_end: bool,
    done: bool,
    failed: Option<Integrity>,
}

/// Verification failure remembered on an entry so it is reported on every later access.
#[derive(Debug, Clone, Copy)]
enum Integrity {
    Size { expected: u64, actual: u64 },
    CompressedSize { expected: u64, actual: u64 },
    Crc { expected: u32, actual: u32 },
}

impl Integrity {
    fn to_error(self, name: &str) -> ZipError {
        let name = name.to_string();
        match self {
            Self::Size { expected, actual } => ZipError::SizeMismatch {
                name,
                expected,
                actual,
            },
            Self::CompressedSize { expected, actual } => ZipError::CompressedSizeMismatch {
                name,
                expected,
                actual,
            },
            Self::Crc { expected, actual } => ZipError::CrcMismatch {
                name,
                expected,
                actual,
            },
        }
    }
}

impl OpenEntry {
    /// Mark the entry fully read, remembering `failure` if verification failed.
    fn conclude(&mut self, failure: Option<Integrity>) -> ZipResult<()> {
        self.done = true;
        self.failed = failure;
        failure.map_or(Ok(()), |failure| Err(failure.to_error(self.entry.name())))
    }
}

/// Streaming ZIP reader over any byte source.
pub struct ZipReader<R> {
    inner: R,
    window: Box<[u8]>,
    pos: usize,
    filled: usize,
    current: Option<OpenEntry>,
    inflater: Decompress,
    crc: Crc,
}

impl<R: Read> ZipReader<R> {
    /// Wrap a byte source positioned at the first local file header.
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            window: vec![0; WINDOW].into_boxed_slice(),
            pos: 0,
            filled: 0,
            current: None,
            inflater: Decompress::new(false),
            crc: Crc::new(),
        }
    }

    /// Advance to the next entry, draining any unread data of the current one.
    ///
    /// Returns `None` once the central directory or the end of the stream is reached.
    ///
    /// # Errors
    ///
    /// Fails on IO errors, malformed headers, encrypted entries, and integrity failures
    /// in the entry being skipped.
    pub fn next_entry(&mut self) -> ZipResult<Option<ZipEntry>> {
        if self.current.is_some() {
            self.close_entry()?;
        }
        self.crc.reset();
        self.inflater.reset(false);
        let Some(open) = self.read_local_header()? else {
            return Ok(None);
        };
        let entry = open.entry.clone();
        self.current = Some(open);
        Ok(Some(entry))
    }

    /// The entry being read; sizes and CRC are updated from a data descriptor once the
    /// entry has been fully read.
    #[must_use]
    pub fn current_entry(&self) -> Option<&ZipEntry> {
        self.current.as_ref().map(|open| &open.entry)
    }

    /// Read and verify the remainder of the current entry.
    ///
    /// # Errors
    ///
    /// Fails when the remaining data does not verify. A failed entry stays current, so
    /// the same error is returned again by later calls and by [`ZipReader::next_entry`].
    pub fn close_entry(&mut self) -> ZipResult<()> {
        let mut scratch = [0u8; 1024];
        while self.read_entry(&mut scratch)? > 0 {}
        self.current = None;
        Ok(())
    }

    /// Read uncompressed bytes of the current entry; `0` marks end-of-entry.
    ///
    /// # Errors
    ///
    /// Fails on IO errors, inflate errors, and CRC or size mismatches detected at
    /// end-of-entry.
    pub fn read_entry(&mut self, out: &mut [u8]) -> ZipResult<usize> {
        let Some(open) = self.current.as_ref() else {
            return Ok(0);
        };
        if let Some(failure) = open.failed {
            return Err(failure.to_error(open.entry.name()));
        }
        if open.done || out.is_empty() {
            return Ok(0);
        }
        match open.method {
            CompressionMethod::Deflated => self.read_deflated(out),
            CompressionMethod::Stored => self.read_stored(out),
        }
    }

    /// Return the underlying source.
    pub fn into_inner(self) -> R {
        self.inner
    }

    fn read_local_header(&mut self) -> ZipResult<Option<OpenEntry>> {
        let mut header = [0u8; LOCHDR];
        if !self.read_fully(&mut header)? {
            return Ok(None);
        }
        if get32(&header, 0) != LOCSIG {
            return Ok(None);
        }
        let flags = get16(&header, LOCFLG);
        let mut name = vec![0u8; usize::from(get16(&header, LOCNAM))];
        let mut extra = vec![0u8; usize::from(get16(&header, LOCEXT))];
        if !self.read_fully(&mut name)? {
            return Err(ZipError::UnexpectedEof {
                name: String::from_utf8_lossy(&name).into_owned(),
            });
        }
        let name = String::from_utf8_lossy(&name).into_owned();
        if !self.read_fully(&mut extra)? {
            return Err(ZipError::UnexpectedEof { name });
        }
        if flags & FLAG_ENCRYPTED != 0 {
            return Err(ZipError::Encrypted { name });
        }
        let code = get16(&header, LOCHOW);
        let Some(method) = CompressionMethod::from_code(code) else {
            return Err(ZipError::UnsupportedMethod { name, method: code });
        };

        let mut entry = ZipEntry::new(name);
        entry.set_method(method);
        entry.set_dos_time(get32(&header, LOCTIM));
        let mut remaining = 0;
        if flags & FLAG_DATA_DESCRIPTOR == FLAG_DATA_DESCRIPTOR {
            if method != CompressionMethod::Deflated {
                return Err(ZipError::DescriptorOnStored {
                    name: entry.name().to_string(),
                });
            }
        } else {
            let mut size = u64::from(get32(&header, LOCLEN));
            let mut compressed = u64::from(get32(&header, LOCSIZ));
            if size == ZIP64_MAGIC || compressed == ZIP64_MAGIC {
                if let Some((wide_size, wide_compressed)) = zip64_sizes(&extra) {
                    size = wide_size;
                    compressed = wide_compressed;
                }
            }
            entry.set_crc(get32(&header, LOCCRC));
            entry.set_size(size);
            entry.set_compressed_size(compressed);
            remaining = size;
        }
        entry.set_extra(extra);

        Ok(Some(OpenEntry {
            entry,
            flags,
            method,
            remaining,
            stream_end: false,
            done: false,
            failed: None,
        }))
    }

    fn read_deflated(&mut self, out: &mut [u8]) -> ZipResult<usize> {
        loop {
            if self.current.as_ref().is_some_and(|open| open.stream_end) {
                self.finish_deflated()?;
                return Ok(0);
            }
            if self.pos == self.filled && self.fill()? == 0 {
                return Err(ZipError::UnexpectedEof {
                    name: self.current_name(),
                });
            }

            let before_in = self.inflater.total_in();
            let before_out = self.inflater.total_out();
            let status = self
                .inflater
                .decompress(
                    &self.window[self.pos..self.filled],
                    out,
                    FlushDecompress::None,
                )
                .map_err(|source| ZipError::Inflate {
                    name: self.current_name(),
                    source,
                })?;
            let consumed = delta(before_in, self.inflater.total_in());
            let produced = delta(before_out, self.inflater.total_out());
            self.pos += consumed;
            if produced > 0 {
                self.crc.update(&out[..produced]);
            }
            if status == Status::StreamEnd {
                if let Some(open) = self.current.as_mut() {
                    open.stream_end = true;
                }
            }
            if produced > 0 {
                return Ok(produced);
            }
            if consumed == 0 && status != Status::StreamEnd {
                return Err(ZipError::UnexpectedEof {
                    name: self.current_name(),
                });
            }
        }
    }

    fn finish_deflated(&mut self) -> ZipResult<()> {
        let inflated = self.inflater.total_out();
        let compressed = self.inflater.total_in();
        let flags = self.current.as_ref().map_or(0, |open| open.flags);
        let descriptor = if flags & FLAG_DATA_DESCRIPTOR == FLAG_DATA_DESCRIPTOR {
            Some(self.read_descriptor(inflated >= ZIP64_MAGIC || compressed >= ZIP64_MAGIC)?)
        } else {
            None
        };
        let actual_crc = self.crc.sum();
        let Some(open) = self.current.as_mut() else {
            return Ok(());
        };
        if let Some((crc, compressed_size, size)) = descriptor {
            open.entry.set_crc(crc);
            open.entry.set_compressed_size(compressed_size);
            open.entry.set_size(size);
        }
        let expected_size = open.entry.size().unwrap_or_default();
        let expected_compressed = open.entry.compressed_size().unwrap_or_default();
        let expected_crc = open.entry.crc().unwrap_or_default();
        let failure = if !sizes_match(expected_size, inflated) {
            Some(Integrity::Size {
                expected: expected_size,
                actual: inflated,
            })
        } else if expected_compressed != compressed {
            Some(Integrity::CompressedSize {
                expected: expected_compressed,
                actual: compressed,
            })
        } else if expected_crc != actual_crc {
            Some(Integrity::Crc {
                expected: expected_crc,
                actual: actual_crc,
            })
        } else {
            None
        };
        open.conclude(failure)
    }

    /// Parse a data descriptor whose leading signature is optional.
    fn read_descriptor(&mut self, wide: bool) -> ZipResult<(u32, u64, u64)> {
        let want = if wide { ZIP64_EXTHDR } else { EXTHDR };
        let available = self.peek(want)?;
        let bytes = &self.window[self.pos..self.pos + available];
        let signed = available >= 4 && get32(bytes, 0) == EXTSIG;
        let body = if signed { want } else { want - 4 };
        if available < body {
            return Err(ZipError::UnexpectedEof {
                name: self.current_name(),
            });
        }
        let base = if signed { 4 } else { 0 };
        let parsed = if wide {
            (
                get32(bytes, base),
                get64(bytes, base + 4),
                get64(bytes, base + 12),
            )
        } else {
            (
                get32(bytes, base),
                u64::from(get32(bytes, base + 4)),
                u64::from(get32(bytes, base + 8)),
            )
        };
        self.pos += body;
        Ok(parsed)
    }

    fn read_stored(&mut self, out: &mut [u8]) -> ZipResult<usize> {
        let remaining = self.current.as_ref().map_or(0, |open| open.remaining);
        if remaining == 0 {
            self.verify_stored_crc()?;
            return Ok(0);
        }
        let want = usize::try_from(remaining).map_or(out.len(), |left| left.min(out.len()));
        let read = if self.pos < self.filled {
            let count = want.min(self.filled - self.pos);
            out[..count].copy_from_slice(&self.window[self.pos..self.pos + count]);
            self.pos += count;
            count
        } else {
            self.inner
                .read(&mut out[..want])
                .map_err(|source| ZipError::io("read_entry", source))?
        };
        if read == 0 {
            return Err(ZipError::UnexpectedEof {
                name: self.current_name(),
            });
        }
        self.crc.update(&out[..read]);
        if let Some(open) = self.current.as_mut() {
            open.remaining -= read as u64;
            if open.remaining == 0 {
                self.verify_stored_crc()?;
            }
        }
        Ok(read)
    }

    fn verify_stored_crc(&mut self) -> ZipResult<()> {
        let actual = self.crc.sum();
        let Some(open) = self.current.as_mut() else {
            return Ok(());
        };
        let expected = open.entry.crc().unwrap_or_default();
        let failure = (expected != actual).then_some(Integrity::Crc { expected, actual });
        open.conclude(failure)
    }

    fn current_name(&self) -> String {
        self.current
            .as_ref()
            .map(|open| open.entry.name().to_string())
            .unwrap_or_default()
    }

    fn fill(&mut self) -> ZipResult<usize> {
        self.pos = 0;
        self.filled = 0;
        let read = self
            .inner
            .read(&mut self.window)
            .map_err(|source| ZipError::io("fill", source))?;
        self.filled = read;
        Ok(read)
    }

    /// Make up to `want` bytes available in the window; returns how many are present.
    fn peek(&mut self, want: usize) -> ZipResult<usize> {
        if self.filled - self.pos < want {
            self.window.copy_within(self.pos..self.filled, 0);
            self.filled -= self.pos;
            self.pos = 0;
            while self.filled < want {
                let read = self
                    .inner
                    .read(&mut self.window[self.filled..])
                    .map_err(|source| ZipError::io("peek", source))?;
                if read == 0 {
                    break;
                }
                self.filled += read;
            }
        }
        Ok((self.filled - self.pos).min(want))
    }

    /// Fill `out` completely; `false` means the stream ended first.
    fn read_fully(&mut self, out: &mut [u8]) -> ZipResult<bool> {
        let mut copied = 0;
        while copied < out.len() {
            if self.pos == self.filled && self.fill()? == 0 {
                return Ok(false);
            }
            let count = (out.len() - copied).min(self.filled - self.pos);
            out[copied..copied + count].copy_from_slice(&self.window[self.pos..self.pos + count]);
            self.pos += count;
            copied += count;
        }
        Ok(true)
    }
}

impl<R: Read> Read for ZipReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.read_entry(buf).map_err(io::Error::from)
    }
}

/// Uncompressed sizes match exactly or in their low 32 bits; some producers record a
/// truncated size when they omit the ZIP64 extra.
pub(crate) const fn sizes_match(declared: u64, actual: u64) -> bool {
    declared == actual || (declared & ZIP64_MAGIC) == (actual & ZIP64_MAGIC)
}

fn delta(before: u64, after: u64) -> usize {
    usize::try_from(after - before).unwrap_or(usize::MAX)
}
