//! Entry metadata shared by the reader and the writer.
//!
//! # Design
//! - Unknown values are `None` rather than `-1` sentinels; the writer uses that to
//!   decide when a trailing data descriptor is needed.
//! - Sizes are always 64-bit once resolved; the 32-bit sentinel never leaks out.
//! - Modification time is kept in MS-DOS packed form, the representation on disk.

use chrono::{Datelike, NaiveDate, NaiveDateTime, Timelike};

/// Compression methods understood by the codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionMethod {
    /// No compression.
    Stored,
    /// Raw DEFLATE.
    Deflated,
}

impl CompressionMethod {
    /// Method code as written in ZIP headers.
    #[must_use]
    pub const fn code(self) -> u16 {
        match self {
            Self::Stored => 0,
            Self::Deflated => 8,
        }
    }

    /// Resolve a header method code.
    #[must_use]
    pub const fn from_code(code: u16) -> Option<Self> {
        match code {
            0 => Some(Self::Stored),
            8 => Some(Self::Deflated),
            _ => None,
        }
    }
}

/// Metadata for one archive member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZipEntry {
    name: String,
    method: Option<CompressionMethod>,
    crc: Option<u32>,
    size: Option<u64>,
    compressed_size: Option<u64>,
    dos_time: Option<u32>,
    extra: Vec<u8>,
    comment: Option<String>,
}

impl ZipEntry {
    /// Create an entry with only a name; everything else is resolved later.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            method: None,
            crc: None,
            size: None,
            compressed_size: None,
            dos_time: None,
            extra: Vec::new(),
            comment: None,
        }
    }

    /// Entry name as stored in the archive.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Directory entries are named with a trailing slash.
    #[must_use]
    pub fn is_dir(&self) -> bool {
        self.name.ends_with('/')
    }

    /// Compression method, if chosen.
    #[must_use]
    pub const fn method(&self) -> Option<CompressionMethod> {
        self.method
    }

    /// Choose the compression method.
    pub const fn set_method(&mut self, method: CompressionMethod) {
        self.method = Some(method);
    }

    /// CRC-32 of the uncompressed data.
    #[must_use]
    pub const fn crc(&self) -> Option<u32> {
        self.crc
    }

    /// Record the CRC-32 of the uncompressed data.
    pub const fn set_crc(&mut self, crc: u32) {
        self.crc = Some(crc);
    }

    /// Uncompressed size in bytes.
    #[must_use]
    pub const fn size(&self) -> Option<u64> {
        self.size
    }

    /// Record the uncompressed size.
    pub const fn set_size(&mut self, size: u64) {
        self.size = Some(size);
    }

    /// Compressed size in bytes.
    #[must_use]
    pub const fn compressed_size(&self) -> Option<u64> {
        self.compressed_size
    }

    /// Record the compressed size.
    pub const fn set_compressed_size(&mut self, size: u64) {
        self.compressed_size = Some(size);
    }

    /// Raw MS-DOS timestamp.
    #[must_use]
    pub const fn dos_time(&self) -> Option<u32> {
        self.dos_time
    }

    /// Set the raw MS-DOS timestamp.
    pub const fn set_dos_time(&mut self, dos_time: u32) {
        self.dos_time = Some(dos_time);
    }

    /// Modification time decoded from the MS-DOS timestamp.
    #[must_use]
    pub fn modified(&self) -> Option<NaiveDateTime> {
        self.dos_time.and_then(dos_to_datetime)
    }

    /// Set the modification time; precision is two seconds.
    pub fn set_modified(&mut self, modified: NaiveDateTime) {
        self.dos_time = Some(datetime_to_dos(modified));
    }

    /// Extra field bytes carried through unchanged.
    #[must_use]
    pub fn extra(&self) -> &[u8] {
        &self.extra
    }

    /// Replace the extra field bytes.
    pub fn set_extra(&mut self, extra: Vec<u8>) {
        self.extra = extra;
    }

    /// Entry comment, written to the central directory.
    #[must_use]
    pub fn comment(&self) -> Option<&str> {
        self.comment.as_deref()
    }

    /// Set the entry comment.
    pub fn set_comment(&mut self, comment: impl Into<String>) {
        self.comment = Some(comment.into());
    }
}

const DOS_EPOCH_YEAR: i32 = 1980;
const DOS_EPOCH: u32 = (1 << 21) | (1 << 16);

fn datetime_to_dos(value: NaiveDateTime) -> u32 {
    let year = value.year();
    if year < DOS_EPOCH_YEAR {
        return DOS_EPOCH;
    }
    let Ok(years) = u32::try_from(year - DOS_EPOCH_YEAR) else {
        return DOS_EPOCH;
    };
    (years.min(127) << 25)
        | (value.month() << 21)
        | (value.day() << 16)
        | (value.hour() << 11)
        | (value.minute() << 5)
        | (value.second() >> 1)
}

fn dos_to_datetime(dos: u32) -> Option<NaiveDateTime> {
    let year = i32::try_from((dos >> 25) & 0x7f).ok()? + DOS_EPOCH_YEAR;
    let month = (dos >> 21) & 0x0f;
    let day = (dos >> 16) & 0x1f;
    let hour = (dos >> 11) & 0x1f;
    let minute = (dos >> 5) & 0x3f;
    let second = (dos << 1) & 0x3e;
    NaiveDate::from_ymd_opt(year, month, day)?.and_hms_opt(hour, minute, second)
}
