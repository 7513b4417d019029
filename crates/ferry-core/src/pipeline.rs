//! Read pipeline builder for transfers.
//!
//! # Design
//! - Each stage owns exactly one upstream stream; dropping the pipeline drops every stage.
//! - Stages compose in call order: source, buffer, progress, archive member.

use std::io::{BufReader, Read};
use std::sync::{Arc, Mutex, MutexGuard};

use ferry_repo::ObjectStream;
use ferry_zip::{ZipEntry, ZipReader};
use tracing::{debug, error};

use crate::error::{CoreError, CoreResult};
use crate::progress::{ProgressReader, ProgressSink};

/// Archive shared between the expand loop and the entry stream being written.
pub type SharedArchive = Arc<Mutex<ZipReader<ObjectStream>>>;

/// Composes stream stages over a backend read.
pub struct ReadPipeline {
    stream: ObjectStream,
}

impl ReadPipeline {
    /// Start from a backend stream.
    #[must_use]
    pub fn from_source(stream: ObjectStream) -> Self {
        Self { stream }
    }

    /// Add a read buffer of `capacity` bytes.
    #[must_use]
    pub fn buffered(self, capacity: usize) -> Self {
        Self {
            stream: Box::new(BufReader::with_capacity(capacity, self.stream)),
        }
    }

    /// Count bytes read so far against `total`, reporting to `sink`.
    #[must_use]
    pub fn tracked(self, sink: Option<Arc<dyn ProgressSink>>, total: u64) -> Self {
        self.tracked_from(sink, total, 0)
    }

    /// Like [`ReadPipeline::tracked`], continuing from `offset` bytes already counted.
    #[must_use]
    pub fn tracked_from(self, sink: Option<Arc<dyn ProgressSink>>, total: u64, offset: u64) -> Self {
        Self {
            stream: Box::new(ProgressReader::new(self.stream, sink, total).starting_at(offset)),
        }
    }

    /// Treat the stream as an archive and position it at `member`.
    ///
    /// Returns the member's stream together with its entry.
    ///
    /// # Errors
    ///
    /// Fails when the archive is malformed or has no entry named `member`.
    pub fn zip_member(self, archive: &str, member: &str) -> CoreResult<(Self, ZipEntry)> {
        let mut reader = ZipReader::new(self.stream);
        while let Some(entry) = reader
            .next_entry()
            .map_err(|source| CoreError::zip("find_member", source))?
        {
            if entry.name() == member {
                debug!(archive, member, size = ?entry.size(), "located archive member");
                return Ok((
                    Self {
                        stream: Box::new(reader),
                    },
                    entry,
                ));
            }
        }
        Err(CoreError::MemberNotFound {
            archive: archive.to_string(),
            member: member.to_string(),
        })
    }

    /// Treat the stream as an archive to iterate.
    #[must_use]
    pub fn into_archive(self) -> SharedArchive {
        Arc::new(Mutex::new(ZipReader::new(self.stream)))
    }

    /// The composed stream.
    #[must_use]
    pub fn finish(self) -> ObjectStream {
        self.stream
    }
}

/// Reads the current entry of a shared archive.
pub struct EntryStream {
    archive: SharedArchive,
}

impl EntryStream {
    /// Stream over the entry `archive` is positioned at.
    #[must_use]
    pub const fn new(archive: SharedArchive) -> Self {
        Self { archive }
    }
}

impl Read for EntryStream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        lock_archive(&self.archive).read(buf)
    }
}

/// Lock the shared archive, recovering from poisoning.
pub fn lock_archive(archive: &SharedArchive) -> MutexGuard<'_, ZipReader<ObjectStream>> {
    match archive.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            error!("archive mutex poisoned; continuing with recovered guard");
            poisoned.into_inner()
        }
    }
}
