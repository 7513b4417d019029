//! Byte-counting stream decorator and progress observers.
//!
//! # Design
//! - The reader is a pure pass-through: it never buffers and never alters data.
//! - The counter is clamped to `total + 1` and the permille value to 1000.
//! - A zero total disables reporting instead of dividing by zero.

use std::io::{self, Read};
use std::sync::Arc;
use std::sync::atomic::{AtomicU16, Ordering};

use tracing::debug;

/// Permille value of a finished task.
pub const PERMILLE_COMPLETE: u16 = 1000;

const LOG_STEP: u16 = 100;

/// Receives permille progress updates.
pub trait ProgressSink: Send + Sync {
    /// Record progress in `0..=1000`.
    fn update(&self, permille: u16);
}

/// Permille for `count` bytes out of `total`; `None` when `total` is zero.
#[must_use]
pub fn permille(count: u64, total: u64) -> Option<u16> {
    if total == 0 {
        return None;
    }
    let value = (u128::from(count) * 1000 / u128::from(total)).min(u128::from(PERMILLE_COMPLETE));
    u16::try_from(value).ok()
}

/// Counts bytes read from `inner` and reports them to an optional sink.
pub struct ProgressReader<R> {
    inner: R,
    sink: Option<Arc<dyn ProgressSink>>,
    total: u64,
    count: u64,
}

impl<R: Read> ProgressReader<R> {
    /// Track reads from `inner` against `total` bytes.
    pub fn new(inner: R, sink: Option<Arc<dyn ProgressSink>>, total: u64) -> Self {
        Self {
            inner,
            sink,
            total,
            count: 0,
        }
    }

    /// Start counting from `offset`, for streams that continue an earlier one.
    #[must_use]
    pub fn starting_at(mut self, offset: u64) -> Self {
        self.count = offset.min(self.total.saturating_add(1));
        self
    }

    /// Bytes counted so far, clamped to `total + 1`.
    #[must_use]
    pub const fn count(&self) -> u64 {
        self.count
    }
}

impl<R: Read> Read for ProgressReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let read = self.inner.read(buf)?;
        if read > 0 {
            self.count = self
                .count
                .saturating_add(read as u64)
                .min(self.total.saturating_add(1));
            if let (Some(sink), Some(value)) = (&self.sink, permille(self.count, self.total)) {
                sink.update(value);
            }
        }
        Ok(read)
    }
}

/// Emits a `debug!` event each time progress crosses another 10%.
#[derive(Debug)]
pub struct LoggingProgress {
    label: String,
    last_step: AtomicU16,
}

impl LoggingProgress {
    /// Observer that logs under `label`.
    #[must_use]
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            last_step: AtomicU16::new(0),
        }
    }
}

impl ProgressSink for LoggingProgress {
    fn update(&self, permille: u16) {
        let step = permille / LOG_STEP;
        let previous = self.last_step.fetch_max(step, Ordering::AcqRel);
        if step > previous {
            debug!(entry = %self.label, percent = step * 10, "entry progress");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<u16>>);

    impl ProgressSink for Recorder {
        fn update(&self, permille: u16) {
            self.0.lock().expect("recorder lock").push(permille);
        }
    }

    #[test]
    fn overshooting_reads_end_at_complete() {
        let recorder = Arc::new(Recorder::default());
        let sink: Arc<dyn ProgressSink> = recorder.clone();
        let mut reader = ProgressReader::new(Cursor::new(vec![7u8; 120]), Some(sink), 100);
        let mut chunk = [0u8; 30];
        for _ in 0..4 {
            assert_eq!(reader.read(&mut chunk).expect("read"), 30);
        }
        let seen = recorder.0.lock().expect("recorder lock").clone();
        assert_eq!(seen, vec![300, 600, 900, 1000]);
        assert!(seen.windows(2).all(|pair| pair[0] <= pair[1]));
        assert_eq!(reader.count(), 101);
    }

    #[test]
    fn zero_total_reports_nothing() {
        let recorder = Arc::new(Recorder::default());
        let sink: Arc<dyn ProgressSink> = recorder.clone();
        let mut reader = ProgressReader::new(Cursor::new(b"abc".to_vec()), Some(sink), 0);
        let mut out = Vec::new();
        reader.read_to_end(&mut out).expect("read");
        assert_eq!(out, b"abc");
        assert!(recorder.0.lock().expect("recorder lock").is_empty());
    }

    #[test]
    fn offset_continues_previous_stream() {
        let recorder = Arc::new(Recorder::default());
        let sink: Arc<dyn ProgressSink> = recorder.clone();
        let mut reader =
            ProgressReader::new(Cursor::new(vec![0u8; 50]), Some(sink), 200).starting_at(100);
        let mut out = Vec::new();
        reader.read_to_end(&mut out).expect("read");
        assert_eq!(recorder.0.lock().expect("recorder lock").last(), Some(&750));
    }

    #[test]
    fn permille_clamps() {
        assert_eq!(permille(0, 10), Some(0));
        assert_eq!(permille(11, 10), Some(1000));
        assert_eq!(permille(1, 0), None);
    }

    #[test]
    fn logging_progress_tracks_steps() {
        let progress = LoggingProgress::new("a.txt");
        progress.update(150);
        progress.update(120);
        progress.update(1000);
        assert_eq!(progress.last_step.load(Ordering::Acquire), 10);
    }
}
