//! Progress accounting for a single in-flight file transfer.
//!
//! A [`Transfer`] lives only for the duration of one FILE frame's body and is
//! owned by whichever task moves the bytes (the read loop when receiving, the
//! outbound worker when sending).  [`ProgressThrottle`] bounds how often the
//! owner reports progress to the observer.

use std::time::{Duration, Instant};

/// Default chunk size for reading and writing file bodies.
pub const DEFAULT_CHUNK_SIZE: usize = 8 * 1024;

/// Name used when a received file name has no usable final component.
pub const FALLBACK_FILE_NAME: &str = "received.bin";

/// Byte accounting for one file moving over a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transfer {
    file_name: String,
    total_size: u64,
    bytes_moved: u64,
}

impl Transfer {
    pub fn new(file_name: impl Into<String>, total_size: u64) -> Self {
        Self {
            file_name: file_name.into(),
            total_size,
            bytes_moved: 0,
        }
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    pub fn bytes_moved(&self) -> u64 {
        self.bytes_moved
    }

    /// Bytes still expected before the transfer is complete.
    pub fn remaining(&self) -> u64 {
        self.total_size.saturating_sub(self.bytes_moved)
    }

    /// Size of the next chunk to move: at most `chunk_size`, never past the end.
    pub fn next_chunk_len(&self, chunk_size: usize) -> usize {
        // remaining() may exceed usize on 32-bit targets, chunk_size never does.
        usize::try_from(self.remaining()).map_or(chunk_size, |r| r.min(chunk_size))
    }

    /// Records `n` more bytes as moved.
    pub fn advance(&mut self, n: usize) {
        self.bytes_moved = self.bytes_moved.saturating_add(n as u64);
    }

    pub fn is_complete(&self) -> bool {
        self.bytes_moved >= self.total_size
    }

    /// Completion percentage in `0..=100`.
    ///
    /// An empty file is complete from the start and reports 100.
    pub fn percent(&self) -> u8 {
        if self.total_size == 0 {
            return 100;
        }
        let moved = self.bytes_moved.min(self.total_size) as u128;
        ((moved * 100) / self.total_size as u128) as u8
    }
}

/// Rate limiter for progress callbacks.
///
/// The first call always reports; afterwards a report is allowed once at
/// least `interval` has passed since the previous one.
#[derive(Debug, Clone)]
pub struct ProgressThrottle {
    interval: Duration,
    last_report: Option<Instant>,
}

impl ProgressThrottle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_report: None,
        }
    }

    /// Returns `true` (and arms the next interval) if a report is due.
    pub fn should_report(&mut self) -> bool {
        self.should_report_at(Instant::now())
    }

    /// Like [`should_report`](Self::should_report) with an explicit clock.
    pub fn should_report_at(&mut self, now: Instant) -> bool {
        let due = self
            .last_report
            .map_or(true, |last| now.saturating_duration_since(last) >= self.interval);
        if due {
            self.last_report = Some(now);
        }
        due
    }
}

/// Reduces a file name received from a peer to a safe final path component.
///
/// Both `/` and `\` count as separators regardless of platform, so a peer
/// cannot steer the write outside the download directory.  Empty names and
/// `.`/`..` become [`FALLBACK_FILE_NAME`].
pub fn sanitize_file_name(raw: &str) -> String {
    let last = raw
        .rsplit(|c: char| c == '/' || c == '\\')
        .next()
        .unwrap_or_default()
        .trim();
    match last {
        "" | "." | ".." => FALLBACK_FILE_NAME.to_string(),
        name => name.to_string(),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
