use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use tokio::sync::watch;

use crate::normalize::{ContinuationRule, Normalizer, strip_ansi};
use dockscope_types::{ArcLogLine, LogLevel, LogLine, StreamStatus};

/// Immutable view of a buffer at one point in time
///
/// Lines are contiguous by index: `lines[i].index == first_index() + i`.
#[derive(Clone, Debug, Default)]
pub struct LogSnapshot {
    lines: Vec<ArcLogLine>,
    next_index: u64,
    dropped: u64,
    status: StreamStatus,
    revision: u64,
    stream_id: u64,
}

impl LogSnapshot {
    pub fn lines(&self) -> &[ArcLogLine] {
        &self.lines
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Index of the oldest retained line
    pub fn first_index(&self) -> u64 {
        self.lines.first().map_or(self.next_index, |l| l.index)
    }

    /// Index the next appended line will get
    pub fn next_index(&self) -> u64 {
        self.next_index
    }

    /// Lines evicted so far to stay within capacity
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub fn status(&self) -> &StreamStatus {
        &self.status
    }

    /// Bumped on every publish
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Distinct for every buffer; indices are only comparable within one
    pub fn stream_id(&self) -> u64 {
        self.stream_id
    }

    pub fn get(&self, index: u64) -> Option<&ArcLogLine> {
        let offset = index.checked_sub(self.first_index())?;
        self.lines.get(usize::try_from(offset).ok()?)
    }

    /// Retained lines with an index of at least `index`
    pub fn since(&self, index: u64) -> &[ArcLogLine] {
        let offset = index.saturating_sub(self.first_index());
        let start = usize::try_from(offset).map_or(self.lines.len(), |o| o.min(self.lines.len()));
        &self.lines[start..]
    }

    /// Get the last N lines
    pub fn tail(&self, n: usize) -> &[ArcLogLine] {
        &self.lines[self.lines.len().saturating_sub(n)..]
    }

    /// Get lines by position (for virtual scrolling)
    pub fn range(&self, start: usize, count: usize) -> &[ArcLogLine] {
        let start = start.min(self.lines.len());
        let end = start.saturating_add(count).min(self.lines.len());
        &self.lines[start..end]
    }

    /// Lines at or above a severity; lines without a known level are skipped
    pub fn by_level(&self, min_level: &LogLevel) -> Vec<ArcLogLine> {
        let Some(min_ord) = level_ordinal(min_level) else {
            return Vec::new();
        };
        self.lines
            .iter()
            .filter(|l| {
                l.normalized
                    .level
                    .as_ref()
                    .and_then(level_ordinal)
                    .is_some_and(|ord| ord >= min_ord)
            })
            .cloned()
            .collect()
    }

    /// Get line count per log level
    pub fn level_counts(&self) -> LevelCounts {
        let mut counts = LevelCounts::default();

        for line in &self.lines {
            match &line.normalized.level {
                Some(LogLevel::Trace) => counts.trace += 1,
                Some(LogLevel::Debug) => counts.debug += 1,
                Some(LogLevel::Info) => counts.info += 1,
                Some(LogLevel::Warn) => counts.warn += 1,
                Some(LogLevel::Error) => counts.error += 1,
                Some(LogLevel::Fatal) => counts.fatal += 1,
                Some(LogLevel::Other(_)) | None => counts.unknown += 1,
            }
        }

        counts
    }

    /// Export all lines as raw text
    pub fn export_raw(&self) -> String {
        self.lines
            .iter()
            .map(|l| l.raw.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Counts per log level
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LevelCounts {
    pub trace: usize,
    pub debug: usize,
    pub info: usize,
    pub warn: usize,
    pub error: usize,
    pub fatal: usize,
    pub unknown: usize,
}

impl LevelCounts {
    pub fn total(&self) -> usize {
        self.trace + self.debug + self.info + self.warn + self.error + self.fatal + self.unknown
    }
}

/// Get ordinal for log level comparison
fn level_ordinal(level: &LogLevel) -> Option<u8> {
    match level {
        LogLevel::Trace => Some(0),
        LogLevel::Debug => Some(1),
        LogLevel::Info => Some(2),
        LogLevel::Warn => Some(3),
        LogLevel::Error => Some(4),
        LogLevel::Fatal => Some(5),
        LogLevel::Other(_) => None,
    }
}

static NEXT_STREAM_ID: AtomicU64 = AtomicU64::new(1);

/// Single-writer line store for one stream
///
/// The owning worker appends lines and calls [`publish`](Self::publish);
/// readers get a fresh [`LogSnapshot`] on every publish and never block the
/// writer. History lines are never evicted by their own arrival; live lines
/// evict the oldest retained lines once the total exceeds capacity.
pub struct LogBuffer {
    lines: VecDeque<ArcLogLine>,
    capacity: usize,
    next_index: u64,
    dropped: u64,
    status: StreamStatus,
    revision: u64,
    stream_id: u64,
    dirty: bool,
    normalizer: Arc<Normalizer>,
    continuation: ContinuationRule,
    publisher: watch::Sender<Arc<LogSnapshot>>,
}

impl LogBuffer {
    /// Create a buffer and its first reader
    pub fn new(
        capacity: usize,
        normalizer: Arc<Normalizer>,
        continuation: ContinuationRule,
    ) -> (Self, LogBufferReader) {
        let stream_id = NEXT_STREAM_ID.fetch_add(1, Ordering::Relaxed);
        let (publisher, rx) = watch::channel(Arc::new(LogSnapshot {
            stream_id,
            ..LogSnapshot::default()
        }));
        let buffer = Self {
            lines: VecDeque::new(),
            capacity: capacity.max(1),
            next_index: 0,
            dropped: 0,
            status: StreamStatus::Streaming,
            revision: 0,
            stream_id,
            dirty: false,
            normalizer,
            continuation,
            publisher,
        };
        (buffer, LogBufferReader { rx })
    }

    /// Append a replayed line; it never triggers eviction
    pub fn push_history(&mut self, raw: &str, received_at: Option<DateTime<Utc>>) {
        self.append(raw, received_at);
    }

    /// Append a newly produced line, evicting the oldest lines over capacity
    pub fn push_live(&mut self, raw: &str, received_at: Option<DateTime<Utc>>) {
        self.append(raw, received_at);
        while self.lines.len() > self.capacity {
            self.lines.pop_front();
            self.dropped += 1;
        }
    }

    fn append(&mut self, raw: &str, received_at: Option<DateTime<Utc>>) {
        self.dirty = true;

        let stripped = strip_ansi(raw);
        if self.continuation.is_continuation(&stripped) {
            if let Some(last) = self.lines.back_mut() {
                *last = Arc::new(merge_continuation(last, raw, &stripped));
                return;
            }
        }

        let line = LogLine {
            index: self.next_index,
            raw: raw.to_string(),
            normalized: self.normalizer.normalize(raw),
            received_at,
            continuations: 0,
        };
        self.next_index += 1;
        self.lines.push_back(Arc::new(line));
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Record a status change and publish it
    pub fn set_status(&mut self, status: StreamStatus) {
        self.status = status;
        self.dirty = true;
        self.publish();
    }

    /// Publish a snapshot if anything changed since the last one
    pub fn publish(&mut self) {
        if !self.dirty {
            return;
        }
        self.dirty = false;
        self.revision += 1;

        let snapshot = LogSnapshot {
            lines: self.lines.iter().cloned().collect(),
            next_index: self.next_index,
            dropped: self.dropped,
            status: self.status.clone(),
            revision: self.revision,
            stream_id: self.stream_id,
        };
        self.publisher.send_replace(Arc::new(snapshot));
    }

    pub fn reader(&self) -> LogBufferReader {
        LogBufferReader {
            rx: self.publisher.subscribe(),
        }
    }
}

/// A continuation joins the previous line; the line keeps its index
fn merge_continuation(previous: &LogLine, raw: &str, stripped: &str) -> LogLine {
    let mut merged = previous.clone();
    merged.raw.push('\n');
    merged.raw.push_str(raw);
    merged.normalized.text.push('\n');
    merged.normalized.text.push_str(stripped);
    if let Some(message) = merged.normalized.message.as_mut() {
        message.push('\n');
        message.push_str(stripped);
    }
    merged.continuations += 1;
    merged
}

/// Read side of a [`LogBuffer`]
#[derive(Clone, Debug)]
pub struct LogBufferReader {
    rx: watch::Receiver<Arc<LogSnapshot>>,
}

impl LogBufferReader {
    /// The most recently published snapshot
    pub fn snapshot(&self) -> Arc<LogSnapshot> {
        self.rx.borrow().clone()
    }

    /// Wait for the next publish
    ///
    /// Returns `false` once the writer is gone and no newer snapshot will
    /// ever arrive.
    pub async fn changed(&mut self) -> bool {
        self.rx.changed().await.is_ok()
    }

    /// Latest snapshot, marking it as seen
    pub fn latest(&mut self) -> Arc<LogSnapshot> {
        self.rx.borrow_and_update().clone()
    }
}
