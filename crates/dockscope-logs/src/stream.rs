use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::StreamExt;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::buffer::{LogBuffer, LogBufferReader, LogSnapshot};
use crate::normalize::{ContinuationRule, Normalizer};
use dockscope_runtime::{ContainerRuntime, LogChunkStream, LogRequest};
use dockscope_types::{ContainerId, StreamStatus};

/// Settings shared by every stream a manager opens
#[derive(Clone, Debug)]
pub struct StreamConfig {
    /// Historical lines requested when a stream opens
    pub history_lines: usize,
    /// Lines retained per stream once live output starts
    pub buffer_capacity: usize,
    pub normalizer: Arc<Normalizer>,
    pub continuation: ContinuationRule,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            history_lines: 500,
            buffer_capacity: 10_000,
            normalizer: Arc::new(Normalizer::default()),
            continuation: ContinuationRule::default(),
        }
    }
}

/// Handle to one open stream
#[derive(Clone, Debug)]
pub struct LogSession {
    container_id: ContainerId,
    follow: bool,
    reader: LogBufferReader,
}

impl LogSession {
    pub fn container_id(&self) -> &ContainerId {
        &self.container_id
    }

    pub fn follow(&self) -> bool {
        self.follow
    }

    pub fn reader(&self) -> &LogBufferReader {
        &self.reader
    }

    pub fn snapshot(&self) -> Arc<LogSnapshot> {
        self.reader.snapshot()
    }

    /// Wait for new lines or a status change; `false` once the stream is gone
    pub async fn changed(&mut self) -> bool {
        self.reader.changed().await
    }
}

struct StreamWorker {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Manages log streams, at most one per container
pub struct LogStreamManager {
    runtime: Arc<dyn ContainerRuntime>,
    config: StreamConfig,
    workers: HashMap<ContainerId, StreamWorker>,
}

impl LogStreamManager {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, config: StreamConfig) -> Self {
        Self {
            runtime,
            config,
            workers: HashMap::new(),
        }
    }

    /// Open a stream for `id`, replacing any stream already open for it
    ///
    /// The previous worker is cancelled and awaited before the new one is
    /// started, so two workers never write for the same container.
    pub async fn open(&mut self, id: &ContainerId, follow: bool) -> LogSession {
        self.close(id).await;

        let (buffer, reader) = LogBuffer::new(
            self.config.buffer_capacity,
            Arc::clone(&self.config.normalizer),
            self.config.continuation.clone(),
        );
        let request = LogRequest {
            tail: Some(self.config.history_lines),
            follow,
            timestamps: true,
        };

        debug!(container = %id, follow, "opening log stream");
        let chunks = self.runtime.logs(id, request);
        let cancel = CancellationToken::new();
        let worker = StreamReader {
            container_id: id.clone(),
            buffer,
            follow,
            opened_at: Utc::now(),
            history_remaining: self.config.history_lines,
            live: false,
        };
        let task = tokio::spawn(worker.run(chunks, cancel.clone()));

        self.workers
            .insert(id.clone(), StreamWorker { cancel, task });

        LogSession {
            container_id: id.clone(),
            follow,
            reader,
        }
    }

    /// Stop the stream for `id` and wait for its worker to exit
    ///
    /// Returns `false` if no stream was open.
    pub async fn close(&mut self, id: &ContainerId) -> bool {
        let Some(worker) = self.workers.remove(id) else {
            return false;
        };
        worker.cancel.cancel();
        if let Err(e) = worker.task.await {
            warn!(container = %id, error = %e, "log stream worker panicked");
        }
        true
    }

    /// Stop all streams
    pub async fn close_all(&mut self) {
        let ids: Vec<ContainerId> = self.workers.keys().cloned().collect();
        for id in ids {
            self.close(&id).await;
        }
    }

    /// Whether a worker is still running for `id`
    pub fn is_open(&self, id: &ContainerId) -> bool {
        self.workers.get(id).is_some_and(|w| !w.task.is_finished())
    }

    /// Get the number of active streams
    pub fn active_count(&self) -> usize {
        self.workers.values().filter(|w| !w.task.is_finished()).count()
    }
}

impl Drop for LogStreamManager {
    fn drop(&mut self) {
        for worker in self.workers.values() {
            worker.cancel.cancel();
            worker.task.abort();
        }
    }
}

/// Longest a busy stream holds appended lines before publishing them
const PUBLISH_INTERVAL: Duration = Duration::from_millis(50);

/// Owns the buffer for one stream and feeds it from the runtime
struct StreamReader {
    container_id: ContainerId,
    buffer: LogBuffer,
    follow: bool,
    opened_at: DateTime<Utc>,
    /// Lines still expected from the replayed history, for runtimes that
    /// do not timestamp their output
    history_remaining: usize,
    live: bool,
}

impl StreamReader {
    async fn run(mut self, mut chunks: LogChunkStream, cancel: CancellationToken) {
        let mut splitter = LineSplitter::default();
        let mut pacer = PublishPacer::new(PUBLISH_INTERVAL);

        let status = loop {
            let flush_at = pacer.deadline();
            tokio::select! {
                biased;

                _ = cancel.cancelled() => break StreamStatus::Cancelled,

                _ = tokio::time::sleep_until(flush_at.unwrap_or_else(Instant::now)), if flush_at.is_some() => {
                    self.buffer.publish();
                    pacer.published(Instant::now());
                }

                next = chunks.next() => match next {
                    Some(Ok(chunk)) => {
                        for line in splitter.push(&chunk) {
                            self.ingest(&line);
                        }
                        let now = Instant::now();
                        if pacer.appended(now) {
                            self.buffer.publish();
                            pacer.published(now);
                        }
                    }
                    Some(Err(e)) => {
                        warn!(container = %self.container_id, error = %e, "log stream failed");
                        break StreamStatus::Failed(e.into());
                    }
                    None if self.follow => break StreamStatus::Ended,
                    None => break StreamStatus::Complete,
                },
            }
        };

        if let Some(rest) = splitter.finish() {
            self.ingest(&rest);
        }
        debug!(
            container = %self.container_id,
            ?status,
            lines = self.buffer.len(),
            dropped = self.buffer.dropped(),
            "log stream closed"
        );
        self.buffer.set_status(status);
    }

    fn ingest(&mut self, line: &str) {
        let (received_at, text) = split_runtime_timestamp(line);

        if self.follow && !self.live {
            self.live = match received_at {
                Some(at) => at >= self.opened_at,
                None => self.history_remaining == 0,
            };
        }
        self.history_remaining = self.history_remaining.saturating_sub(1);

        if self.live {
            self.buffer.push_live(text, received_at);
        } else {
            self.buffer.push_history(text, received_at);
        }
    }
}

/// Caps how often a stream publishes snapshots
///
/// The first append after a quiet period publishes at once. Appends within
/// `interval` of the last publish wait for the deadline instead.
#[derive(Debug)]
struct PublishPacer {
    interval: Duration,
    last_publish: Option<Instant>,
    pending: bool,
}

impl PublishPacer {
    fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_publish: None,
            pending: false,
        }
    }

    /// Record appended lines; true when they should be published now
    fn appended(&mut self, now: Instant) -> bool {
        match self.last_publish {
            Some(last) if now < last + self.interval => {
                self.pending = true;
                false
            }
            _ => true,
        }
    }

    fn published(&mut self, now: Instant) {
        self.last_publish = Some(now);
        self.pending = false;
    }

    /// When held lines are due, if any are held
    fn deadline(&self) -> Option<Instant> {
        match (self.pending, self.last_publish) {
            (true, Some(last)) => Some(last + self.interval),
            _ => None,
        }
    }
}

/// Reassembles lines from chunks that may split them anywhere
#[derive(Debug, Default)]
struct LineSplitter {
    carry: String,
}

impl LineSplitter {
    /// Complete lines in `chunk`; a trailing partial line is kept
    fn push(&mut self, chunk: &str) -> Vec<String> {
        self.carry.push_str(chunk);
        let Some(last_newline) = self.carry.rfind('\n') else {
            return Vec::new();
        };

        let rest = self.carry.split_off(last_newline + 1);
        let complete = std::mem::replace(&mut self.carry, rest);
        complete
            .split_terminator('\n')
            .map(|l| l.strip_suffix('\r').unwrap_or(l).to_string())
            .collect()
    }

    /// The unterminated final line, if any
    fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.carry);
        let rest = rest.strip_suffix('\r').unwrap_or(&rest);
        (!rest.is_empty()).then(|| rest.to_string())
    }
}

/// Split the RFC3339 timestamp the runtime prefixes to each line
fn split_runtime_timestamp(line: &str) -> (Option<DateTime<Utc>>, &str) {
    // Runtime timestamps are at most ~35 characters
    let end = (0..=line.len().min(40))
        .rev()
        .find(|&i| line.is_char_boundary(i))
        .unwrap_or(0);
    let head = &line[..end];
    if let Some(space) = head.find(' ') {
        if let Ok(ts) = DateTime::parse_from_rfc3339(&line[..space]) {
            return (Some(ts.with_timezone(&Utc)), &line[space + 1..]);
        }
    }
    if let Ok(ts) = DateTime::parse_from_rfc3339(head.trim_end()) {
        if head.len() == line.len() {
            return (Some(ts.with_timezone(&Utc)), "");
        }
    }
    (None, line)
}
