//! Shared types for dockscope
//!
//! This crate contains data structures used across multiple dockscope crates:
//! container snapshots produced by the telemetry collector and log lines
//! produced by the log pipeline.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

// ============================================================================
// Container Types
// ============================================================================

/// Opaque container identifier as reported by the runtime
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ContainerId(String);

impl ContainerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short form (first 12 characters), as shown by `docker ps`
    pub fn short(&self) -> &str {
        match self.0.char_indices().nth(12) {
            Some((idx, _)) => &self.0[..idx],
            None => &self.0,
        }
    }
}

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ContainerId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ContainerId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerStatus {
    Running,
    Paused,
    Stopped,
    Restarting,
    #[default]
    Unknown,
}

impl From<&str> for ContainerStatus {
    fn from(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "running" => Self::Running,
            "paused" => Self::Paused,
            "restarting" => Self::Restarting,
            "created" | "exited" | "dead" | "stopped" => Self::Stopped,
            _ => Self::Unknown,
        }
    }
}

impl ContainerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Stopped => "stopped",
            Self::Restarting => "restarting",
            Self::Unknown => "unknown",
        }
    }
}

/// One point-in-time measurement of a container
///
/// Snapshots are never patched: every tick builds new ones and shares them
/// behind an `Arc`. `None` in a usage field means "unknown", never zero.
#[derive(Clone, Debug, Serialize)]
pub struct ContainerSnapshot {
    pub id: ContainerId,
    pub name: String,
    pub image: String,
    pub status: ContainerStatus,

    /// CPU usage in percent of one core (may exceed 100 on multi-core hosts)
    pub cpu_percent: Option<f64>,

    /// Memory usage in percent of the limit, within [0, 100]
    pub mem_percent: Option<f64>,
    pub mem_usage: Option<u64>,
    pub mem_limit: Option<u64>,

    /// Cumulative network counters across all interfaces
    pub net_rx: Option<u64>,
    pub net_tx: Option<u64>,

    /// Bytes per second since the previous reading
    pub net_rx_rate: Option<f64>,
    pub net_tx_rate: Option<f64>,

    pub created_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,

    /// Time since start, only for running containers
    pub uptime: Option<Duration>,

    pub collected_at: DateTime<Utc>,
}

impl ContainerSnapshot {
    /// A snapshot with identity only and every measurement unknown
    pub fn new(id: ContainerId, collected_at: DateTime<Utc>) -> Self {
        Self {
            id,
            name: String::new(),
            image: String::new(),
            status: ContainerStatus::Unknown,
            cpu_percent: None,
            mem_percent: None,
            mem_usage: None,
            mem_limit: None,
            net_rx: None,
            net_tx: None,
            net_rx_rate: None,
            net_tx_rate: None,
            created_at: None,
            started_at: None,
            uptime: None,
            collected_at,
        }
    }

    pub fn is_running(&self) -> bool {
        self.status == ContainerStatus::Running
    }
}

// ============================================================================
// Collection Results
// ============================================================================

/// Why a container has no fresh snapshot this tick
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum CollectionError {
    #[error("timed out waiting for the runtime")]
    Timeout,

    #[error("runtime unreachable: {0}")]
    Unreachable(String),

    #[error("container not found")]
    NotFound,

    /// The previous query for this container has not finished yet
    #[error("previous query still in flight")]
    InFlight,
}

impl CollectionError {
    /// Permanent errors remove the container from the active set
    pub fn is_permanent(&self) -> bool {
        matches!(self, Self::NotFound)
    }
}

/// Per-container outcome of one collection tick
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum CollectionEntry {
    Fresh {
        snapshot: Arc<ContainerSnapshot>,
    },
    /// The last good snapshot, reused because this tick's query failed
    Stale {
        snapshot: Arc<ContainerSnapshot>,
        cause: CollectionError,
    },
    Failed {
        error: CollectionError,
    },
}

impl CollectionEntry {
    pub fn snapshot(&self) -> Option<&Arc<ContainerSnapshot>> {
        match self {
            Self::Fresh { snapshot } | Self::Stale { snapshot, .. } => Some(snapshot),
            Self::Failed { .. } => None,
        }
    }

    pub fn error(&self) -> Option<&CollectionError> {
        match self {
            Self::Fresh { .. } => None,
            Self::Stale { cause, .. } => Some(cause),
            Self::Failed { error } => Some(error),
        }
    }

    pub fn is_stale(&self) -> bool {
        matches!(self, Self::Stale { .. })
    }

    pub fn is_fresh(&self) -> bool {
        matches!(self, Self::Fresh { .. })
    }
}

/// Mapping of container id to outcome, one entry per requested id
#[derive(Clone, Debug, Default, Serialize)]
#[serde(transparent)]
pub struct CollectionResult {
    entries: BTreeMap<ContainerId, CollectionEntry>,
}

impl CollectionResult {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the outcome for a container, replacing any earlier one
    pub fn insert(&mut self, id: ContainerId, entry: CollectionEntry) {
        self.entries.insert(id, entry);
    }

    pub fn get(&self, id: &ContainerId) -> Option<&CollectionEntry> {
        self.entries.get(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ContainerId, &CollectionEntry)> {
        self.entries.iter()
    }

    pub fn ids(&self) -> impl Iterator<Item = &ContainerId> {
        self.entries.keys()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn fresh_count(&self) -> usize {
        self.entries.values().filter(|e| e.is_fresh()).count()
    }

    pub fn stale_count(&self) -> usize {
        self.entries.values().filter(|e| e.is_stale()).count()
    }

    pub fn failed_count(&self) -> usize {
        self.entries
            .values()
            .filter(|e| matches!(e, CollectionEntry::Failed { .. }))
            .count()
    }

    /// Ids whose error is permanent
    pub fn permanently_failed(&self) -> Vec<ContainerId> {
        self.entries
            .iter()
            .filter(|(_, e)| e.error().is_some_and(CollectionError::is_permanent))
            .map(|(id, _)| id.clone())
            .collect()
    }
}

// ============================================================================
// Log Types
// ============================================================================

/// Log severity level
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
    Fatal,
    /// A level word no alias table knows, kept lower-cased
    Other(String),
}

impl LogLevel {
    /// Parse a known level word or alias, case-insensitively
    pub fn from_word(s: &str) -> Option<Self> {
        let level = match s.to_ascii_lowercase().as_str() {
            "trace" | "trc" | "trce" => Self::Trace,
            "debug" | "dbg" | "debg" => Self::Debug,
            "info" | "inf" | "information" => Self::Info,
            "warn" | "warning" | "wrn" => Self::Warn,
            "error" | "err" | "erro" => Self::Error,
            "fatal" | "panic" | "critical" | "crit" | "ftl" => Self::Fatal,
            _ => return None,
        };
        Some(level)
    }

    /// Parse any level value, keeping unknown words as `Other`
    pub fn parse(s: &str) -> Option<Self> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return None;
        }
        Some(Self::from_word(trimmed).unwrap_or_else(|| Self::Other(trimmed.to_lowercase())))
    }

    /// Numeric levels as used by bunyan/pino
    pub fn from_numeric(n: u64) -> Self {
        match n {
            0..=10 => Self::Trace,
            11..=20 => Self::Debug,
            21..=30 => Self::Info,
            31..=40 => Self::Warn,
            41..=50 => Self::Error,
            _ => Self::Fatal,
        }
    }

    /// Canonical lower-case name
    pub fn as_str(&self) -> &str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
            Self::Fatal => "fatal",
            Self::Other(s) => s,
        }
    }

    /// Upper-case label used in canonical text
    pub fn label(&self) -> String {
        self.as_str().to_uppercase()
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, Self::Other(_))
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which recognizer produced a normalized line
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LineFormat {
    Canonical,
    Json,
    KeyValue,
    TimestampPrefixed,
    BracketedLevel,
    Passthrough,
}

/// Canonical form of one raw log line
#[derive(Clone, Debug, PartialEq)]
pub struct NormalizedLine {
    /// Rendered canonical text (the raw text itself for passthrough)
    pub text: String,

    /// `MM-DD|HH:MM:SS.mmm`, unset when no timestamp was recognized
    pub timestamp: Option<String>,
    pub level: Option<LogLevel>,
    pub component: Option<String>,
    pub message: Option<String>,

    /// Remaining structured fields in output order
    pub fields: Vec<(String, String)>,

    pub format: LineFormat,
}

impl NormalizedLine {
    pub fn passthrough(text: String) -> Self {
        Self {
            text,
            timestamp: None,
            level: None,
            component: None,
            message: None,
            fields: Vec::new(),
            format: LineFormat::Passthrough,
        }
    }

    pub fn is_passthrough(&self) -> bool {
        self.format == LineFormat::Passthrough
    }

    /// Look up an extra field by key
    pub fn field(&self, key: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// Which text of a line the search engine looks at
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum TextView {
    Raw,
    #[default]
    Normalized,
}

/// A single indexed log line
#[derive(Clone, Debug)]
pub struct LogLine {
    /// Strictly increasing within one stream, never reused
    pub index: u64,

    /// Original text, continuation lines joined with `\n`
    pub raw: String,

    pub normalized: NormalizedLine,

    /// Timestamp the runtime attached to the line, if it sent one
    pub received_at: Option<DateTime<Utc>>,

    /// Number of continuation lines merged into this one
    pub continuations: usize,
}

impl LogLine {
    pub fn text(&self, view: TextView) -> &str {
        match view {
            TextView::Raw => &self.raw,
            TextView::Normalized => &self.normalized.text,
        }
    }
}

/// Shared handle to an immutable log line
pub type ArcLogLine = Arc<LogLine>;

// ============================================================================
// Stream Types
// ============================================================================

/// Terminal failure of a log stream
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum StreamError {
    #[error("container not found")]
    NotFound,

    #[error("connection to the runtime was lost: {0}")]
    Disconnected(String),

    #[error("runtime error: {0}")]
    Runtime(String),
}

/// Lifecycle of one open log stream
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub enum StreamStatus {
    /// Replaying history or following
    #[default]
    Streaming,
    /// History-only stream delivered everything
    Complete,
    /// Follow stream closed by the runtime (container stopped)
    Ended,
    /// Closed by the caller
    Cancelled,
    Failed(StreamError),
}

impl StreamStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Streaming)
    }
}
