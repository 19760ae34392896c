use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;

use crate::RuntimeError;
use dockscope_types::{ContainerId, ContainerStatus};

/// Result of inspecting a container
#[derive(Clone, Debug)]
pub struct ContainerDetails {
    pub id: ContainerId,
    pub name: String,
    pub image: String,
    pub status: ContainerStatus,
    pub created_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
}

impl ContainerDetails {
    pub fn new(id: ContainerId, name: impl Into<String>, status: ContainerStatus) -> Self {
        Self {
            id,
            name: name.into(),
            image: String::new(),
            status,
            created_at: None,
            started_at: None,
        }
    }

    pub fn with_image(mut self, image: impl Into<String>) -> Self {
        self.image = image.into();
        self
    }

    pub fn with_started_at(mut self, started_at: DateTime<Utc>) -> Self {
        self.started_at = Some(started_at);
        self
    }
}

/// CPU usage as reported by the runtime
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum CpuCounter {
    /// Monotonic counters; percent is derived from two consecutive readings
    Cumulative {
        /// Container CPU time in nanoseconds
        total_ns: u64,
        /// Host CPU time in nanoseconds, when the runtime reports it
        system_ns: Option<u64>,
        online_cpus: u32,
    },
    /// Runtime already computed a percentage over its own window
    Percent(f64),
}

/// One stats reading
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RawStats {
    pub cpu: Option<CpuCounter>,
    pub mem_usage: Option<u64>,
    pub mem_limit: Option<u64>,
    pub net_rx: Option<u64>,
    pub net_tx: Option<u64>,
}

/// Parameters for a log request
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LogRequest {
    /// Historical lines to replay first (`None` = everything)
    pub tail: Option<usize>,
    pub follow: bool,
    /// Ask the runtime to prefix each line with an RFC3339 timestamp
    pub timestamps: bool,
}

impl Default for LogRequest {
    fn default() -> Self {
        Self {
            tail: Some(500),
            follow: false,
            timestamps: true,
        }
    }
}

/// Raw log output; chunks are not guaranteed to end on line boundaries
pub type LogChunkStream = BoxStream<'static, Result<String, RuntimeError>>;

/// Opaque lifecycle actions
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ContainerAction {
    Start,
    Stop,
    Pause,
    Unpause,
    Restart,
}

impl ContainerAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Pause => "pause",
            Self::Unpause => "unpause",
            Self::Restart => "restart",
        }
    }
}

impl fmt::Display for ContainerAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContainerAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "start" => Ok(Self::Start),
            "stop" => Ok(Self::Stop),
            "pause" => Ok(Self::Pause),
            "unpause" | "resume" => Ok(Self::Unpause),
            "restart" => Ok(Self::Restart),
            other => Err(format!("unknown action '{other}'")),
        }
    }
}

/// The container runtime as seen by the collector and the log reader
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Ids of all containers, running or not
    async fn list_containers(&self) -> Result<Vec<ContainerId>, RuntimeError>;

    async fn inspect(&self, id: &ContainerId) -> Result<ContainerDetails, RuntimeError>;

    /// A single stats reading (no streaming)
    async fn stats(&self, id: &ContainerId) -> Result<RawStats, RuntimeError>;

    /// Historical and optionally followed log output
    fn logs(&self, id: &ContainerId, request: LogRequest) -> LogChunkStream;

    async fn apply(&self, id: &ContainerId, action: ContainerAction) -> Result<(), RuntimeError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_parse() {
        assert_eq!("Stop".parse::<ContainerAction>(), Ok(ContainerAction::Stop));
        assert_eq!(
            "resume".parse::<ContainerAction>(),
            Ok(ContainerAction::Unpause)
        );
        assert!("recreate".parse::<ContainerAction>().is_err());
    }
}
