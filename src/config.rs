//! TOML configuration file
//!
//! Every section and key is optional; missing values take the defaults
//! shown in [`Config::default`].

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use regex::Regex;
use serde::Deserialize;

use dockscope_logs::{ContinuationRule, Normalizer, Recognizer, StreamConfig};
use dockscope_telemetry::PollerConfig;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("invalid value for {key}: {message}")]
    Invalid { key: &'static str, message: String },
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub docker: DockerConfig,
    pub telemetry: TelemetryConfig,
    pub logs: LogsConfig,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DockerConfig {
    /// Unix socket of the daemon; local defaults when unset
    pub socket: Option<String>,
    pub timeout_secs: u64,
}

impl Default for DockerConfig {
    fn default() -> Self {
        Self {
            socket: None,
            timeout_secs: 10,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TelemetryConfig {
    pub interval_ms: u64,
    pub deadline_ms: u64,
    pub max_concurrency: usize,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            interval_ms: 2000,
            deadline_ms: 1500,
            max_concurrency: 10,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LogsConfig {
    pub history_lines: usize,
    pub buffer_capacity: usize,
    /// Show normalized text unless `--raw` is given
    pub normalize: bool,
    pub continuation: ContinuationSetting,
    /// Recognizer names in trial order; the built-in order when unset
    pub recognizers: Option<Vec<String>>,
}

impl Default for LogsConfig {
    fn default() -> Self {
        Self {
            history_lines: 500,
            buffer_capacity: 10_000,
            normalize: true,
            continuation: ContinuationSetting::default(),
            recognizers: None,
        }
    }
}

/// `continuation = "default" | "never" | "indented"` or `{ pattern = "..." }`
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum ContinuationSetting {
    Named(String),
    Pattern { pattern: String },
}

impl Default for ContinuationSetting {
    fn default() -> Self {
        Self::Named("default".to_string())
    }
}

impl ContinuationSetting {
    pub fn to_rule(&self) -> Result<ContinuationRule, ConfigError> {
        match self {
            Self::Named(name) => match name.to_ascii_lowercase().as_str() {
                "default" | "stacktrace" | "stack_trace" => Ok(ContinuationRule::StackTrace),
                "never" | "none" => Ok(ContinuationRule::Never),
                "indented" => Ok(ContinuationRule::Indented),
                other => Err(ConfigError::Invalid {
                    key: "logs.continuation",
                    message: format!("unknown rule '{other}'"),
                }),
            },
            Self::Pattern { pattern } => Regex::new(pattern)
                .map(ContinuationRule::Pattern)
                .map_err(|e| ConfigError::Invalid {
                    key: "logs.continuation",
                    message: e.to_string(),
                }),
        }
    }
}

impl Config {
    /// Load from `path`, or from the default location when `None`
    ///
    /// An explicit path must exist. A missing file at the default location
    /// yields the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::read(path),
            None => match default_path() {
                Some(path) if path.exists() => Self::read(&path),
                _ => Ok(Self::default()),
            },
        }
    }

    fn read(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn docker_timeout(&self) -> Duration {
        Duration::from_secs(self.docker.timeout_secs.max(1))
    }

    pub fn poller_config(&self) -> PollerConfig {
        let interval = Duration::from_millis(self.telemetry.interval_ms.max(1));
        // A cycle's queries must finish before the next cycle starts
        let deadline = Duration::from_millis(self.telemetry.deadline_ms.max(1)).min(interval);
        PollerConfig { interval, deadline }
    }

    pub fn stream_config(&self) -> Result<StreamConfig, ConfigError> {
        let normalizer = match &self.logs.recognizers {
            Some(names) => {
                let recognizers = names
                    .iter()
                    .map(|name| {
                        Recognizer::from_name(name).ok_or_else(|| ConfigError::Invalid {
                            key: "logs.recognizers",
                            message: format!("unknown recognizer '{name}'"),
                        })
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                Normalizer::new(recognizers)
            }
            None => Normalizer::default(),
        };

        Ok(StreamConfig {
            history_lines: self.logs.history_lines,
            buffer_capacity: self.logs.buffer_capacity.max(1),
            normalizer: Arc::new(normalizer),
            continuation: self.logs.continuation.to_rule()?,
        })
    }
}

/// `$XDG_CONFIG_HOME/dockscope/config.toml`, falling back to `~/.config`
pub fn default_path() -> Option<PathBuf> {
    let base = std::env::var_os("XDG_CONFIG_HOME")
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".config")))?;
    Some(base.join("dockscope").join("config.toml"))
}
