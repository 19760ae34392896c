//! Docker implementation of the runtime seam

use std::time::Duration;

use async_trait::async_trait;
use bollard::Docker;
use bollard::container::{
    InspectContainerOptions, ListContainersOptions, LogsOptions, RestartContainerOptions,
    StartContainerOptions, Stats, StatsOptions, StopContainerOptions,
};
use chrono::{DateTime, Utc};
use futures::StreamExt;
use tracing::debug;

use crate::runtime::{
    ContainerAction, ContainerDetails, ContainerRuntime, CpuCounter, LogChunkStream, LogRequest,
    RawStats,
};
use crate::RuntimeError;
use dockscope_types::{ContainerId, ContainerStatus};

/// Docker Engine API client
pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    /// Connect to the daemon at `socket`, or to the local defaults
    /// (`DOCKER_HOST` or `/var/run/docker.sock`)
    pub fn connect(socket: Option<&str>, timeout: Duration) -> Result<Self, RuntimeError> {
        let docker = match socket {
            Some(path) => {
                Docker::connect_with_socket(path, timeout.as_secs(), bollard::API_DEFAULT_VERSION)?
            }
            None => Docker::connect_with_local_defaults()?,
        };

        Ok(Self {
            docker: docker.with_timeout(timeout),
        })
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn list_containers(&self) -> Result<Vec<ContainerId>, RuntimeError> {
        let options = ListContainersOptions::<String> {
            all: true,
            ..Default::default()
        };

        let containers = self.docker.list_containers(Some(options)).await?;

        Ok(containers
            .into_iter()
            .filter_map(|c| c.id)
            .map(ContainerId::from)
            .collect())
    }

    async fn inspect(&self, id: &ContainerId) -> Result<ContainerDetails, RuntimeError> {
        let response = self
            .docker
            .inspect_container(id.as_str(), None::<InspectContainerOptions>)
            .await?;

        let name = response
            .name
            .as_deref()
            .unwrap_or_default()
            .trim_start_matches('/')
            .to_string();

        let image = response
            .config
            .as_ref()
            .and_then(|c| c.image.clone())
            .or_else(|| response.image.clone())
            .unwrap_or_default();

        let state = response.state.as_ref();
        let status = state
            .and_then(|s| s.status.as_ref())
            .map(|s| ContainerStatus::from(s.to_string().as_str()))
            .unwrap_or_default();

        Ok(ContainerDetails {
            id: response.id.map(ContainerId::from).unwrap_or_else(|| id.clone()),
            name,
            image,
            status,
            created_at: response.created.as_deref().and_then(parse_docker_time),
            started_at: state
                .and_then(|s| s.started_at.as_deref())
                .and_then(parse_docker_time),
        })
    }

    async fn stats(&self, id: &ContainerId) -> Result<RawStats, RuntimeError> {
        let options = StatsOptions {
            stream: false,
            one_shot: true,
        };

        let mut stream = self.docker.stats(id.as_str(), Some(options));
        match stream.next().await {
            Some(result) => Ok(convert_stats(&result?)),
            None => Err(RuntimeError::Unreachable(format!(
                "stats stream for {} returned no data",
                id.short()
            ))),
        }
    }

    fn logs(&self, id: &ContainerId, request: LogRequest) -> LogChunkStream {
        let options = LogsOptions::<String> {
            follow: request.follow,
            stdout: true,
            stderr: true,
            timestamps: request.timestamps,
            tail: request
                .tail
                .map(|n| n.to_string())
                .unwrap_or_else(|| "all".to_string()),
            ..Default::default()
        };

        debug!(container = %id, ?request, "opening docker log stream");

        self.docker
            .logs(id.as_str(), Some(options))
            .map(|item| {
                item.map(|output| String::from_utf8_lossy(&output.into_bytes()).into_owned())
                    .map_err(RuntimeError::from)
            })
            .boxed()
    }

    async fn apply(&self, id: &ContainerId, action: ContainerAction) -> Result<(), RuntimeError> {
        let name = id.as_str();
        match action {
            ContainerAction::Start => {
                self.docker
                    .start_container(name, None::<StartContainerOptions<String>>)
                    .await?
            }
            ContainerAction::Stop => {
                self.docker
                    .stop_container(name, None::<StopContainerOptions>)
                    .await?
            }
            ContainerAction::Pause => self.docker.pause_container(name).await?,
            ContainerAction::Unpause => self.docker.unpause_container(name).await?,
            ContainerAction::Restart => {
                self.docker
                    .restart_container(name, None::<RestartContainerOptions>)
                    .await?
            }
        }
        Ok(())
    }
}

/// Extract cumulative counters from a Docker stats reading
fn convert_stats(stats: &Stats) -> RawStats {
    let cpu = &stats.cpu_stats;
    let online_cpus = cpu
        .online_cpus
        .filter(|n| *n > 0)
        .or_else(|| {
            cpu.cpu_usage
                .percpu_usage
                .as_ref()
                .map(|v| v.len() as u64)
                .filter(|n| *n > 0)
        })
        .unwrap_or(1);

    let (net_rx, net_tx) = match &stats.networks {
        Some(networks) => {
            let (rx, tx) = networks
                .values()
                .fold((0u64, 0u64), |(rx, tx), n| (rx + n.rx_bytes, tx + n.tx_bytes));
            (Some(rx), Some(tx))
        }
        None => (None, None),
    };

    RawStats {
        cpu: Some(CpuCounter::Cumulative {
            total_ns: cpu.cpu_usage.total_usage,
            system_ns: cpu.system_cpu_usage,
            online_cpus: online_cpus as u32,
        }),
        mem_usage: stats.memory_stats.usage,
        mem_limit: stats.memory_stats.limit,
        net_rx,
        net_tx,
    }
}

/// Docker reports "0001-01-01T00:00:00Z" for times that never happened
fn parse_docker_time(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|t| t.with_timezone(&Utc))
        .filter(|t| t.timestamp() > 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_docker_time() {
        assert!(parse_docker_time("2024-01-15T10:30:00.123456789Z").is_some());
        assert!(parse_docker_time("0001-01-01T00:00:00Z").is_none());
        assert!(parse_docker_time("").is_none());
    }
}
