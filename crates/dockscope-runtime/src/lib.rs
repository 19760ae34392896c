//! Container runtime access for dockscope
//!
//! This crate defines the [`ContainerRuntime`] seam the telemetry collector
//! and log reader are written against, and the Docker implementation of it.

mod docker;
mod error;
#[cfg(any(test, feature = "mock"))]
pub mod mock;
mod runtime;

pub use docker::DockerRuntime;
pub use error::RuntimeError;
pub use runtime::{
    ContainerAction, ContainerDetails, ContainerRuntime, CpuCounter, LogChunkStream, LogRequest,
    RawStats,
};

// Re-export types that are used in our public API
pub use dockscope_types::{ContainerId, ContainerStatus};
