//! Container telemetry for dockscope
//!
//! A [`Collector`] queries every container concurrently under a shared
//! deadline and a [`Poller`] drives it on a fixed interval, publishing each
//! completed cycle as a [`Tick`].

mod collector;
mod poller;
mod usage;

pub use collector::Collector;
pub use poller::{Poller, PollerConfig, PollerHandle, Tick};

// Re-export types used in our public API
pub use dockscope_types::{
    CollectionEntry, CollectionError, CollectionResult, ContainerId, ContainerSnapshot,
    ContainerStatus,
};
