use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::usage::{self, Reading};
use dockscope_runtime::ContainerRuntime;
use dockscope_types::{
    CollectionEntry, CollectionError, CollectionResult, ContainerId, ContainerSnapshot,
    ContainerStatus,
};

#[derive(Default)]
struct CollectorState {
    /// Containers whose query has been started and not yet finished
    in_flight: HashSet<ContainerId>,
    /// Counters from each container's latest stats reading
    previous: HashMap<ContainerId, Reading>,
    last_good: HashMap<ContainerId, Arc<ContainerSnapshot>>,
}

/// Concurrent per-container telemetry queries
///
/// Each container is queried on its own task (inspect, then stats when it
/// is running) with at most `max_concurrency` queries talking to the
/// runtime at once. A container never has two queries in flight.
pub struct Collector {
    runtime: Arc<dyn ContainerRuntime>,
    permits: Arc<Semaphore>,
    state: Arc<Mutex<CollectorState>>,
}

impl Collector {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, max_concurrency: usize) -> Self {
        Self {
            runtime,
            permits: Arc::new(Semaphore::new(max_concurrency.max(1))),
            state: Arc::new(Mutex::new(CollectorState::default())),
        }
    }

    pub fn runtime(&self) -> &Arc<dyn ContainerRuntime> {
        &self.runtime
    }

    /// Query every container in `ids` and wait at most `deadline`
    ///
    /// The result holds exactly one entry per distinct id. Queries still
    /// running at the deadline are left to finish in the background; their
    /// container is reported stale (or failed) for this tick and skipped as
    /// in flight on the next one until they complete.
    pub async fn collect_all(&self, ids: &[ContainerId], deadline: Duration) -> CollectionResult {
        let deadline_at = Instant::now() + deadline;
        let mut result = CollectionResult::new();
        let mut pending = Vec::with_capacity(ids.len());
        let mut seen = HashSet::with_capacity(ids.len());

        for id in ids {
            if !seen.insert(id) {
                continue;
            }
            let Some(guard) = InFlightGuard::acquire(&self.state, id) else {
                debug!(container = %id, "previous query still in flight");
                result.insert(id.clone(), self.degraded(id, CollectionError::InFlight));
                continue;
            };

            let task = tokio::spawn(query(
                Arc::clone(&self.runtime),
                Arc::clone(&self.permits),
                Arc::clone(&self.state),
                id.clone(),
                guard,
            ));
            pending.push((id.clone(), task));
        }

        for (id, mut task) in pending {
            let entry = match tokio::time::timeout_at(deadline_at, &mut task).await {
                Ok(Ok(Ok(snapshot))) => CollectionEntry::Fresh { snapshot },
                Ok(Ok(Err(err))) => self.failed(&id, err),
                Ok(Err(join_err)) => {
                    warn!(container = %id, error = %join_err, "container query panicked");
                    self.failed(&id, CollectionError::Unreachable(join_err.to_string()))
                }
                Err(_) => {
                    // Dropping the handle detaches the task; it keeps running
                    debug!(container = %id, "query overran the cycle deadline");
                    self.failed(&id, CollectionError::Timeout)
                }
            };
            result.insert(id, entry);
        }

        result
    }

    /// Drop everything remembered about a container
    pub fn forget(&self, id: &ContainerId) {
        let mut state = self.state.lock();
        state.previous.remove(id);
        state.last_good.remove(id);
    }

    /// Most recent successful snapshot of a container
    pub fn last_snapshot(&self, id: &ContainerId) -> Option<Arc<ContainerSnapshot>> {
        self.state.lock().last_good.get(id).cloned()
    }

    /// Number of queries currently running, including ones past their deadline
    pub fn in_flight(&self) -> usize {
        self.state.lock().in_flight.len()
    }

    fn failed(&self, id: &ContainerId, err: CollectionError) -> CollectionEntry {
        if err.is_permanent() {
            info!(container = %id, error = %err, "container is gone");
            self.forget(id);
            return CollectionEntry::Failed { error: err };
        }
        warn!(container = %id, error = %err, "container query failed");
        self.degraded(id, err)
    }

    /// Reuse the last good snapshot for a transient failure
    fn degraded(&self, id: &ContainerId, cause: CollectionError) -> CollectionEntry {
        match self.last_snapshot(id) {
            Some(snapshot) => CollectionEntry::Stale { snapshot, cause },
            None => CollectionEntry::Failed { error: cause },
        }
    }
}

/// Marks a container in flight for as long as its query task lives
struct InFlightGuard {
    state: Arc<Mutex<CollectorState>>,
    id: ContainerId,
}

impl InFlightGuard {
    fn acquire(state: &Arc<Mutex<CollectorState>>, id: &ContainerId) -> Option<Self> {
        state.lock().in_flight.insert(id.clone()).then(|| Self {
            state: Arc::clone(state),
            id: id.clone(),
        })
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.state.lock().in_flight.remove(&self.id);
    }
}

/// One container's query: inspect, then stats for running containers
async fn query(
    runtime: Arc<dyn ContainerRuntime>,
    permits: Arc<Semaphore>,
    state: Arc<Mutex<CollectorState>>,
    id: ContainerId,
    _guard: InFlightGuard,
) -> Result<Arc<ContainerSnapshot>, CollectionError> {
    let _permit = permits
        .acquire_owned()
        .await
        .map_err(|_| CollectionError::Unreachable("collector shut down".to_string()))?;

    let details = runtime.inspect(&id).await?;
    let mut snapshot = ContainerSnapshot::new(id.clone(), Utc::now());
    snapshot.name = details.name;
    snapshot.image = details.image;
    snapshot.status = details.status;
    snapshot.created_at = details.created_at;
    snapshot.started_at = details.started_at;

    if details.status == ContainerStatus::Running {
        snapshot.uptime = details
            .started_at
            .and_then(|started| (snapshot.collected_at - started).to_std().ok());

        let stats = runtime.stats(&id).await?;
        let current = Reading::new(&stats, Instant::now());
        let previous = state.lock().previous.insert(id.clone(), current);
        usage::apply(&mut snapshot, &stats, &current, previous.as_ref());
    } else {
        // A stopped container's counters restart from zero
        state.lock().previous.remove(&id);
    }

    let snapshot = Arc::new(snapshot);
    state.lock().last_good.insert(id, Arc::clone(&snapshot));
    Ok(snapshot)
}

#[cfg(test)]
mod tests {
    use super::*;
    use dockscope_runtime::mock::MockRuntime;
    use dockscope_runtime::{ContainerDetails, CpuCounter, RawStats, RuntimeError};

    fn collector(runtime: &Arc<MockRuntime>, max_concurrency: usize) -> Collector {
        let runtime: Arc<dyn ContainerRuntime> = runtime.clone();
        Collector::new(runtime, max_concurrency)
    }

    fn ids(names: &[&str]) -> Vec<ContainerId> {
        names.iter().map(|n| ContainerId::from(*n)).collect()
    }

    fn cpu_stats(total_ns: u64, system_ns: u64) -> RawStats {
        RawStats {
            cpu: Some(CpuCounter::Cumulative {
                total_ns,
                system_ns: Some(system_ns),
                online_cpus: 2,
            }),
            mem_usage: Some(256),
            mem_limit: Some(1024),
            net_rx: Some(1_000),
            net_tx: Some(500),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_bounded_concurrency() {
        let runtime = Arc::new(MockRuntime::new());
        for name in ["a", "b", "c", "d", "e"] {
            runtime.add_running(name, name);
            runtime.set_delay(name, Duration::from_millis(100));
        }

        let collector = collector(&runtime, 2);
        let result = collector
            .collect_all(&ids(&["a", "b", "c", "d", "e"]), Duration::from_secs(10))
            .await;

        assert_eq!(result.len(), 5);
        assert_eq!(result.fresh_count(), 5);
        assert!(runtime.peak_concurrent_stats() <= 2);
        assert!(runtime.peak_concurrent_stats() >= 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_container_does_not_delay_others() {
        let runtime = Arc::new(MockRuntime::new());
        runtime.add_running("slow", "slow");
        runtime.add_running("fast", "fast");
        runtime.set_delay("slow", Duration::from_secs(30));

        let collector = collector(&runtime, 4);
        let started = Instant::now();
        let result = collector
            .collect_all(&ids(&["slow", "fast"]), Duration::from_secs(1))
            .await;

        assert!(started.elapsed() < Duration::from_secs(2));
        assert!(result.get(&ContainerId::from("fast")).unwrap().is_fresh());
        assert_eq!(
            result.get(&ContainerId::from("slow")).unwrap().error(),
            Some(&CollectionError::Timeout)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_in_flight_container_is_not_requeried() {
        let runtime = Arc::new(MockRuntime::new());
        runtime.add_running("a", "alpha");
        let collector = collector(&runtime, 4);
        let a = ContainerId::from("a");

        // First tick succeeds and leaves a last good snapshot
        let result = collector.collect_all(&ids(&["a"]), Duration::from_secs(1)).await;
        assert!(result.get(&a).unwrap().is_fresh());

        runtime.set_delay("a", Duration::from_secs(5));
        let result = collector.collect_all(&ids(&["a"]), Duration::from_secs(1)).await;
        let entry = result.get(&a).unwrap();
        assert!(entry.is_stale());
        assert_eq!(entry.error(), Some(&CollectionError::Timeout));
        assert_eq!(collector.in_flight(), 1);

        let result = collector.collect_all(&ids(&["a"]), Duration::from_secs(1)).await;
        let entry = result.get(&a).unwrap();
        assert!(entry.is_stale());
        assert_eq!(entry.error(), Some(&CollectionError::InFlight));
        assert_eq!(runtime.stats_calls("a"), 2);

        // The late query finishes and frees the container
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(collector.in_flight(), 0);
        runtime.set_delay("a", Duration::ZERO);
        let result = collector.collect_all(&ids(&["a"]), Duration::from_secs(1)).await;
        assert!(result.get(&a).unwrap().is_fresh());
        assert_eq!(runtime.stats_calls("a"), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_in_flight_without_snapshot_fails() {
        let runtime = Arc::new(MockRuntime::new());
        runtime.add_running("a", "alpha");
        runtime.set_delay("a", Duration::from_secs(5));
        let collector = collector(&runtime, 4);
        let a = ContainerId::from("a");

        let result = collector.collect_all(&ids(&["a"]), Duration::from_secs(1)).await;
        assert!(matches!(
            result.get(&a),
            Some(CollectionEntry::Failed {
                error: CollectionError::Timeout
            })
        ));

        let result = collector.collect_all(&ids(&["a"]), Duration::from_secs(1)).await;
        assert!(matches!(
            result.get(&a),
            Some(CollectionEntry::Failed {
                error: CollectionError::InFlight
            })
        ));
        assert_eq!(runtime.stats_calls("a"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cpu_unknown_then_computed() {
        let runtime = Arc::new(MockRuntime::new());
        runtime.add_running("a", "alpha");
        runtime.push_stats("a", cpu_stats(1_000_000_000, 10_000_000_000));
        runtime.push_stats("a", cpu_stats(2_000_000_000, 20_000_000_000));
        runtime.push_stats("a", cpu_stats(500_000_000, 30_000_000_000));
        let collector = collector(&runtime, 4);
        let a = ContainerId::from("a");

        let first = collector.collect_all(&ids(&["a"]), Duration::from_secs(1)).await;
        let snap = first.get(&a).unwrap().snapshot().unwrap().clone();
        assert_eq!(snap.cpu_percent, None);
        assert_eq!(snap.mem_percent, Some(25.0));
        assert_eq!(snap.net_rx_rate, None);

        tokio::time::advance(Duration::from_secs(2)).await;
        let second = collector.collect_all(&ids(&["a"]), Duration::from_secs(1)).await;
        let snap = second.get(&a).unwrap().snapshot().unwrap().clone();
        let cpu = snap.cpu_percent.unwrap();
        assert!((cpu - 20.0).abs() < 1e-9);
        assert_eq!(snap.net_rx_rate, Some(0.0));

        // Restarted container: counters went backwards
        let third = collector.collect_all(&ids(&["a"]), Duration::from_secs(1)).await;
        let snap = third.get(&a).unwrap().snapshot().unwrap().clone();
        assert_eq!(snap.cpu_percent, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_not_found_is_permanent() {
        let runtime = Arc::new(MockRuntime::new());
        runtime.add_running("a", "alpha");
        let collector = collector(&runtime, 4);
        let a = ContainerId::from("a");

        collector.collect_all(&ids(&["a"]), Duration::from_secs(1)).await;
        assert!(collector.last_snapshot(&a).is_some());

        runtime.remove_container("a");
        let result = collector.collect_all(&ids(&["a"]), Duration::from_secs(1)).await;
        assert!(matches!(
            result.get(&a),
            Some(CollectionEntry::Failed {
                error: CollectionError::NotFound
            })
        ));
        assert_eq!(result.permanently_failed(), vec![a.clone()]);
        assert!(collector.last_snapshot(&a).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_error_reuses_snapshot() {
        let runtime = Arc::new(MockRuntime::new());
        runtime.add_running("a", "alpha");
        runtime.push_stats("a", cpu_stats(1, 1));
        runtime.push_stats_error("a", RuntimeError::Unreachable("reset".to_string()));
        let collector = collector(&runtime, 4);
        let a = ContainerId::from("a");

        collector.collect_all(&ids(&["a"]), Duration::from_secs(1)).await;
        let result = collector.collect_all(&ids(&["a"]), Duration::from_secs(1)).await;
        let entry = result.get(&a).unwrap();
        assert!(entry.is_stale());
        assert_eq!(
            entry.error(),
            Some(&CollectionError::Unreachable("reset".to_string()))
        );
        assert_eq!(entry.snapshot().unwrap().name, "alpha");
    }

    #[tokio::test(start_paused = true)]
    async fn test_stopped_container_is_inspected_only() {
        let runtime = Arc::new(MockRuntime::new());
        runtime.add_container(ContainerDetails::new(
            ContainerId::from("s"),
            "stopped-one",
            ContainerStatus::Stopped,
        ));
        let collector = collector(&runtime, 4);

        let result = collector.collect_all(&ids(&["s"]), Duration::from_secs(1)).await;
        let snap = result.get(&ContainerId::from("s")).unwrap().snapshot().unwrap().clone();
        assert_eq!(snap.status, ContainerStatus::Stopped);
        assert_eq!(snap.cpu_percent, None);
        assert_eq!(snap.mem_usage, None);
        assert_eq!(snap.uptime, None);
        assert_eq!(runtime.stats_calls("s"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_uptime_for_running_container() {
        let runtime = Arc::new(MockRuntime::new());
        let started = Utc::now() - chrono::Duration::minutes(5);
        runtime.add_container(
            ContainerDetails::new(ContainerId::from("a"), "alpha", ContainerStatus::Running)
                .with_image("nginx:latest")
                .with_started_at(started),
        );
        let collector = collector(&runtime, 4);

        let result = collector.collect_all(&ids(&["a"]), Duration::from_secs(1)).await;
        let snap = result.get(&ContainerId::from("a")).unwrap().snapshot().unwrap().clone();
        assert_eq!(snap.image, "nginx:latest");
        assert!(snap.uptime.unwrap() >= Duration::from_secs(299));
    }

    #[tokio::test(start_paused = true)]
    async fn test_one_entry_per_id() {
        let runtime = Arc::new(MockRuntime::new());
        runtime.add_running("a", "alpha");
        let collector = collector(&runtime, 4);

        let result = collector
            .collect_all(&ids(&["a", "a", "missing"]), Duration::from_secs(1))
            .await;
        assert_eq!(result.len(), 2);
        assert_eq!(runtime.stats_calls("a"), 1);
        assert_eq!(result.failed_count(), 1);
    }
}
