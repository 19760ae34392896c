use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::collector::Collector;
use dockscope_types::{CollectionResult, ContainerId};

/// Poll cycle timing
#[derive(Clone, Copy, Debug)]
pub struct PollerConfig {
    /// Time between cycle starts
    pub interval: Duration,
    /// Budget for container queries within one cycle
    pub deadline: Duration,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(2000),
            deadline: Duration::from_millis(1500),
        }
    }
}

/// One published poll cycle
#[derive(Debug)]
pub struct Tick {
    /// 1-based cycle counter
    pub cycle: u64,
    pub result: CollectionResult,
    /// Wall time the cycle took
    pub elapsed: Duration,
}

/// Running poller; dropping it does not stop the task, call
/// [`shutdown`](Self::shutdown)
pub struct PollerHandle {
    ticks: watch::Receiver<Option<Arc<Tick>>>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl PollerHandle {
    /// Receiver of published ticks (`None` until the first cycle completes)
    pub fn subscribe(&self) -> watch::Receiver<Option<Arc<Tick>>> {
        self.ticks.clone()
    }

    pub fn latest(&self) -> Option<Arc<Tick>> {
        self.ticks.borrow().clone()
    }

    /// Stop polling and wait for the current cycle to wind down
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            warn!(error = %e, "poller task panicked");
        }
    }
}

/// Periodic telemetry worker
pub struct Poller;

impl Poller {
    /// Start polling every container the runtime lists
    pub fn spawn(collector: Arc<Collector>, config: PollerConfig) -> PollerHandle {
        Self::spawn_with_cancel(collector, config, CancellationToken::new())
    }

    /// Start polling, stopping when `cancel` fires
    pub fn spawn_with_cancel(
        collector: Arc<Collector>,
        config: PollerConfig,
        cancel: CancellationToken,
    ) -> PollerHandle {
        let (tx, rx) = watch::channel(None);
        let task = tokio::spawn(run(collector, config, tx, cancel.clone()));
        PollerHandle {
            ticks: rx,
            cancel,
            task,
        }
    }
}

async fn run(
    collector: Arc<Collector>,
    config: PollerConfig,
    tx: watch::Sender<Option<Arc<Tick>>>,
    cancel: CancellationToken,
) {
    let mut interval = tokio::time::interval(config.interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut tracked: Vec<ContainerId> = Vec::new();
    let mut cycle = 0u64;

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {}
        }
        let started = Instant::now();

        let listing = tokio::time::timeout(config.deadline, collector.runtime().list_containers());
        match listing.await {
            Ok(Ok(ids)) => {
                let departed: Vec<&ContainerId> =
                    tracked.iter().filter(|id| !ids.contains(id)).collect();
                for id in &departed {
                    collector.forget(id);
                }
                if !departed.is_empty() {
                    debug!(count = departed.len(), "containers left the listing");
                }
                tracked = ids;
            }
            Ok(Err(e)) => warn!(error = %e, "listing containers failed, keeping previous set"),
            Err(_) => warn!("listing containers timed out, keeping previous set"),
        }

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            result = collector.collect_all(&tracked, config.deadline) => result,
        };

        let gone = result.permanently_failed();
        if !gone.is_empty() {
            tracked.retain(|id| !gone.contains(id));
            info!(count = gone.len(), "stopped tracking removed containers");
        }

        cycle += 1;
        let elapsed = started.elapsed();
        debug!(
            cycle,
            containers = result.len(),
            fresh = result.fresh_count(),
            stale = result.stale_count(),
            failed = result.failed_count(),
            elapsed_ms = elapsed.as_millis() as u64,
            "poll cycle complete"
        );

        tx.send_replace(Some(Arc::new(Tick {
            cycle,
            result,
            elapsed,
        })));
    }

    debug!(cycles = cycle, "poller stopped");
}
