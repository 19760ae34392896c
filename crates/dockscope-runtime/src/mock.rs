//! Scripted in-memory runtime for tests
//!
//! Stats readings are queued per container; the last one repeats once the
//! queue runs dry. Log output is a replayed history plus an optional live
//! channel driven by the test through [`MockLogSender`].

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::channel::mpsc;
use futures::{StreamExt, stream};
use parking_lot::Mutex;

use crate::runtime::{
    ContainerAction, ContainerDetails, ContainerRuntime, LogChunkStream, LogRequest, RawStats,
};
use crate::RuntimeError;
use dockscope_types::{ContainerId, ContainerStatus};

struct MockContainer {
    details: ContainerDetails,
    stats: VecDeque<Result<RawStats, RuntimeError>>,
    last_stats: Option<Result<RawStats, RuntimeError>>,
    delay: Duration,
    stats_calls: usize,
    log_history: Vec<String>,
    live_logs: Option<mpsc::UnboundedReceiver<Result<String, RuntimeError>>>,
}

impl MockContainer {
    fn new(details: ContainerDetails) -> Self {
        Self {
            details,
            stats: VecDeque::new(),
            last_stats: None,
            delay: Duration::ZERO,
            stats_calls: 0,
            log_history: Vec::new(),
            live_logs: None,
        }
    }
}

#[derive(Default)]
struct MockState {
    containers: BTreeMap<ContainerId, MockContainer>,
    list_error: Option<RuntimeError>,
    actions: Vec<(ContainerId, ContainerAction)>,
    log_requests: Vec<(ContainerId, LogRequest)>,
}

/// In-memory [`ContainerRuntime`]
#[derive(Default)]
pub struct MockRuntime {
    state: Mutex<MockState>,
    active_stats: AtomicUsize,
    peak_stats: AtomicUsize,
}

/// Test-side handle feeding a followed log stream
pub struct MockLogSender {
    tx: mpsc::UnboundedSender<Result<String, RuntimeError>>,
}

impl MockLogSender {
    /// Send a complete line (a newline is appended)
    pub fn send_line(&self, line: &str) {
        let _ = self.tx.unbounded_send(Ok(format!("{line}\n")));
    }

    /// Send raw output exactly as given
    pub fn send_chunk(&self, chunk: &str) {
        let _ = self.tx.unbounded_send(Ok(chunk.to_string()));
    }

    /// Terminate the stream with an error
    pub fn fail(self, err: RuntimeError) {
        let _ = self.tx.unbounded_send(Err(err));
    }
}

struct ActiveGuard<'a> {
    active: &'a AtomicUsize,
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

impl MockRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a running container with the given id and name
    pub fn add_running(&self, id: &str, name: &str) {
        self.add_container(ContainerDetails::new(
            ContainerId::from(id),
            name,
            ContainerStatus::Running,
        ));
    }

    pub fn add_container(&self, details: ContainerDetails) {
        let id = details.id.clone();
        self.state
            .lock()
            .containers
            .insert(id, MockContainer::new(details));
    }

    pub fn remove_container(&self, id: &str) {
        self.state.lock().containers.remove(&ContainerId::from(id));
    }

    pub fn push_stats(&self, id: &str, stats: RawStats) {
        self.with_container(id, |c| c.stats.push_back(Ok(stats)));
    }

    pub fn push_stats_error(&self, id: &str, err: RuntimeError) {
        self.with_container(id, |c| c.stats.push_back(Err(err)));
    }

    /// Delay applied to every stats call for this container
    pub fn set_delay(&self, id: &str, delay: Duration) {
        self.with_container(id, |c| c.delay = delay);
    }

    pub fn set_log_history(&self, id: &str, lines: &[&str]) {
        let lines = lines.iter().map(|l| l.to_string()).collect();
        self.with_container(id, |c| c.log_history = lines);
    }

    /// Live channel for the next followed log request on this container
    pub fn live_logs(&self, id: &str) -> MockLogSender {
        let (tx, rx) = mpsc::unbounded();
        self.with_container(id, |c| c.live_logs = Some(rx));
        MockLogSender { tx }
    }

    pub fn fail_listing(&self, err: Option<RuntimeError>) {
        self.state.lock().list_error = err;
    }

    pub fn stats_calls(&self, id: &str) -> usize {
        self.state
            .lock()
            .containers
            .get(&ContainerId::from(id))
            .map(|c| c.stats_calls)
            .unwrap_or(0)
    }

    /// Highest number of stats calls that were running at the same time
    pub fn peak_concurrent_stats(&self) -> usize {
        self.peak_stats.load(Ordering::SeqCst)
    }

    pub fn actions(&self) -> Vec<(ContainerId, ContainerAction)> {
        self.state.lock().actions.clone()
    }

    pub fn log_requests(&self) -> Vec<(ContainerId, LogRequest)> {
        self.state.lock().log_requests.clone()
    }

    fn with_container(&self, id: &str, f: impl FnOnce(&mut MockContainer)) {
        let mut state = self.state.lock();
        let container = state
            .containers
            .entry(ContainerId::from(id))
            .or_insert_with(|| {
                MockContainer::new(ContainerDetails::new(
                    ContainerId::from(id),
                    id,
                    ContainerStatus::Running,
                ))
            });
        f(container);
    }
}

#[async_trait]
impl ContainerRuntime for MockRuntime {
    async fn list_containers(&self) -> Result<Vec<ContainerId>, RuntimeError> {
        let state = self.state.lock();
        if let Some(err) = &state.list_error {
            return Err(err.clone());
        }
        Ok(state.containers.keys().cloned().collect())
    }

    async fn inspect(&self, id: &ContainerId) -> Result<ContainerDetails, RuntimeError> {
        self.state
            .lock()
            .containers
            .get(id)
            .map(|c| c.details.clone())
            .ok_or(RuntimeError::NotFound)
    }

    async fn stats(&self, id: &ContainerId) -> Result<RawStats, RuntimeError> {
        let (delay, outcome) = {
            let mut state = self.state.lock();
            let container = state.containers.get_mut(id).ok_or(RuntimeError::NotFound)?;
            container.stats_calls += 1;
            let outcome = match container.stats.pop_front() {
                Some(next) => {
                    container.last_stats = Some(next.clone());
                    next
                }
                None => container
                    .last_stats
                    .clone()
                    .unwrap_or_else(|| Ok(RawStats::default())),
            };
            (container.delay, outcome)
        };

        let active = self.active_stats.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_stats.fetch_max(active, Ordering::SeqCst);
        let _guard = ActiveGuard {
            active: &self.active_stats,
        };

        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        // Yield so concurrent calls overlap even without a delay
        tokio::task::yield_now().await;

        outcome
    }

    fn logs(&self, id: &ContainerId, request: LogRequest) -> LogChunkStream {
        let mut state = self.state.lock();
        state.log_requests.push((id.clone(), request));

        let Some(container) = state.containers.get_mut(id) else {
            return stream::once(async { Err(RuntimeError::NotFound) }).boxed();
        };

        let skip = match request.tail {
            Some(n) => container.log_history.len().saturating_sub(n),
            None => 0,
        };
        let history: Vec<Result<String, RuntimeError>> = container
            .log_history
            .iter()
            .skip(skip)
            .map(|line| Ok(format!("{line}\n")))
            .collect();

        let live: LogChunkStream = match container.live_logs.take() {
            Some(rx) if request.follow => rx.boxed(),
            _ => stream::empty().boxed(),
        };

        stream::iter(history).chain(live).boxed()
    }

    async fn apply(&self, id: &ContainerId, action: ContainerAction) -> Result<(), RuntimeError> {
        let mut state = self.state.lock();
        let container = state.containers.get_mut(id).ok_or(RuntimeError::NotFound)?;
        container.details.status = match action {
            ContainerAction::Start | ContainerAction::Unpause | ContainerAction::Restart => {
                ContainerStatus::Running
            }
            ContainerAction::Stop => ContainerStatus::Stopped,
            ContainerAction::Pause => ContainerStatus::Paused,
        };
        state.actions.push((id.clone(), action));
        Ok(())
    }
}
