//! Usage figures derived from raw runtime counters

use std::time::Duration;

use tokio::time::Instant;

use dockscope_runtime::{CpuCounter, RawStats};
use dockscope_types::ContainerSnapshot;

/// Counters kept from one tick to compute rates on the next
#[derive(Clone, Copy, Debug)]
pub(crate) struct Reading {
    pub cpu: Option<CpuCounter>,
    pub net_rx: Option<u64>,
    pub net_tx: Option<u64>,
    pub at: Instant,
}

impl Reading {
    pub fn new(stats: &RawStats, at: Instant) -> Self {
        Self {
            cpu: stats.cpu,
            net_rx: stats.net_rx,
            net_tx: stats.net_tx,
            at,
        }
    }
}

/// Fill the usage fields of `snapshot` from a reading and its predecessor
pub(crate) fn apply(
    snapshot: &mut ContainerSnapshot,
    stats: &RawStats,
    current: &Reading,
    previous: Option<&Reading>,
) {
    let elapsed = previous.map(|p| current.at.saturating_duration_since(p.at));

    snapshot.cpu_percent = match (current.cpu, previous.and_then(|p| p.cpu)) {
        (Some(cur), prev) => cpu_percent(cur, prev, elapsed.unwrap_or_default()),
        (None, _) => None,
    };
    snapshot.mem_usage = stats.mem_usage;
    snapshot.mem_limit = stats.mem_limit;
    snapshot.mem_percent = mem_percent(stats.mem_usage, stats.mem_limit);
    snapshot.net_rx = stats.net_rx;
    snapshot.net_tx = stats.net_tx;

    if let (Some(prev), Some(elapsed)) = (previous, elapsed) {
        snapshot.net_rx_rate = byte_rate(prev.net_rx, current.net_rx, elapsed);
        snapshot.net_tx_rate = byte_rate(prev.net_tx, current.net_tx, elapsed);
    }
}

/// CPU percent of one core between two readings
///
/// Unknown without a previous cumulative reading, or when a counter went
/// backwards (the container restarted).
pub(crate) fn cpu_percent(
    current: CpuCounter,
    previous: Option<CpuCounter>,
    elapsed: Duration,
) -> Option<f64> {
    let (total, system, cpus, prev_total, prev_system) = match (current, previous) {
        (CpuCounter::Percent(p), _) => return p.is_finite().then(|| p.max(0.0)),
        (
            CpuCounter::Cumulative {
                total_ns,
                system_ns,
                online_cpus,
            },
            Some(CpuCounter::Cumulative {
                total_ns: prev_total,
                system_ns: prev_system,
                ..
            }),
        ) => (total_ns, system_ns, online_cpus, prev_total, prev_system),
        _ => return None,
    };

    let cpu_delta = total.checked_sub(prev_total)? as f64;

    let percent = match (system, prev_system) {
        (Some(system), Some(prev_system)) => {
            let system_delta = system.checked_sub(prev_system)?;
            if system_delta == 0 {
                return None;
            }
            cpu_delta / system_delta as f64 * f64::from(cpus.max(1)) * 100.0
        }
        _ => {
            let wall_ns = elapsed.as_nanos();
            if wall_ns == 0 {
                return None;
            }
            cpu_delta / wall_ns as f64 * 100.0
        }
    };

    Some(percent.max(0.0))
}

/// Usage in percent of the limit, clamped to [0, 100]
pub(crate) fn mem_percent(usage: Option<u64>, limit: Option<u64>) -> Option<f64> {
    match (usage, limit) {
        (Some(usage), Some(limit)) if limit > 0 => {
            Some((usage as f64 / limit as f64 * 100.0).clamp(0.0, 100.0))
        }
        _ => None,
    }
}

fn byte_rate(previous: Option<u64>, current: Option<u64>, elapsed: Duration) -> Option<f64> {
    let delta = current?.checked_sub(previous?)?;
    let secs = elapsed.as_secs_f64();
    (secs > 0.0).then(|| delta as f64 / secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cumulative(total_ns: u64, system_ns: Option<u64>, online_cpus: u32) -> CpuCounter {
        CpuCounter::Cumulative {
            total_ns,
            system_ns,
            online_cpus,
        }
    }

    #[test]
    fn test_cpu_from_system_delta() {
        let prev = cumulative(1_000_000_000, Some(10_000_000_000), 2);
        let cur = cumulative(2_000_000_000, Some(20_000_000_000), 2);
        let pct = cpu_percent(cur, Some(prev), Duration::from_secs(1)).unwrap();
        assert!((pct - 20.0).abs() < 1e-9);
    }

    #[test]
    fn test_cpu_from_wall_clock() {
        let prev = cumulative(1_000_000_000, None, 4);
        let cur = cumulative(1_500_000_000, None, 4);
        let pct = cpu_percent(cur, Some(prev), Duration::from_secs(1)).unwrap();
        assert!((pct - 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_cpu_unknown_cases() {
        let cur = cumulative(2_000, Some(2_000), 1);
        assert_eq!(cpu_percent(cur, None, Duration::from_secs(1)), None);

        // Counter went backwards
        let prev = cumulative(5_000, Some(1_000), 1);
        assert_eq!(cpu_percent(cur, Some(prev), Duration::from_secs(1)), None);

        // No host time passed
        let prev = cumulative(1_000, Some(2_000), 1);
        assert_eq!(cpu_percent(cur, Some(prev), Duration::from_secs(1)), None);

        let prev = cumulative(1_000, None, 1);
        let cur = cumulative(2_000, None, 1);
        assert_eq!(cpu_percent(cur, Some(prev), Duration::ZERO), None);
    }

    #[test]
    fn test_cpu_instantaneous_percent() {
        assert_eq!(
            cpu_percent(CpuCounter::Percent(12.5), None, Duration::ZERO),
            Some(12.5)
        );
        assert_eq!(
            cpu_percent(CpuCounter::Percent(-3.0), None, Duration::ZERO),
            Some(0.0)
        );
        assert_eq!(
            cpu_percent(CpuCounter::Percent(f64::NAN), None, Duration::ZERO),
            None
        );
    }

    #[test]
    fn test_mem_percent() {
        assert_eq!(mem_percent(Some(50), Some(200)), Some(25.0));
        assert_eq!(mem_percent(Some(300), Some(200)), Some(100.0));
        assert_eq!(mem_percent(Some(50), Some(0)), None);
        assert_eq!(mem_percent(Some(50), None), None);
        assert_eq!(mem_percent(None, Some(200)), None);
    }

    #[test]
    fn test_byte_rate() {
        let two_secs = Duration::from_secs(2);
        assert_eq!(byte_rate(Some(100), Some(300), two_secs), Some(100.0));
        assert_eq!(byte_rate(Some(300), Some(100), two_secs), None);
        assert_eq!(byte_rate(None, Some(100), two_secs), None);
        assert_eq!(byte_rate(Some(100), Some(300), Duration::ZERO), None);
    }
}
