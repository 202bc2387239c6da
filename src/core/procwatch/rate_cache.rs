//! Delta-rate cache for instantaneous CPU percentages.
//!
//! OS cpu counters are cumulative since process start, so an instantaneous
//! rate needs the previous reading of the same pid. This cache is the only
//! state shared between one-shot queries and monitor sessions; every access
//! is a single O(1) read-modify-write under one short lock.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct CpuReading {
    total_cpu_ms: u64,
    observed_at: DateTime<Utc>,
}

#[derive(Debug)]
struct CacheState {
    entries: HashMap<u32, CpuReading>,
    retention: Duration,
    last_prune: Option<DateTime<Utc>>,
}

/// Last-seen cumulative cpu time per pid
#[derive(Debug)]
pub struct DeltaRateCache {
    state: Mutex<CacheState>,
}

/// Instantaneous cpu percentage between two cumulative readings.
///
/// Clamped to `0..=100`; a non-positive elapsed time or a counter that went
/// backwards (pid reuse, reset) yields 0.
pub fn instant_percent(
    previous_cpu_ms: u64,
    current_cpu_ms: u64,
    elapsed_ms: i64,
    cpu_count: usize,
) -> f64 {
    if elapsed_ms <= 0 || cpu_count == 0 {
        return 0.0;
    }
    let delta = current_cpu_ms as f64 - previous_cpu_ms as f64;
    let percent = delta / (elapsed_ms as f64 * cpu_count as f64) * 100.0;
    percent.clamp(0.0, 100.0)
}

impl DeltaRateCache {
    pub fn new(retention: Duration) -> Self {
        Self {
            state: Mutex::new(CacheState {
                entries: HashMap::new(),
                retention,
                last_prune: None,
            }),
        }
    }

    /// Record a reading and return the rate since the previous one.
    ///
    /// A first observation of `pid` reports 0.
    pub fn observe(
        &self,
        pid: u32,
        total_cpu_ms: u64,
        at: DateTime<Utc>,
        cpu_count: usize,
    ) -> f64 {
        let mut state = self.state.lock();

        let current = CpuReading {
            total_cpu_ms,
            observed_at: at,
        };
        let percent = match state.entries.insert(pid, current) {
            Some(previous) => {
                let elapsed_ms = (at - previous.observed_at).num_milliseconds();
                instant_percent(previous.total_cpu_ms, total_cpu_ms, elapsed_ms, cpu_count)
            }
            None => 0.0,
        };

        Self::maybe_prune(&mut state, at);
        percent
    }

    /// Drop entries not refreshed within the retention period.
    pub fn prune(&self, now: DateTime<Utc>) {
        let mut state = self.state.lock();
        Self::prune_locked(&mut state, now);
    }

    /// Forget one pid (e.g. a monitored process that vanished)
    pub fn forget(&self, pid: u32) {
        self.state.lock().entries.remove(&pid);
    }

    /// Grow the retention period; never shrinks it
    pub fn extend_retention(&self, retention: Duration) {
        let mut state = self.state.lock();
        if retention > state.retention {
            log::debug!("Delta-rate retention extended to {:?}", retention);
            state.retention = retention;
        }
    }

    pub fn retention(&self) -> Duration {
        self.state.lock().retention
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, pid: u32) -> bool {
        self.state.lock().entries.contains_key(&pid)
    }

    // Pruning is O(n); run it at most once per retention period
    fn maybe_prune(state: &mut CacheState, now: DateTime<Utc>) {
        let due = match state.last_prune {
            Some(last) => (now - last).to_std().map(|d| d >= state.retention).unwrap_or(false),
            None => true,
        };
        if due {
            Self::prune_locked(state, now);
        }
    }

    fn prune_locked(state: &mut CacheState, now: DateTime<Utc>) {
        let retention = match chrono::Duration::from_std(state.retention) {
            Ok(retention) => retention,
            Err(_) => return,
        };
        let cutoff = now - retention;
        let before = state.entries.len();
        state.entries.retain(|_, reading| reading.observed_at >= cutoff);
        state.last_prune = Some(now);

        let removed = before - state.entries.len();
        if removed > 0 {
            log::trace!("Pruned {} stale delta-rate entries", removed);
        }
    }
}
