//! Process sampling capability.
//!
//! `ProcessSampler` is the contract callers and monitor sessions use.
//! `PlatformSampler` implements it on top of one OS-specific
//! [`ProcessSource`], turning raw records into [`ProcessSample`]s and
//! deriving instantaneous cpu rates through the [`DeltaRateCache`].

use chrono::{DateTime, Utc};
use std::time::Duration;

use super::metrics::{CpuMetrics, MemoryMetrics, ProcessSample, SystemFacts};
use super::rate_cache::{instant_percent, DeltaRateCache};
use super::source::{Platform, ProcessSource, RawProcess};
use super::topk::{select_top, TopMetric};
use crate::core::config::MonitorConfig;
use crate::error::{ProcwatchError, Result};

/// Queries the OS for process snapshots.
///
/// Only the `try_*` methods and the system facts are required; the rest are
/// derived from a full enumeration. "Not found" is never an error: it is
/// `None` or an empty list.
pub trait ProcessSampler: Send + Sync {
    /// Sample one pid; `Err` only when the platform facility failed
    fn try_sample_by_pid(&self, pid: u32) -> Result<Option<ProcessSample>>;

    /// Enumerate every process except pid 0
    fn try_get_all_processes(&self) -> Result<Vec<ProcessSample>>;

    fn system_facts(&self) -> SystemFacts;

    fn platform(&self) -> Platform;

    /// Keep delta-rate history long enough for a caller polling every `interval`
    fn retain_rates_for(&self, _interval: Duration) {}

    fn sample_by_pid(&self, pid: u32) -> Option<ProcessSample> {
        if pid == 0 {
            return None;
        }
        self.try_sample_by_pid(pid).unwrap_or_else(|e| {
            log::warn!("Sampling pid {} failed: {}", pid, e);
            None
        })
    }

    fn get_all_processes(&self) -> Vec<ProcessSample> {
        self.try_get_all_processes().unwrap_or_else(|e| {
            log::warn!("Process enumeration failed: {}", e);
            Vec::new()
        })
    }

    /// Case-insensitive substring match over process names
    fn sample_by_name(&self, pattern: &str) -> Vec<ProcessSample> {
        filter_by_name(self.get_all_processes(), pattern)
    }

    /// Case-insensitive substring match over full command lines
    fn sample_by_command(&self, pattern: &str) -> Vec<ProcessSample> {
        filter_by_command(self.get_all_processes(), pattern)
    }

    fn top_by_cpu(&self, limit: usize) -> Vec<ProcessSample> {
        select_top(self.get_all_processes(), TopMetric::Cpu, limit)
    }

    fn top_by_memory(&self, limit: usize) -> Vec<ProcessSample> {
        select_top(self.get_all_processes(), TopMetric::Memory, limit)
    }

    fn top_by(&self, metric: TopMetric, limit: usize) -> Vec<ProcessSample> {
        select_top(self.get_all_processes(), metric, limit)
    }

    fn total_memory_bytes(&self) -> u64 {
        self.system_facts().total_memory_bytes
    }

    fn cpu_count(&self) -> usize {
        self.system_facts().cpu_count
    }
}

pub fn filter_by_name(samples: Vec<ProcessSample>, pattern: &str) -> Vec<ProcessSample> {
    let needle = pattern.to_lowercase();
    samples
        .into_iter()
        .filter(|s| s.name.to_lowercase().contains(&needle))
        .collect()
}

pub fn filter_by_command(samples: Vec<ProcessSample>, pattern: &str) -> Vec<ProcessSample> {
    let needle = pattern.to_lowercase();
    samples
        .into_iter()
        .filter(|s| s.command_line.to_lowercase().contains(&needle))
        .collect()
}

/// The sampler used in production: one OS source plus the delta-rate cache
pub struct PlatformSampler {
    source: Box<dyn ProcessSource>,
    facts: SystemFacts,
    rates: DeltaRateCache,
    retention_multiplier: u32,
}

impl PlatformSampler {
    /// Build a sampler around `source`.
    ///
    /// System facts are queried once here; each missing value falls back to
    /// the configured constant.
    pub fn new(source: Box<dyn ProcessSource>, config: &MonitorConfig) -> Self {
        let facts = match source.system_facts() {
            Ok(facts) => SystemFacts {
                total_memory_bytes: if facts.total_memory_bytes > 0 {
                    facts.total_memory_bytes
                } else {
                    config.fallback_total_memory()
                },
                cpu_count: if facts.cpu_count > 0 {
                    facts.cpu_count
                } else {
                    config.fallback_cpu_count()
                },
            },
            Err(e) => {
                log::warn!(
                    "Could not query system facts on {}: {}; using fallback values",
                    source.platform(),
                    e
                );
                SystemFacts {
                    total_memory_bytes: config.fallback_total_memory(),
                    cpu_count: config.fallback_cpu_count(),
                }
            }
        };

        log::debug!(
            "Sampler ready on {}: {} bytes of memory, {} cpus",
            source.platform(),
            facts.total_memory_bytes,
            facts.cpu_count
        );

        Self {
            source,
            facts,
            rates: DeltaRateCache::new(config.rate_retention(config.poll_interval())),
            retention_multiplier: config.rate_cache_retention_multiplier,
        }
    }

    pub fn rate_cache(&self) -> &DeltaRateCache {
        &self.rates
    }

    /// Turn a raw record into a sample, updating the delta-rate cache
    fn normalize(&self, raw: RawProcess, captured_at: DateTime<Utc>) -> ProcessSample {
        let total_cpu_ms = raw.total_cpu_ms();
        let cpu_count = self.facts.cpu_count;

        let percent_instant = self.rates.observe(raw.pid, total_cpu_ms, captured_at, cpu_count);
        let percent_average = raw
            .start_time
            .map(|start| {
                let lifetime_ms = (captured_at - start).num_milliseconds();
                instant_percent(0, total_cpu_ms, lifetime_ms, cpu_count)
            })
            .unwrap_or(0.0);

        ProcessSample {
            pid: raw.pid,
            name: raw.name,
            command_line: raw.command_line,
            user: raw.user,
            state: raw.state,
            cpu: CpuMetrics {
                percent_instant,
                percent_average,
                user_mode_ms: raw.user_mode_ms,
                kernel_mode_ms: raw.kernel_mode_ms,
                total_cpu_ms,
            },
            memory: MemoryMetrics::new(
                raw.resident_bytes,
                raw.virtual_bytes,
                raw.shared_bytes,
                self.facts.total_memory_bytes,
            ),
            io: raw.io,
            thread_count: raw.thread_count,
            fd_count: raw.fd_count,
            parent_pid: raw.parent_pid,
            start_time: raw.start_time,
            captured_at,
            jvm: None,
        }
    }
}

impl ProcessSampler for PlatformSampler {
    fn try_sample_by_pid(&self, pid: u32) -> Result<Option<ProcessSample>> {
        if pid == 0 {
            return Ok(None);
        }
        let raw = self.source.read(pid)?;
        let captured_at = Utc::now();
        Ok(raw
            .filter(|r| r.pid == pid)
            .map(|r| self.normalize(r, captured_at)))
    }

    fn try_get_all_processes(&self) -> Result<Vec<ProcessSample>> {
        let records = self.source.list()?;
        let captured_at = Utc::now();

        let samples: Vec<ProcessSample> = records
            .into_iter()
            .filter(|r| r.pid != 0)
            .map(|r| self.normalize(r, captured_at))
            .collect();

        // Every live pid was just refreshed, so anything older is gone
        self.rates.prune(captured_at);
        Ok(samples)
    }

    fn system_facts(&self) -> SystemFacts {
        self.facts
    }

    fn platform(&self) -> Platform {
        self.source.platform()
    }

    fn retain_rates_for(&self, interval: Duration) {
        self.rates
            .extend_retention(interval * self.retention_multiplier);
    }
}

/// Build the sampler for the operating system this process runs on.
///
/// Fails only when no enumeration facility exists for the platform.
pub fn create_sampler(config: &MonitorConfig) -> Result<PlatformSampler> {
    let platform = Platform::detect()
        .ok_or_else(|| ProcwatchError::unsupported_platform(std::env::consts::OS))?;
    let source = crate::platform::create_source(platform)?;
    Ok(PlatformSampler::new(source, config))
}
