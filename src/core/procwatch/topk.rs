//! Top-K selection shared by the cpu and memory rankings.

use std::cmp::Ordering;

use super::metrics::ProcessSample;

/// Metric a top-K query ranks by
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopMetric {
    Cpu,
    Memory,
}

impl std::fmt::Display for TopMetric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TopMetric::Cpu => f.write_str("CPU"),
            TopMetric::Memory => f.write_str("MEMORY"),
        }
    }
}

impl std::str::FromStr for TopMetric {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "cpu" => Ok(TopMetric::Cpu),
            "mem" | "memory" | "rss" => Ok(TopMetric::Memory),
            other => Err(format!("unknown ranking metric: {}", other)),
        }
    }
}

/// Descending by metric, ties broken by ascending pid
pub fn compare(a: &ProcessSample, b: &ProcessSample, metric: TopMetric) -> Ordering {
    let by_metric = match metric {
        TopMetric::Cpu => b.cpu.percent_instant.total_cmp(&a.cpu.percent_instant),
        TopMetric::Memory => b.memory.resident_bytes.cmp(&a.memory.resident_bytes),
    };
    by_metric.then_with(|| a.pid.cmp(&b.pid))
}

/// Rank `samples` and keep at most `limit`.
///
/// A limit at or above the population size returns everything.
pub fn select_top(mut samples: Vec<ProcessSample>, metric: TopMetric, limit: usize) -> Vec<ProcessSample> {
    samples.sort_by(|a, b| compare(a, b, metric));
    samples.truncate(limit);
    samples
}
