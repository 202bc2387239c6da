//! Managed-runtime (JVM) metrics for sampled processes.
//!
//! The default probe asks the JDK's `jcmd` tool for the target's
//! performance counters and extracts heap, collector and thread figures.

use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use super::metrics::{GcCollector, JvmMetrics, ProcessSample};
use crate::error::{ProcwatchError, Result};
use crate::platform::run_with_timeout;

/// Ticks per second when the target does not report `sun.os.hrt.frequency`
const DEFAULT_TICK_FREQUENCY: u64 = 1_000_000_000;

/// Extracts runtime metrics from processes hosting a managed runtime
pub trait ManagedRuntimeProbe: Send + Sync {
    /// Cheap check on an existing sample, no OS calls
    fn is_managed(&self, sample: &ProcessSample) -> bool {
        is_jvm_process(sample)
    }

    /// Query the runtime inside `pid`; may block up to the probe's timeout
    fn probe(&self, pid: u32) -> Result<JvmMetrics>;
}

/// Name is `java`/`javaw` (optionally `.exe`), the executable is one, or a `-jar` argument is present
pub fn is_jvm_process(sample: &ProcessSample) -> bool {
    let is_java_binary = |name: &str| {
        let lower = name.to_lowercase();
        let stem = lower.strip_suffix(".exe").unwrap_or(&lower);
        stem == "java" || stem == "javaw"
    };

    if is_java_binary(&sample.name) {
        return true;
    }

    let mut tokens = sample.command_line.split_whitespace();
    let executable = tokens
        .next()
        .map(|first| first.rsplit(['/', '\\']).next().unwrap_or(first))
        .unwrap_or("");
    is_java_binary(executable) || tokens.any(|arg| arg == "-jar")
}

/// Parse `jcmd <pid> PerfCounter.print` output
pub fn parse_perf_counters(output: &str) -> Result<JvmMetrics> {
    let counters: HashMap<&str, &str> = output
        .lines()
        .filter_map(|line| line.split_once('='))
        .map(|(key, value)| (key.trim(), value.trim().trim_matches('"')))
        .collect();

    let number = |key: &str| counters.get(key).and_then(|v| v.parse::<u64>().ok());

    let mut heap_used = 0u64;
    let mut heap_committed = 0u64;
    let mut heap_max = 0u64;
    let mut found_heap = false;

    // Generations 0 (young) and 1 (old) make up the heap
    for generation in 0..2 {
        let prefix = format!("sun.gc.generation.{}", generation);
        if let Some(capacity) = number(&format!("{}.capacity", prefix)) {
            heap_committed += capacity;
            found_heap = true;
        }
        if let Some(max) = number(&format!("{}.maxCapacity", prefix)) {
            heap_max += max;
        }
        let space_prefix = format!("{}.space.", prefix);
        for (key, value) in &counters {
            if key.starts_with(&space_prefix) && key.ends_with(".used") {
                if let Ok(used) = value.parse::<u64>() {
                    heap_used += used;
                    found_heap = true;
                }
            }
        }
    }

    if !found_heap {
        return Err(ProcwatchError::platform_unavailable(
            "no heap counters in jcmd output",
        ));
    }

    let frequency = number("sun.os.hrt.frequency")
        .filter(|f| *f > 0)
        .unwrap_or(DEFAULT_TICK_FREQUENCY);

    // Ordered by collector index
    let mut collectors: BTreeMap<u32, GcCollector> = BTreeMap::new();
    for (key, value) in &counters {
        let rest = match key.strip_prefix("sun.gc.collector.") {
            Some(rest) => rest,
            None => continue,
        };
        let (index, field) = match rest.split_once('.') {
            Some((index, field)) => match index.parse::<u32>() {
                Ok(index) => (index, field),
                Err(_) => continue,
            },
            None => continue,
        };
        let collector = collectors.entry(index).or_default();
        match field {
            "name" => collector.name = value.to_string(),
            "invocations" => collector.collections = value.parse().unwrap_or(0),
            "time" => {
                let ticks: u64 = value.parse().unwrap_or(0);
                collector.time_ms = (ticks as u128 * 1000 / frequency as u128) as u64;
            }
            _ => {}
        }
    }

    Ok(JvmMetrics {
        heap_used_bytes: heap_used,
        heap_committed_bytes: heap_committed,
        heap_max_bytes: Some(heap_max).filter(|max| *max > 0),
        collectors: collectors
            .into_values()
            .filter(|c| !c.name.is_empty())
            .collect(),
        live_threads: number("java.threads.live").unwrap_or(0) as u32,
        daemon_threads: number("java.threads.daemon").unwrap_or(0) as u32,
        captured_at: Utc::now(),
    })
}

/// Probe backed by the `jcmd` diagnostic tool
#[derive(Debug, Clone)]
pub struct JcmdProbe {
    program: String,
    timeout: Duration,
}

impl JcmdProbe {
    pub fn new(timeout: Duration) -> Self {
        Self::with_program("jcmd", timeout)
    }

    pub fn with_program(program: impl Into<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            timeout,
        }
    }
}

impl ManagedRuntimeProbe for JcmdProbe {
    fn probe(&self, pid: u32) -> Result<JvmMetrics> {
        let pid_arg = pid.to_string();
        let output = run_with_timeout(&self.program, &[&pid_arg, "PerfCounter.print"], self.timeout)?;
        parse_perf_counters(&output)
    }
}
