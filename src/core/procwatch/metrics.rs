use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Scheduling state of a process, normalized across platforms
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProcessState {
    Running,
    Sleeping,
    Stopped,
    Zombie,
    #[default]
    Unknown,
}

impl ProcessState {
    /// Map a procfs state letter to a state.
    ///
    /// Uninterruptible (`D`), idle (`I`) and macOS `U` waits count as sleeping.
    pub fn from_code(code: &str) -> Self {
        match code.trim().chars().next() {
            Some('R') => ProcessState::Running,
            Some('S' | 's' | 'D' | 'I' | 'U') => ProcessState::Sleeping,
            Some('T' | 't') => ProcessState::Stopped,
            Some('Z') => ProcessState::Zombie,
            _ => ProcessState::Unknown,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ProcessState::Running => "R",
            ProcessState::Sleeping => "S",
            ProcessState::Stopped => "T",
            ProcessState::Zombie => "Z",
            ProcessState::Unknown => "?",
        }
    }
}

impl std::fmt::Display for ProcessState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            ProcessState::Running => "Running",
            ProcessState::Sleeping => "Sleeping",
            ProcessState::Stopped => "Stopped",
            ProcessState::Zombie => "Zombie",
            ProcessState::Unknown => "Unknown",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CpuMetrics {
    /// Rate since the previous sample of the same pid, 0..=100
    pub percent_instant: f64,
    /// Rate since process start, 0..=100
    pub percent_average: f64,
    pub user_mode_ms: u64,
    pub kernel_mode_ms: u64,
    /// Cumulative cpu time as reported by the OS
    pub total_cpu_ms: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoryMetrics {
    pub resident_bytes: u64,
    pub virtual_bytes: u64,
    pub shared_bytes: u64,
    pub percent_of_total: f64,
}

impl MemoryMetrics {
    pub fn new(resident_bytes: u64, virtual_bytes: u64, shared_bytes: u64, total_memory: u64) -> Self {
        Self {
            resident_bytes,
            virtual_bytes,
            shared_bytes,
            percent_of_total: if total_memory > 0 {
                (resident_bytes as f64 / total_memory as f64) * 100.0
            } else {
                0.0
            },
        }
    }
}

/// Cumulative disk IO of a process.
///
/// `Unavailable` means the platform (or the permissions of this process)
/// did not allow measuring IO, which is not the same as a measured zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum IoMetrics {
    #[default]
    Unavailable,
    Measured {
        bytes_read: u64,
        bytes_written: u64,
    },
}

impl IoMetrics {
    pub fn measured(bytes_read: u64, bytes_written: u64) -> Self {
        IoMetrics::Measured {
            bytes_read,
            bytes_written,
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self, IoMetrics::Measured { .. })
    }

    pub fn bytes_read(&self) -> Option<u64> {
        match self {
            IoMetrics::Measured { bytes_read, .. } => Some(*bytes_read),
            IoMetrics::Unavailable => None,
        }
    }

    pub fn bytes_written(&self) -> Option<u64> {
        match self {
            IoMetrics::Measured { bytes_written, .. } => Some(*bytes_written),
            IoMetrics::Unavailable => None,
        }
    }
}

/// Per-collector garbage collection counters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GcCollector {
    pub name: String,
    pub collections: u64,
    pub time_ms: u64,
}

/// Metrics of a managed runtime (JVM) hosted by a sampled process
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JvmMetrics {
    pub heap_used_bytes: u64,
    pub heap_committed_bytes: u64,
    pub heap_max_bytes: Option<u64>,
    pub collectors: Vec<GcCollector>,
    pub live_threads: u32,
    pub daemon_threads: u32,
    pub captured_at: DateTime<Utc>,
}

impl JvmMetrics {
    pub fn total_collections(&self) -> u64 {
        self.collectors.iter().map(|c| c.collections).sum()
    }

    pub fn total_gc_time_ms(&self) -> u64 {
        self.collectors.iter().map(|c| c.time_ms).sum()
    }

    pub fn heap_percent(&self) -> Option<f64> {
        match self.heap_max_bytes {
            Some(max) if max > 0 => Some(self.heap_used_bytes as f64 / max as f64 * 100.0),
            _ => None,
        }
    }
}

/// Snapshot of one process at one point in time.
///
/// Each poll produces a new value; samples are never updated in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessSample {
    pub pid: u32,
    pub name: String,
    pub command_line: String,
    /// Empty when the platform does not expose the owner
    pub user: String,
    pub state: ProcessState,
    pub cpu: CpuMetrics,
    pub memory: MemoryMetrics,
    pub io: IoMetrics,
    pub thread_count: u32,
    /// 0 when unavailable
    pub fd_count: u32,
    pub parent_pid: Option<u32>,
    pub start_time: Option<DateTime<Utc>>,
    pub captured_at: DateTime<Utc>,
    pub jvm: Option<JvmMetrics>,
}

impl ProcessSample {
    /// Creates a sample with only identity fields filled in.
    pub fn minimal(pid: u32, name: impl Into<String>, captured_at: DateTime<Utc>) -> Self {
        Self {
            pid,
            name: name.into(),
            command_line: String::new(),
            user: String::new(),
            state: ProcessState::Unknown,
            cpu: CpuMetrics::default(),
            memory: MemoryMetrics::default(),
            io: IoMetrics::Unavailable,
            thread_count: 0,
            fd_count: 0,
            parent_pid: None,
            start_time: None,
            captured_at,
            jvm: None,
        }
    }

    pub fn uptime(&self) -> Option<chrono::Duration> {
        self.start_time.map(|start| self.captured_at - start)
    }

    /// Returns a copy carrying managed-runtime metrics
    pub fn with_jvm(&self, jvm: JvmMetrics) -> Self {
        Self {
            jvm: Some(jvm),
            ..self.clone()
        }
    }
}

/// System-wide facts, computed once when a sampler is built
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemFacts {
    pub total_memory_bytes: u64,
    pub cpu_count: usize,
}
