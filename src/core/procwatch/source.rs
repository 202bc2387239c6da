use chrono::{DateTime, Utc};

use super::metrics::{IoMetrics, ProcessState, SystemFacts};
use crate::error::Result;

/// Operating systems with a process enumeration facility
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Platform {
    Linux,
    MacOs,
    Windows,
}

impl Platform {
    /// Detect the platform this binary runs on
    pub fn detect() -> Option<Self> {
        Self::from_os_name(std::env::consts::OS)
    }

    pub fn from_os_name(os: &str) -> Option<Self> {
        match os {
            "linux" | "android" => Some(Platform::Linux),
            "macos" => Some(Platform::MacOs),
            "windows" => Some(Platform::Windows),
            _ => None,
        }
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Platform::Linux => f.write_str("linux"),
            Platform::MacOs => f.write_str("macos"),
            Platform::Windows => f.write_str("windows"),
        }
    }
}

/// One process record as read from the OS, already in bytes and milliseconds.
///
/// Cpu fields are cumulative counters; rates are derived later by the sampler.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawProcess {
    pub pid: u32,
    pub parent_pid: Option<u32>,
    pub name: String,
    pub command_line: String,
    pub user: String,
    pub state: ProcessState,
    pub user_mode_ms: u64,
    pub kernel_mode_ms: u64,
    pub resident_bytes: u64,
    pub virtual_bytes: u64,
    pub shared_bytes: u64,
    pub io: IoMetrics,
    pub thread_count: u32,
    pub fd_count: u32,
    pub start_time: Option<DateTime<Utc>>,
}

impl RawProcess {
    pub fn total_cpu_ms(&self) -> u64 {
        self.user_mode_ms.saturating_add(self.kernel_mode_ms)
    }
}

/// OS-specific process enumeration facility.
///
/// Implementations live in the platform layer, one per operating system.
/// `list` skips records it cannot parse; an `Err` means the facility itself
/// could not be queried.
pub trait ProcessSource: Send + Sync {
    fn platform(&self) -> Platform;

    /// Total memory and logical cpu count as reported by the OS
    fn system_facts(&self) -> Result<SystemFacts>;

    /// Enumerate every process
    fn list(&self) -> Result<Vec<RawProcess>>;

    /// Read one process in detail; `Ok(None)` when it does not exist
    fn read(&self, pid: u32) -> Result<Option<RawProcess>>;
}

/// Last path component of an executable, without arguments
pub fn executable_name(command: &str) -> String {
    let first = command.split_whitespace().next().unwrap_or("");
    let name = first.rsplit(['/', '\\']).next().unwrap_or(first);
    if name.is_empty() {
        "unknown".to_string()
    } else {
        name.to_string()
    }
}
