use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::core::procwatch::dump::DumpType;
use crate::error::{ProcwatchError, Result};

/// Environment variable that overrides the config file location
pub const CONFIG_ENV_VAR: &str = "PROCWATCH_CONFIG";

/// Engine configuration consumed when samplers and monitor sessions are built.
///
/// Every field has a serde default so a partial JSON file is valid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Default polling interval for monitor sessions
    pub poll_interval_ms: u64,
    /// Default limit for top-by-cpu / top-by-memory queries
    pub top_limit: usize,
    /// How far back windowed alert rules may look
    pub alert_window_secs: u64,
    /// Capacity of a session's rolling sample history
    pub history_capacity: usize,
    /// Consecutive empty ticks before a monitored pid is considered gone
    pub vanish_confirmations: u32,
    /// Upper bound for any helper-process query (jcmd, jstack, lsof, ...)
    pub command_timeout_ms: u64,
    /// Delta-rate entries live for this many polling intervals
    pub rate_cache_retention_multiplier: u32,
    pub worker_threads: usize,
    pub max_blocking_threads: usize,
    pub managed_runtime: ManagedRuntimeConfig,
    /// Used when the OS query for total memory fails; runtime-visible value when unset
    pub fallback_total_memory_bytes: Option<u64>,
    /// Used when the OS query for the cpu count fails; runtime-visible value when unset
    pub fallback_cpu_count: Option<usize>,
    /// Alert rule expressions applied to every session, e.g. `cpu>80% for 30s`
    pub alert_rules: Vec<String>,
    /// Dump captured whenever a tick raises an alert
    pub dump_on_breach: Option<DumpType>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagedRuntimeConfig {
    pub enabled: bool,
    pub timeout_ms: u64,
}

impl Default for ManagedRuntimeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            timeout_ms: 2_000,
        }
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1_000,
            top_limit: 10,
            alert_window_secs: 600,
            history_capacity: 60,
            vanish_confirmations: 2,
            command_timeout_ms: 5_000,
            rate_cache_retention_multiplier: 3,
            worker_threads: 2,
            max_blocking_threads: 4,
            managed_runtime: ManagedRuntimeConfig::default(),
            fallback_total_memory_bytes: None,
            fallback_cpu_count: None,
            alert_rules: Vec::new(),
            dump_on_breach: None,
        }
    }
}

impl MonitorConfig {
    /// Load the config from `$PROCWATCH_CONFIG` or the user config directory.
    ///
    /// A missing or unreadable file yields the defaults; an invalid one is
    /// reported and replaced by the defaults as well.
    pub fn load() -> Result<Self> {
        let path = match Self::get_config_path() {
            Some(path) => path,
            None => {
                log::debug!("No config directory available, using defaults");
                return Ok(Self::default());
            }
        };

        if !path.exists() {
            return Ok(Self::default());
        }

        match Self::load_from(&path) {
            Ok(config) => Ok(config),
            Err(e) => {
                log::warn!("Ignoring config file {:?}: {}", path, e);
                Ok(Self::default())
            }
        }
    }

    /// Load and validate a config file at an explicit path
    pub fn load_from(path: &Path) -> Result<Self> {
        let data = fs::read_to_string(path)?;

        // Empty file means "all defaults"
        let config: MonitorConfig = if data.trim().is_empty() {
            MonitorConfig::default()
        } else {
            serde_json::from_str(&data)?
        };

        config.validate()?;
        Ok(config)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let data = serde_json::to_string_pretty(self)?;
        fs::write(path, data)?;

        Ok(())
    }

    /// Resolve the config file location (`$PROCWATCH_CONFIG` wins)
    pub fn get_config_path() -> Option<PathBuf> {
        if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
            if !path.trim().is_empty() {
                return Some(PathBuf::from(path));
            }
        }

        dirs::config_dir().map(|dir| dir.join("procwatch").join("config.json"))
    }

    pub fn validate(&self) -> Result<()> {
        if self.poll_interval_ms == 0 {
            return Err(ProcwatchError::config("poll_interval_ms must be greater than 0"));
        }
        if self.history_capacity == 0 {
            return Err(ProcwatchError::config("history_capacity must be greater than 0"));
        }
        if self.vanish_confirmations == 0 {
            return Err(ProcwatchError::config("vanish_confirmations must be at least 1"));
        }
        if self.worker_threads == 0 || self.max_blocking_threads == 0 {
            return Err(ProcwatchError::config("worker pool sizes must be greater than 0"));
        }
        if self.rate_cache_retention_multiplier == 0 {
            return Err(ProcwatchError::config(
                "rate_cache_retention_multiplier must be at least 1",
            ));
        }
        if self.fallback_cpu_count == Some(0) {
            return Err(ProcwatchError::config("fallback_cpu_count must be greater than 0"));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn alert_window(&self) -> Duration {
        Duration::from_secs(self.alert_window_secs)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    /// How long a delta-rate entry survives for a given polling interval
    pub fn rate_retention(&self, interval: Duration) -> Duration {
        interval * self.rate_cache_retention_multiplier
    }

    /// Fallback total memory: configured constant, else what `sysinfo` reports
    pub fn fallback_total_memory(&self) -> u64 {
        self.fallback_total_memory_bytes.unwrap_or_else(|| {
            let mut system = sysinfo::System::new();
            system.refresh_memory();
            system.total_memory()
        })
    }

    /// Fallback cpu count: configured constant, else the runtime-visible parallelism
    pub fn fallback_cpu_count(&self) -> usize {
        self.fallback_cpu_count.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        })
    }
}
