//! WMI based process source for Windows.
//!
//! Rows of `Win32_Process` are fetched through the `wmi` crate. The row to
//! record conversion is plain data so it is tested on every platform.

use chrono::{DateTime, Duration as ChronoDuration, NaiveDateTime, Utc};
use serde::Deserialize;

use crate::core::procwatch::metrics::{IoMetrics, ProcessState, SystemFacts};
use crate::core::procwatch::source::{executable_name, Platform, ProcessSource, RawProcess};
use crate::error::{ProcwatchError, Result};

#[cfg(windows)]
use wmi::WMIConnection;

/// Properties selected from `Win32_Process`
#[cfg(windows)]
const PROCESS_COLUMNS: &str = "ProcessId, ParentProcessId, Name, CommandLine, ThreadCount, \
HandleCount, WorkingSetSize, VirtualSize, UserModeTime, KernelModeTime, ReadTransferCount, \
WriteTransferCount, CreationDate";

/// WMI cpu times are in 100 ns units
const TICKS_PER_MS: u64 = 10_000;

#[derive(Deserialize, Debug, Default, Clone)]
#[serde(rename = "Win32_Process")]
#[serde(rename_all = "PascalCase")]
pub struct Win32Process {
    pub process_id: u32,
    pub parent_process_id: Option<u32>,
    pub name: Option<String>,
    pub command_line: Option<String>,
    pub thread_count: Option<u32>,
    pub handle_count: Option<u32>,
    pub working_set_size: Option<u64>,
    pub virtual_size: Option<u64>,
    pub user_mode_time: Option<u64>,
    pub kernel_mode_time: Option<u64>,
    pub read_transfer_count: Option<u64>,
    pub write_transfer_count: Option<u64>,
    pub creation_date: Option<String>,
}

#[cfg_attr(not(windows), allow(dead_code))]
#[derive(Deserialize, Debug)]
#[serde(rename = "Win32_ComputerSystem")]
#[serde(rename_all = "PascalCase")]
struct Win32ComputerSystem {
    total_physical_memory: Option<u64>,
    number_of_logical_processors: Option<u32>,
}

/// Parse a CIM datetime such as `20231114221320.123456+060`.
///
/// The trailing sign and digits are the UTC offset in minutes.
pub fn parse_cim_datetime(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    let local = value.get(..21)?;
    let offset = value.get(21..).filter(|offset| !offset.is_empty())?;
    let naive = NaiveDateTime::parse_from_str(local, "%Y%m%d%H%M%S%.f").ok()?;
    let offset_minutes: i64 = offset.parse().ok()?;
    Some((naive - ChronoDuration::minutes(offset_minutes)).and_utc())
}

fn non_empty(value: Option<&String>) -> Option<&str> {
    value.map(String::as_str).filter(|v| !v.trim().is_empty())
}

/// Convert one WMI row; the owner is not part of `Win32_Process`
pub fn raw_from_row(row: &Win32Process) -> RawProcess {
    let command_line = non_empty(row.command_line.as_ref()).map(str::to_string);
    let name = match non_empty(row.name.as_ref()) {
        Some(name) => name.to_string(),
        None => command_line
            .as_deref()
            .map(executable_name)
            .unwrap_or_else(|| "unknown".to_string()),
    };

    let io = match (row.read_transfer_count, row.write_transfer_count) {
        (Some(read), Some(written)) => IoMetrics::measured(read, written),
        _ => IoMetrics::Unavailable,
    };

    RawProcess {
        pid: row.process_id,
        parent_pid: row.parent_process_id.filter(|ppid| *ppid != 0),
        command_line: command_line.unwrap_or_else(|| name.clone()),
        name,
        user: String::new(),
        state: ProcessState::Running,
        user_mode_ms: row.user_mode_time.unwrap_or(0) / TICKS_PER_MS,
        kernel_mode_ms: row.kernel_mode_time.unwrap_or(0) / TICKS_PER_MS,
        resident_bytes: row.working_set_size.unwrap_or(0),
        virtual_bytes: row.virtual_size.unwrap_or(0),
        shared_bytes: 0,
        io,
        thread_count: row.thread_count.unwrap_or(0),
        fd_count: row.handle_count.unwrap_or(0),
        start_time: row.creation_date.as_deref().and_then(parse_cim_datetime),
    }
}

#[derive(Debug, Default)]
pub struct WindowsWmiSource;

impl WindowsWmiSource {
    pub fn new() -> Self {
        Self
    }
}

#[cfg(windows)]
fn connect() -> Result<WMIConnection> {
    WMIConnection::new()
        .map_err(|e| ProcwatchError::platform_unavailable(format!("Failed to connect to WMI: {}", e)))
}

#[cfg(windows)]
fn query_processes(filter: Option<u32>) -> Result<Vec<Win32Process>> {
    let wmi_con = connect()?;
    let query = match filter {
        Some(pid) => format!("SELECT {} FROM Win32_Process WHERE ProcessId = {}", PROCESS_COLUMNS, pid),
        None => format!("SELECT {} FROM Win32_Process", PROCESS_COLUMNS),
    };
    wmi_con
        .raw_query(&query)
        .map_err(|e| ProcwatchError::platform_unavailable(format!("WMI query failed: {}", e)))
}

#[cfg(windows)]
impl ProcessSource for WindowsWmiSource {
    fn platform(&self) -> Platform {
        Platform::Windows
    }

    fn system_facts(&self) -> Result<SystemFacts> {
        let wmi_con = connect()?;
        let systems: Vec<Win32ComputerSystem> = wmi_con
            .query()
            .map_err(|e| ProcwatchError::platform_unavailable(format!("WMI query failed: {}", e)))?;
        let system = systems.first().ok_or_else(|| {
            ProcwatchError::platform_unavailable("Win32_ComputerSystem returned no rows")
        })?;

        Ok(SystemFacts {
            total_memory_bytes: system.total_physical_memory.unwrap_or(0),
            cpu_count: system.number_of_logical_processors.unwrap_or(0) as usize,
        })
    }

    fn list(&self) -> Result<Vec<RawProcess>> {
        let mut all: Vec<RawProcess> = query_processes(None)?.iter().map(raw_from_row).collect();
        all.sort_by_key(|raw| raw.pid);
        Ok(all)
    }

    fn read(&self, pid: u32) -> Result<Option<RawProcess>> {
        Ok(query_processes(Some(pid))?
            .iter()
            .find(|row| row.process_id == pid)
            .map(raw_from_row))
    }
}

#[cfg(not(windows))]
impl ProcessSource for WindowsWmiSource {
    fn platform(&self) -> Platform {
        Platform::Windows
    }

    fn system_facts(&self) -> Result<SystemFacts> {
        Err(ProcwatchError::unsupported_platform("WMI is only available on Windows"))
    }

    fn list(&self) -> Result<Vec<RawProcess>> {
        Err(ProcwatchError::unsupported_platform("WMI is only available on Windows"))
    }

    fn read(&self, _pid: u32) -> Result<Option<RawProcess>> {
        Err(ProcwatchError::unsupported_platform("WMI is only available on Windows"))
    }
}
