//! `sysinfo` backed process source, used on macOS.
//!
//! `sysinfo` reports cpu time as one accumulated counter, so the whole of
//! it lands in `user_mode_ms`. Thread counts come from the task list where
//! the OS exposes one; descriptor counts are not available.

use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use std::ffi::OsString;
use sysinfo::{
    CpuRefreshKind, MemoryRefreshKind, Pid, Process, ProcessRefreshKind, ProcessStatus,
    ProcessesToUpdate, RefreshKind, System, UpdateKind, Users,
};

use crate::core::procwatch::metrics::{IoMetrics, ProcessState, SystemFacts};
use crate::core::procwatch::source::{executable_name, Platform, ProcessSource, RawProcess};
use crate::error::{ProcwatchError, Result};

fn process_refresh_kind() -> ProcessRefreshKind {
    ProcessRefreshKind::nothing()
        .with_cpu()
        .with_memory()
        .with_disk_usage()
        .with_tasks()
        .with_user(UpdateKind::OnlyIfNotSet)
        .with_cmd(UpdateKind::OnlyIfNotSet)
}

pub fn state_from_status(status: ProcessStatus) -> ProcessState {
    match status {
        ProcessStatus::Run => ProcessState::Running,
        ProcessStatus::Sleep | ProcessStatus::Idle | ProcessStatus::UninterruptibleDiskSleep => {
            ProcessState::Sleeping
        }
        ProcessStatus::Stop | ProcessStatus::Tracing => ProcessState::Stopped,
        ProcessStatus::Zombie | ProcessStatus::Dead => ProcessState::Zombie,
        _ => ProcessState::Unknown,
    }
}

/// Arguments joined with spaces; empty when the OS hides them
pub fn join_command(args: &[OsString]) -> String {
    args.iter()
        .map(|arg| arg.to_string_lossy())
        .collect::<Vec<_>>()
        .join(" ")
}

fn start_time(secs: u64) -> Option<DateTime<Utc>> {
    if secs == 0 {
        return None;
    }
    Utc.timestamp_opt(i64::try_from(secs).ok()?, 0).single()
}

fn raw_process(process: &Process, users: &Users) -> RawProcess {
    let mut name = process.name().to_string_lossy().into_owned();
    let mut command_line = join_command(process.cmd());
    if command_line.is_empty() {
        command_line = name.clone();
    }
    if name.is_empty() {
        name = executable_name(&command_line);
    }

    let disk = process.disk_usage();
    let user = process
        .user_id()
        .and_then(|uid| users.get_user_by_id(uid))
        .map(|user| user.name().to_string())
        .unwrap_or_default();

    RawProcess {
        pid: process.pid().as_u32(),
        parent_pid: process.parent().map(|p| p.as_u32()).filter(|ppid| *ppid != 0),
        name,
        command_line,
        user,
        state: state_from_status(process.status()),
        user_mode_ms: process.accumulated_cpu_time(),
        kernel_mode_ms: 0,
        resident_bytes: process.memory(),
        virtual_bytes: process.virtual_memory(),
        shared_bytes: 0,
        io: IoMetrics::measured(disk.total_read_bytes, disk.total_written_bytes),
        thread_count: process
            .tasks()
            .map(|tasks| tasks.len().max(1) as u32)
            .unwrap_or(1),
        fd_count: 0,
        start_time: start_time(process.start_time()),
    }
}

pub struct SysinfoSource {
    platform: Platform,
    system: Mutex<System>,
    users: Users,
}

impl SysinfoSource {
    pub fn new(platform: Platform) -> Self {
        let refresh_kind = RefreshKind::nothing()
            .with_cpu(CpuRefreshKind::nothing())
            .with_memory(MemoryRefreshKind::nothing().with_ram());

        Self {
            platform,
            system: Mutex::new(System::new_with_specifics(refresh_kind)),
            users: Users::new_with_refreshed_list(),
        }
    }
}

impl ProcessSource for SysinfoSource {
    fn platform(&self) -> Platform {
        self.platform
    }

    fn system_facts(&self) -> Result<SystemFacts> {
        let mut system = self.system.lock();
        system.refresh_memory_specifics(MemoryRefreshKind::nothing().with_ram());

        let total_memory_bytes = system.total_memory();
        let cpu_count = system.cpus().len();
        if total_memory_bytes == 0 && cpu_count == 0 {
            return Err(ProcwatchError::platform_unavailable(
                "sysinfo reported no memory and no cpus",
            ));
        }
        Ok(SystemFacts {
            total_memory_bytes,
            cpu_count,
        })
    }

    fn list(&self) -> Result<Vec<RawProcess>> {
        let mut system = self.system.lock();
        system.refresh_processes_specifics(ProcessesToUpdate::All, true, process_refresh_kind());
        if system.processes().is_empty() {
            return Err(ProcwatchError::platform_unavailable("sysinfo listed no processes"));
        }

        let mut all: Vec<RawProcess> = system
            .processes()
            .values()
            .map(|process| raw_process(process, &self.users))
            .collect();
        all.sort_by_key(|raw| raw.pid);
        Ok(all)
    }

    fn read(&self, pid: u32) -> Result<Option<RawProcess>> {
        let pid = Pid::from_u32(pid);
        let mut system = self.system.lock();
        system.refresh_processes_specifics(ProcessesToUpdate::Some(&[pid]), true, process_refresh_kind());
        Ok(system
            .process(pid)
            .map(|process| raw_process(process, &self.users)))
    }
}
