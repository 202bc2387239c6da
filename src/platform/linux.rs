//! `/proc` based process source.
//!
//! Every value is read from the per-process files of procfs. The root is
//! injectable so tests can point the source at a fake tree.

use chrono::{DateTime, TimeZone, Utc};
use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::core::procwatch::metrics::{IoMetrics, ProcessState, SystemFacts};
use crate::core::procwatch::source::{Platform, ProcessSource, RawProcess};
use crate::error::{ProcwatchError, Result};

const DEFAULT_PROC_ROOT: &str = "/proc";
const FALLBACK_PAGE_SIZE: u64 = 4096;
const FALLBACK_CLOCK_TICKS: u64 = 100;

/// Fields of `/proc/<pid>/stat` this source uses
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatFields {
    pub pid: u32,
    pub name: String,
    pub state: String,
    pub parent_pid: u32,
    pub utime_ticks: u64,
    pub stime_ticks: u64,
    pub thread_count: u32,
    pub start_ticks: u64,
    pub virtual_bytes: u64,
    pub rss_pages: u64,
}

/// Parse one `stat` line.
///
/// The name is delimited by the first `(` and the LAST `)` because it may
/// itself contain spaces and parentheses.
pub fn parse_stat(content: &str) -> Result<StatFields> {
    let open = content
        .find('(')
        .ok_or_else(|| ProcwatchError::malformed("stat: missing '('"))?;
    let close = content
        .rfind(')')
        .ok_or_else(|| ProcwatchError::malformed("stat: missing ')'"))?;
    if close < open {
        return Err(ProcwatchError::malformed("stat: unbalanced name"));
    }

    let pid = content[..open]
        .trim()
        .parse::<u32>()
        .map_err(|_| ProcwatchError::malformed("stat: bad pid"))?;
    let name = content[open + 1..close].to_string();
    let rest: Vec<&str> = content[close + 1..].split_whitespace().collect();

    // `rest[0]` is field 3 of proc(5)
    let field = |index: usize, label: &str| -> Result<u64> {
        rest.get(index)
            .and_then(|v| v.parse::<u64>().ok())
            .ok_or_else(|| ProcwatchError::malformed(format!("stat: bad {} for pid {}", label, pid)))
    };

    Ok(StatFields {
        pid,
        name,
        state: rest
            .first()
            .map(|s| s.to_string())
            .ok_or_else(|| ProcwatchError::malformed("stat: missing state"))?,
        parent_pid: field(1, "ppid")? as u32,
        utime_ticks: field(11, "utime")?,
        stime_ticks: field(12, "stime")?,
        thread_count: field(17, "num_threads")? as u32,
        start_ticks: field(19, "starttime")?,
        virtual_bytes: field(20, "vsize")?,
        rss_pages: field(21, "rss")?,
    })
}

/// Real uid from the `Uid:` line of `/proc/<pid>/status`
pub fn parse_status_uid(content: &str) -> Option<u32> {
    content
        .lines()
        .find_map(|line| line.strip_prefix("Uid:"))
        .and_then(|rest| rest.split_whitespace().next())
        .and_then(|uid| uid.parse().ok())
}

/// Shared pages from `/proc/<pid>/statm`
pub fn parse_statm_shared(content: &str) -> Option<u64> {
    content.split_whitespace().nth(2).and_then(|v| v.parse().ok())
}

/// `read_bytes` / `write_bytes` of `/proc/<pid>/io`
pub fn parse_io(content: &str) -> Option<IoMetrics> {
    let mut read = None;
    let mut written = None;
    for line in content.lines() {
        if let Some(v) = line.strip_prefix("read_bytes:") {
            read = v.trim().parse().ok();
        } else if let Some(v) = line.strip_prefix("write_bytes:") {
            written = v.trim().parse().ok();
        }
    }
    Some(IoMetrics::measured(read?, written?))
}

/// `MemTotal` in bytes from `/proc/meminfo`
pub fn parse_mem_total(content: &str) -> Option<u64> {
    content
        .lines()
        .find_map(|line| line.strip_prefix("MemTotal:"))
        .and_then(|rest| rest.split_whitespace().next())
        .and_then(|kb| kb.parse::<u64>().ok())
        .map(|kb| kb * 1024)
}

pub fn count_processors(cpuinfo: &str) -> usize {
    cpuinfo
        .lines()
        .filter(|line| {
            line.split(':')
                .next()
                .map(|key| key.trim() == "processor")
                .unwrap_or(false)
        })
        .count()
}

/// Boot time in seconds since the epoch, from `/proc/stat`
pub fn parse_boot_time(content: &str) -> Option<i64> {
    content
        .lines()
        .find_map(|line| line.strip_prefix("btime"))
        .and_then(|v| v.trim().parse().ok())
}

/// uid → login name of every account `sysinfo` knows about
#[cfg(unix)]
pub fn system_user_names() -> HashMap<u32, String> {
    sysinfo::Users::new_with_refreshed_list()
        .list()
        .iter()
        .map(|user| (**user.id(), user.name().to_string()))
        .collect()
}

#[cfg(not(unix))]
pub fn system_user_names() -> HashMap<u32, String> {
    HashMap::new()
}

#[cfg(unix)]
fn system_page_size() -> u64 {
    // SAFETY: sysconf has no preconditions
    let value = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if value > 0 {
        value as u64
    } else {
        FALLBACK_PAGE_SIZE
    }
}

#[cfg(not(unix))]
fn system_page_size() -> u64 {
    FALLBACK_PAGE_SIZE
}

#[cfg(unix)]
fn system_clock_ticks() -> u64 {
    // SAFETY: sysconf has no preconditions
    let value = unsafe { libc::sysconf(libc::_SC_CLK_TCK) };
    if value > 0 {
        value as u64
    } else {
        FALLBACK_CLOCK_TICKS
    }
}

#[cfg(not(unix))]
fn system_clock_ticks() -> u64 {
    FALLBACK_CLOCK_TICKS
}

pub struct LinuxProcSource {
    root: PathBuf,
    users: HashMap<u32, String>,
    page_size: u64,
    clock_ticks: u64,
    boot_time: Option<i64>,
}

impl LinuxProcSource {
    pub fn new() -> Self {
        Self::with_root(DEFAULT_PROC_ROOT).with_users(system_user_names())
    }

    /// Source reading procfs at `root`; owners show as uids until
    /// [`with_users`](Self::with_users) names them
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let boot_time = fs::read_to_string(root.join("stat"))
            .ok()
            .and_then(|content| parse_boot_time(&content));

        Self {
            root,
            users: HashMap::new(),
            page_size: system_page_size(),
            clock_ticks: system_clock_ticks(),
            boot_time,
        }
    }

    pub fn with_users(mut self, users: HashMap<u32, String>) -> Self {
        if users.is_empty() {
            log::debug!("No user accounts known; owners shown as uids");
        }
        self.users = users;
        self
    }

    pub fn page_size(&self) -> u64 {
        self.page_size
    }

    pub fn clock_ticks(&self) -> u64 {
        self.clock_ticks
    }

    fn ticks_to_ms(&self, ticks: u64) -> u64 {
        ticks.saturating_mul(1000) / self.clock_ticks
    }

    fn start_time(&self, start_ticks: u64) -> Option<DateTime<Utc>> {
        let boot = self.boot_time?;
        let offset_ms = self.ticks_to_ms(start_ticks) as i64;
        Utc.timestamp_millis_opt(boot.saturating_mul(1000).saturating_add(offset_ms))
            .single()
    }

    fn user_name(&self, uid: Option<u32>) -> String {
        match uid {
            Some(uid) => self
                .users
                .get(&uid)
                .cloned()
                .unwrap_or_else(|| uid.to_string()),
            None => String::new(),
        }
    }

    fn count_fds(dir: &Path) -> u32 {
        fs::read_dir(dir.join("fd"))
            .map(|entries| entries.filter(|e| e.is_ok()).count() as u32)
            .unwrap_or(0)
    }

    /// Read one process directory; `Ok(None)` when it vanished meanwhile
    fn read_process(&self, pid: u32) -> Result<Option<RawProcess>> {
        let dir = self.root.join(pid.to_string());

        let stat = match fs::read_to_string(dir.join("stat")) {
            Ok(content) => parse_stat(&content)?,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let uid = fs::read_to_string(dir.join("status"))
            .ok()
            .and_then(|content| parse_status_uid(&content));
        let shared_pages = fs::read_to_string(dir.join("statm"))
            .ok()
            .and_then(|content| parse_statm_shared(&content))
            .unwrap_or(0);
        let command_line = fs::read(dir.join("cmdline"))
            .map(|bytes| {
                String::from_utf8_lossy(&bytes)
                    .split('\0')
                    .filter(|part| !part.is_empty())
                    .collect::<Vec<_>>()
                    .join(" ")
            })
            .unwrap_or_default();
        let io = fs::read_to_string(dir.join("io"))
            .ok()
            .and_then(|content| parse_io(&content))
            .unwrap_or(IoMetrics::Unavailable);

        Ok(Some(RawProcess {
            pid: stat.pid,
            parent_pid: Some(stat.parent_pid).filter(|ppid| *ppid != 0),
            command_line: if command_line.is_empty() {
                stat.name.clone()
            } else {
                command_line
            },
            name: stat.name,
            user: self.user_name(uid),
            state: ProcessState::from_code(&stat.state),
            user_mode_ms: self.ticks_to_ms(stat.utime_ticks),
            kernel_mode_ms: self.ticks_to_ms(stat.stime_ticks),
            resident_bytes: stat.rss_pages.saturating_mul(self.page_size),
            virtual_bytes: stat.virtual_bytes,
            shared_bytes: shared_pages.saturating_mul(self.page_size),
            io,
            thread_count: stat.thread_count,
            fd_count: Self::count_fds(&dir),
            start_time: self.start_time(stat.start_ticks),
        }))
    }
}

impl Default for LinuxProcSource {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessSource for LinuxProcSource {
    fn platform(&self) -> Platform {
        Platform::Linux
    }

    fn system_facts(&self) -> Result<SystemFacts> {
        let total_memory_bytes = fs::read_to_string(self.root.join("meminfo"))
            .ok()
            .and_then(|content| parse_mem_total(&content))
            .unwrap_or(0);
        let cpu_count = fs::read_to_string(self.root.join("cpuinfo"))
            .map(|content| count_processors(&content))
            .unwrap_or(0);

        if total_memory_bytes == 0 && cpu_count == 0 {
            return Err(ProcwatchError::platform_unavailable(format!(
                "no meminfo or cpuinfo under {:?}",
                self.root
            )));
        }
        Ok(SystemFacts {
            total_memory_bytes,
            cpu_count,
        })
    }

    fn list(&self) -> Result<Vec<RawProcess>> {
        let entries = fs::read_dir(&self.root).map_err(|e| {
            ProcwatchError::platform_unavailable(format!("cannot list {:?}: {}", self.root, e))
        })?;

        let mut processes = Vec::new();
        for entry in entries.flatten() {
            let pid = match entry.file_name().to_str().and_then(|n| n.parse::<u32>().ok()) {
                Some(pid) => pid,
                None => continue,
            };
            match self.read_process(pid) {
                Ok(Some(process)) => processes.push(process),
                Ok(None) => {}
                Err(e) => log::debug!("Skipping pid {}: {}", pid, e),
            }
        }

        processes.sort_by_key(|p| p.pid);
        Ok(processes)
    }

    fn read(&self, pid: u32) -> Result<Option<RawProcess>> {
        if !self.root.join(pid.to_string()).is_dir() {
            return Ok(None);
        }
        self.read_process(pid)
    }
}
