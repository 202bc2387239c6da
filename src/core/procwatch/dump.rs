//! Diagnostic dumps captured when an alert fires.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{ProcwatchError, Result};
use crate::platform::command::run_with_timeout;

/// Which diagnostic tool to run against the offending process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DumpType {
    /// Thread stacks of a JVM
    Jstack,
    /// Heap histogram of a JVM
    Jmap,
    /// Native thread stacks
    Pstack,
    /// Open files and sockets
    Lsof,
}

impl DumpType {
    pub const ALL: [DumpType; 4] = [
        DumpType::Jstack,
        DumpType::Jmap,
        DumpType::Pstack,
        DumpType::Lsof,
    ];

    /// Program and arguments that produce this dump for `pid`
    pub fn command(self, pid: u32) -> (&'static str, Vec<String>) {
        let pid = pid.to_string();
        match self {
            DumpType::Jstack => ("jstack", vec![pid]),
            DumpType::Jmap => ("jmap", vec!["-histo".to_string(), pid]),
            DumpType::Pstack => ("pstack", vec![pid]),
            DumpType::Lsof => ("lsof", vec!["-p".to_string(), pid]),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DumpType::Jstack => "jstack",
            DumpType::Jmap => "jmap",
            DumpType::Pstack => "pstack",
            DumpType::Lsof => "lsof",
        }
    }
}

impl fmt::Display for DumpType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DumpType {
    type Err = ProcwatchError;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim();
        DumpType::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| {
                ProcwatchError::config(format!(
                    "unknown dump type '{}' (expected jstack, jmap, pstack or lsof)",
                    wanted
                ))
            })
    }
}

/// Output of one dump
#[derive(Debug, Clone, Serialize)]
pub struct DiagnosticDump {
    pub pid: u32,
    pub dump_type: DumpType,
    pub output: String,
    pub captured_at: DateTime<Utc>,
}

/// Runs diagnostic dumps; a seam so sessions can be exercised without the tools
pub trait DiagnosticDumper: Send + Sync {
    fn dump(&self, pid: u32, dump_type: DumpType) -> Result<DiagnosticDump>;
}

/// Shells out to the dump tool with a deadline
#[derive(Debug, Clone)]
pub struct CommandDumper {
    timeout: Duration,
}

impl CommandDumper {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl DiagnosticDumper for CommandDumper {
    fn dump(&self, pid: u32, dump_type: DumpType) -> Result<DiagnosticDump> {
        let (program, args) = dump_type.command(pid);
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        log::info!("Executing {} for pid {}", dump_type, pid);

        let output = run_with_timeout(program, &args, self.timeout)?;
        Ok(DiagnosticDump {
            pid,
            dump_type,
            output,
            captured_at: Utc::now(),
        })
    }
}
