//! Scripted sampler shared by the monitor and service tests.

use chrono::Utc;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use procwatch::core::config::MonitorConfig;
use procwatch::core::procwatch::{
    DiagnosticDump, DiagnosticDumper, DumpType, Platform, ProcessSample, ProcessSampler, SystemFacts,
};
use procwatch::{ProcessMonitorService, ProcwatchError, Result};

/// What the scripted sampler answers for the next pid query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Alive,
    Gone,
    Fail,
}

pub struct ScriptedSampler {
    /// Steps consumed one per pid query; the last one repeats
    steps: Mutex<VecDeque<Step>>,
    processes: Mutex<Vec<ProcessSample>>,
}

impl ScriptedSampler {
    pub fn new(steps: &[Step], processes: Vec<ProcessSample>) -> Self {
        Self {
            steps: Mutex::new(steps.iter().copied().collect()),
            processes: Mutex::new(processes),
        }
    }

    fn next_step(&self) -> Step {
        let mut steps = self.steps.lock();
        if steps.len() > 1 {
            steps.pop_front().unwrap_or(Step::Alive)
        } else {
            steps.front().copied().unwrap_or(Step::Alive)
        }
    }
}

impl ProcessSampler for ScriptedSampler {
    fn try_sample_by_pid(&self, pid: u32) -> Result<Option<ProcessSample>> {
        match self.next_step() {
            Step::Alive => {
                let known = self.processes.lock().iter().find(|p| p.pid == pid).cloned();
                Ok(Some(known.unwrap_or_else(|| process(pid, "scripted"))))
            }
            Step::Gone => Ok(None),
            Step::Fail => Err(ProcwatchError::platform_unavailable("scripted failure")),
        }
    }

    fn try_get_all_processes(&self) -> Result<Vec<ProcessSample>> {
        Ok(self.processes.lock().clone())
    }

    fn system_facts(&self) -> SystemFacts {
        SystemFacts {
            total_memory_bytes: 16 * 1024 * 1024 * 1024,
            cpu_count: 4,
        }
    }

    fn platform(&self) -> Platform {
        Platform::Linux
    }
}

pub fn process(pid: u32, name: &str) -> ProcessSample {
    let mut sample = ProcessSample::minimal(pid, name, Utc::now());
    sample.command_line = format!("/usr/bin/{}", name);
    sample.thread_count = 4;
    sample
}

pub fn fast_config() -> MonitorConfig {
    let mut config = MonitorConfig {
        poll_interval_ms: 10,
        command_timeout_ms: 200,
        ..Default::default()
    };
    config.managed_runtime.enabled = false;
    config
}

pub fn service_with(sampler: ScriptedSampler) -> ProcessMonitorService {
    ProcessMonitorService::with_probe(Arc::new(sampler), None, fast_config()).unwrap()
}

pub const WAIT: Duration = Duration::from_secs(5);

/// Dumper that records its calls instead of running the tools
#[derive(Default)]
pub struct RecordingDumper {
    pub calls: Mutex<Vec<(u32, DumpType)>>,
    pub fail: bool,
}

impl DiagnosticDumper for RecordingDumper {
    fn dump(&self, pid: u32, dump_type: DumpType) -> Result<DiagnosticDump> {
        self.calls.lock().push((pid, dump_type));
        if self.fail {
            return Err(ProcwatchError::platform_unavailable("jstack missing"));
        }
        Ok(DiagnosticDump {
            pid,
            dump_type,
            output: format!("{} output for {}", dump_type, pid),
            captured_at: Utc::now(),
        })
    }
}
