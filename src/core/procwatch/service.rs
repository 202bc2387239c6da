//! Entry point of the engine.
//!
//! `ProcessMonitorService` owns the worker runtime that monitor sessions run
//! on and exposes the one-shot queries of its sampler.

use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::alerts::{AlertPolicy, NoAlerts, RuleAlertPolicy};
use super::dump::{CommandDumper, DiagnosticDump, DiagnosticDumper, DumpType};
use super::metrics::{JvmMetrics, ProcessSample, SystemFacts};
use super::monitor::{
    MonitorEvent, MonitorSession, MonitorSettings, MonitorTarget, MonitorUpdate, SessionEngine,
    SessionState,
};
use super::rules::{self, AlertRule};
use super::runtime_probe::{JcmdProbe, ManagedRuntimeProbe};
use super::sampler::ProcessSampler;
use crate::core::config::MonitorConfig;
use crate::error::{ProcwatchError, Result};

pub struct ProcessMonitorService {
    config: MonitorConfig,
    default_rules: Vec<AlertRule>,
    engine: Arc<SessionEngine>,
    sessions: Mutex<Vec<MonitorSession>>,
    next_session_id: AtomicU64,
    runtime: tokio::runtime::Runtime,
}

impl ProcessMonitorService {
    /// Build the service around `sampler`, with the `jcmd` runtime probe
    /// when enabled in `config`.
    pub fn new(sampler: Arc<dyn ProcessSampler>, config: MonitorConfig) -> Result<Self> {
        let probe: Option<Arc<dyn ManagedRuntimeProbe>> = if config.managed_runtime.enabled {
            Some(Arc::new(JcmdProbe::new(Duration::from_millis(
                config.managed_runtime.timeout_ms,
            ))))
        } else {
            None
        };
        Self::with_probe(sampler, probe, config)
    }

    /// Build the service with an explicit runtime probe and the command-line
    /// dump tools.
    pub fn with_probe(
        sampler: Arc<dyn ProcessSampler>,
        probe: Option<Arc<dyn ManagedRuntimeProbe>>,
        config: MonitorConfig,
    ) -> Result<Self> {
        let dumper = Arc::new(CommandDumper::new(config.command_timeout()));
        Self::with_components(sampler, probe, dumper, config)
    }

    pub fn with_components(
        sampler: Arc<dyn ProcessSampler>,
        probe: Option<Arc<dyn ManagedRuntimeProbe>>,
        dumper: Arc<dyn DiagnosticDumper>,
        config: MonitorConfig,
    ) -> Result<Self> {
        config.validate()?;
        let default_rules = rules::parse_rules(&config.alert_rules)?;

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(config.worker_threads)
            .max_blocking_threads(config.max_blocking_threads)
            .enable_time()
            .thread_name("procwatch-worker")
            .build()?;

        log::debug!(
            "Service ready: {} workers, {} blocking threads, {} default rules",
            config.worker_threads,
            config.max_blocking_threads,
            default_rules.len()
        );

        Ok(Self {
            engine: Arc::new(SessionEngine {
                handle: runtime.handle().clone(),
                sampler,
                probe,
                dumper,
            }),
            config,
            default_rules,
            sessions: Mutex::new(Vec::new()),
            next_session_id: AtomicU64::new(1),
            runtime,
        })
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    pub fn sampler(&self) -> &Arc<dyn ProcessSampler> {
        &self.engine.sampler
    }

    pub fn system_facts(&self) -> SystemFacts {
        self.engine.sampler.system_facts()
    }

    pub fn sample_by_pid(&self, pid: u32) -> Option<ProcessSample> {
        self.engine.sampler.sample_by_pid(pid)
    }

    pub fn sample_by_name(&self, pattern: &str) -> Vec<ProcessSample> {
        self.engine.sampler.sample_by_name(pattern)
    }

    pub fn sample_by_command(&self, pattern: &str) -> Vec<ProcessSample> {
        self.engine.sampler.sample_by_command(pattern)
    }

    pub fn top_by_cpu(&self, limit: usize) -> Vec<ProcessSample> {
        self.engine.sampler.top_by_cpu(limit)
    }

    pub fn top_by_memory(&self, limit: usize) -> Vec<ProcessSample> {
        self.engine.sampler.top_by_memory(limit)
    }

    pub fn get_all_processes(&self) -> Vec<ProcessSample> {
        self.engine.sampler.get_all_processes()
    }

    /// Managed-runtime metrics of `pid`; `None` when the process is not a
    /// managed runtime, the probe is disabled or the query failed.
    pub fn jvm_metrics(&self, pid: u32) -> Option<JvmMetrics> {
        let probe = self.engine.probe.as_ref()?;
        let sample = self.sample_by_pid(pid)?;
        if !probe.is_managed(&sample) {
            return None;
        }
        match probe.probe(pid) {
            Ok(jvm) => Some(jvm),
            Err(e) => {
                log::debug!("Runtime probe for pid {} failed: {}", pid, e);
                None
            }
        }
    }

    /// Run a diagnostic dump against `pid` right away
    pub fn execute_dump(&self, pid: u32, dump_type: DumpType) -> Result<DiagnosticDump> {
        if pid == 0 {
            return Err(ProcwatchError::not_found("pid 0 cannot be dumped"));
        }
        self.engine.dumper.dump(pid, dump_type)
    }

    pub fn parse_rules<S: AsRef<str>>(&self, expressions: &[S]) -> Result<Vec<AlertRule>> {
        rules::parse_rules(expressions)
    }

    /// Policy evaluating the configured default rules
    pub fn default_policy(&self) -> Box<dyn AlertPolicy> {
        if self.default_rules.is_empty() {
            Box::new(NoAlerts)
        } else {
            self.rule_policy(self.default_rules.clone())
        }
    }

    pub fn rule_policy(&self, rules: Vec<AlertRule>) -> Box<dyn AlertPolicy> {
        Box::new(RuleAlertPolicy::new(rules, self.config.alert_window()))
    }

    /// Create an idle session for `target` with the configured defaults.
    ///
    /// Adjust it with `set_interval` / `set_policy`, then call `start`.
    pub fn session(&self, target: MonitorTarget) -> MonitorSession {
        let id = self.next_session_id.fetch_add(1, Ordering::Relaxed);
        let session = MonitorSession::new(
            id,
            target,
            Arc::clone(&self.engine),
            MonitorSettings::from_config(&self.config),
            self.default_policy(),
        );

        let mut sessions = self.sessions.lock();
        sessions.retain(|s| s.state() != SessionState::Stopped);
        sessions.push(session.clone());
        session
    }

    pub fn start_monitoring_pid<S, E>(&self, pid: u32, on_sample: S, on_error: E) -> Result<MonitorSession>
    where
        S: FnMut(MonitorUpdate) + Send + 'static,
        E: FnMut(MonitorEvent) + Send + 'static,
    {
        if pid == 0 {
            return Err(ProcwatchError::not_found("pid 0 cannot be monitored"));
        }
        let session = self.session(MonitorTarget::Pid(pid));
        session.start(on_sample, on_error)?;
        Ok(session)
    }

    pub fn start_monitoring_by_name<S, E>(
        &self,
        pattern: &str,
        on_sample: S,
        on_error: E,
    ) -> Result<MonitorSession>
    where
        S: FnMut(MonitorUpdate) + Send + 'static,
        E: FnMut(MonitorEvent) + Send + 'static,
    {
        if pattern.trim().is_empty() {
            return Err(ProcwatchError::config("name pattern must not be empty"));
        }
        let session = self.session(MonitorTarget::Name(pattern.to_string()));
        session.start(on_sample, on_error)?;
        Ok(session)
    }

    /// Sessions that have not stopped yet
    pub fn active_sessions(&self) -> Vec<MonitorSession> {
        self.sessions
            .lock()
            .iter()
            .filter(|s| s.state() != SessionState::Stopped)
            .cloned()
            .collect()
    }

    /// Stop every session and tear down the worker runtime
    pub fn shutdown(self) {
        let sessions: Vec<MonitorSession> = self.sessions.lock().drain(..).collect();
        for session in &sessions {
            session.stop();
        }

        let grace = self.config.poll_interval() + self.config.command_timeout();
        for session in &sessions {
            if !session.wait_stopped(grace) {
                log::warn!("Session {} did not stop within {:?}", session.id(), grace);
            }
        }

        self.runtime.shutdown_timeout(grace);
        log::debug!("Service shut down");
    }
}

impl fmt::Debug for ProcessMonitorService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessMonitorService")
            .field("platform", &self.engine.sampler.platform())
            .field("poll_interval", &self.config.poll_interval())
            .field("default_rules", &self.default_rules.len())
            .field("runtime_metrics", &self.engine.probe.is_some())
            .field("active_sessions", &self.active_sessions().len())
            .finish()
    }
}
