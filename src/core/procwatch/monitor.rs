//! Live monitoring sessions.
//!
//! A session repeatedly samples one target on the service's tokio runtime,
//! keeps a bounded history, asks its alert policy about every sample and
//! hands the result to the caller. `stop()` flips a watch channel that every
//! await point of the loop races against. A blocking OS query that is
//! already running finishes on the blocking pool, but its result is
//! discarded and no callback fires after the stop.

use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};

use super::alerts::{Alert, AlertPolicy};
use super::dump::{DiagnosticDump, DiagnosticDumper, DumpType};
use super::history::SampleHistory;
use super::metrics::ProcessSample;
use super::runtime_probe::ManagedRuntimeProbe;
use super::sampler::ProcessSampler;
use crate::core::config::MonitorConfig;
use crate::error::{ProcwatchError, Result};

/// What a session follows
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MonitorTarget {
    Pid(u32),
    /// Case-insensitive name substring, resolved once to the lowest matching pid
    Name(String),
}

impl fmt::Display for MonitorTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MonitorTarget::Pid(pid) => write!(f, "pid {}", pid),
            MonitorTarget::Name(pattern) => write!(f, "name '{}'", pattern),
        }
    }
}

/// One delivered tick: the sample and the alerts it raised
#[derive(Debug, Clone)]
pub struct MonitorUpdate {
    pub sample: ProcessSample,
    pub alerts: Vec<Alert>,
    /// Captured when the alerts are non-empty and a dump type is configured
    pub dump: Option<DiagnosticDump>,
}

/// Out-of-band notifications of a session
#[derive(Debug)]
pub enum MonitorEvent {
    /// The platform facility failed this tick; the session keeps going
    Transient(ProcwatchError),
    /// The monitored pid disappeared; the session has stopped
    Vanished { pid: u32 },
    /// No process matched the name pattern; the session has stopped
    TargetNotFound { pattern: String },
}

impl MonitorEvent {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, MonitorEvent::Transient(_))
    }
}

impl fmt::Display for MonitorEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MonitorEvent::Transient(e) => write!(f, "sampling failed, retrying: {}", e),
            MonitorEvent::Vanished { pid } => write!(f, "process {} is gone", pid),
            MonitorEvent::TargetNotFound { pattern } => {
                write!(f, "no process matches '{}'", pattern)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Monitoring,
    Stopped,
}

/// Per-session tunables, defaulted from [`MonitorConfig`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorSettings {
    pub interval: Duration,
    pub history_capacity: usize,
    pub vanish_confirmations: u32,
    /// `None` disables the managed-runtime probe for this session
    pub probe_timeout: Option<Duration>,
    pub dump_on_breach: Option<DumpType>,
}

impl MonitorSettings {
    pub fn from_config(config: &MonitorConfig) -> Self {
        Self {
            interval: config.poll_interval(),
            history_capacity: config.history_capacity,
            vanish_confirmations: config.vanish_confirmations,
            probe_timeout: config
                .managed_runtime
                .enabled
                .then(|| Duration::from_millis(config.managed_runtime.timeout_ms)),
            dump_on_breach: config.dump_on_breach,
        }
    }
}

/// What sessions of one service share
pub(crate) struct SessionEngine {
    pub(crate) handle: Handle,
    pub(crate) sampler: Arc<dyn ProcessSampler>,
    pub(crate) probe: Option<Arc<dyn ManagedRuntimeProbe>>,
    pub(crate) dumper: Arc<dyn DiagnosticDumper>,
}

struct Pending {
    settings: MonitorSettings,
    policy: Box<dyn AlertPolicy>,
}

struct Shared {
    id: u64,
    target: MonitorTarget,
    state: Mutex<SessionState>,
    state_changed: Condvar,
    stop_tx: watch::Sender<bool>,
    pid: Mutex<Option<u32>>,
    pending: Mutex<Option<Pending>>,
}

impl Shared {
    fn set_state(&self, next: SessionState) {
        let mut state = self.state.lock();
        if *state != next {
            log::debug!("Session {} ({}): {:?} -> {:?}", self.id, self.target, *state, next);
            *state = next;
        }
        self.state_changed.notify_all();
    }
}

/// Handle to one monitoring session; clones refer to the same session
#[derive(Clone)]
pub struct MonitorSession {
    shared: Arc<Shared>,
    engine: Arc<SessionEngine>,
}

impl MonitorSession {
    pub(crate) fn new(
        id: u64,
        target: MonitorTarget,
        engine: Arc<SessionEngine>,
        settings: MonitorSettings,
        policy: Box<dyn AlertPolicy>,
    ) -> Self {
        let (stop_tx, _) = watch::channel(false);
        let pid = match &target {
            MonitorTarget::Pid(pid) => Some(*pid),
            MonitorTarget::Name(_) => None,
        };
        Self {
            shared: Arc::new(Shared {
                id,
                target,
                state: Mutex::new(SessionState::Idle),
                state_changed: Condvar::new(),
                stop_tx,
                pid: Mutex::new(pid),
                pending: Mutex::new(Some(Pending { settings, policy })),
            }),
            engine,
        }
    }

    pub fn id(&self) -> u64 {
        self.shared.id
    }

    pub fn target(&self) -> &MonitorTarget {
        &self.shared.target
    }

    pub fn state(&self) -> SessionState {
        *self.shared.state.lock()
    }

    pub fn is_running(&self) -> bool {
        self.state() == SessionState::Monitoring
    }

    /// The pid being followed; `None` until a name pattern is resolved
    pub fn pid(&self) -> Option<u32> {
        *self.shared.pid.lock()
    }

    /// Change the polling interval; only before `start`
    pub fn set_interval(&self, interval: Duration) -> Result<()> {
        if interval.is_zero() {
            return Err(ProcwatchError::config("polling interval must be greater than 0"));
        }
        self.with_pending(|pending| pending.settings.interval = interval)
    }

    /// Replace the alert policy; only before `start`
    pub fn set_policy(&self, policy: Box<dyn AlertPolicy>) -> Result<()> {
        self.with_pending(move |pending| pending.policy = policy)
    }

    /// Capture a diagnostic dump on every tick that raises alerts; only before `start`
    pub fn set_dump_on_breach(&self, dump_type: Option<DumpType>) -> Result<()> {
        self.with_pending(|pending| pending.settings.dump_on_breach = dump_type)
    }

    fn with_pending(&self, f: impl FnOnce(&mut Pending)) -> Result<()> {
        match self.shared.pending.lock().as_mut() {
            Some(pending) => {
                f(pending);
                Ok(())
            }
            None => Err(ProcwatchError::runtime(format!(
                "session {} has already started",
                self.shared.id
            ))),
        }
    }

    /// Start polling. `on_sample` receives every successful tick, `on_error`
    /// every [`MonitorEvent`]; both run on a runtime worker thread.
    pub fn start<S, E>(&self, on_sample: S, on_error: E) -> Result<()>
    where
        S: FnMut(MonitorUpdate) + Send + 'static,
        E: FnMut(MonitorEvent) + Send + 'static,
    {
        let pending = self.shared.pending.lock().take().ok_or_else(|| {
            match (self.state(), self.pid()) {
                (SessionState::Stopped, Some(pid)) => ProcwatchError::SessionTerminated { pid },
                _ => ProcwatchError::runtime(format!(
                    "session {} has already started",
                    self.shared.id
                )),
            }
        })?;

        self.engine.sampler.retain_rates_for(pending.settings.interval);
        self.shared.set_state(SessionState::Monitoring);
        log::info!(
            "Monitoring {} every {:?} (session {})",
            self.shared.target,
            pending.settings.interval,
            self.shared.id
        );

        let context = LoopContext {
            shared: Arc::clone(&self.shared),
            sampler: Arc::clone(&self.engine.sampler),
            probe: self.engine.probe.clone(),
            dumper: Arc::clone(&self.engine.dumper),
            settings: pending.settings,
            policy: pending.policy,
            history: SampleHistory::with_capacity(pending.settings.history_capacity),
            on_sample: Box::new(on_sample),
            on_error: Box::new(on_error),
        };
        self.engine.handle.spawn(run_session(context));
        Ok(())
    }

    /// Request the session to stop; idempotent and callable from any thread.
    ///
    /// The loop exits within one polling interval, even while a sample or
    /// managed-runtime query is still outstanding. An idle session stops
    /// immediately.
    pub fn stop(&self) {
        let _ = self.shared.stop_tx.send_replace(true);
        if self.shared.pending.lock().take().is_some() {
            self.shared.set_state(SessionState::Stopped);
        }
    }

    /// Block until the session is `Stopped` or `timeout` elapses.
    ///
    /// Must not be called from the session's own callbacks.
    pub fn wait_stopped(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.state.lock();
        while *state != SessionState::Stopped {
            if self
                .shared
                .state_changed
                .wait_until(&mut state, deadline)
                .timed_out()
            {
                return *state == SessionState::Stopped;
            }
        }
        true
    }
}

impl fmt::Debug for MonitorSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MonitorSession")
            .field("id", &self.shared.id)
            .field("target", &self.shared.target)
            .field("state", &self.state())
            .finish()
    }
}

struct LoopContext {
    shared: Arc<Shared>,
    sampler: Arc<dyn ProcessSampler>,
    probe: Option<Arc<dyn ManagedRuntimeProbe>>,
    dumper: Arc<dyn DiagnosticDumper>,
    settings: MonitorSettings,
    policy: Box<dyn AlertPolicy>,
    history: SampleHistory,
    on_sample: Box<dyn FnMut(MonitorUpdate) + Send>,
    on_error: Box<dyn FnMut(MonitorEvent) + Send>,
}

/// Marks the session stopped however the loop ends, including runtime shutdown
struct StoppedOnDrop(Arc<Shared>);

impl Drop for StoppedOnDrop {
    fn drop(&mut self) {
        self.0.set_state(SessionState::Stopped);
    }
}

enum Tick {
    Sampled(ProcessSample),
    Missing(u32),
    NoMatch,
    Failed(ProcwatchError),
}

async fn run_session(mut ctx: LoopContext) {
    let _guard = StoppedOnDrop(Arc::clone(&ctx.shared));
    let mut stop_rx = ctx.shared.stop_tx.subscribe();
    let mut misses = 0u32;

    let mut ticker = interval(ctx.settings.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            changed = stop_rx.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
        if *stop_rx.borrow() {
            break;
        }

        let tick = tokio::select! {
            tick = sample_target(&ctx.shared, &ctx.sampler) => tick,
            _ = stop_rx.changed() => break,
        };
        if *stop_rx.borrow() {
            break;
        }

        match tick {
            Tick::Sampled(sample) => {
                misses = 0;
                // A slow runtime query must not hold the loop past one interval
                let runtime_wait = ctx
                    .settings
                    .probe_timeout
                    .map(|timeout| timeout.min(ctx.settings.interval));
                let sample = tokio::select! {
                    sample = attach_runtime_metrics(ctx.probe.clone(), runtime_wait, sample) => sample,
                    _ = stop_rx.changed() => break,
                };

                ctx.history.push(sample.clone());
                let alerts = ctx.policy.evaluate(&sample, &ctx.history);
                for alert in &alerts {
                    log::debug!("Session {}: {}", ctx.shared.id, alert.message);
                }

                let dump = match ctx.settings.dump_on_breach {
                    Some(dump_type) if !alerts.is_empty() => {
                        let dumper = Arc::clone(&ctx.dumper);
                        let result = tokio::select! {
                            result = capture_dump(dumper, sample.pid, dump_type) => result,
                            _ = stop_rx.changed() => break,
                        };
                        match result {
                            Ok(dump) => Some(dump),
                            Err(e) => {
                                log::warn!("Session {}: {} dump failed: {}", ctx.shared.id, dump_type, e);
                                (ctx.on_error)(MonitorEvent::Transient(e));
                                None
                            }
                        }
                    }
                    _ => None,
                };

                if *stop_rx.borrow() {
                    break;
                }
                (ctx.on_sample)(MonitorUpdate { sample, alerts, dump });
            }
            Tick::Missing(pid) => {
                misses += 1;
                log::debug!(
                    "Session {}: pid {} not found ({}/{})",
                    ctx.shared.id,
                    pid,
                    misses,
                    ctx.settings.vanish_confirmations
                );
                if misses >= ctx.settings.vanish_confirmations {
                    log::info!("Process {} vanished, stopping session {}", pid, ctx.shared.id);
                    ctx.shared.set_state(SessionState::Stopped);
                    (ctx.on_error)(MonitorEvent::Vanished { pid });
                    break;
                }
            }
            Tick::NoMatch => {
                let pattern = match &ctx.shared.target {
                    MonitorTarget::Name(pattern) => pattern.clone(),
                    MonitorTarget::Pid(pid) => pid.to_string(),
                };
                log::info!("No process matches '{}', stopping session {}", pattern, ctx.shared.id);
                ctx.shared.set_state(SessionState::Stopped);
                (ctx.on_error)(MonitorEvent::TargetNotFound { pattern });
                break;
            }
            Tick::Failed(e) => {
                if e.is_transient() {
                    log::warn!("Session {}: {}", ctx.shared.id, e);
                } else {
                    log::error!("Session {}: {}", ctx.shared.id, e);
                }
                (ctx.on_error)(MonitorEvent::Transient(e));
            }
        }
    }

    log::debug!("Session {} loop finished", ctx.shared.id);
}

/// One OS query for the session's target, on the blocking pool
async fn sample_target(shared: &Shared, sampler: &Arc<dyn ProcessSampler>) -> Tick {
    let pinned = *shared.pid.lock();
    let sampler = Arc::clone(sampler);

    match (pinned, &shared.target) {
        (Some(pid), _) => {
            match tokio::task::spawn_blocking(move || sampler.try_sample_by_pid(pid)).await {
                Ok(Ok(Some(sample))) => Tick::Sampled(sample),
                Ok(Ok(None)) => Tick::Missing(pid),
                Ok(Err(e)) => Tick::Failed(e),
                Err(e) => Tick::Failed(ProcwatchError::runtime(format!("sampling task failed: {}", e))),
            }
        }
        (None, MonitorTarget::Name(pattern)) => {
            let pattern = pattern.clone();
            let resolved = tokio::task::spawn_blocking(move || {
                sampler.try_get_all_processes().map(|all| {
                    super::sampler::filter_by_name(all, &pattern)
                        .into_iter()
                        .min_by_key(|s| s.pid)
                })
            })
            .await;
            match resolved {
                Ok(Ok(Some(sample))) => {
                    log::info!(
                        "Session {}: {} resolved to pid {}",
                        shared.id,
                        shared.target,
                        sample.pid
                    );
                    *shared.pid.lock() = Some(sample.pid);
                    Tick::Sampled(sample)
                }
                Ok(Ok(None)) => Tick::NoMatch,
                Ok(Err(e)) => Tick::Failed(e),
                Err(e) => Tick::Failed(ProcwatchError::runtime(format!("enumeration task failed: {}", e))),
            }
        }
        (None, MonitorTarget::Pid(pid)) => Tick::Missing(*pid),
    }
}

/// Merge managed-runtime metrics; any failure leaves the sample untouched
async fn attach_runtime_metrics(
    probe: Option<Arc<dyn ManagedRuntimeProbe>>,
    timeout: Option<Duration>,
    sample: ProcessSample,
) -> ProcessSample {
    let (probe, timeout) = match (probe, timeout) {
        (Some(probe), Some(timeout)) if probe.is_managed(&sample) => (probe, timeout),
        _ => return sample,
    };

    let pid = sample.pid;
    let query = tokio::task::spawn_blocking(move || probe.probe(pid));
    match tokio::time::timeout(timeout, query).await {
        Ok(Ok(Ok(jvm))) => ProcessSample {
            jvm: Some(jvm),
            ..sample
        },
        Ok(Ok(Err(e))) => {
            log::debug!("Runtime probe for pid {} failed: {}", pid, e);
            sample
        }
        Ok(Err(e)) => {
            log::debug!("Runtime probe task for pid {} failed: {}", pid, e);
            sample
        }
        Err(_) => {
            log::debug!("Runtime probe for pid {} timed out after {:?}", pid, timeout);
            sample
        }
    }
}

async fn capture_dump(
    dumper: Arc<dyn DiagnosticDumper>,
    pid: u32,
    dump_type: DumpType,
) -> Result<DiagnosticDump> {
    tokio::task::spawn_blocking(move || dumper.dump(pid, dump_type))
        .await
        .map_err(|e| ProcwatchError::runtime(format!("dump task failed: {}", e)))?
}
