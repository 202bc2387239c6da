//! Process sampling and live monitoring.
//!
//! One-shot queries go through a [`ProcessSampler`]; continuous monitoring
//! runs as [`MonitorSession`]s owned by a [`ProcessMonitorService`].

pub mod alerts;
pub mod dump;
mod history;
pub mod metrics;
pub mod monitor;
pub mod rate_cache;
pub mod rules;
pub mod runtime_probe;
pub mod sampler;
mod service;
pub mod source;
pub mod topk;

pub use alerts::{Alert, AlertPolicy, AlertSeverity, NoAlerts, RuleAlertPolicy};
pub use dump::{CommandDumper, DiagnosticDump, DiagnosticDumper, DumpType};
pub use history::SampleHistory;
pub use metrics::{
    CpuMetrics, GcCollector, IoMetrics, JvmMetrics, MemoryMetrics, ProcessSample, ProcessState,
    SystemFacts,
};
pub use monitor::{
    MonitorEvent, MonitorSession, MonitorSettings, MonitorTarget, MonitorUpdate, SessionState,
};
pub use rate_cache::{instant_percent, DeltaRateCache};
pub use rules::{parse_rules, AlertRule, MetricKind, SYNTAX_HELP};
pub use runtime_probe::{is_jvm_process, JcmdProbe, ManagedRuntimeProbe};
pub use sampler::{create_sampler, PlatformSampler, ProcessSampler};
pub use service::ProcessMonitorService;
pub use source::{Platform, ProcessSource, RawProcess};
pub use topk::{select_top, TopMetric};
