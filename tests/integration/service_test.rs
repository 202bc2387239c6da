use std::sync::Arc;

use procwatch::core::procwatch::{DumpType, SessionState, TopMetric};
use procwatch::{MonitorTarget, ProcessMonitorService, ProcwatchError};

use super::support::{
    fast_config, process, service_with, RecordingDumper, ScriptedSampler, Step, WAIT,
};

fn fleet() -> Vec<procwatch::ProcessSample> {
    let mut db = process(40, "postgres");
    db.memory.resident_bytes = 900;
    db.cpu.percent_instant = 5.0;
    let mut web = process(41, "nginx");
    web.memory.resident_bytes = 300;
    web.cpu.percent_instant = 50.0;
    web.command_line = "nginx: worker process".to_string();
    let mut cache = process(12, "redis-server");
    cache.memory.resident_bytes = 900;
    cache.cpu.percent_instant = 50.0;
    vec![db, web, cache]
}

#[test]
fn test_one_shot_queries_delegate_to_sampler() {
    let service = service_with(ScriptedSampler::new(&[Step::Alive], fleet()));

    assert_eq!(service.system_facts().cpu_count, 4);
    assert_eq!(service.get_all_processes().len(), 3);

    let by_name = service.sample_by_name("NGINX");
    assert_eq!(by_name.len(), 1);
    assert_eq!(by_name[0].pid, 41);

    let by_cmd = service.sample_by_command("worker process");
    assert_eq!(by_cmd.len(), 1);

    assert_eq!(service.sample_by_pid(40).map(|s| s.name), Some("postgres".to_string()));
    assert!(service.sample_by_pid(0).is_none());

    service.shutdown();
}

#[test]
fn test_top_rankings_break_ties_by_pid() {
    let service = service_with(ScriptedSampler::new(&[Step::Alive], fleet()));

    let cpu: Vec<u32> = service.top_by_cpu(10).iter().map(|s| s.pid).collect();
    assert_eq!(cpu, vec![12, 41, 40]);

    let memory: Vec<u32> = service.top_by_memory(2).iter().map(|s| s.pid).collect();
    assert_eq!(memory, vec![12, 40]);

    let via_sampler = service.sampler().top_by(TopMetric::Memory, 0);
    assert!(via_sampler.is_empty());

    service.shutdown();
}

#[test]
fn test_invalid_inputs_are_rejected() {
    let service = service_with(ScriptedSampler::new(&[Step::Alive], vec![]));

    let err = service.start_monitoring_pid(0, |_| {}, |_| {}).unwrap_err();
    assert!(matches!(err, ProcwatchError::NotFound(_)));

    let err = service
        .start_monitoring_by_name("   ", |_| {}, |_| {})
        .unwrap_err();
    assert!(matches!(err, ProcwatchError::Config(_)));

    let err = service.parse_rules(&["cpu >> 5"]).unwrap_err();
    assert!(matches!(err, ProcwatchError::InvalidRule(_)));

    service.shutdown();
}

#[test]
fn test_construction_validates_config_and_rules() {
    let bad_interval = procwatch::MonitorConfig {
        poll_interval_ms: 0,
        ..fast_config()
    };
    let sampler = Arc::new(ScriptedSampler::new(&[Step::Alive], vec![]));
    assert!(ProcessMonitorService::with_probe(sampler.clone(), None, bad_interval).is_err());

    let bad_rule = procwatch::MonitorConfig {
        alert_rules: vec!["latency > 5".to_string()],
        ..fast_config()
    };
    let err = ProcessMonitorService::with_probe(sampler, None, bad_rule).unwrap_err();
    assert!(matches!(err, ProcwatchError::InvalidRule(_)));
}

#[test]
fn test_shutdown_stops_active_sessions() {
    let service = service_with(ScriptedSampler::new(&[Step::Alive], vec![]));

    let first = service.start_monitoring_pid(1, |_| {}, |_| {}).unwrap();
    let second = service.start_monitoring_pid(2, |_| {}, |_| {}).unwrap();
    let idle = service.session(MonitorTarget::Pid(3));
    assert_eq!(service.active_sessions().len(), 3);

    first.stop();
    assert!(first.wait_stopped(WAIT));
    assert_eq!(service.active_sessions().len(), 2);

    service.shutdown();
    assert_eq!(second.state(), SessionState::Stopped);
    assert_eq!(idle.state(), SessionState::Stopped);
}

#[test]
fn test_jvm_metrics_none_when_runtime_metrics_disabled() {
    let service = service_with(ScriptedSampler::new(&[Step::Alive], vec![process(5, "java")]));
    assert!(service.jvm_metrics(5).is_none());
    service.shutdown();
}

#[test]
fn test_service_debug_output() {
    let service = service_with(ScriptedSampler::new(&[Step::Alive], vec![]));
    let _idle = service.session(MonitorTarget::Pid(3));

    let text = format!("{:?}", service);
    assert!(text.starts_with("ProcessMonitorService"));
    assert!(text.contains("platform: Linux"));
    assert!(text.contains("active_sessions: 1"));

    service.shutdown();
}

#[test]
fn test_execute_dump_uses_configured_dumper() {
    let dumper = Arc::new(RecordingDumper::default());
    let sampler = Arc::new(ScriptedSampler::new(&[Step::Alive], vec![]));
    let service =
        ProcessMonitorService::with_components(sampler, None, dumper.clone(), fast_config()).unwrap();

    let dump = service.execute_dump(4242, DumpType::Jmap).unwrap();
    assert_eq!(dump.pid, 4242);
    assert_eq!(dump.dump_type, DumpType::Jmap);
    assert_eq!(dump.output, "jmap output for 4242");

    let err = service.execute_dump(0, DumpType::Lsof).unwrap_err();
    assert!(matches!(err, ProcwatchError::NotFound(_)));
    assert_eq!(*dumper.calls.lock(), vec![(4242, DumpType::Jmap)]);

    service.shutdown();
}
