use parking_lot::Mutex;
use std::sync::mpsc;
use std::sync::Arc;
use std::time::{Duration, Instant};

use procwatch::core::procwatch::{
    AlertSeverity, DumpType, JvmMetrics, ManagedRuntimeProbe, SessionState,
};
use procwatch::{MonitorEvent, MonitorTarget, MonitorUpdate, ProcessMonitorService, ProcwatchError, Result};

use super::support::{
    fast_config, process, service_with, RecordingDumper, ScriptedSampler, Step, WAIT,
};

fn channels() -> (
    impl FnMut(MonitorUpdate) + Send + 'static,
    mpsc::Receiver<MonitorUpdate>,
    impl FnMut(MonitorEvent) + Send + 'static,
    mpsc::Receiver<MonitorEvent>,
) {
    let (update_tx, update_rx) = mpsc::channel();
    let (event_tx, event_rx) = mpsc::channel();
    (
        move |update: MonitorUpdate| {
            let _ = update_tx.send(update);
        },
        update_rx,
        move |event: MonitorEvent| {
            let _ = event_tx.send(event);
        },
        event_rx,
    )
}

#[test]
fn test_vanished_after_two_consecutive_misses() {
    let sampler = ScriptedSampler::new(&[Step::Alive, Step::Alive, Step::Gone], vec![]);
    let service = service_with(sampler);
    let (on_sample, updates, on_error, events) = channels();

    let session = service.start_monitoring_pid(42, on_sample, on_error).unwrap();
    assert!(session.wait_stopped(WAIT));

    let delivered: Vec<MonitorUpdate> = updates.try_iter().collect();
    assert_eq!(delivered.len(), 2);
    assert!(delivered.iter().all(|u| u.sample.pid == 42));

    let event = events.recv_timeout(WAIT).unwrap();
    assert!(matches!(event, MonitorEvent::Vanished { pid: 42 }));
    assert!(event.is_terminal());
    assert!(events.recv_timeout(Duration::from_millis(50)).is_err());
    assert_eq!(session.state(), SessionState::Stopped);

    service.shutdown();
}

#[test]
fn test_single_miss_does_not_end_session() {
    let sampler = ScriptedSampler::new(&[Step::Alive, Step::Gone, Step::Alive], vec![]);
    let service = service_with(sampler);
    let (on_sample, updates, on_error, events) = channels();

    let session = service.start_monitoring_pid(7, on_sample, on_error).unwrap();
    for _ in 0..3 {
        updates.recv_timeout(WAIT).unwrap();
    }
    assert!(session.is_running());
    assert!(events.try_recv().is_err());

    session.stop();
    assert!(session.wait_stopped(WAIT));
    service.shutdown();
}

#[test]
fn test_transient_failures_are_retried() {
    let sampler = ScriptedSampler::new(&[Step::Fail, Step::Fail, Step::Alive], vec![]);
    let service = service_with(sampler);
    let (on_sample, updates, on_error, events) = channels();

    let session = service.start_monitoring_pid(9, on_sample, on_error).unwrap();
    let update = updates.recv_timeout(WAIT).unwrap();
    assert_eq!(update.sample.pid, 9);

    let transient: Vec<MonitorEvent> = events.try_iter().collect();
    assert_eq!(transient.len(), 2);
    for event in &transient {
        assert!(matches!(
            event,
            MonitorEvent::Transient(ProcwatchError::PlatformUnavailable(_))
        ));
        assert!(!event.is_terminal());
    }
    assert!(session.is_running());

    session.stop();
    assert!(session.wait_stopped(WAIT));
    service.shutdown();
}

#[test]
fn test_name_without_match_stops_with_target_not_found() {
    let sampler = ScriptedSampler::new(&[Step::Alive], vec![process(3, "bash")]);
    let service = service_with(sampler);
    let (on_sample, updates, on_error, events) = channels();

    let session = service
        .start_monitoring_by_name("postgres", on_sample, on_error)
        .unwrap();
    assert!(session.wait_stopped(WAIT));

    assert!(updates.try_recv().is_err());
    match events.recv_timeout(WAIT).unwrap() {
        MonitorEvent::TargetNotFound { pattern } => assert_eq!(pattern, "postgres"),
        other => panic!("unexpected event: {}", other),
    }
    assert!(session.pid().is_none());
    service.shutdown();
}

/// Start a session whose error callback records the state seen at delivery
fn states_seen_by_terminal_events(target: MonitorTarget, sampler: ScriptedSampler) -> Vec<SessionState> {
    let service = service_with(sampler);
    let session = service.session(target);
    let seen = Arc::new(Mutex::new(Vec::new()));

    let observer = session.clone();
    let seen_clone = Arc::clone(&seen);
    session
        .start(
            |_| {},
            move |event: MonitorEvent| {
                if event.is_terminal() {
                    seen_clone.lock().push(observer.state());
                }
            },
        )
        .unwrap();

    assert!(session.wait_stopped(WAIT));
    service.shutdown();
    let states = seen.lock().clone();
    states
}

#[test]
fn test_terminal_events_arrive_after_session_stopped() {
    let vanished = states_seen_by_terminal_events(
        MonitorTarget::Pid(42),
        ScriptedSampler::new(&[Step::Alive, Step::Gone], vec![]),
    );
    assert_eq!(vanished, vec![SessionState::Stopped]);

    let not_found = states_seen_by_terminal_events(
        MonitorTarget::Name("postgres".to_string()),
        ScriptedSampler::new(&[Step::Alive], vec![process(3, "bash")]),
    );
    assert_eq!(not_found, vec![SessionState::Stopped]);
}

#[test]
fn test_name_resolves_to_lowest_matching_pid() {
    let processes = vec![
        process(30, "worker"),
        process(12, "Worker-B"),
        process(5, "other"),
    ];
    let sampler = ScriptedSampler::new(&[Step::Alive], processes);
    let service = service_with(sampler);
    let (on_sample, updates, on_error, _events) = channels();

    let session = service
        .start_monitoring_by_name("worker", on_sample, on_error)
        .unwrap();

    let first = updates.recv_timeout(WAIT).unwrap();
    let second = updates.recv_timeout(WAIT).unwrap();
    assert_eq!(first.sample.pid, 12);
    assert_eq!(second.sample.pid, 12);
    assert_eq!(session.pid(), Some(12));

    service.shutdown();
}

#[test]
fn test_stop_is_idempotent_and_thread_safe() {
    let sampler = ScriptedSampler::new(&[Step::Alive], vec![]);
    let service = service_with(sampler);
    let (on_sample, updates, on_error, _events) = channels();

    let session = service.start_monitoring_pid(11, on_sample, on_error).unwrap();
    updates.recv_timeout(WAIT).unwrap();

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let session = session.clone();
            std::thread::spawn(move || session.stop())
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
    session.stop();

    assert!(session.wait_stopped(WAIT));
    assert!(!session.is_running());

    // Nothing is delivered once stopped
    while updates.try_recv().is_ok() {}
    std::thread::sleep(Duration::from_millis(50));
    assert!(updates.try_recv().is_err());

    service.shutdown();
}

#[test]
fn test_stop_completes_within_one_interval() {
    let interval = Duration::from_millis(200);
    let sampler = ScriptedSampler::new(&[Step::Alive], vec![]);
    let service = service_with(sampler);
    let (on_sample, updates, on_error, _events) = channels();

    let session = service.session(MonitorTarget::Pid(13));
    session.set_interval(interval).unwrap();
    session.start(on_sample, on_error).unwrap();
    updates.recv_timeout(WAIT).unwrap();

    let asked = Instant::now();
    session.stop();
    assert!(session.wait_stopped(interval));
    assert!(asked.elapsed() <= interval);

    service.shutdown();
}

#[test]
fn test_idle_session_lifecycle() {
    let sampler = ScriptedSampler::new(&[Step::Alive], vec![]);
    let service = service_with(sampler);

    let session = service.session(MonitorTarget::Pid(5));
    assert_eq!(session.state(), SessionState::Idle);
    assert!(session.set_interval(Duration::ZERO).is_err());
    assert!(session.set_interval(Duration::from_millis(15)).is_ok());

    session.stop();
    assert_eq!(session.state(), SessionState::Stopped);
    assert!(session.wait_stopped(Duration::from_millis(1)));
    let err = session.start(|_| {}, |_| {}).unwrap_err();
    assert!(matches!(err, ProcwatchError::SessionTerminated { pid: 5 }));

    service.shutdown();
}

#[test]
fn test_session_cannot_be_reconfigured_after_start() {
    let sampler = ScriptedSampler::new(&[Step::Alive], vec![]);
    let service = service_with(sampler);

    let session = service.session(MonitorTarget::Pid(5));
    session.start(|_| {}, |_| {}).unwrap();

    assert!(session.set_interval(Duration::from_millis(20)).is_err());
    assert!(session.start(|_| {}, |_| {}).is_err());

    session.stop();
    assert!(session.wait_stopped(WAIT));
    service.shutdown();
}

#[test]
fn test_rule_alerts_are_delivered_with_the_sample() {
    let sampler = ScriptedSampler::new(&[Step::Alive], vec![process(21, "busy")]);
    let service = service_with(sampler);
    let (on_sample, updates, on_error, _events) = channels();

    let rules = service
        .parse_rules(&["threads > 2", "critical: threads >= 100"])
        .unwrap();
    let session = service.session(MonitorTarget::Pid(21));
    session.set_policy(service.rule_policy(rules)).unwrap();
    session.start(on_sample, on_error).unwrap();

    let update = updates.recv_timeout(WAIT).unwrap();
    assert_eq!(update.alerts.len(), 1);
    let alert = &update.alerts[0];
    assert_eq!(alert.severity, AlertSeverity::Warning);
    assert_eq!(alert.pid, 21);
    assert_eq!(alert.process_name, "busy");
    assert_eq!(alert.value, 4.0);

    session.stop();
    assert!(session.wait_stopped(WAIT));
    service.shutdown();
}

#[test]
fn test_configured_rules_apply_by_default() {
    let sampler = ScriptedSampler::new(&[Step::Alive], vec![process(8, "svc")]);
    let config = procwatch::MonitorConfig {
        alert_rules: vec!["threads > 1".to_string()],
        ..fast_config()
    };
    let service = ProcessMonitorService::with_probe(Arc::new(sampler), None, config).unwrap();
    let (on_sample, updates, on_error, _events) = channels();

    let session = service.start_monitoring_pid(8, on_sample, on_error).unwrap();
    let update = updates.recv_timeout(WAIT).unwrap();
    assert_eq!(update.alerts.len(), 1);

    session.stop();
    service.shutdown();
}

struct FixedRuntime {
    delay: Duration,
    fail: bool,
}

impl ManagedRuntimeProbe for FixedRuntime {
    fn probe(&self, _pid: u32) -> Result<JvmMetrics> {
        std::thread::sleep(self.delay);
        if self.fail {
            return Err(ProcwatchError::platform_unavailable("jcmd missing"));
        }
        Ok(JvmMetrics {
            heap_used_bytes: 64 * 1024 * 1024,
            heap_committed_bytes: 128 * 1024 * 1024,
            heap_max_bytes: Some(512 * 1024 * 1024),
            collectors: Vec::new(),
            live_threads: 20,
            daemon_threads: 15,
            captured_at: chrono::Utc::now(),
        })
    }
}

fn first_update_with_runtime(runtime: FixedRuntime, name: &str) -> MonitorUpdate {
    let sampler = ScriptedSampler::new(&[Step::Alive], vec![process(77, name)]);
    let mut config = fast_config();
    config.poll_interval_ms = 1_000;
    config.managed_runtime.enabled = true;
    config.managed_runtime.timeout_ms = 100;
    let service =
        ProcessMonitorService::with_probe(Arc::new(sampler), Some(Arc::new(runtime)), config).unwrap();
    let (on_sample, updates, on_error, _events) = channels();

    let session = service.start_monitoring_pid(77, on_sample, on_error).unwrap();
    let update = updates.recv_timeout(WAIT).unwrap();
    session.stop();
    service.shutdown();
    update
}

#[test]
fn test_jvm_metrics_attached_for_java_process() {
    let update = first_update_with_runtime(
        FixedRuntime {
            delay: Duration::ZERO,
            fail: false,
        },
        "java",
    );
    let jvm = update.sample.jvm.expect("jvm metrics");
    assert_eq!(jvm.live_threads, 20);
}

#[test]
fn test_non_jvm_process_gets_no_runtime_metrics() {
    let update = first_update_with_runtime(
        FixedRuntime {
            delay: Duration::ZERO,
            fail: false,
        },
        "nginx",
    );
    assert!(update.sample.jvm.is_none());
}

#[test]
fn test_runtime_failure_or_timeout_still_delivers_sample() {
    let failed = first_update_with_runtime(
        FixedRuntime {
            delay: Duration::ZERO,
            fail: true,
        },
        "java",
    );
    assert_eq!(failed.sample.pid, 77);
    assert!(failed.sample.jvm.is_none());

    let slow = first_update_with_runtime(
        FixedRuntime {
            delay: Duration::from_millis(500),
            fail: false,
        },
        "java",
    );
    assert_eq!(slow.sample.pid, 77);
    assert!(slow.sample.jvm.is_none());
}

#[test]
fn test_runtime_wait_is_capped_at_the_interval() {
    let interval = Duration::from_millis(150);
    let sampler = ScriptedSampler::new(&[Step::Alive], vec![process(78, "java")]);
    let mut config = fast_config();
    config.managed_runtime.enabled = true;
    config.managed_runtime.timeout_ms = 3_000;
    let runtime = FixedRuntime {
        delay: Duration::from_millis(2_000),
        fail: false,
    };
    let service =
        ProcessMonitorService::with_probe(Arc::new(sampler), Some(Arc::new(runtime)), config).unwrap();
    let (on_sample, updates, on_error, _events) = channels();

    let session = service.session(MonitorTarget::Pid(78));
    session.set_interval(interval).unwrap();
    let started = Instant::now();
    session.start(on_sample, on_error).unwrap();

    let update = updates.recv_timeout(WAIT).unwrap();
    assert!(update.sample.jvm.is_none());
    assert!(started.elapsed() < Duration::from_millis(1_500));

    session.stop();
    service.shutdown();
}

#[test]
fn test_stop_during_slow_runtime_query_delivers_nothing() {
    let interval = Duration::from_millis(200);
    let sampler = ScriptedSampler::new(&[Step::Alive], vec![process(79, "java")]);
    let mut config = fast_config();
    config.managed_runtime.enabled = true;
    config.managed_runtime.timeout_ms = 2_000;
    let runtime = FixedRuntime {
        delay: Duration::from_millis(1_500),
        fail: false,
    };
    let service =
        ProcessMonitorService::with_probe(Arc::new(sampler), Some(Arc::new(runtime)), config).unwrap();
    let (on_sample, updates, on_error, _events) = channels();

    let session = service.session(MonitorTarget::Pid(79));
    session.set_interval(interval).unwrap();
    session.start(on_sample, on_error).unwrap();

    // The first tick is immediate and now waits on the runtime query
    std::thread::sleep(Duration::from_millis(60));
    session.stop();
    assert!(session.wait_stopped(interval));

    std::thread::sleep(interval + Duration::from_millis(100));
    assert!(updates.try_recv().is_err());

    service.shutdown();
}

fn dumping_session(dumper: Arc<RecordingDumper>, rule: &str) -> (ProcessMonitorService, MonitorUpdate, Vec<MonitorEvent>) {
    let sampler = ScriptedSampler::new(&[Step::Alive], vec![process(90, "java")]);
    let service = ProcessMonitorService::with_components(
        Arc::new(sampler),
        None,
        dumper,
        fast_config(),
    )
    .unwrap();
    let (on_sample, updates, on_error, events) = channels();

    let session = service.session(MonitorTarget::Pid(90));
    let rules = service.parse_rules(&[rule]).unwrap();
    session.set_policy(service.rule_policy(rules)).unwrap();
    session.set_dump_on_breach(Some(DumpType::Jstack)).unwrap();
    session.start(on_sample, on_error).unwrap();

    let update = updates.recv_timeout(WAIT).unwrap();
    session.stop();
    assert!(session.wait_stopped(WAIT));
    let events = events.try_iter().collect();
    (service, update, events)
}

#[test]
fn test_dump_captured_when_alert_fires() {
    let dumper = Arc::new(RecordingDumper::default());
    let (service, update, events) = dumping_session(dumper.clone(), "threads > 2");

    assert_eq!(update.alerts.len(), 1);
    let dump = update.dump.expect("dump");
    assert_eq!(dump.pid, 90);
    assert_eq!(dump.dump_type, DumpType::Jstack);
    assert_eq!(dump.output, "jstack output for 90");
    assert!(events.is_empty());
    assert!(dumper.calls.lock().iter().all(|call| *call == (90, DumpType::Jstack)));

    service.shutdown();
}

#[test]
fn test_no_dump_without_alerts() {
    let dumper = Arc::new(RecordingDumper::default());
    let (service, update, _events) = dumping_session(dumper.clone(), "threads > 100");

    assert!(update.alerts.is_empty());
    assert!(update.dump.is_none());
    assert!(dumper.calls.lock().is_empty());

    service.shutdown();
}

#[test]
fn test_failed_dump_is_reported_and_sample_still_delivered() {
    let dumper = Arc::new(RecordingDumper {
        fail: true,
        ..Default::default()
    });
    let (service, update, events) = dumping_session(dumper, "threads > 2");

    assert_eq!(update.sample.pid, 90);
    assert_eq!(update.alerts.len(), 1);
    assert!(update.dump.is_none());
    assert!(!events.is_empty());
    assert!(events
        .iter()
        .all(|e| matches!(e, MonitorEvent::Transient(ProcwatchError::PlatformUnavailable(_)))));

    service.shutdown();
}
