use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::time::Duration;
use tempfile::TempDir;

use procwatch::core::procwatch::{IoMetrics, PlatformSampler, ProcessSampler};
use procwatch::platform::LinuxProcSource;
use procwatch::MonitorConfig;

fn stat_line(pid: u32, name: &str, utime_ticks: u64, rss_pages: u64) -> String {
    format!(
        "{pid} ({name}) S 1 {pid} {pid} 0 -1 4194560 500 0 0 0 {utime_ticks} 0 0 0 20 0 2 0 1000 \
         104857600 {rss_pages} 18446744073709551615 1 1 0 0 0 0 0 0 0 0 0 0 17 1 0 0 0 0 0"
    )
}

fn write_process(root: &Path, pid: u32, name: &str, cmdline: &[u8], utime_ticks: u64, rss_pages: u64) {
    let dir = root.join(pid.to_string());
    fs::create_dir_all(dir.join("fd")).unwrap();
    fs::write(dir.join("stat"), stat_line(pid, name, utime_ticks, rss_pages)).unwrap();
    fs::write(dir.join("status"), "Name:\tx\nUid:\t0\t0\t0\t0\n").unwrap();
    fs::write(dir.join("statm"), "100 20 5 1 0 10 0").unwrap();
    fs::write(dir.join("cmdline"), cmdline).unwrap();
    fs::write(
        dir.join("io"),
        "rchar: 1\nwchar: 2\nread_bytes: 4096\nwrite_bytes: 0\n",
    )
    .unwrap();
}

fn fake_proc() -> TempDir {
    let dir = TempDir::new().unwrap();
    let root = dir.path();
    fs::write(root.join("stat"), "cpu 1 2 3\nbtime 1700000000\n").unwrap();
    fs::write(root.join("meminfo"), "MemTotal:       16777216 kB\nMemFree: 1 kB\n").unwrap();
    fs::write(root.join("cpuinfo"), "processor\t: 0\nprocessor\t: 1\n").unwrap();

    write_process(root, 100, "postgres", b"postgres\0-D\0/var/lib/pg\0", 0, 5000);
    write_process(root, 200, "nginx", b"nginx: worker process\0", 0, 1000);
    write_process(root, 300, "kworker/0:1", b"", 0, 0);
    dir
}

fn sampler_for(dir: &TempDir) -> (PlatformSampler, u64) {
    let source =
        LinuxProcSource::with_root(dir.path()).with_users(HashMap::from([(0, "root".to_string())]));
    let ticks = source.clock_ticks();
    (
        PlatformSampler::new(Box::new(source), &MonitorConfig::default()),
        ticks,
    )
}

#[test]
fn test_enumeration_over_fake_procfs() {
    let dir = fake_proc();
    let (sampler, _) = sampler_for(&dir);

    assert_eq!(sampler.cpu_count(), 2);
    assert_eq!(sampler.total_memory_bytes(), 16 * 1024 * 1024 * 1024);

    let all = sampler.get_all_processes();
    let pids: Vec<u32> = all.iter().map(|s| s.pid).collect();
    assert_eq!(pids, vec![100, 200, 300]);

    let kernel_thread = all.iter().find(|s| s.pid == 300).unwrap();
    assert_eq!(kernel_thread.command_line, "kworker/0:1");
    assert_eq!(kernel_thread.user, "root");

    let pg = sampler.sample_by_pid(100).unwrap();
    assert_eq!(pg.command_line, "postgres -D /var/lib/pg");
    assert_eq!(pg.io, IoMetrics::measured(4096, 0));
    assert_ne!(pg.io, IoMetrics::Unavailable);
    assert!(pg.memory.percent_of_total > 0.0);
}

#[test]
fn test_queries_over_fake_procfs() {
    let dir = fake_proc();
    let (sampler, _) = sampler_for(&dir);

    assert_eq!(sampler.sample_by_name("NGINX").len(), 1);
    assert_eq!(sampler.sample_by_command("/var/lib").len(), 1);
    assert!(sampler.sample_by_name("mysql").is_empty());
    assert!(sampler.sample_by_pid(999).is_none());

    let top: Vec<u32> = sampler.top_by_memory(2).iter().map(|s| s.pid).collect();
    assert_eq!(top, vec![100, 200]);
    assert_eq!(sampler.top_by_memory(50).len(), 3);
}

#[test]
fn test_instant_cpu_needs_a_previous_reading() {
    let dir = fake_proc();
    let (sampler, ticks) = sampler_for(&dir);

    let first = sampler.sample_by_pid(200).unwrap();
    assert_eq!(first.cpu.percent_instant, 0.0);

    std::thread::sleep(Duration::from_millis(200));
    // 100 ms of cpu time since the first reading
    write_process(dir.path(), 200, "nginx", b"nginx: worker process\0", ticks / 10, 1000);

    let second = sampler.sample_by_pid(200).unwrap();
    assert!(second.cpu.percent_instant > 0.0);
    assert!(second.cpu.percent_instant <= 100.0);
    assert!(second.cpu.total_cpu_ms > first.cpu.total_cpu_ms);

    // A never-seen pid starts from zero again
    assert_eq!(sampler.sample_by_pid(100).unwrap().cpu.percent_instant, 0.0);
}

#[test]
fn test_vanished_process_reads_as_none() {
    let dir = fake_proc();
    let (sampler, _) = sampler_for(&dir);

    assert!(sampler.sample_by_pid(200).is_some());
    fs::remove_dir_all(dir.path().join("200")).unwrap();
    assert!(sampler.sample_by_pid(200).is_none());
    assert_eq!(sampler.get_all_processes().len(), 2);
}

#[cfg(target_os = "linux")]
#[test]
fn test_sample_own_process_on_linux() {
    let sampler = procwatch::create_sampler(&MonitorConfig::default()).unwrap();
    let pid = std::process::id();

    let me = sampler.sample_by_pid(pid).unwrap();
    assert_eq!(me.pid, pid);
    assert!(!me.name.is_empty());
    assert!(me.memory.resident_bytes > 0);
    assert!(me.thread_count >= 1);

    assert!(sampler.get_all_processes().iter().any(|s| s.pid == pid));
    assert!(sampler.sample_by_pid(0).is_none());
}
