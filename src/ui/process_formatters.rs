use colored::*;

use super::formatters::{format_percent, format_size, format_time, format_uptime, truncate};
use crate::core::procwatch::{
    Alert, AlertSeverity, DiagnosticDump, MonitorEvent, MonitorUpdate, Platform, ProcessSample, SystemFacts,
};

const NAME_WIDTH: usize = 24;
const COMMAND_WIDTH: usize = 60;

fn print_section_header(title: &str) {
    println!("\n{}", title.bold().green());
    println!("{}", "-".repeat(title.len()));
}

/// Color a cpu percentage by load
fn colored_cpu(percent: f64) -> ColoredString {
    let text = format!("{:>6}", format_percent(percent));
    if percent >= 80.0 {
        text.red().bold()
    } else if percent >= 40.0 {
        text.yellow()
    } else {
        text.normal()
    }
}

pub fn print_system_facts(platform: Platform, facts: &SystemFacts) {
    print_section_header("SYSTEM");
    println!("  Platform: {}", platform);
    println!("  Logical CPUs: {}", facts.cpu_count);
    println!("  Total Memory: {}", format_size(facts.total_memory_bytes));
    println!();
}

pub fn print_process_table(samples: &[ProcessSample]) {
    if samples.is_empty() {
        println!("{}", "No matching processes".dimmed());
        return;
    }

    println!(
        "{}",
        format!(
            "{:>7} {:<name$} {:<10} {:>7} {:>11} {:>6} {:>5}  {}",
            "PID",
            "NAME",
            "USER",
            "CPU",
            "RSS",
            "MEM",
            "THR",
            "COMMAND",
            name = NAME_WIDTH
        )
        .bold()
    );

    for sample in samples {
        println!(
            "{:>7} {:<name$} {:<10} {} {:>11} {:>6} {:>5}  {}",
            sample.pid,
            truncate(&sample.name, NAME_WIDTH).cyan(),
            truncate(&sample.user, 10),
            colored_cpu(sample.cpu.percent_instant),
            format_size(sample.memory.resident_bytes),
            format_percent(sample.memory.percent_of_total),
            sample.thread_count,
            truncate(&sample.command_line, COMMAND_WIDTH).dimmed(),
            name = NAME_WIDTH
        );
    }
    println!("{}", format!("{} processes", samples.len()).dimmed());
}

pub fn print_process_detail(sample: &ProcessSample) {
    print_section_header(&format!("PROCESS {} ({})", sample.pid, sample.name));

    println!("  Command: {}", sample.command_line);
    if !sample.user.is_empty() {
        println!("  User: {}", sample.user);
    }
    println!("  State: {}", sample.state);
    if let Some(ppid) = sample.parent_pid {
        println!("  Parent PID: {}", ppid);
    }
    if let Some(start) = sample.start_time {
        println!("  Started: {}", format_time(start));
    }
    if let Some(uptime) = sample.uptime() {
        println!("  Uptime: {}", format_uptime(uptime));
    }

    println!(
        "  CPU: {} now, {} average ({} ms user, {} ms kernel)",
        colored_cpu(sample.cpu.percent_instant),
        format_percent(sample.cpu.percent_average),
        sample.cpu.user_mode_ms,
        sample.cpu.kernel_mode_ms
    );
    println!(
        "  Memory: {} resident ({}), {} virtual, {} shared",
        format_size(sample.memory.resident_bytes),
        format_percent(sample.memory.percent_of_total),
        format_size(sample.memory.virtual_bytes),
        format_size(sample.memory.shared_bytes)
    );
    match (sample.io.bytes_read(), sample.io.bytes_written()) {
        (Some(read), Some(written)) => println!(
            "  IO: {} read, {} written",
            format_size(read),
            format_size(written)
        ),
        _ => println!("  IO: {}", "unavailable".dimmed()),
    }
    println!("  Threads: {}", sample.thread_count);
    println!("  Open descriptors: {}", sample.fd_count);

    if let Some(ref jvm) = sample.jvm {
        print_section_header("JVM");
        let max = jvm
            .heap_max_bytes
            .map(format_size)
            .unwrap_or_else(|| "unbounded".to_string());
        println!(
            "  Heap: {} used / {} committed / {} max",
            format_size(jvm.heap_used_bytes),
            format_size(jvm.heap_committed_bytes),
            max
        );
        println!(
            "  Threads: {} live, {} daemon",
            jvm.live_threads, jvm.daemon_threads
        );
        for collector in &jvm.collectors {
            println!(
                "  GC {}: {} collections, {} ms",
                collector.name, collector.collections, collector.time_ms
            );
        }
    }
    println!();
}

/// One line per monitor tick
pub fn print_update(update: &MonitorUpdate) {
    let sample = &update.sample;
    let mut line = format!(
        "{} pid {} cpu {} rss {} thr {} fd {}",
        sample.captured_at.with_timezone(&chrono::Local).format("%H:%M:%S").to_string().dimmed(),
        sample.pid,
        colored_cpu(sample.cpu.percent_instant),
        format_size(sample.memory.resident_bytes),
        sample.thread_count,
        sample.fd_count
    );
    if let (Some(read), Some(written)) = (sample.io.bytes_read(), sample.io.bytes_written()) {
        line.push_str(&format!(" io {}/{}", format_size(read), format_size(written)));
    }
    if let Some(ref jvm) = sample.jvm {
        line.push_str(&format!(
            " heap {} gc {}",
            format_size(jvm.heap_used_bytes),
            jvm.total_collections()
        ));
    }
    println!("{}", line);

    for alert in &update.alerts {
        print_alert(alert);
    }
    if let Some(ref dump) = update.dump {
        print_dump(dump);
    }
}

pub fn print_dump(dump: &DiagnosticDump) {
    println!(
        "{}",
        format!("Executing {} dump for pid {}...", dump.dump_type, dump.pid)
            .magenta()
            .bold()
    );
    println!("{}", dump.output.trim_end());
}

pub fn print_alert(alert: &Alert) {
    let label = format!("[{}]", alert.severity);
    let label = match alert.severity {
        AlertSeverity::Critical => label.red().bold(),
        AlertSeverity::Warning => label.yellow().bold(),
        AlertSeverity::Info => label.blue(),
    };
    println!("  {} {}", label, alert.message);
}

pub fn print_event(event: &MonitorEvent) {
    if event.is_terminal() {
        println!("{}", event.to_string().yellow().bold());
    } else {
        eprintln!("{}", event.to_string().dimmed());
    }
}
