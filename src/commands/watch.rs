use anyhow::{bail, Result};
use clap::ArgMatches;
use colored::*;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::{build_sampler, load_config};
use crate::core::procwatch::{DumpType, MonitorEvent, MonitorTarget, MonitorUpdate, ProcessMonitorService};
use crate::ui::{print_event, print_update};

pub fn execute(matches: &ArgMatches) -> Result<()> {
    let config = load_config()?;
    let sampler = build_sampler(&config)?;

    let target = if let Some(&pid) = matches.get_one::<u32>("pid") {
        if pid == 0 {
            bail!("pid 0 cannot be monitored");
        }
        MonitorTarget::Pid(pid)
    } else if let Some(name) = matches.get_one::<String>("name") {
        if name.trim().is_empty() {
            bail!("Name pattern must not be empty");
        }
        MonitorTarget::Name(name.clone())
    } else {
        bail!("One of --pid or --name is required");
    };

    let json = matches.get_flag("json");
    let max_updates = matches.get_one::<u64>("count").copied();

    let service = ProcessMonitorService::new(sampler, config)?;

    // Ad-hoc rules are added on top of the configured ones
    let mut expressions = service.config().alert_rules.clone();
    if let Some(extra) = matches.get_many::<String>("alert") {
        expressions.extend(extra.cloned());
    }
    let rules = service.parse_rules(&expressions)?;

    let session = service.session(target.clone());
    if let Some(&interval_ms) = matches.get_one::<u64>("interval") {
        if interval_ms == 0 {
            bail!("Interval must be greater than 0");
        }
        session.set_interval(Duration::from_millis(interval_ms))?;
    }
    if !rules.is_empty() {
        session.set_policy(service.rule_policy(rules))?;
    }
    if let Some(dump) = matches.get_one::<String>("dump-on-breach") {
        let dump_type: DumpType = dump.parse()?;
        session.set_dump_on_breach(Some(dump_type))?;
    }

    let cancel_flag = Arc::new(AtomicBool::new(false));
    let cancel_flag_clone = Arc::clone(&cancel_flag);
    ctrlc::set_handler(move || {
        println!();
        println!("{}", "Stopping monitor...".yellow().bold());
        cancel_flag_clone.store(true, Ordering::Relaxed);
    })
    .map_err(|e| anyhow::anyhow!("Failed to set Ctrl+C handler: {}", e))?;

    let delivered = Arc::new(AtomicU64::new(0));
    let delivered_clone = Arc::clone(&delivered);
    let done_flag = Arc::clone(&cancel_flag);

    let on_sample = move |update: MonitorUpdate| {
        if json {
            match serde_json::to_string(&update.sample) {
                Ok(line) => println!("{}", line),
                Err(e) => log::warn!("Failed to serialize sample: {}", e),
            }
            for alert in &update.alerts {
                eprintln!("[{}] {}", alert.severity, alert.message);
            }
            if let Some(ref dump) = update.dump {
                eprintln!("{} dump of pid {}:", dump.dump_type, dump.pid);
                eprintln!("{}", dump.output.trim_end());
            }
        } else {
            print_update(&update);
        }

        let count = delivered_clone.fetch_add(1, Ordering::Relaxed) + 1;
        if max_updates.is_some_and(|max| count >= max) {
            done_flag.store(true, Ordering::Relaxed);
        }
    };
    let on_error = move |event: MonitorEvent| print_event(&event);

    if !json {
        println!(
            "{}",
            format!("Monitoring {} (Ctrl+C to stop)", target).bold().cyan()
        );
    }
    session.start(on_sample, on_error)?;

    while session.is_running() && !cancel_flag.load(Ordering::Relaxed) {
        std::thread::sleep(Duration::from_millis(100));
    }

    session.stop();
    service.shutdown();

    if !json {
        println!(
            "{}",
            format!("{} sample(s) collected", delivered.load(Ordering::Relaxed)).dimmed()
        );
    }
    Ok(())
}
