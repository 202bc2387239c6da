use anyhow::Result;
use clap::ArgMatches;
use colored::*;
use std::time::Duration;

use super::{build_sampler, load_config, print_json};
use crate::core::procwatch::TopMetric;
use crate::ui::print_process_table;

pub fn execute(matches: &ArgMatches) -> Result<()> {
    let config = load_config()?;
    let sampler = build_sampler(&config)?;

    let metric = matches
        .get_one::<String>("by")
        .map(|s| s.parse::<TopMetric>())
        .transpose()
        .map_err(anyhow::Error::msg)?
        .unwrap_or(TopMetric::Cpu);
    let limit = matches
        .get_one::<usize>("limit")
        .copied()
        .unwrap_or(config.top_limit);

    // Instantaneous cpu needs two readings per pid
    if metric == TopMetric::Cpu {
        let warmup = matches
            .get_one::<u64>("warmup")
            .copied()
            .unwrap_or(config.poll_interval_ms);
        sampler.retain_rates_for(Duration::from_millis(warmup));
        let _ = sampler.get_all_processes();
        std::thread::sleep(Duration::from_millis(warmup));
    }

    let top = sampler.top_by(metric, limit);

    if matches.get_flag("json") {
        return print_json(&top);
    }

    println!("{}", format!("Top {} by {}", limit, metric).bold().cyan());
    print_process_table(&top);
    Ok(())
}
