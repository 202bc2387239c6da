use anyhow::Result;
use clap::ArgMatches;
use serde::Serialize;

use super::{build_sampler, load_config, print_json};
use crate::ui::print_system_facts;

#[derive(Serialize)]
struct InfoOutput {
    platform: String,
    total_memory_bytes: u64,
    cpu_count: usize,
}

pub fn execute(matches: &ArgMatches) -> Result<()> {
    let config = load_config()?;
    let sampler = build_sampler(&config)?;
    let facts = sampler.system_facts();

    if matches.get_flag("json") {
        return print_json(&InfoOutput {
            platform: sampler.platform().to_string(),
            total_memory_bytes: facts.total_memory_bytes,
            cpu_count: facts.cpu_count,
        });
    }

    print_system_facts(sampler.platform(), &facts);
    Ok(())
}
