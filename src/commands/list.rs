use anyhow::Result;
use clap::ArgMatches;

use super::{build_sampler, load_config, print_json};
use crate::ui::print_process_table;

pub fn execute(matches: &ArgMatches) -> Result<()> {
    let config = load_config()?;
    let sampler = build_sampler(&config)?;

    let mut processes = sampler.get_all_processes();
    processes.sort_by_key(|p| p.pid);

    if let Some(user) = matches.get_one::<String>("user") {
        processes.retain(|p| p.user.eq_ignore_ascii_case(user));
    }

    if matches.get_flag("json") {
        return print_json(&processes);
    }

    print_process_table(&processes);
    Ok(())
}
