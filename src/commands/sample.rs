use anyhow::{bail, Result};
use clap::ArgMatches;
use colored::*;

use super::{build_sampler, load_config, print_json};
use crate::core::procwatch::{is_jvm_process, JcmdProbe, ManagedRuntimeProbe};
use crate::ui::{print_process_detail, print_process_table};

pub fn execute(matches: &ArgMatches) -> Result<()> {
    let config = load_config()?;
    let sampler = build_sampler(&config)?;
    let json = matches.get_flag("json");

    if let Some(&pid) = matches.get_one::<u32>("pid") {
        let mut sample = match sampler.sample_by_pid(pid) {
            Some(sample) => sample,
            None => bail!("No process with pid {}", pid),
        };

        if matches.get_flag("jvm") && is_jvm_process(&sample) {
            let probe = JcmdProbe::new(std::time::Duration::from_millis(
                config.managed_runtime.timeout_ms,
            ));
            match probe.probe(pid) {
                Ok(jvm) => sample = sample.with_jvm(jvm),
                Err(e) => eprintln!("{}", format!("JVM metrics unavailable: {}", e).dimmed()),
            }
        }

        if json {
            return print_json(&sample);
        }
        print_process_detail(&sample);
        return Ok(());
    }

    let samples = if let Some(name) = matches.get_one::<String>("name") {
        sampler.sample_by_name(name)
    } else if let Some(cmd) = matches.get_one::<String>("cmd") {
        sampler.sample_by_command(cmd)
    } else {
        bail!("One of --pid, --name or --cmd is required");
    };

    if json {
        return print_json(&samples);
    }
    print_process_table(&samples);
    Ok(())
}
