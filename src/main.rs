use anyhow::Result;
use clap::{Arg, ArgAction, Command};

use procwatch::commands;

fn json_flag() -> Arg {
    Arg::new("json")
        .long("json")
        .help("Print machine-readable JSON")
        .action(ArgAction::SetTrue)
}

fn pid_arg() -> Arg {
    Arg::new("pid")
        .short('p')
        .long("pid")
        .value_name("PID")
        .help("Process id")
        .value_parser(clap::value_parser!(u32))
}

fn name_arg() -> Arg {
    Arg::new("name")
        .short('n')
        .long("name")
        .value_name("PATTERN")
        .help("Case-insensitive substring of the process name")
}

fn main() -> Result<()> {
    procwatch::init_logging();

    let matches = Command::new("procwatch")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Sample and monitor running processes")
        .disable_version_flag(true)
        .arg(
            Arg::new("version")
                .short('v')
                .short_alias('V')
                .long("version")
                .help("Print version information")
                .action(ArgAction::SetTrue),
        )
        .subcommand(
            Command::new("info")
                .about("Show platform, total memory and cpu count")
                .arg(json_flag()),
        )
        .subcommand(
            Command::new("list")
                .about("List all running processes")
                .arg(
                    Arg::new("user")
                        .short('u')
                        .long("user")
                        .value_name("USER")
                        .help("Only show processes owned by USER"),
                )
                .arg(json_flag()),
        )
        .subcommand(
            Command::new("sample")
                .about("Take one sample of a process by pid, name or command line")
                .arg(pid_arg().conflicts_with_all(["name", "cmd"]))
                .arg(name_arg().conflicts_with("cmd"))
                .arg(
                    Arg::new("cmd")
                        .short('c')
                        .long("cmd")
                        .value_name("PATTERN")
                        .help("Case-insensitive substring of the command line"),
                )
                .arg(
                    Arg::new("jvm")
                        .long("jvm")
                        .help("Include JVM heap, GC and thread metrics when available")
                        .action(ArgAction::SetTrue),
                )
                .group(
                    clap::ArgGroup::new("target")
                        .args(["pid", "name", "cmd"])
                        .required(true),
                )
                .arg(json_flag()),
        )
        .subcommand(
            Command::new("top")
                .about("Show the processes using the most cpu or memory")
                .arg(
                    Arg::new("by")
                        .short('b')
                        .long("by")
                        .value_name("METRIC")
                        .help("Ranking metric")
                        .value_parser(["cpu", "memory", "mem"])
                        .default_value("cpu"),
                )
                .arg(
                    Arg::new("limit")
                        .short('n')
                        .long("limit")
                        .value_name("N")
                        .help("Number of processes to show (default from config)")
                        .value_parser(clap::value_parser!(usize)),
                )
                .arg(
                    Arg::new("warmup")
                        .short('w')
                        .long("warmup")
                        .value_name("MS")
                        .help("Measurement window for cpu ranking in milliseconds")
                        .value_parser(clap::value_parser!(u64)),
                )
                .arg(json_flag()),
        )
        .subcommand(
            Command::new("watch")
                .about("Monitor one process live, with optional alert rules")
                .arg(pid_arg().conflicts_with("name"))
                .arg(name_arg())
                .group(
                    clap::ArgGroup::new("target")
                        .args(["pid", "name"])
                        .required(true),
                )
                .arg(
                    Arg::new("interval")
                        .short('i')
                        .long("interval")
                        .value_name("MS")
                        .help("Polling interval in milliseconds (default from config)")
                        .value_parser(clap::value_parser!(u64)),
                )
                .arg(
                    Arg::new("alert")
                        .short('a')
                        .long("alert")
                        .value_name("RULE")
                        .help("Alert rule, e.g. 'cpu > 80% for 30s' (repeatable)")
                        .action(ArgAction::Append),
                )
                .arg(
                    Arg::new("dump-on-breach")
                        .long("dump-on-breach")
                        .value_name("TYPE")
                        .help("Run jstack, jmap, pstack or lsof on the process whenever an alert fires")
                        .value_parser(["jstack", "jmap", "pstack", "lsof"]),
                )
                .arg(
                    Arg::new("count")
                        .long("count")
                        .value_name("N")
                        .help("Stop after N samples")
                        .value_parser(clap::value_parser!(u64)),
                )
                .arg(json_flag()),
        )
        .subcommand(
            Command::new("rules")
                .about("Show the alert rule syntax or validate rule expressions")
                .arg(
                    Arg::new("expression")
                        .help("Rule expressions to validate")
                        .num_args(0..)
                        .index(1),
                ),
        )
        .get_matches();

    if matches.get_flag("version") {
        println!("procwatch version {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    match matches.subcommand() {
        Some(("info", sub_matches)) => commands::info::execute(sub_matches)?,
        Some(("list", sub_matches)) => commands::list::execute(sub_matches)?,
        Some(("sample", sub_matches)) => commands::sample::execute(sub_matches)?,
        Some(("top", sub_matches)) => commands::top::execute(sub_matches)?,
        Some(("watch", sub_matches)) => commands::watch::execute(sub_matches)?,
        Some(("rules", sub_matches)) => commands::rules::execute(sub_matches)?,
        _ => {
            println!("Welcome to procwatch!");
            println!("Use 'procwatch --help' for more information.");
        }
    }

    Ok(())
}
