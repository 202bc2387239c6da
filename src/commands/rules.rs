use anyhow::Result;
use clap::ArgMatches;
use colored::*;

use crate::core::procwatch::{AlertRule, SYNTAX_HELP};

/// Print the rule syntax, or check the given expressions
pub fn execute(matches: &ArgMatches) -> Result<()> {
    let expressions: Vec<&String> = matches
        .get_many::<String>("expression")
        .map(|values| values.collect())
        .unwrap_or_default();

    if expressions.is_empty() {
        println!("{}", SYNTAX_HELP);
        return Ok(());
    }

    let mut invalid = 0;
    for expr in expressions {
        match AlertRule::parse(expr) {
            Ok(rule) => println!("{} {} ({})", "✓".green(), rule, rule.severity),
            Err(e) => {
                invalid += 1;
                println!("{} {}", "✗".red(), e);
            }
        }
    }

    if invalid > 0 {
        anyhow::bail!("{} invalid rule(s)", invalid);
    }
    Ok(())
}
