// Command handlers module
pub mod info;
pub mod list;
pub mod rules;
pub mod sample;
pub mod top;
pub mod watch;

use anyhow::{Context, Result};
use std::sync::Arc;

use crate::core::config::MonitorConfig;
use crate::core::procwatch::{create_sampler, ProcessSampler};

/// Load the user config, falling back to defaults
pub fn load_config() -> Result<MonitorConfig> {
    MonitorConfig::load().context("Failed to load configuration")
}

/// Build the sampler for this platform
pub fn build_sampler(config: &MonitorConfig) -> Result<Arc<dyn ProcessSampler>> {
    let sampler = create_sampler(config).context("Process sampling is not available here")?;
    Ok(Arc::new(sampler))
}

/// Print `value` as pretty JSON
pub fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
