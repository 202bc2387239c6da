// Platform-specific process sources

pub mod command;
pub mod linux;
pub mod sysinfo_source;
pub mod windows;

pub use command::run_with_timeout;
pub use linux::LinuxProcSource;
pub use sysinfo_source::SysinfoSource;
pub use windows::WindowsWmiSource;

use crate::core::procwatch::source::{Platform, ProcessSource};
use crate::error::Result;

/// Build the process source for `platform`
pub fn create_source(platform: Platform) -> Result<Box<dyn ProcessSource>> {
    let source: Box<dyn ProcessSource> = match platform {
        Platform::Linux => Box::new(LinuxProcSource::new()),
        Platform::MacOs => Box::new(SysinfoSource::new(Platform::MacOs)),
        Platform::Windows => Box::new(WindowsWmiSource::new()),
    };
    log::debug!("Using {} process source", platform);
    Ok(source)
}
