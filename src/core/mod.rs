// Core business logic module

pub mod config;
pub mod procwatch;

// Re-export commonly used items
pub use config::MonitorConfig;
