use std::io;
use thiserror::Error;

/// Error type for the procwatch engine
#[derive(Error, Debug)]
pub enum ProcwatchError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Process not found: {0}")]
    NotFound(String),

    #[error("Platform facility unavailable: {0}")]
    PlatformUnavailable(String),

    #[error("Unsupported platform: {0}")]
    UnsupportedPlatform(String),

    #[error("Malformed record: {0}")]
    MalformedRecord(String),

    #[error("Monitoring session terminated: pid {pid} is gone")]
    SessionTerminated { pid: u32 },

    #[error("Timed out after {millis} ms: {what}")]
    Timeout { what: String, millis: u64 },

    #[error("Invalid alert rule: {0}")]
    InvalidRule(String),

    #[error("Runtime error: {0}")]
    Runtime(String),
}

/// Result type alias for procwatch
pub type Result<T> = std::result::Result<T, ProcwatchError>;

impl ProcwatchError {
    /// Create a config error
    pub fn config<S: Into<String>>(msg: S) -> Self {
        ProcwatchError::Config(msg.into())
    }

    pub fn not_found<S: Into<String>>(msg: S) -> Self {
        ProcwatchError::NotFound(msg.into())
    }

    /// Create a platform-unavailable error (the OS facility could not be queried)
    pub fn platform_unavailable<S: Into<String>>(msg: S) -> Self {
        ProcwatchError::PlatformUnavailable(msg.into())
    }

    pub fn unsupported_platform<S: Into<String>>(msg: S) -> Self {
        ProcwatchError::UnsupportedPlatform(msg.into())
    }

    /// Create a malformed-record error (one process line failed to parse)
    pub fn malformed<S: Into<String>>(msg: S) -> Self {
        ProcwatchError::MalformedRecord(msg.into())
    }

    pub fn invalid_rule<S: Into<String>>(msg: S) -> Self {
        ProcwatchError::InvalidRule(msg.into())
    }

    pub fn runtime<S: Into<String>>(msg: S) -> Self {
        ProcwatchError::Runtime(msg.into())
    }

    pub fn timeout<S: Into<String>>(what: S, millis: u64) -> Self {
        ProcwatchError::Timeout {
            what: what.into(),
            millis,
        }
    }

    /// Whether the error is worth retrying at the next monitor tick
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ProcwatchError::Io(_)
                | ProcwatchError::PlatformUnavailable(_)
                | ProcwatchError::MalformedRecord(_)
                | ProcwatchError::Timeout { .. }
        )
    }
}
