//! Error types for the query mail agent.

use std::any::Any;
use std::time::Duration;

/// Error ending a poll cycle.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Unexpected error: {0}")]
    Unexpected(String),
}

impl Error {
    /// Short label for structured logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Transport(_) => "transport",
            Self::Unexpected(_) => "unexpected",
        }
    }

    /// Wrap a caught panic payload.
    pub fn from_panic(payload: &(dyn Any + Send)) -> Self {
        let reason = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        Self::Unexpected(reason)
    }
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Mail transport errors (IMAP fetch, SMTP send).
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Failed to connect to {host}: {reason}")]
    ConnectFailed { host: String, reason: String },

    #[error("Authentication failed: {reason}")]
    AuthFailed { reason: String },

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Invalid address {address}: {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("Failed to send message: {reason}")]
    SendFailed { reason: String },

    #[error("Transport task failed: {0}")]
    TaskFailed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Execution backend errors. Recorded per directive, never fatal to a message.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("Could not prepare query file: {0}")]
    ScratchFile(#[source] std::io::Error),

    #[error("Failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Backend exited with {}: {}", describe_status(.code), truncate_for_error(.output))]
    Exited { code: Option<i32>, output: String },

    #[error("Backend timed out after {0:?}")]
    TimedOut(Duration),

    #[error("Backend IO error: {0}")]
    Io(#[source] std::io::Error),
}

impl BackendError {
    /// Captured output, when the backend got far enough to produce any.
    pub fn output(&self) -> &str {
        match self {
            Self::Exited { output, .. } => output,
            _ => "",
        }
    }
}

fn describe_status(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("status {code}"),
        None => "no status (terminated by signal)".to_string(),
    }
}

/// Keep error strings readable when the backend dumps a full log.
fn truncate_for_error(output: &str) -> String {
    const MAX: usize = 500;
    let trimmed = output.trim();
    if trimmed.chars().count() <= MAX {
        return trimmed.to_string();
    }
    let head: String = trimmed.chars().take(MAX).collect();
    format!("{head}...")
}

/// Result type alias for poll cycles.
pub type Result<T> = std::result::Result<T, Error>;
