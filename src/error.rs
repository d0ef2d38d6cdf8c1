//! Error types for the emulator's outer surfaces.
//!
//! Decoding and state updates never fail; only binding the listener,
//! talking to a stopped engine and parsing fault descriptions can.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EmulatorError {
    /// The listener could not be bound
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// The printer engine task is no longer running
    #[error("printer engine has shut down")]
    EngineClosed,

    /// A fault description could not be parsed
    #[error("invalid fault spec {spec:?}: {reason}")]
    InvalidFault { spec: String, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, EmulatorError>;
