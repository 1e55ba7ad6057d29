//! Error types for simulator backends

use simlink_protocol::ProtocolError;
use thiserror::Error;

/// Errors that can occur while talking to a simulator
#[derive(Debug, Error)]
pub enum BackendError {
    /// Backend has not connected yet, or was closed
    #[error("{0} backend is not connected")]
    NotConnected(&'static str),

    /// Parameter could not be converted for the simulator
    #[error("invalid parameter {parameter:?} for {event}")]
    InvalidParameter { event: String, parameter: String },

    /// The simulator has no such capability
    #[error("{backend} backend does not support {operation}")]
    Unsupported {
        backend: &'static str,
        operation: &'static str,
    },

    /// Outbound command queue is full; the command was dropped
    #[error("command queue full, dropped write to {0}")]
    QueueFull(String),

    /// Vendor client call failed
    #[error("simulator client error: {0}")]
    Client(String),

    /// Malformed data from the simulator
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
