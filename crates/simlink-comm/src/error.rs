//! Error types for device communication

use thiserror::Error;

/// Errors that can occur while managing device transports
#[derive(Debug, Error)]
pub enum CommError {
    /// Failed to open a serial port
    #[error("serial port error: {0}")]
    Serial(#[from] tokio_serial::Error),

    /// Socket or stream I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Device address could not be used for its transport
    #[error("invalid address for {kind} device: {address:?}")]
    InvalidAddress { kind: &'static str, address: String },

    /// Operation needs the reactor thread and it is not running
    #[error("device manager is not running")]
    NotRunning,

    /// Reactor thread failed or could not be joined
    #[error("reactor error: {0}")]
    Runtime(String),

    /// Failed to enumerate serial ports
    #[error("failed to enumerate ports: {0}")]
    Enumeration(String),
}
