//! Error types for SimLink wire parsing and encoding

use thiserror::Error;

/// Errors that can occur while parsing or encoding wire data
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// A line did not have the expected field structure
    #[error("malformed message: {0}")]
    MalformedMessage(String),

    /// Device transport name not recognised
    #[error("unknown device type: {0}")]
    UnknownDeviceKind(String),

    /// Simulator backend name not recognised
    #[error("unknown simulator type: {0}")]
    UnknownSimulatorKind(String),

    /// Numeric datatype name not recognised
    #[error("unknown datatype: {0}")]
    UnknownDataType(String),

    /// Raw payload too short for the requested datatype
    #[error("payload for {datatype} needs {expected} bytes, got {actual}")]
    InvalidPayloadLength {
        datatype: &'static str,
        expected: usize,
        actual: usize,
    },
}
