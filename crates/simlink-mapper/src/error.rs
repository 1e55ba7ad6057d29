//! Error types for the event router

use std::fmt;

use simlink_protocol::SimulatorKind;
use simlink_sim::BackendError;
use thiserror::Error;

use crate::router::RouterState;

/// Direction of a mapping
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MappingKind {
    /// Device event to simulator event
    Write,
    /// Simulator value to device event
    Read,
}

impl fmt::Display for MappingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MappingKind::Write => f.write_str("write"),
            MappingKind::Read => f.write_str("read"),
        }
    }
}

/// Errors that can occur while registering or routing events
#[derive(Debug, Error)]
pub enum MapperError {
    /// Mapping key already registered; nothing changed
    #[error("{kind} mapping for {name} already registered")]
    DuplicateRegistration { kind: MappingKind, name: String },

    /// No mapping with this key
    #[error("no {kind} mapping for {name}")]
    UnknownEvent { kind: MappingKind, name: String },

    /// No backend installed for the selected simulator
    #[error("no backend installed for {0}")]
    NoBackend(SimulatorKind),

    /// Operation not allowed in the router's current state
    #[error("cannot {action} while router is {state:?}")]
    InvalidState {
        action: &'static str,
        state: RouterState,
    },

    /// Backend rejected the call
    #[error("backend error: {0}")]
    Backend(#[from] BackendError),
}
