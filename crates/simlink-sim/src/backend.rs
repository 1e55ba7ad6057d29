//! The capability every simulator integration provides

use simlink_protocol::{DataType, SimulatorKind};

use crate::error::BackendError;

/// A value change reported by a simulator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadUpdate {
    /// Namespaced name, e.g. `simconnect:GEAR HANDLE POSITION`
    pub sim_event_name: String,
    /// Decimal text as sent to devices
    pub value: String,
}

impl ReadUpdate {
    pub fn new(sim_event_name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            sim_event_name: sim_event_name.into(),
            value: value.into(),
        }
    }
}

/// A simulator integration driven by the router
///
/// All methods are called from the router's loop. Implementations that need
/// their own I/O (the X-Plane link) bridge to it with channels, so none of
/// these calls block on the network.
pub trait SimulatorBackend: Send {
    /// Which simulator this backend talks to
    fn kind(&self) -> SimulatorKind;

    /// Try to establish the connection once
    ///
    /// Returns `Ok` once the backend can accept subscriptions. Callers retry
    /// on error.
    fn connect(&mut self) -> Result<(), BackendError>;

    /// Whether `connect` has succeeded and `close` has not been called
    fn is_connected(&self) -> bool;

    /// Prepare a simulator event for triggering
    fn subscribe_write(&mut self, sim_event_name: &str) -> Result<(), BackendError>;

    /// Ask the simulator to report changes of a value
    fn subscribe_read(&mut self, sim_event_name: &str, datatype: DataType)
        -> Result<(), BackendError>;

    /// Report every firing of a simulator event as a [`ReadUpdate`]
    ///
    /// Only SimConnect sees events fired by the simulator itself.
    fn subscribe_notification(&mut self, sim_event_name: &str) -> Result<(), BackendError> {
        let _ = sim_event_name;
        Err(BackendError::Unsupported {
            backend: self.kind().name(),
            operation: "event notifications",
        })
    }

    /// Fire a simulator event with a parameter
    fn trigger(&mut self, sim_event_name: &str, parameter: &str) -> Result<(), BackendError>;

    /// Pump pending simulator traffic and return the value changes seen
    fn poll(&mut self) -> Vec<ReadUpdate>;

    /// Tear the connection down; the backend stays closed
    fn close(&mut self);

    /// Whether `trigger` needs an integer parameter
    fn requires_numeric_parameter(&self) -> bool {
        self.kind().requires_numeric_parameter()
    }
}
