//! Interception point for scripted write handling
//!
//! A [`ScriptHook`] sees every write target before it is dispatched and may
//! take over. It gets a [`SimDispatch`] handle so it can fire simulator
//! events of its own while it handles the write.

use simlink_sim::SimulatorBackend;
use tracing::debug;

use crate::error::MapperError;

/// Direct access to the active simulator, bypassing the registry
pub trait SimDispatch {
    /// Trigger a simulator event
    ///
    /// An empty parameter becomes `"0"` on simulators that need a number.
    fn sim_write(&mut self, sim_event_name: &str, parameter: &str) -> Result<(), MapperError>;
}

/// Hook offered each write before default dispatch
pub trait ScriptHook: Send {
    /// Return `true` if the write was handled and must not be dispatched
    fn handle_write(
        &mut self,
        dispatch: &mut dyn SimDispatch,
        device_event_name: &str,
        parameter: &str,
    ) -> bool;
}

/// Trigger on a backend, substituting `"0"` for empty numeric parameters
pub(crate) fn trigger_on(
    backend: &mut dyn SimulatorBackend,
    sim_event_name: &str,
    parameter: &str,
) -> Result<(), MapperError> {
    let parameter = if parameter.is_empty() && backend.requires_numeric_parameter() {
        "0"
    } else {
        parameter
    };
    debug!(
        "Writing {} = {:?} to {}",
        sim_event_name,
        parameter,
        backend.kind()
    );
    backend.trigger(sim_event_name, parameter)?;
    Ok(())
}
