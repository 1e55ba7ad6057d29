//! Change notifications for persisting the mapping tables

use simlink_protocol::{DataType, SimulatorKind};

/// Receives every successful change to mappings and simulator selection
///
/// The router only reports changes while change tracking is enabled with
/// `Router::set_save_on_change`.
pub trait ChangeTracker: Send {
    fn write_mapping_added(
        &mut self,
        device_event_name: &str,
        sim_event_name: &str,
        parameter: &str,
    );

    fn write_mapping_removed(&mut self, device_event_name: &str);

    fn read_mapping_added(
        &mut self,
        device_event_name: &str,
        sim_event_name: &str,
        datatype: DataType,
    );

    fn read_mapping_removed(&mut self, sim_event_name: &str);

    fn simulator_changed(&mut self, kind: SimulatorKind);
}
