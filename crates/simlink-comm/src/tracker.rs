//! Device change reporting

use simlink_protocol::DeviceKind;

/// Receives device list changes for persistence
///
/// Called by [`crate::DeviceManager`] after each successful add or remove.
pub trait DeviceTracker: Send {
    fn device_added(&mut self, kind: DeviceKind, address: &str, name: &str);

    /// Every device at `address` is gone
    fn device_removed(&mut self, address: &str);
}
