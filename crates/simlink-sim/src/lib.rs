//! SimLink Simulator Backends
//!
//! This crate provides the simulator side of SimLink. Every integration
//! implements [`SimulatorBackend`]:
//!
//! - **SimConnectBackend**: ESP/Prepar3D/MSFS through the vendor SDK, reached
//!   via the [`SimConnectClient`] trait
//! - **XPlaneBackend**: X-Plane through the remote plugin's line protocol,
//!   with its own reactor thread
//! - **VirtualSimulator**: records calls and replays injected updates, for
//!   running without a simulator
//!
//! # Example
//!
//! ```rust
//! use simlink_protocol::{DataType, SimulatorKind};
//! use simlink_sim::{SimulatorBackend, VirtualSimulator};
//!
//! let (mut sim, handle) = VirtualSimulator::new(SimulatorKind::XPlane);
//! sim.connect().unwrap();
//! sim.subscribe_read("xplane:sim/cockpit/gear", DataType::Float64).unwrap();
//! sim.trigger("sim/flight_controls/flaps_down", "1").unwrap();
//!
//! handle.inject("xplane:sim/cockpit/gear", "1");
//! let updates = sim.poll();
//! assert_eq!(updates[0].value, "1");
//! ```

pub mod backend;
pub mod error;
pub mod simconnect;
pub mod virtual_sim;
pub mod xplane;

pub use backend::{ReadUpdate, SimulatorBackend};
pub use error::BackendError;
pub use simconnect::{DispatchMessage, SimConnectBackend, SimConnectClient, SIMCONNECT_PREFIX};
pub use virtual_sim::{SimCall, VirtualSimHandle, VirtualSimulator, MAX_RECORDED_CALLS};
pub use xplane::{
    XPlaneBackend, XPlaneConfig, DEFAULT_QUEUE_CAPACITY, DEFAULT_XPLANE_HOST, DEFAULT_XPLANE_PORT,
    XPLANE_PREFIX,
};
