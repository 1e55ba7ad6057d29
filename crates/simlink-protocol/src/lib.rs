//! SimLink Protocol Library
//!
//! This crate holds the vocabulary shared by every part of SimLink:
//!
//! - **Line framing**: devices and the remote simulator plugin both speak
//!   newline-delimited ASCII. [`LineCodec`] turns a byte stream into lines.
//! - **Device lines**: inbound lines are bare device event names, outbound
//!   lines are `<device_event_name>:<value>`.
//! - **Remote simulator protocol**: `read:<ref>`, `write:<ref>:<value>` and
//!   `<prefix>:<ref>:<value>` messages, see [`xplane`].
//! - **Numeric decoding**: simulator data arrives as raw int32/int64/
//!   float32/float64 payloads and leaves as decimal strings, see [`DataType`].
//!
//! # Example
//!
//! ```rust
//! use simlink_protocol::{format_device_line, LineCodec};
//!
//! let mut codec = LineCodec::new();
//! codec.push_bytes(b"GEAR_TOGGLE\nFLAPS_");
//! assert_eq!(codec.next_line().as_deref(), Some("GEAR_TOGGLE"));
//! assert_eq!(codec.next_line(), None);
//!
//! assert_eq!(format_device_line("GEAR_LED", "1"), "GEAR_LED:1");
//! ```

use std::fmt;
use std::str::FromStr;

pub mod datatype;
pub mod error;
pub mod line;
pub mod xplane;

pub use datatype::DataType;
pub use error::ProtocolError;
pub use line::{format_device_line, frame_line, LineCodec, LINE_DELIMITER, MAX_LINE_LEN};
pub use xplane::{XPlaneMessage, XPlaneUpdate};

/// Transport used to reach a hardware device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceKind {
    /// Serial/COM port
    Serial,
    /// TCP client connection
    Network,
}

impl DeviceKind {
    /// Name used in configuration files
    pub fn name(&self) -> &'static str {
        match self {
            DeviceKind::Serial => "serial",
            DeviceKind::Network => "network",
        }
    }
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DeviceKind {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "serial" => Ok(DeviceKind::Serial),
            "network" => Ok(DeviceKind::Network),
            other => Err(ProtocolError::UnknownDeviceKind(other.to_string())),
        }
    }
}

/// Which simulator integration is active
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SimulatorKind {
    /// ESP/Prepar3D/MSFS via the vendor SimConnect SDK
    SimConnect,
    /// X-Plane via the remote text-protocol plugin
    XPlane,
}

impl SimulatorKind {
    /// Every supported simulator
    pub const ALL: [SimulatorKind; 2] = [SimulatorKind::SimConnect, SimulatorKind::XPlane];

    /// Name used in configuration files
    pub fn name(&self) -> &'static str {
        match self {
            SimulatorKind::SimConnect => "simconnect",
            SimulatorKind::XPlane => "xplane",
        }
    }

    /// Whether triggers on this simulator take an integer argument
    ///
    /// SimConnect client events carry a numeric payload, so an empty
    /// parameter has to become `"0"` before it reaches the SDK.
    pub fn requires_numeric_parameter(&self) -> bool {
        matches!(self, SimulatorKind::SimConnect)
    }
}

impl fmt::Display for SimulatorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for SimulatorKind {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "simconnect" => Ok(SimulatorKind::SimConnect),
            "xplane" => Ok(SimulatorKind::XPlane),
            other => Err(ProtocolError::UnknownSimulatorKind(other.to_string())),
        }
    }
}

/// Strip a backend namespace (`simconnect:`, `xplane:` ...) from a sim event name
///
/// Read mappings are keyed by the name a backend reports, which carries a
/// namespace prefix. Subscriptions go out without it. Names without the
/// namespace are returned unchanged, so SimConnect variables with an index
/// (`GENERAL ENG RPM:1`) survive.
pub fn strip_namespace<'a>(sim_event_name: &'a str, namespace: &str) -> &'a str {
    sim_event_name
        .strip_prefix(namespace)
        .and_then(|rest| rest.strip_prefix(':'))
        .filter(|rest| !rest.is_empty())
        .unwrap_or(sim_event_name)
}

/// A sim event name with any simulator namespace removed
///
/// `xplane:sim/cockpit/gear` and `sim/cockpit/gear` name the same signal,
/// so both canonicalize to the bare name.
pub fn canonical_sim_name(sim_event_name: &str) -> &str {
    SimulatorKind::ALL
        .iter()
        .map(|kind| strip_namespace(sim_event_name, kind.name()))
        .find(|bare| bare.len() != sim_event_name.len())
        .unwrap_or(sim_event_name)
}
