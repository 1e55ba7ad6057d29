//! SimLink Device Communication
//!
//! This crate connects SimLink to control-panel hardware. A device is either
//! a serial port (115 200 baud) or a TCP endpoint; both speak the same
//! newline-delimited text protocol.
//!
//! - [`DeviceManager`] owns every device and one reactor thread that serves
//!   all of them.
//! - Each device connects with unbounded retry, then reads lines until its
//!   transport closes.
//! - Inbound lines arrive on a bounded channel returned by
//!   [`DeviceManager::new`]; outbound lines go out with
//!   [`DeviceManager::send_all`].
//!
//! # Example
//!
//! ```rust,no_run
//! use simlink_comm::DeviceManager;
//! use simlink_protocol::DeviceKind;
//!
//! let (mut manager, mut inbound) = DeviceManager::new();
//! manager.add_device(DeviceKind::Serial, "/dev/ttyACM0", "Overhead panel").unwrap();
//! manager.add_device(DeviceKind::Network, "192.168.1.40:5465", "MCP").unwrap();
//! manager.start().unwrap();
//!
//! while let Some(inbound) = inbound.blocking_recv() {
//!     println!("{} sent {}", inbound.address, inbound.line);
//! }
//! ```

pub mod device;
pub mod error;
pub mod manager;
pub mod scanner;
pub mod tracker;

pub use device::{
    connect_with_retry, parse_network_address, ConnectionState, Device, DeviceInfo,
    DeviceTaskCommand, InboundLine, DEFAULT_DEVICE_PORT, OUTBOUND_QUEUE_CAPACITY, RECONNECT_INTERVAL,
    SERIAL_BAUD_RATE,
};
pub use error::CommError;
pub use manager::{DeviceManager, INBOUND_CHANNEL_CAPACITY};
pub use scanner::{list_serial_ports, SerialPortInfo};
pub use tracker::DeviceTracker;
