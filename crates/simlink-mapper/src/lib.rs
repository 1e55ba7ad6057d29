//! SimLink Event Router
//!
//! This crate maps device events to simulator events and back.
//!
//! # Architecture
//!
//! The [`Router`] owns an [`EventRegistry`] with two tables:
//!
//! - **Write mappings**: device event name to simulator event plus a default
//!   parameter. A device line is a bare device event name and triggers the
//!   simulator event with the default; callers of [`Router::write_event`]
//!   may pass an explicit value instead.
//! - **Read mappings**: simulator event name to device event name. A value
//!   reported by the simulator is broadcast to every device as
//!   `DEVICE_NAME:VALUE`.
//!
//! Backends for each simulator are installed up front and one of them is
//! active. The router never touches devices itself; device-bound lines are
//! buffered as [`RouterEvent::Broadcast`] and collected with
//! [`Router::drain_events`].
//!
//! A [`ScriptHook`] can take over writes, and a [`ChangeTracker`] is told
//! about every mapping change so it can be persisted.
//!
//! # Example
//!
//! ```rust
//! use simlink_mapper::{Router, RouterEvent};
//! use simlink_protocol::{DataType, SimulatorKind};
//! use simlink_sim::VirtualSimulator;
//!
//! let (sim, handle) = VirtualSimulator::new(SimulatorKind::SimConnect);
//! let mut router = Router::builder(SimulatorKind::SimConnect)
//!     .backend(Box::new(sim))
//!     .write_mapping("AP_BTN", "AP_MASTER", "")
//!     .read_mapping("AP_LED", "simconnect:AUTOPILOT MASTER", DataType::Int32)
//!     .build();
//! router.connect().unwrap();
//!
//! router.write_event("AP_BTN", "").unwrap();
//! assert_eq!(handle.triggers(), vec![("AP_MASTER".to_string(), "0".to_string())]);
//!
//! handle.inject("simconnect:AUTOPILOT MASTER", "1");
//! router.tick();
//! assert!(router
//!     .drain_events()
//!     .contains(&RouterEvent::Broadcast("AP_LED:1".into())));
//! ```

pub mod error;
pub mod hook;
pub mod registry;
pub mod router;
pub mod tracker;

pub use error::{MapperError, MappingKind};
pub use hook::{ScriptHook, SimDispatch};
pub use registry::{EventRegistry, ReadMapping, WriteMapping, WriteTarget};
pub use router::{Router, RouterBuilder, RouterEvent, RouterState, CONNECT_RETRY_INTERVAL};
pub use tracker::ChangeTracker;
