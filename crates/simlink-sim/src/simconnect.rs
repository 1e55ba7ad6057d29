//! SimConnect backend
//!
//! Adapts the vendor SDK's numeric-id API to the name-based
//! [`SimulatorBackend`] capability. The SDK itself sits behind
//! [`SimConnectClient`] so the adapter can be driven without the simulator.
//!
//! - Client events are mapped to sequential ids the first time a name is
//!   seen; mapping the same name again is a no-op.
//! - Read subscriptions get sequential data-definition/request ids, one per
//!   name, and remember their datatype for decoding.
//! - `poll()` pumps the client dispatch queue and turns data and event
//!   notifications into `simconnect:<name>` updates.

use std::collections::HashMap;

use simlink_protocol::{strip_namespace, DataType, SimulatorKind};
use tracing::{debug, error, info, warn};

use crate::backend::{ReadUpdate, SimulatorBackend};
use crate::error::BackendError;

/// Namespace prefix on every update this backend reports
pub const SIMCONNECT_PREFIX: &str = "simconnect";

/// Name this application registers with the SDK
pub const CLIENT_NAME: &str = "SimLink";

/// Notification group used for event subscriptions
pub const NOTIFICATION_GROUP: u32 = 0;

/// Most dispatch messages handled by a single `poll()`
const MAX_DISPATCH_PER_POLL: usize = 64;

/// A message pulled from the SDK dispatch queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchMessage {
    /// A subscribed client event fired
    Event { event_id: u32, data: i32 },
    /// Periodic data for a request
    SimObjectData { request_id: u32, data: Vec<u8> },
    /// The SDK rejected an earlier call
    Exception { code: u32 },
    /// The simulator is shutting down
    Quit,
}

/// The subset of the SimConnect SDK this backend uses
pub trait SimConnectClient: Send {
    /// Open a session with the simulator
    fn open(&mut self, client_name: &str) -> Result<(), BackendError>;

    /// Close the session
    fn close(&mut self) -> Result<(), BackendError>;

    /// Give the notification group the highest priority
    fn set_notification_group_priority(&mut self, group_id: u32) -> Result<(), BackendError>;

    fn map_client_event_to_sim_event(
        &mut self,
        event_id: u32,
        event_name: &str,
    ) -> Result<(), BackendError>;

    fn add_client_event_to_notification_group(
        &mut self,
        group_id: u32,
        event_id: u32,
    ) -> Result<(), BackendError>;

    fn add_to_data_definition(
        &mut self,
        define_id: u32,
        datum_name: &str,
        datatype: DataType,
    ) -> Result<(), BackendError>;

    /// Request changed values of a definition on the user aircraft, once a second
    fn request_data_on_sim_object(
        &mut self,
        request_id: u32,
        define_id: u32,
    ) -> Result<(), BackendError>;

    fn transmit_client_event(&mut self, event_id: u32, data: i32) -> Result<(), BackendError>;

    /// Next pending dispatch message, if any
    fn next_dispatch(&mut self) -> Option<DispatchMessage>;
}

#[derive(Debug, Clone)]
struct DataRequest {
    name: String,
    datatype: DataType,
}

/// Backend for ESP/Prepar3D/MSFS through a [`SimConnectClient`]
pub struct SimConnectBackend<C> {
    client: C,
    connected: bool,
    closed: bool,
    event_ids: HashMap<String, u32>,
    event_names: HashMap<u32, String>,
    request_ids: HashMap<String, u32>,
    requests: HashMap<u32, DataRequest>,
}

impl<C: SimConnectClient> SimConnectBackend<C> {
    pub fn new(client: C) -> Self {
        Self {
            client,
            connected: false,
            closed: false,
            event_ids: HashMap::new(),
            event_names: HashMap::new(),
            request_ids: HashMap::new(),
            requests: HashMap::new(),
        }
    }

    /// Access the underlying client
    pub fn client(&self) -> &C {
        &self.client
    }

    fn ensure_connected(&self) -> Result<(), BackendError> {
        if self.connected {
            Ok(())
        } else {
            Err(BackendError::NotConnected(SimulatorKind::SimConnect.name()))
        }
    }

    /// Map a client event, returning its id
    fn map_event(&mut self, event_name: &str) -> Result<u32, BackendError> {
        if let Some(&id) = self.event_ids.get(event_name) {
            debug!("Event {} already mapped to {}", event_name, id);
            return Ok(id);
        }

        let id = self.event_ids.len() as u32;
        self.client.map_client_event_to_sim_event(id, event_name)?;
        self.event_ids.insert(event_name.to_string(), id);
        self.event_names.insert(id, event_name.to_string());
        debug!("Mapped event {} to {}", event_name, id);
        Ok(id)
    }

    fn handle_dispatch(&mut self, message: DispatchMessage) -> Option<ReadUpdate> {
        match message {
            DispatchMessage::Event { event_id, data } => match self.event_names.get(&event_id) {
                Some(name) => {
                    debug!("Event notification {} ({}) = {}", name, event_id, data);
                    Some(ReadUpdate::new(
                        format!("{}:{}", SIMCONNECT_PREFIX, name),
                        data.to_string(),
                    ))
                }
                None => {
                    debug!("Notification for unknown event id {}", event_id);
                    None
                }
            },
            DispatchMessage::SimObjectData { request_id, data } => {
                let Some(request) = self.requests.get(&request_id) else {
                    debug!("Data for unknown request id {}", request_id);
                    return None;
                };
                match request.datatype.decode(&data) {
                    Ok(value) => Some(ReadUpdate::new(
                        format!("{}:{}", SIMCONNECT_PREFIX, request.name),
                        value,
                    )),
                    Err(e) => {
                        warn!("Discarding data for {}: {}", request.name, e);
                        None
                    }
                }
            }
            DispatchMessage::Exception { code } => {
                error!("Received SimConnect exception {}", code);
                None
            }
            DispatchMessage::Quit => {
                info!("SimConnect session ended by the simulator");
                self.connected = false;
                None
            }
        }
    }
}

/// Convert a trigger parameter to the SDK's 32-bit argument
fn parse_parameter(event: &str, parameter: &str) -> Result<i32, BackendError> {
    let trimmed = parameter.trim();
    if let Ok(value) = trimmed.parse::<i32>() {
        return Ok(value);
    }
    match trimmed.parse::<f64>() {
        Ok(value) if value.is_finite() => Ok(value as i32),
        _ => Err(BackendError::InvalidParameter {
            event: event.to_string(),
            parameter: parameter.to_string(),
        }),
    }
}

impl<C: SimConnectClient> SimulatorBackend for SimConnectBackend<C> {
    fn kind(&self) -> SimulatorKind {
        SimulatorKind::SimConnect
    }

    fn connect(&mut self) -> Result<(), BackendError> {
        if self.closed {
            return Err(BackendError::NotConnected(SimulatorKind::SimConnect.name()));
        }
        if self.connected {
            return Ok(());
        }

        self.client.open(CLIENT_NAME)?;
        // A new session knows none of the previous session's ids
        self.event_ids.clear();
        self.event_names.clear();
        self.request_ids.clear();
        self.requests.clear();
        self.connected = true;

        if let Err(e) = self.client.set_notification_group_priority(NOTIFICATION_GROUP) {
            warn!("Failed to set notification group priority: {}", e);
        }
        info!("Connected to SimConnect");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn subscribe_write(&mut self, sim_event_name: &str) -> Result<(), BackendError> {
        self.ensure_connected()?;
        self.map_event(strip_namespace(sim_event_name, SIMCONNECT_PREFIX))?;
        Ok(())
    }

    fn subscribe_read(
        &mut self,
        sim_event_name: &str,
        datatype: DataType,
    ) -> Result<(), BackendError> {
        self.ensure_connected()?;
        let name = strip_namespace(sim_event_name, SIMCONNECT_PREFIX);
        if self.request_ids.contains_key(name) {
            debug!("Data request for {} already registered", name);
            return Ok(());
        }

        let id = self.requests.len() as u32;
        self.client.add_to_data_definition(id, name, datatype)?;
        self.client.request_data_on_sim_object(id, id)?;
        self.request_ids.insert(name.to_string(), id);
        self.requests.insert(
            id,
            DataRequest {
                name: name.to_string(),
                datatype,
            },
        );
        debug!("Registered data request {} for {} ({})", id, name, datatype);
        Ok(())
    }

    fn subscribe_notification(&mut self, sim_event_name: &str) -> Result<(), BackendError> {
        self.ensure_connected()?;
        let id = self.map_event(strip_namespace(sim_event_name, SIMCONNECT_PREFIX))?;
        self.client
            .add_client_event_to_notification_group(NOTIFICATION_GROUP, id)?;
        debug!("Notification for {} added to group {}", sim_event_name, NOTIFICATION_GROUP);
        Ok(())
    }

    fn trigger(&mut self, sim_event_name: &str, parameter: &str) -> Result<(), BackendError> {
        self.ensure_connected()?;
        let name = strip_namespace(sim_event_name, SIMCONNECT_PREFIX);
        let value = parse_parameter(name, parameter)?;
        let id = self.map_event(name)?;

        info!("Triggering event {} (id {}) with {}", name, id, value);
        self.client.transmit_client_event(id, value)
    }

    fn poll(&mut self) -> Vec<ReadUpdate> {
        let mut updates = Vec::new();
        if !self.connected {
            return updates;
        }

        for _ in 0..MAX_DISPATCH_PER_POLL {
            let Some(message) = self.client.next_dispatch() else {
                break;
            };
            if let Some(update) = self.handle_dispatch(message) {
                updates.push(update);
            }
            if !self.connected {
                break;
            }
        }
        updates
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if self.connected {
            self.connected = false;
            if let Err(e) = self.client.close() {
                warn!("Error closing SimConnect: {}", e);
            }
        }
        info!("SimConnect closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    #[derive(Debug, Default)]
    struct FakeClient {
        open_failures: u32,
        opens: u32,
        mapped: Vec<(u32, String)>,
        grouped: Vec<(u32, u32)>,
        definitions: Vec<(u32, String, DataType)>,
        requests: Vec<(u32, u32)>,
        transmitted: Vec<(u32, i32)>,
        dispatch: VecDeque<DispatchMessage>,
        closed: bool,
    }

    impl SimConnectClient for FakeClient {
        fn open(&mut self, client_name: &str) -> Result<(), BackendError> {
            assert_eq!(client_name, CLIENT_NAME);
            self.opens += 1;
            if self.open_failures > 0 {
                self.open_failures -= 1;
                return Err(BackendError::Client("simulator not running".into()));
            }
            Ok(())
        }

        fn close(&mut self) -> Result<(), BackendError> {
            self.closed = true;
            Ok(())
        }

        fn set_notification_group_priority(&mut self, _group_id: u32) -> Result<(), BackendError> {
            Ok(())
        }

        fn map_client_event_to_sim_event(
            &mut self,
            event_id: u32,
            event_name: &str,
        ) -> Result<(), BackendError> {
            self.mapped.push((event_id, event_name.to_string()));
            Ok(())
        }

        fn add_client_event_to_notification_group(
            &mut self,
            group_id: u32,
            event_id: u32,
        ) -> Result<(), BackendError> {
            self.grouped.push((group_id, event_id));
            Ok(())
        }

        fn add_to_data_definition(
            &mut self,
            define_id: u32,
            datum_name: &str,
            datatype: DataType,
        ) -> Result<(), BackendError> {
            self.definitions
                .push((define_id, datum_name.to_string(), datatype));
            Ok(())
        }

        fn request_data_on_sim_object(
            &mut self,
            request_id: u32,
            define_id: u32,
        ) -> Result<(), BackendError> {
            self.requests.push((request_id, define_id));
            Ok(())
        }

        fn transmit_client_event(&mut self, event_id: u32, data: i32) -> Result<(), BackendError> {
            self.transmitted.push((event_id, data));
            Ok(())
        }

        fn next_dispatch(&mut self) -> Option<DispatchMessage> {
            self.dispatch.pop_front()
        }
    }

    fn connected_backend() -> SimConnectBackend<FakeClient> {
        let mut backend = SimConnectBackend::new(FakeClient::default());
        backend.connect().unwrap();
        backend
    }

    #[test]
    fn test_connect_failure_then_success() {
        let mut backend = SimConnectBackend::new(FakeClient {
            open_failures: 2,
            ..Default::default()
        });

        assert!(backend.connect().is_err());
        assert!(backend.connect().is_err());
        assert!(!backend.is_connected());
        backend.connect().unwrap();
        assert!(backend.is_connected());
        assert_eq!(backend.client().opens, 3);
    }

    #[test]
    fn test_calls_before_connect_fail() {
        let mut backend = SimConnectBackend::new(FakeClient::default());
        assert!(matches!(
            backend.trigger("GEAR_TOGGLE", "0"),
            Err(BackendError::NotConnected(_))
        ));
        assert!(backend.subscribe_write("GEAR_TOGGLE").is_err());
        assert!(backend.poll().is_empty());
    }

    #[test]
    fn test_event_mapping_is_idempotent() {
        let mut backend = connected_backend();
        backend.subscribe_write("GEAR_TOGGLE").unwrap();
        backend.subscribe_write("FLAPS_INCR").unwrap();
        backend.subscribe_write("GEAR_TOGGLE").unwrap();

        assert_eq!(
            backend.client().mapped,
            vec![(0, "GEAR_TOGGLE".to_string()), (1, "FLAPS_INCR".to_string())]
        );
    }

    #[test]
    fn test_trigger_uses_mapped_id_and_integer_parameter() {
        let mut backend = connected_backend();
        backend.subscribe_write("FLAPS_INCR").unwrap();
        backend.subscribe_write("HEADING_BUG_SET").unwrap();

        backend.trigger("HEADING_BUG_SET", "270").unwrap();
        backend.trigger("simconnect:FLAPS_INCR", "0").unwrap();
        backend.trigger("HEADING_BUG_SET", "90.7").unwrap();

        assert_eq!(backend.client().transmitted, vec![(1, 270), (0, 0), (1, 90)]);
    }

    #[test]
    fn test_trigger_unmapped_event_maps_on_demand() {
        let mut backend = connected_backend();
        backend.trigger("AP_MASTER", "1").unwrap();
        assert_eq!(backend.client().mapped, vec![(0, "AP_MASTER".to_string())]);
        assert_eq!(backend.client().transmitted, vec![(0, 1)]);
    }

    #[test]
    fn test_trigger_invalid_parameter() {
        let mut backend = connected_backend();
        let err = backend.trigger("AP_MASTER", "on").unwrap_err();
        assert!(matches!(err, BackendError::InvalidParameter { .. }));
        assert!(backend.client().transmitted.is_empty());
    }

    #[test]
    fn test_read_subscription_and_decoding() {
        let mut backend = connected_backend();
        backend
            .subscribe_read("simconnect:GEAR HANDLE POSITION", DataType::Int32)
            .unwrap();
        backend
            .subscribe_read("simconnect:INDICATED ALTITUDE", DataType::Float64)
            .unwrap();
        backend
            .subscribe_read("simconnect:GEAR HANDLE POSITION", DataType::Int32)
            .unwrap();

        assert_eq!(backend.client().requests, vec![(0, 0), (1, 1)]);
        assert_eq!(backend.client().definitions[0].1, "GEAR HANDLE POSITION");

        backend.client.dispatch.extend([
            DispatchMessage::SimObjectData {
                request_id: 0,
                data: 1i32.to_le_bytes().to_vec(),
            },
            DispatchMessage::SimObjectData {
                request_id: 1,
                data: 3500.5f64.to_le_bytes().to_vec(),
            },
            DispatchMessage::SimObjectData {
                request_id: 9,
                data: vec![0; 8],
            },
            DispatchMessage::Exception { code: 7 },
        ]);

        let updates = backend.poll();
        assert_eq!(
            updates,
            vec![
                ReadUpdate::new("simconnect:GEAR HANDLE POSITION", "1"),
                ReadUpdate::new("simconnect:INDICATED ALTITUDE", "3500.500000"),
            ]
        );
    }

    #[test]
    fn test_event_notifications() {
        let mut backend = connected_backend();
        backend.subscribe_notification("PAUSE_TOGGLE").unwrap();
        assert_eq!(backend.client().grouped, vec![(NOTIFICATION_GROUP, 0)]);

        backend.client.dispatch.extend([
            DispatchMessage::Event {
                event_id: 0,
                data: 1,
            },
            DispatchMessage::Event {
                event_id: 42,
                data: 1,
            },
        ]);

        assert_eq!(
            backend.poll(),
            vec![ReadUpdate::new("simconnect:PAUSE_TOGGLE", "1")]
        );
    }

    #[test]
    fn test_quit_disconnects() {
        let mut backend = connected_backend();
        backend.client.dispatch.push_back(DispatchMessage::Quit);
        assert!(backend.poll().is_empty());
        assert!(!backend.is_connected());
        assert!(backend.trigger("AP_MASTER", "1").is_err());
    }

    #[test]
    fn test_close_is_terminal() {
        let mut backend = connected_backend();
        backend.close();
        assert!(backend.client().closed);
        assert!(!backend.is_connected());
        assert!(backend.connect().is_err());
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn integer_parameters_pass_through(value in any::<i32>()) {
                let mut backend = connected_backend();
                backend.trigger("AP_ALT_VAR_SET_ENGLISH", &value.to_string()).unwrap();
                prop_assert_eq!(&backend.client().transmitted, &vec![(0, value)]);
            }

            #[test]
            fn non_numeric_parameters_rejected(parameter in "[a-zA-Z_]{1,12}") {
                let mut backend = connected_backend();
                let rejected = matches!(
                    backend.trigger("GEAR_TOGGLE", &parameter),
                    Err(BackendError::InvalidParameter { .. })
                );
                prop_assert!(rejected);
                prop_assert!(backend.client().transmitted.is_empty());
            }
        }
    }
}
