//! Router engine
//!
//! Owns the registry, the installed simulator backends and the selector for
//! the active one. Device lines come in through [`Router::write_event`],
//! simulator values through [`Router::tick`]; device-bound lines are
//! buffered as [`RouterEvent::Broadcast`] for the caller to send out.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use simlink_protocol::{format_device_line, DataType, SimulatorKind};
use simlink_sim::SimulatorBackend;
use tracing::{debug, info, warn};

use crate::error::{MapperError, MappingKind};
use crate::hook::{trigger_on, ScriptHook, SimDispatch};
use crate::registry::{EventRegistry, ReadMapping, WriteMapping};
use crate::tracker::ChangeTracker;

/// Delay between connection attempts while the backend is unavailable
pub const CONNECT_RETRY_INTERVAL: Duration = Duration::from_secs(1);

/// Router lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouterState {
    Unconnected,
    /// Waiting for the backend to accept a connection
    Connecting,
    Connected,
    /// Terminal
    Closed,
}

/// Events emitted by the router
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouterEvent {
    /// Line to send to every device
    Broadcast(String),
    /// Lifecycle changed
    StateChanged { from: RouterState, to: RouterState },
    /// Active simulator changed
    SimulatorChanged(SimulatorKind),
}

/// Dispatch handle given to the script hook
struct ActiveBackend<'a> {
    kind: SimulatorKind,
    backend: Option<&'a mut Box<dyn SimulatorBackend>>,
}

impl SimDispatch for ActiveBackend<'_> {
    fn sim_write(&mut self, sim_event_name: &str, parameter: &str) -> Result<(), MapperError> {
        let backend = self
            .backend
            .as_deref_mut()
            .ok_or(MapperError::NoBackend(self.kind))?;
        trigger_on(&mut **backend, sim_event_name, parameter)
    }
}

/// The event router
pub struct Router {
    registry: EventRegistry,
    backends: HashMap<SimulatorKind, Box<dyn SimulatorBackend>>,
    active: SimulatorKind,
    state: RouterState,
    hook: Option<Box<dyn ScriptHook>>,
    tracker: Option<Box<dyn ChangeTracker>>,
    save_on_change: bool,
    retry_interval: Duration,
    last_connect_attempt: Option<Instant>,
    event_buffer: Vec<RouterEvent>,
}

impl Router {
    /// Create a router with no backends and an empty registry
    pub fn new(simulator: SimulatorKind) -> Self {
        Self {
            registry: EventRegistry::new(),
            backends: HashMap::new(),
            active: simulator,
            state: RouterState::Unconnected,
            hook: None,
            tracker: None,
            save_on_change: false,
            retry_interval: CONNECT_RETRY_INTERVAL,
            last_connect_attempt: None,
            event_buffer: Vec::new(),
        }
    }

    /// Start building a router
    pub fn builder(simulator: SimulatorKind) -> RouterBuilder {
        RouterBuilder::new(simulator)
    }

    /// Install a backend for the simulator it reports as its kind
    ///
    /// A backend already installed for that kind is closed and replaced.
    pub fn install_backend(&mut self, backend: Box<dyn SimulatorBackend>) {
        let kind = backend.kind();
        if let Some(mut previous) = self.backends.insert(kind, backend) {
            previous.close();
        }
        info!("Installed {} backend", kind);
    }

    pub fn set_script_hook(&mut self, hook: Box<dyn ScriptHook>) {
        self.hook = Some(hook);
    }

    pub fn set_change_tracker(&mut self, tracker: Box<dyn ChangeTracker>) {
        self.tracker = Some(tracker);
    }

    /// Enable or disable change reporting to the tracker
    pub fn set_save_on_change(&mut self, enabled: bool) {
        self.save_on_change = enabled;
    }

    pub fn save_on_change(&self) -> bool {
        self.save_on_change
    }

    /// Override the delay between connection attempts
    pub fn set_retry_interval(&mut self, interval: Duration) {
        self.retry_interval = interval;
    }

    pub fn registry(&self) -> &EventRegistry {
        &self.registry
    }

    pub fn state(&self) -> RouterState {
        self.state
    }

    /// The active simulator
    pub fn simulator(&self) -> SimulatorKind {
        self.active
    }

    /// All write mappings, ordered by device event name
    pub fn write_mappings(&self) -> Vec<WriteMapping> {
        self.registry.write_mappings()
    }

    /// All read mappings, ordered by simulator event name
    pub fn read_mappings(&self) -> Vec<ReadMapping> {
        self.registry.read_mappings()
    }

    /// Drain buffered events
    pub fn drain_events(&mut self) -> Vec<RouterEvent> {
        std::mem::take(&mut self.event_buffer)
    }

    fn set_state(&mut self, next: RouterState) {
        if self.state == next {
            return;
        }
        let from = self.state;
        self.state = next;
        debug!("Router state {:?} -> {:?}", from, next);
        self.event_buffer
            .push(RouterEvent::StateChanged { from, to: next });
    }

    fn tracker(&mut self) -> Option<&mut (dyn ChangeTracker + 'static)> {
        if self.save_on_change {
            self.tracker.as_deref_mut()
        } else {
            None
        }
    }

    fn active_backend(&mut self) -> Result<&mut Box<dyn SimulatorBackend>, MapperError> {
        self.backends
            .get_mut(&self.active)
            .ok_or(MapperError::NoBackend(self.active))
    }

    fn active_is_connected(&self) -> bool {
        self.backends
            .get(&self.active)
            .is_some_and(|backend| backend.is_connected())
    }

    /// Select the active simulator
    ///
    /// Mappings are kept as they are. A router that is connected or
    /// connecting puts the new backend through the connect cycle, which
    /// subscribes every mapping with it once it comes up.
    pub fn set_simulator(&mut self, kind: SimulatorKind) {
        info!("Setting simulator type to {}", kind);
        self.active = kind;
        self.event_buffer.push(RouterEvent::SimulatorChanged(kind));
        if let Some(tracker) = self.tracker() {
            tracker.simulator_changed(kind);
        }

        if matches!(self.state, RouterState::Connected | RouterState::Connecting) {
            self.set_state(RouterState::Connecting);
            if let Err(e) = self.try_connect() {
                debug!("{} not ready after switch: {}", kind, e);
            }
        }
    }

    /// Add a write mapping
    ///
    /// Subscribed with the backend right away when connected.
    pub fn register_write(
        &mut self,
        device_event_name: &str,
        sim_event_name: &str,
        default_parameter: &str,
    ) -> Result<(), MapperError> {
        if let Err(e) = self
            .registry
            .insert_write(device_event_name, sim_event_name, default_parameter)
        {
            warn!("Tried to register already-registered write event: {}", e);
            return Err(e);
        }

        if self.state == RouterState::Connected {
            if let Ok(backend) = self.active_backend() {
                if let Err(e) = backend.subscribe_write(sim_event_name) {
                    warn!("Failed to subscribe write {}: {}", sim_event_name, e);
                }
            }
        }

        if let Some(tracker) = self.tracker() {
            tracker.write_mapping_added(device_event_name, sim_event_name, default_parameter);
        }
        Ok(())
    }

    /// Add a read mapping keyed by simulator event name
    pub fn register_read(
        &mut self,
        device_event_name: &str,
        sim_event_name: &str,
        datatype: DataType,
    ) -> Result<(), MapperError> {
        if let Err(e) = self
            .registry
            .insert_read(device_event_name, sim_event_name, datatype)
        {
            warn!("Tried to register already-registered read event: {}", e);
            return Err(e);
        }

        if self.state == RouterState::Connected {
            if let Ok(backend) = self.active_backend() {
                if let Err(e) = backend.subscribe_read(sim_event_name, datatype) {
                    warn!("Failed to subscribe read {}: {}", sim_event_name, e);
                }
            }
        }

        if let Some(tracker) = self.tracker() {
            tracker.read_mapping_added(device_event_name, sim_event_name, datatype);
        }
        Ok(())
    }

    /// Remove a write mapping; the backend subscription stays
    pub fn deregister_write(&mut self, device_event_name: &str) -> Result<(), MapperError> {
        if let Err(e) = self.registry.remove_write(device_event_name) {
            warn!("Tried to delete nonexistent write event {}", device_event_name);
            return Err(e);
        }
        debug!("Removed write event {}", device_event_name);

        if let Some(tracker) = self.tracker() {
            tracker.write_mapping_removed(device_event_name);
        }
        Ok(())
    }

    /// Remove a read mapping; the backend subscription stays
    pub fn deregister_read(&mut self, sim_event_name: &str) -> Result<(), MapperError> {
        if let Err(e) = self.registry.remove_read(sim_event_name) {
            warn!("Tried to delete nonexistent read event {}", sim_event_name);
            return Err(e);
        }
        debug!("Removed read event {}", sim_event_name);

        if let Some(tracker) = self.tracker() {
            tracker.read_mapping_removed(sim_event_name);
        }
        Ok(())
    }

    /// Translate a device event and dispatch it to the active simulator
    ///
    /// Each target receives `explicit_value`, or its default parameter when
    /// `explicit_value` is empty. The script hook may take over any target.
    /// Returns how many targets were dispatched.
    pub fn write_event(
        &mut self,
        device_event_name: &str,
        explicit_value: &str,
    ) -> Result<usize, MapperError> {
        let Some(targets) = self.registry.write_targets(device_event_name) else {
            warn!("Tried to write nonexistent event ({})", device_event_name);
            return Err(MapperError::UnknownEvent {
                kind: MappingKind::Write,
                name: device_event_name.to_string(),
            });
        };
        let targets = targets.to_vec();

        let mut dispatched = 0;
        for target in &targets {
            let value = if explicit_value.is_empty() {
                target.default_parameter.as_str()
            } else {
                explicit_value
            };
            debug!(
                "Writing event {} --> {}:{}",
                device_event_name, target.sim_event_name, value
            );

            if let Some(hook) = self.hook.as_mut() {
                let mut dispatch = ActiveBackend {
                    kind: self.active,
                    backend: self.backends.get_mut(&self.active),
                };
                if hook.handle_write(&mut dispatch, device_event_name, value) {
                    debug!("Script hook handled {}", device_event_name);
                    continue;
                }
            }

            match self.sim_write(&target.sim_event_name, value) {
                Ok(()) => dispatched += 1,
                Err(e) => warn!(
                    "Failed to write {} for {}: {}",
                    target.sim_event_name, device_event_name, e
                ),
            }
        }
        Ok(dispatched)
    }

    /// Trigger a simulator event directly, bypassing the registry
    ///
    /// An empty parameter becomes `"0"` on simulators that need a number.
    pub fn sim_write(&mut self, sim_event_name: &str, parameter: &str) -> Result<(), MapperError> {
        let backend = self.active_backend()?;
        trigger_on(&mut **backend, sim_event_name, parameter)
    }

    /// Have the active simulator report every firing of an event
    ///
    /// Notifications arrive through [`Router::tick`] like any other read, so
    /// they need a read mapping to reach the devices.
    pub fn subscribe_notification(&mut self, sim_event_name: &str) -> Result<(), MapperError> {
        let backend = self.active_backend()?;
        backend.subscribe_notification(sim_event_name)?;
        debug!("Subscribed to notifications for {}", sim_event_name);
        Ok(())
    }

    /// Route a simulator value to the devices
    ///
    /// Buffers a [`RouterEvent::Broadcast`] with `<device_event>:<value>`
    /// and returns the same line.
    pub fn handle_read_event(
        &mut self,
        sim_event_name: &str,
        value: &str,
    ) -> Result<String, MapperError> {
        let Some(mapping) = self.registry.read_mapping(sim_event_name) else {
            warn!("Tried to read nonexistent event ({})", sim_event_name);
            return Err(MapperError::UnknownEvent {
                kind: MappingKind::Read,
                name: sim_event_name.to_string(),
            });
        };

        let line = format_device_line(&mapping.device_event_name, value);
        debug!("Read event {} -> {}", sim_event_name, line);
        self.event_buffer.push(RouterEvent::Broadcast(line.clone()));
        Ok(line)
    }

    /// Subscribe every mapping with the active backend
    ///
    /// Returns how many subscriptions succeeded.
    pub fn register_all_events(&mut self) -> Result<usize, MapperError> {
        let writes = self.registry.write_mappings();
        let reads = self.registry.read_mappings();
        let backend = self.active_backend()?;

        debug!("Registering all events");
        let mut subscribed = 0;
        for target in writes.iter().flat_map(|m| m.targets.iter()) {
            match backend.subscribe_write(&target.sim_event_name) {
                Ok(()) => subscribed += 1,
                Err(e) => warn!("Failed to subscribe write {}: {}", target.sim_event_name, e),
            }
        }
        for mapping in &reads {
            match backend.subscribe_read(&mapping.sim_event_name, mapping.datatype) {
                Ok(()) => subscribed += 1,
                Err(e) => warn!("Failed to subscribe read {}: {}", mapping.sim_event_name, e),
            }
        }
        info!(
            "Registered {} of {} events with {}",
            subscribed,
            writes.iter().map(|m| m.targets.len()).sum::<usize>() + reads.len(),
            backend.kind()
        );
        Ok(subscribed)
    }

    /// Start connecting the active backend
    ///
    /// Succeeds immediately if the backend accepts; otherwise the router
    /// stays `Connecting` and [`Router::tick`] retries once per interval.
    pub fn connect(&mut self) -> Result<(), MapperError> {
        match self.state {
            RouterState::Closed => {
                return Err(MapperError::InvalidState {
                    action: "connect",
                    state: self.state,
                })
            }
            RouterState::Connected if self.active_is_connected() => return Ok(()),
            RouterState::Unconnected | RouterState::Connecting | RouterState::Connected => {}
        }

        if !self.backends.contains_key(&self.active) {
            return Err(MapperError::NoBackend(self.active));
        }
        info!("Connecting to {}", self.active);
        self.set_state(RouterState::Connecting);
        self.try_connect()
    }

    fn try_connect(&mut self) -> Result<(), MapperError> {
        self.last_connect_attempt = Some(Instant::now());
        let backend = self.active_backend()?;
        match backend.connect() {
            Ok(()) => {
                info!("Connected to {}", self.active);
                self.set_state(RouterState::Connected);
                self.register_all_events()?;
                Ok(())
            }
            Err(e) => {
                debug!("Connecting to {} failed: {}", self.active, e);
                Err(e.into())
            }
        }
    }

    /// One pass of the router loop
    ///
    /// While connecting, retries the connection once per interval. While
    /// connected, polls the active backend once and routes every update;
    /// a backend that dropped its connection sends the router back to
    /// connecting. Returns how many updates were routed to devices.
    pub fn tick(&mut self) -> usize {
        match self.state {
            RouterState::Connecting => {
                let due = self
                    .last_connect_attempt
                    .map_or(true, |at| at.elapsed() >= self.retry_interval);
                if due {
                    let _ = self.try_connect();
                }
                0
            }
            RouterState::Connected => {
                let updates = match self.active_backend() {
                    Ok(backend) => backend.poll(),
                    Err(_) => return 0,
                };
                let routed = updates
                    .iter()
                    .filter(|u| self.handle_read_event(&u.sim_event_name, &u.value).is_ok())
                    .count();
                if !self.active_is_connected() {
                    warn!("Lost connection to {}, reconnecting", self.active);
                    self.last_connect_attempt = None;
                    self.set_state(RouterState::Connecting);
                }
                routed
            }
            RouterState::Unconnected | RouterState::Closed => 0,
        }
    }

    /// Close every backend; the router cannot be reconnected
    pub fn close(&mut self) {
        if self.state == RouterState::Closed {
            return;
        }
        for backend in self.backends.values_mut() {
            backend.close();
        }
        self.set_state(RouterState::Closed);
        info!("Router closed");
    }
}

/// Builder that loads backends and mappings before traffic starts
pub struct RouterBuilder {
    simulator: SimulatorKind,
    backends: Vec<Box<dyn SimulatorBackend>>,
    writes: Vec<(String, String, String)>,
    reads: Vec<(String, String, DataType)>,
    hook: Option<Box<dyn ScriptHook>>,
    tracker: Option<Box<dyn ChangeTracker>>,
    save_on_change: bool,
    retry_interval: Duration,
}

impl RouterBuilder {
    pub fn new(simulator: SimulatorKind) -> Self {
        Self {
            simulator,
            backends: Vec::new(),
            writes: Vec::new(),
            reads: Vec::new(),
            hook: None,
            tracker: None,
            save_on_change: false,
            retry_interval: CONNECT_RETRY_INTERVAL,
        }
    }

    pub fn backend(mut self, backend: Box<dyn SimulatorBackend>) -> Self {
        self.backends.push(backend);
        self
    }

    pub fn write_mapping(
        mut self,
        device_event_name: &str,
        sim_event_name: &str,
        default_parameter: &str,
    ) -> Self {
        self.writes.push((
            device_event_name.to_string(),
            sim_event_name.to_string(),
            default_parameter.to_string(),
        ));
        self
    }

    pub fn read_mapping(
        mut self,
        device_event_name: &str,
        sim_event_name: &str,
        datatype: DataType,
    ) -> Self {
        self.reads.push((
            device_event_name.to_string(),
            sim_event_name.to_string(),
            datatype,
        ));
        self
    }

    pub fn script_hook(mut self, hook: Box<dyn ScriptHook>) -> Self {
        self.hook = Some(hook);
        self
    }

    /// Tracker receiving changes made after the router is built
    pub fn change_tracker(mut self, tracker: Box<dyn ChangeTracker>) -> Self {
        self.tracker = Some(tracker);
        self
    }

    pub fn save_on_change(mut self, enabled: bool) -> Self {
        self.save_on_change = enabled;
        self
    }

    pub fn retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }

    /// Build the router
    ///
    /// Mappings are loaded before the tracker is attached, so loading does
    /// not report them as changes. Duplicates are logged and skipped.
    pub fn build(self) -> Router {
        let mut router = Router::new(self.simulator);
        router.set_retry_interval(self.retry_interval);
        for backend in self.backends {
            router.install_backend(backend);
        }
        for (device, sim, parameter) in &self.writes {
            let _ = router.register_write(device, sim, parameter);
        }
        for (device, sim, datatype) in &self.reads {
            let _ = router.register_read(device, sim, *datatype);
        }
        if let Some(hook) = self.hook {
            router.set_script_hook(hook);
        }
        if let Some(tracker) = self.tracker {
            router.set_change_tracker(tracker);
        }
        router.set_save_on_change(self.save_on_change);
        info!(
            "Router ready: {} write and {} read mappings for {}",
            router.registry.write_len(),
            router.registry.read_len(),
            router.active
        );
        router
    }
}
