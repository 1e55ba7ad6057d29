//! In-process simulator for running SimLink without a flight simulator
//!
//! [`VirtualSimulator`] implements [`SimulatorBackend`] by recording every
//! call. A cloned [`VirtualSimHandle`] stays with the test (or the
//! binary's `--dry-run` mode) to inspect those calls and inject value
//! changes that the next `poll()` returns.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use simlink_protocol::{DataType, SimulatorKind};
use tracing::debug;

use crate::backend::{ReadUpdate, SimulatorBackend};
use crate::error::BackendError;

/// Calls kept by the log; older ones are dropped first
pub const MAX_RECORDED_CALLS: usize = 1024;

/// A call received by the virtual simulator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimCall {
    Connect,
    SubscribeWrite(String),
    SubscribeRead(String, DataType),
    SubscribeNotification(String),
    Trigger { sim_event_name: String, parameter: String },
    Close,
}

#[derive(Debug, Default)]
struct VirtualState {
    calls: VecDeque<SimCall>,
    pending: VecDeque<ReadUpdate>,
    connect_failures: u32,
    polls: u64,
    connected: bool,
    closed: bool,
}

impl VirtualState {
    fn record(&mut self, call: SimCall) {
        if self.calls.len() == MAX_RECORDED_CALLS {
            self.calls.pop_front();
        }
        self.calls.push_back(call);
    }
}

/// Shared view into a [`VirtualSimulator`]
#[derive(Debug, Clone, Default)]
pub struct VirtualSimHandle {
    inner: Arc<Mutex<VirtualState>>,
}

impl VirtualSimHandle {
    fn lock(&self) -> MutexGuard<'_, VirtualState> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// The most recent calls, oldest first
    pub fn calls(&self) -> Vec<SimCall> {
        self.lock().calls.iter().cloned().collect()
    }

    /// Triggers so far as `(sim_event_name, parameter)`
    pub fn triggers(&self) -> Vec<(String, String)> {
        self.lock()
            .calls
            .iter()
            .filter_map(|call| match call {
                SimCall::Trigger {
                    sim_event_name,
                    parameter,
                } => Some((sim_event_name.clone(), parameter.clone())),
                _ => None,
            })
            .collect()
    }

    /// Forget recorded calls
    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    /// Queue a value change for the next poll
    pub fn inject(&self, sim_event_name: &str, value: &str) {
        self.lock()
            .pending
            .push_back(ReadUpdate::new(sim_event_name, value));
    }

    /// Make the next `n` connect attempts fail
    pub fn fail_next_connects(&self, n: u32) {
        self.lock().connect_failures = n;
    }

    /// Number of `poll()` calls so far
    pub fn poll_count(&self) -> u64 {
        self.lock().polls
    }

    pub fn is_connected(&self) -> bool {
        self.lock().connected
    }

    /// Drop the connection as if the simulator had quit
    pub fn drop_connection(&self) {
        self.lock().connected = false;
    }
}

/// Backend that records calls instead of talking to a simulator
#[derive(Debug)]
pub struct VirtualSimulator {
    kind: SimulatorKind,
    handle: VirtualSimHandle,
}

impl VirtualSimulator {
    /// Create a virtual simulator that presents itself as `kind`
    pub fn new(kind: SimulatorKind) -> (Self, VirtualSimHandle) {
        let handle = VirtualSimHandle::default();
        let sim = Self {
            kind,
            handle: handle.clone(),
        };
        (sim, handle)
    }

    fn require_connected(&self, state: &VirtualState) -> Result<(), BackendError> {
        if state.connected {
            Ok(())
        } else {
            Err(BackendError::NotConnected(self.kind.name()))
        }
    }
}

impl SimulatorBackend for VirtualSimulator {
    fn kind(&self) -> SimulatorKind {
        self.kind
    }

    fn connect(&mut self) -> Result<(), BackendError> {
        let mut state = self.handle.lock();
        state.record(SimCall::Connect);
        if state.closed {
            return Err(BackendError::NotConnected(self.kind.name()));
        }
        if state.connect_failures > 0 {
            state.connect_failures -= 1;
            return Err(BackendError::Client("virtual simulator not ready".into()));
        }
        state.connected = true;
        debug!("Virtual {} simulator connected", self.kind);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.handle.lock().connected
    }

    fn subscribe_write(&mut self, sim_event_name: &str) -> Result<(), BackendError> {
        let mut state = self.handle.lock();
        self.require_connected(&state)?;
        state.record(SimCall::SubscribeWrite(sim_event_name.to_string()));
        Ok(())
    }

    fn subscribe_read(
        &mut self,
        sim_event_name: &str,
        datatype: DataType,
    ) -> Result<(), BackendError> {
        let mut state = self.handle.lock();
        self.require_connected(&state)?;
        state.record(SimCall::SubscribeRead(sim_event_name.to_string(), datatype));
        Ok(())
    }

    fn subscribe_notification(&mut self, sim_event_name: &str) -> Result<(), BackendError> {
        let mut state = self.handle.lock();
        self.require_connected(&state)?;
        state.record(SimCall::SubscribeNotification(sim_event_name.to_string()));
        Ok(())
    }

    fn trigger(&mut self, sim_event_name: &str, parameter: &str) -> Result<(), BackendError> {
        let mut state = self.handle.lock();
        self.require_connected(&state)?;
        debug!("Virtual trigger {} = {:?}", sim_event_name, parameter);
        state.record(SimCall::Trigger {
            sim_event_name: sim_event_name.to_string(),
            parameter: parameter.to_string(),
        });
        Ok(())
    }

    fn poll(&mut self) -> Vec<ReadUpdate> {
        let mut state = self.handle.lock();
        state.polls += 1;
        if !state.connected {
            return Vec::new();
        }
        let updates = state.pending.drain(..).collect();
        updates
    }

    fn close(&mut self) {
        let mut state = self.handle.lock();
        state.record(SimCall::Close);
        state.connected = false;
        state.closed = true;
    }
}
