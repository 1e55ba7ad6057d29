//! Device manager
//!
//! Owns every device and the single reactor thread that serves them. The
//! reactor is a current-thread tokio runtime running on its own OS thread;
//! devices added before `start()` are spawned when it starts, devices added
//! afterwards are spawned straight onto the running reactor.

use std::thread::JoinHandle;
use std::time::Duration;

use simlink_protocol::DeviceKind;
use tokio::runtime::Handle;
use tokio::sync::{mpsc as tokio_mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::device::{Device, DeviceInfo, InboundLine, RECONNECT_INTERVAL};
use crate::error::CommError;
use crate::tracker::DeviceTracker;

/// Capacity of the channel carrying inbound lines to the router
pub const INBOUND_CHANNEL_CAPACITY: usize = 256;

struct Reactor {
    handle: Handle,
    shutdown_tx: oneshot::Sender<()>,
    thread: JoinHandle<()>,
}

/// Owns the device list and the device reactor thread
pub struct DeviceManager {
    devices: Vec<Device>,
    inbound_tx: tokio_mpsc::Sender<InboundLine>,
    retry_interval: Duration,
    reactor: Option<Reactor>,
    tracker: Option<Box<dyn DeviceTracker>>,
}

impl DeviceManager {
    /// Create a manager and the receiving end of its inbound line channel
    pub fn new() -> (Self, tokio_mpsc::Receiver<InboundLine>) {
        let (inbound_tx, inbound_rx) = tokio_mpsc::channel(INBOUND_CHANNEL_CAPACITY);
        let manager = Self {
            devices: Vec::new(),
            inbound_tx,
            retry_interval: RECONNECT_INTERVAL,
            reactor: None,
            tracker: None,
        };
        (manager, inbound_rx)
    }

    /// Override the delay between connection attempts
    pub fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }

    /// Report later device additions and removals to `tracker`
    pub fn set_change_tracker(&mut self, tracker: Box<dyn DeviceTracker>) {
        self.tracker = Some(tracker);
    }

    /// Whether the reactor thread is running
    pub fn is_running(&self) -> bool {
        self.reactor.is_some()
    }

    /// Add a device
    ///
    /// If the reactor is running the device starts connecting immediately,
    /// otherwise it waits for [`DeviceManager::start`].
    pub fn add_device(
        &mut self,
        kind: DeviceKind,
        address: &str,
        name: &str,
    ) -> Result<(), CommError> {
        let mut device = Device::new(kind, address, name)?;
        info!("Added {} device {} ({})", kind, name, address);

        if let Some(reactor) = &self.reactor {
            device.spawn(&reactor.handle, self.inbound_tx.clone(), self.retry_interval);
        }
        self.devices.push(device);

        if let Some(tracker) = self.tracker.as_deref_mut() {
            tracker.device_added(kind, address, name);
        }
        Ok(())
    }

    /// Close and remove every device with this address
    ///
    /// Returns how many devices were removed.
    pub fn remove_device(&mut self, address: &str) -> usize {
        let before = self.devices.len();
        self.devices.retain_mut(|device| {
            if device.address() == address {
                device.close();
                false
            } else {
                true
            }
        });

        let removed = before - self.devices.len();
        if removed == 0 {
            debug!("No device with address {} to remove", address);
        } else {
            info!("Removed {} device(s) at {}", removed, address);
            if let Some(tracker) = self.tracker.as_deref_mut() {
                tracker.device_removed(address);
            }
        }
        removed
    }

    /// Snapshot of every device
    pub fn devices(&self) -> Vec<DeviceInfo> {
        self.devices.iter().map(Device::info).collect()
    }

    /// Write one line to the device at `address`
    ///
    /// Returns the bytes queued, or `None` if no device has that address.
    pub fn write_to(&self, address: &str, line: &str) -> Option<usize> {
        self.devices
            .iter()
            .find(|d| d.address() == address)
            .map(|d| d.write_data(line))
    }

    /// Write one line to every device
    ///
    /// Devices that are not connected drop the line; the rest still get it.
    /// Returns how many devices accepted the line.
    pub fn send_all(&self, line: &str) -> usize {
        self.devices
            .iter()
            .filter(|device| device.write_data(line) > 0)
            .count()
    }

    /// Start the reactor thread and every registered device
    pub fn start(&mut self) -> Result<(), CommError> {
        if self.reactor.is_some() {
            debug!("Device manager already running");
            return Ok(());
        }

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        let handle = runtime.handle().clone();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        for device in &mut self.devices {
            device.spawn(&handle, self.inbound_tx.clone(), self.retry_interval);
        }

        let thread = std::thread::Builder::new()
            .name("simlink-devices".into())
            .spawn(move || {
                runtime.block_on(async {
                    let _ = shutdown_rx.await;
                });
                debug!("Device reactor stopped");
            })?;

        info!("Device manager started with {} device(s)", self.devices.len());
        self.reactor = Some(Reactor {
            handle,
            shutdown_tx,
            thread,
        });
        Ok(())
    }

    /// Close every device, stop the reactor and join its thread
    pub fn stop(&mut self) -> Result<(), CommError> {
        let reactor = self.reactor.take().ok_or(CommError::NotRunning)?;

        for device in &mut self.devices {
            device.close();
        }

        let _ = reactor.shutdown_tx.send(());
        reactor
            .thread
            .join()
            .map_err(|_| CommError::Runtime("device reactor thread panicked".into()))?;

        info!("Device manager stopped");
        Ok(())
    }
}

impl Drop for DeviceManager {
    fn drop(&mut self) {
        if self.reactor.is_some() {
            if let Err(e) = self.stop() {
                warn!("Failed to stop device manager: {}", e);
            }
        }
    }
}
