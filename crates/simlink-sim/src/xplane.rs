//! X-Plane backend
//!
//! Talks the line protocol of the X-Plane plugin over TCP. The socket lives
//! on a dedicated thread running a current-thread tokio runtime; the router
//! side only touches channels:
//!
//! - subscriptions go out immediately on an unbounded control channel,
//! - triggers go through a bounded FIFO queue and are released to the
//!   socket at most one per `poll()`,
//! - inbound `<prefix>:<ref>:<value>` lines come back as [`ReadUpdate`]s
//!   that `poll()` drains.
//!
//! The link connects in the background, retrying once per interval, so
//! `connect()` returns right away and anything sent meanwhile waits in the
//! channels.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use simlink_protocol::{strip_namespace, DataType, SimulatorKind, XPlaneMessage, XPlaneUpdate};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc as tokio_mpsc, oneshot, Notify};
use tracing::{debug, info, warn};

use crate::backend::{ReadUpdate, SimulatorBackend};
use crate::error::BackendError;

/// Namespace prefix X-Plane references may carry in mappings
pub const XPLANE_PREFIX: &str = "xplane";

/// Default plugin host
pub const DEFAULT_XPLANE_HOST: &str = "127.0.0.1";

/// Default plugin port
pub const DEFAULT_XPLANE_PORT: u16 = 5465;

/// Default capacity of the trigger queue
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// X-Plane link configuration
#[derive(Debug, Clone)]
pub struct XPlaneConfig {
    pub host: String,
    pub port: u16,
    /// Triggers waiting for the socket beyond this are dropped
    pub queue_capacity: usize,
    /// Delay between connection attempts
    pub retry_interval: Duration,
}

impl Default for XPlaneConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_XPLANE_HOST.to_string(),
            port: DEFAULT_XPLANE_PORT,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            retry_interval: Duration::from_secs(1),
        }
    }
}

/// Router-side ends of a running link
struct XPlaneLink {
    control_tx: tokio_mpsc::UnboundedSender<String>,
    write_tx: tokio_mpsc::Sender<String>,
    pulse: Arc<Notify>,
    updates_rx: tokio_mpsc::UnboundedReceiver<ReadUpdate>,
    socket_open: Arc<AtomicBool>,
    shutdown_tx: oneshot::Sender<()>,
    thread: JoinHandle<()>,
}

/// Backend for X-Plane through the remote plugin
pub struct XPlaneBackend {
    config: XPlaneConfig,
    link: Option<XPlaneLink>,
    closed: bool,
    dropped: u64,
}

impl XPlaneBackend {
    pub fn new(config: XPlaneConfig) -> Self {
        Self {
            config,
            link: None,
            closed: false,
            dropped: 0,
        }
    }

    pub fn config(&self) -> &XPlaneConfig {
        &self.config
    }

    /// Triggers dropped because the queue was full
    pub fn dropped_commands(&self) -> u64 {
        self.dropped
    }

    /// Whether the TCP connection to the plugin is currently open
    pub fn is_socket_open(&self) -> bool {
        self.link
            .as_ref()
            .is_some_and(|link| link.socket_open.load(Ordering::SeqCst))
    }

    fn link(&self) -> Result<&XPlaneLink, BackendError> {
        self.link
            .as_ref()
            .ok_or(BackendError::NotConnected(SimulatorKind::XPlane.name()))
    }
}

impl Default for XPlaneBackend {
    fn default() -> Self {
        Self::new(XPlaneConfig::default())
    }
}

impl SimulatorBackend for XPlaneBackend {
    fn kind(&self) -> SimulatorKind {
        SimulatorKind::XPlane
    }

    fn connect(&mut self) -> Result<(), BackendError> {
        if self.closed {
            return Err(BackendError::NotConnected(SimulatorKind::XPlane.name()));
        }
        if self.link.is_some() {
            return Ok(());
        }

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;

        let (control_tx, control_rx) = tokio_mpsc::unbounded_channel();
        let (write_tx, write_rx) = tokio_mpsc::channel(self.config.queue_capacity.max(1));
        let (updates_tx, updates_rx) = tokio_mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let pulse = Arc::new(Notify::new());
        let socket_open = Arc::new(AtomicBool::new(false));

        let reactor = LinkReactor {
            config: self.config.clone(),
            control_rx,
            write_rx,
            pulse: Arc::clone(&pulse),
            updates_tx,
            socket_open: Arc::clone(&socket_open),
        };

        let thread = std::thread::Builder::new()
            .name("simlink-xplane".into())
            .spawn(move || {
                runtime.block_on(reactor.run(shutdown_rx));
                debug!("X-Plane reactor stopped");
            })?;

        info!(
            "X-Plane link started for {}:{}",
            self.config.host, self.config.port
        );
        self.link = Some(XPlaneLink {
            control_tx,
            write_tx,
            pulse,
            updates_rx,
            socket_open,
            shutdown_tx,
            thread,
        });
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.link.is_some()
    }

    fn subscribe_write(&mut self, sim_event_name: &str) -> Result<(), BackendError> {
        // Datarefs and commands need no registration with the plugin
        self.link()?;
        debug!("X-Plane write target {}", sim_event_name);
        Ok(())
    }

    fn subscribe_read(
        &mut self,
        sim_event_name: &str,
        _datatype: DataType,
    ) -> Result<(), BackendError> {
        let link = self.link()?;
        let message = XPlaneMessage::Read {
            reference: strip_namespace(sim_event_name, XPLANE_PREFIX).to_string(),
        };
        info!("Registering X-Plane read: {}", sim_event_name);
        link.control_tx
            .send(message.encode())
            .map_err(|_| BackendError::NotConnected(SimulatorKind::XPlane.name()))
    }

    fn trigger(&mut self, sim_event_name: &str, parameter: &str) -> Result<(), BackendError> {
        let message = XPlaneMessage::Write {
            reference: strip_namespace(sim_event_name, XPLANE_PREFIX).to_string(),
            value: parameter.to_string(),
        };
        let encoded = message.encode();

        let result = self.link()?.write_tx.try_send(encoded);
        match result {
            Ok(()) => {
                debug!("Queued X-Plane write {}:{}", sim_event_name, parameter);
                Ok(())
            }
            Err(TrySendError::Full(_)) => {
                self.dropped += 1;
                warn!(
                    "X-Plane queue full, dropped write to {} ({} dropped so far)",
                    sim_event_name, self.dropped
                );
                Err(BackendError::QueueFull(sim_event_name.to_string()))
            }
            Err(TrySendError::Closed(_)) => {
                Err(BackendError::NotConnected(SimulatorKind::XPlane.name()))
            }
        }
    }

    fn poll(&mut self) -> Vec<ReadUpdate> {
        let mut updates = Vec::new();
        let Some(link) = self.link.as_mut() else {
            return updates;
        };

        // Release at most one queued trigger
        link.pulse.notify_one();

        while let Ok(update) = link.updates_rx.try_recv() {
            updates.push(update);
        }
        updates
    }

    fn close(&mut self) {
        self.closed = true;
        let Some(link) = self.link.take() else {
            return;
        };

        info!("Closing X-Plane link");
        let _ = link.shutdown_tx.send(());
        if link.thread.join().is_err() {
            warn!("X-Plane reactor thread panicked");
        }
        info!("X-Plane link closed");
    }
}

impl Drop for XPlaneBackend {
    fn drop(&mut self) {
        self.close();
    }
}

/// Reactor-side ends of the link
struct LinkReactor {
    config: XPlaneConfig,
    control_rx: tokio_mpsc::UnboundedReceiver<String>,
    write_rx: tokio_mpsc::Receiver<String>,
    pulse: Arc<Notify>,
    updates_tx: tokio_mpsc::UnboundedSender<ReadUpdate>,
    socket_open: Arc<AtomicBool>,
}

impl LinkReactor {
    async fn run(self, mut shutdown_rx: oneshot::Receiver<()>) {
        let LinkReactor {
            config,
            control_rx,
            write_rx,
            pulse,
            updates_tx,
            socket_open,
        } = self;

        let label = format!("{}:{}", config.host, config.port);
        info!("Connecting to X-Plane at {}", label);

        let stream = tokio::select! {
            stream = connect_with_retry(&config) => stream,
            _ = &mut shutdown_rx => {
                debug!("X-Plane link closed while connecting");
                return;
            }
        };

        if let Err(e) = stream.set_nodelay(true) {
            debug!("Could not set TCP_NODELAY: {}", e);
        }
        socket_open.store(true, Ordering::SeqCst);
        info!("Connected to X-Plane at {}", label);

        let (read_half, write_half) = stream.into_split();
        let writer = tokio::spawn(run_writer(write_half, control_rx, write_rx, pulse));
        let reader = tokio::spawn(run_reader(read_half, updates_tx, Arc::clone(&socket_open)));

        let _ = shutdown_rx.await;
        writer.abort();
        reader.abort();
        socket_open.store(false, Ordering::SeqCst);
    }
}

async fn connect_with_retry(config: &XPlaneConfig) -> TcpStream {
    let mut attempt: u32 = 0;
    loop {
        attempt = attempt.saturating_add(1);
        match TcpStream::connect((config.host.as_str(), config.port)).await {
            Ok(stream) => return stream,
            Err(e) if attempt == 1 => {
                warn!(
                    "Got error when trying to connect to X-Plane at {}:{}: {}",
                    config.host, config.port, e
                );
            }
            Err(e) => debug!("X-Plane connect attempt {} failed: {}", attempt, e),
        }
        tokio::time::sleep(config.retry_interval).await;
    }
}

async fn send_line(writer: &mut OwnedWriteHalf, message: &str) {
    let result = async {
        writer.write_all(message.as_bytes()).await?;
        writer.flush().await
    }
    .await;
    match result {
        Ok(()) => debug!("Sent to X-Plane: {}", message.trim_end()),
        Err(e) => warn!("Error sending message to X-Plane: {}", e),
    }
}

/// Write subscriptions as they come and triggers one per pulse
async fn run_writer(
    mut writer: OwnedWriteHalf,
    mut control_rx: tokio_mpsc::UnboundedReceiver<String>,
    mut write_rx: tokio_mpsc::Receiver<String>,
    pulse: Arc<Notify>,
) {
    loop {
        tokio::select! {
            biased;

            Some(message) = control_rx.recv() => send_line(&mut writer, &message).await,

            Some(message) = write_rx.recv() => {
                pulse.notified().await;
                send_line(&mut writer, &message).await;
            }

            else => break,
        }
    }
}

/// Parse inbound lines into updates until the socket closes
async fn run_reader(
    reader: OwnedReadHalf,
    updates_tx: tokio_mpsc::UnboundedSender<ReadUpdate>,
    socket_open: Arc<AtomicBool>,
) {
    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                debug!("Got message from X-Plane socket: {}", line);
                match XPlaneUpdate::parse(&line) {
                    Ok(update) => {
                        let update = ReadUpdate::new(update.sim_event_name(), update.value);
                        if updates_tx.send(update).is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!("Discarding X-Plane line: {}", e),
                }
            }
            Ok(None) => {
                info!("X-Plane closed the connection");
                break;
            }
            Err(e) => {
                warn!("X-Plane read error: {}", e);
                break;
            }
        }
    }
    socket_open.store(false, Ordering::SeqCst);
}
