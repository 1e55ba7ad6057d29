//! Device transports
//!
//! Every device runs as one task on the device reactor. The task first opens
//! its transport, retrying once per interval until it succeeds, then runs a
//! read loop that splits the byte stream into lines and forwards them to the
//! shared inbound channel. Outbound lines reach the task through a channel so
//! callers never touch the transport directly.
//!
//! The I/O loop is generic over the stream type. Serial ports and TCP
//! sockets use the same code path, and tests drive it with
//! `tokio::io::duplex()`.

use std::future::Future;
use std::io::ErrorKind;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use simlink_protocol::{frame_line, DeviceKind, LineCodec};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::runtime::Handle;
use tokio::sync::mpsc as tokio_mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_serial::{SerialPortBuilderExt, SerialStream};
use tracing::{debug, info, warn};

use crate::error::CommError;

/// Baud rate used for every serial device
pub const SERIAL_BAUD_RATE: u32 = 115_200;

/// Port used for network devices whose address has no explicit port
pub const DEFAULT_DEVICE_PORT: u16 = 5465;

/// Delay between failed connection attempts
pub const RECONNECT_INTERVAL: Duration = Duration::from_secs(1);

/// Lines waiting for a device's transport beyond this are dropped
pub const OUTBOUND_QUEUE_CAPACITY: usize = 64;

/// Connection lifecycle of a device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Not connected, either never started or the transport ended
    Disconnected,
    /// Opening the transport, retrying on failure
    Connecting,
    /// Transport open and read loop running
    Connected,
    /// Closed on request; never reopened
    Closed,
}

/// A complete line received from a device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundLine {
    /// Address of the device the line came from
    pub address: String,
    /// Line content without the trailing delimiter
    pub line: String,
}

/// Snapshot of a device for display and persistence
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub name: String,
    pub address: String,
    pub kind: DeviceKind,
    pub state: ConnectionState,
}

/// Commands that can be sent to a device task
#[derive(Debug)]
pub enum DeviceTaskCommand {
    /// Close the transport and end the task
    Shutdown,
}

/// Split a network address into host and port
///
/// `host` uses [`DEFAULT_DEVICE_PORT`]; `host:port` must carry a valid port.
/// IPv6 addresses are written bare (`::1`) or in brackets, with an optional
/// port (`[::1]:7000`).
pub fn parse_network_address(address: &str) -> Result<(String, u16), CommError> {
    let invalid = || CommError::InvalidAddress {
        kind: DeviceKind::Network.name(),
        address: address.to_string(),
    };

    if let Ok(socket) = address.parse::<SocketAddr>() {
        return Ok((socket.ip().to_string(), socket.port()));
    }
    let bare = address
        .strip_prefix('[')
        .and_then(|rest| rest.strip_suffix(']'))
        .unwrap_or(address);
    if let Ok(ip) = bare.parse::<IpAddr>() {
        return Ok((ip.to_string(), DEFAULT_DEVICE_PORT));
    }

    let (host, port) = match address.rsplit_once(':') {
        Some((host, port)) => (host, port.parse::<u16>().map_err(|_| invalid())?),
        None => (address, DEFAULT_DEVICE_PORT),
    };

    if host.trim().is_empty() || host.contains([':', '[', ']']) {
        return Err(invalid());
    }
    Ok((host.to_string(), port))
}

/// Open a transport, retrying forever until it succeeds
///
/// Each failure is logged and followed by a sleep of `interval`.
pub async fn connect_with_retry<T, F, Fut>(label: &str, interval: Duration, mut open: F) -> T
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, CommError>>,
{
    let mut attempt: u32 = 0;
    loop {
        attempt = attempt.saturating_add(1);
        match open().await {
            Ok(io) => {
                info!("Connected to {} (attempt {})", label, attempt);
                return io;
            }
            Err(e) if attempt == 1 => {
                warn!("Failed to connect to {}: {}; retrying every {:?}", label, e, interval);
            }
            Err(e) => {
                debug!("Connect attempt {} to {} failed: {}", attempt, label, e);
            }
        }
        tokio::time::sleep(interval).await;
    }
}

async fn open_serial(address: &str) -> Result<SerialStream, CommError> {
    let stream = tokio_serial::new(address, SERIAL_BAUD_RATE).open_native_async()?;
    Ok(stream)
}

async fn open_network(host: &str, port: u16) -> Result<TcpStream, CommError> {
    let stream = TcpStream::connect((host, port)).await?;
    stream.set_nodelay(true)?;
    Ok(stream)
}

/// A hardware device reached over serial or TCP
///
/// Owned by the device manager. The connection itself lives in a task on the
/// reactor; this handle only holds the channels and shared state.
pub struct Device {
    name: String,
    address: String,
    kind: DeviceKind,
    state: Arc<Mutex<ConnectionState>>,
    outbound_tx: tokio_mpsc::Sender<Vec<u8>>,
    outbound_rx: Option<tokio_mpsc::Receiver<Vec<u8>>>,
    cmd_tx: Option<tokio_mpsc::Sender<DeviceTaskCommand>>,
    dropped: AtomicU64,
}

impl Device {
    /// Create a device handle; nothing is opened until it is spawned
    pub fn new(kind: DeviceKind, address: &str, name: &str) -> Result<Self, CommError> {
        Self::with_queue_capacity(kind, address, name, OUTBOUND_QUEUE_CAPACITY)
    }

    /// Like [`Device::new`] with room for `capacity` unsent lines
    pub fn with_queue_capacity(
        kind: DeviceKind,
        address: &str,
        name: &str,
        capacity: usize,
    ) -> Result<Self, CommError> {
        match kind {
            DeviceKind::Serial if address.trim().is_empty() => {
                return Err(CommError::InvalidAddress {
                    kind: kind.name(),
                    address: address.to_string(),
                });
            }
            DeviceKind::Network => {
                parse_network_address(address)?;
            }
            DeviceKind::Serial => {}
        }

        let (outbound_tx, outbound_rx) = tokio_mpsc::channel(capacity.max(1));
        Ok(Self {
            name: name.to_string(),
            address: address.to_string(),
            kind,
            state: Arc::new(Mutex::new(ConnectionState::Disconnected)),
            outbound_tx,
            outbound_rx: Some(outbound_rx),
            cmd_tx: None,
            dropped: AtomicU64::new(0),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn kind(&self) -> DeviceKind {
        self.kind
    }

    /// Current connection state
    pub fn state(&self) -> ConnectionState {
        read_state(&self.state)
    }

    /// Snapshot of this device
    pub fn info(&self) -> DeviceInfo {
        DeviceInfo {
            name: self.name.clone(),
            address: self.address.clone(),
            kind: self.kind,
            state: self.state(),
        }
    }

    /// Lines dropped because the outbound queue was full
    pub fn dropped_lines(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Frame and queue one line for the transport
    ///
    /// Returns the number of bytes handed to the writer, or 0 when the line
    /// was dropped because the device is not connected or its queue is full.
    pub fn write_data(&self, line: &str) -> usize {
        let state = self.state();
        if state != ConnectionState::Connected {
            debug!(
                "Dropping write to {} ({}): device is {:?}",
                self.name, self.address, state
            );
            return 0;
        }

        let framed = frame_line(line);
        let len = framed.len();
        match self.outbound_tx.try_send(framed) {
            Ok(()) => {
                debug!("Queued {} bytes for {}: {}", len, self.address, line);
                len
            }
            Err(TrySendError::Full(_)) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(
                    "Write queue for {} full, dropped {} ({} dropped so far)",
                    self.address, line, dropped
                );
                0
            }
            Err(TrySendError::Closed(_)) => {
                warn!("Dropping write to {}: device task has ended", self.address);
                0
            }
        }
    }

    /// Spawn the connection task on a reactor
    ///
    /// A device is spawned at most once; later calls are ignored.
    pub(crate) fn spawn(
        &mut self,
        handle: &Handle,
        inbound_tx: tokio_mpsc::Sender<InboundLine>,
        retry_interval: Duration,
    ) {
        let Some(outbound_rx) = self.outbound_rx.take() else {
            debug!("Device {} already started", self.address);
            return;
        };
        if read_state(&self.state) == ConnectionState::Closed {
            return;
        }

        let (cmd_tx, cmd_rx) = tokio_mpsc::channel(4);
        self.cmd_tx = Some(cmd_tx);

        let link = DeviceLink {
            label: format!("{} ({})", self.name, self.address),
            address: self.address.clone(),
            state: Arc::clone(&self.state),
            inbound_tx,
            outbound_rx,
            cmd_rx,
            retry_interval,
        };

        match self.kind {
            DeviceKind::Serial => {
                let address = self.address.clone();
                handle.spawn(async move {
                    link.run(move || {
                        let address = address.clone();
                        async move { open_serial(&address).await }
                    })
                    .await;
                });
            }
            DeviceKind::Network => {
                let (host, port) = match parse_network_address(&self.address) {
                    Ok(parts) => parts,
                    Err(e) => {
                        warn!("Not starting {}: {}", self.address, e);
                        return;
                    }
                };
                handle.spawn(async move {
                    link.run(move || {
                        let host = host.clone();
                        async move { open_network(&host, port).await }
                    })
                    .await;
                });
            }
        }
    }

    /// Close the transport; the device will not reconnect
    pub fn close(&mut self) {
        if let Some(cmd_tx) = self.cmd_tx.take() {
            let _ = cmd_tx.try_send(DeviceTaskCommand::Shutdown);
        }
        set_state(&self.state, ConnectionState::Closed);
        info!("Closed device {} ({})", self.name, self.address);
    }
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("name", &self.name)
            .field("address", &self.address)
            .field("kind", &self.kind)
            .field("state", &self.state())
            .finish()
    }
}

fn read_state(state: &Mutex<ConnectionState>) -> ConnectionState {
    *state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn set_state(state: &Mutex<ConnectionState>, next: ConnectionState) {
    *state.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = next;
}

/// How the I/O loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LinkEnd {
    Shutdown,
    Disconnected,
}

/// Everything a device task owns
struct DeviceLink {
    label: String,
    address: String,
    state: Arc<Mutex<ConnectionState>>,
    inbound_tx: tokio_mpsc::Sender<InboundLine>,
    outbound_rx: tokio_mpsc::Receiver<Vec<u8>>,
    cmd_rx: tokio_mpsc::Receiver<DeviceTaskCommand>,
    retry_interval: Duration,
}

impl DeviceLink {
    /// Connect, then run the I/O loop until shutdown or transport failure
    async fn run<T, F, Fut>(mut self, open: F)
    where
        T: AsyncRead + AsyncWrite + Send,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, CommError>>,
    {
        set_state(&self.state, ConnectionState::Connecting);

        let io = tokio::select! {
            io = connect_with_retry(&self.label, self.retry_interval, open) => io,
            _ = self.cmd_rx.recv() => {
                info!("Shutdown requested for {} while connecting", self.label);
                set_state(&self.state, ConnectionState::Closed);
                return;
            }
        };

        set_state(&self.state, ConnectionState::Connected);
        let end = self.run_io(io).await;

        let next = match end {
            LinkEnd::Shutdown => ConnectionState::Closed,
            LinkEnd::Disconnected => ConnectionState::Disconnected,
        };
        // Never downgrade a close requested from outside
        let mut state = self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if *state != ConnectionState::Closed {
            *state = next;
        }
        drop(state);
        info!("Read loop ended for {}", self.label);
    }

    async fn run_io<T>(&mut self, io: T) -> LinkEnd
    where
        T: AsyncRead + AsyncWrite,
    {
        let (mut reader, mut writer) = tokio::io::split(io);

        let mut codec = LineCodec::new();
        let mut buffer = vec![0u8; 1024];

        info!("Starting read loop for {}", self.label);

        loop {
            tokio::select! {
                cmd = self.cmd_rx.recv() => {
                    match cmd {
                        Some(DeviceTaskCommand::Shutdown) | None => {
                            info!("Shutdown requested for {}", self.label);
                            return LinkEnd::Shutdown;
                        }
                    }
                }

                Some(data) = self.outbound_rx.recv() => {
                    let result = async {
                        writer.write_all(&data).await?;
                        writer.flush().await
                    }
                    .await;
                    if let Err(e) = result {
                        warn!("Write error on {}: {}", self.label, e);
                    }
                }

                result = reader.read(&mut buffer) => {
                    match result {
                        Ok(0) => {
                            info!("{} closed the connection", self.label);
                            return LinkEnd::Disconnected;
                        }
                        Ok(n) => {
                            codec.push_bytes(&buffer[..n]);
                            while let Some(line) = codec.next_line() {
                                debug!("Received from {}: {}", self.label, line);
                                let inbound = InboundLine {
                                    address: self.address.clone(),
                                    line,
                                };
                                if self.inbound_tx.send(inbound).await.is_err() {
                                    debug!("Inbound channel closed, stopping {}", self.label);
                                    return LinkEnd::Shutdown;
                                }
                            }
                        }
                        Err(e) if matches!(
                            e.kind(),
                            ErrorKind::WouldBlock | ErrorKind::Interrupted | ErrorKind::TimedOut
                        ) => continue,
                        Err(e) => {
                            warn!("Read error on {}: {}", self.label, e);
                            return LinkEnd::Disconnected;
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    fn test_link(
        address: &str,
    ) -> (
        DeviceLink,
        tokio_mpsc::Receiver<InboundLine>,
        tokio_mpsc::Sender<Vec<u8>>,
        tokio_mpsc::Sender<DeviceTaskCommand>,
        Arc<Mutex<ConnectionState>>,
    ) {
        let (inbound_tx, inbound_rx) = tokio_mpsc::channel(16);
        let (outbound_tx, outbound_rx) = tokio_mpsc::channel(2);
        let (cmd_tx, cmd_rx) = tokio_mpsc::channel(4);
        let state = Arc::new(Mutex::new(ConnectionState::Disconnected));
        let link = DeviceLink {
            label: format!("test ({})", address),
            address: address.to_string(),
            state: Arc::clone(&state),
            inbound_tx,
            outbound_rx,
            cmd_rx,
            retry_interval: Duration::from_millis(5),
        };
        (link, inbound_rx, outbound_tx, cmd_tx, state)
    }

    #[test]
    fn test_parse_network_address() {
        assert_eq!(
            parse_network_address("192.168.1.20").unwrap(),
            ("192.168.1.20".to_string(), DEFAULT_DEVICE_PORT)
        );
        assert_eq!(
            parse_network_address("panel.local:7000").unwrap(),
            ("panel.local".to_string(), 7000)
        );
        assert!(parse_network_address("panel.local:notaport").is_err());
        assert!(parse_network_address(":7000").is_err());
        assert!(parse_network_address("").is_err());
    }

    #[test]
    fn test_parse_ipv6_address() {
        assert_eq!(
            parse_network_address("::1").unwrap(),
            ("::1".to_string(), DEFAULT_DEVICE_PORT)
        );
        assert_eq!(
            parse_network_address("[::1]").unwrap(),
            ("::1".to_string(), DEFAULT_DEVICE_PORT)
        );
        assert_eq!(
            parse_network_address("[::1]:5465").unwrap(),
            ("::1".to_string(), 5465)
        );
        assert_eq!(
            parse_network_address("[fe80::2]:7000").unwrap(),
            ("fe80::2".to_string(), 7000)
        );
        assert!(parse_network_address("[::1]:notaport").is_err());
        assert!(parse_network_address("[panel]:7000").is_err());
        assert!(parse_network_address("fe80::zz").is_err());
    }

    #[test]
    fn test_new_device_validates_address() {
        assert!(Device::new(DeviceKind::Serial, "", "panel").is_err());
        assert!(Device::new(DeviceKind::Network, "host:99999", "panel").is_err());

        let device = Device::new(DeviceKind::Serial, "/dev/ttyACM0", "panel").unwrap();
        assert_eq!(device.state(), ConnectionState::Disconnected);
        assert_eq!(device.info().kind, DeviceKind::Serial);
    }

    #[test]
    fn test_write_dropped_when_not_connected() {
        let device = Device::new(DeviceKind::Serial, "COM3", "panel").unwrap();
        assert_eq!(device.write_data("GEAR_LED:1"), 0);
    }

    #[tokio::test]
    async fn test_connect_with_retry_succeeds_on_fourth_attempt() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&attempts);

        let value = connect_with_retry("flaky", Duration::from_millis(1), move || {
            let counter = Arc::clone(&counter);
            async move {
                let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                if n < 4 {
                    Err(CommError::Io(std::io::Error::new(
                        ErrorKind::ConnectionRefused,
                        "refused",
                    )))
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        assert_eq!(value, 4);
        assert_eq!(attempts.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_link_delivers_lines_after_failed_connects() {
        let (link, mut inbound_rx, _outbound_tx, _cmd_tx, state) = test_link("COM7");
        let (device_side, mut panel_side) = tokio::io::duplex(256);
        let mut device_side = Some(device_side);
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&attempts);

        let task = tokio::spawn(link.run(move || {
            let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
            let result = if n < 4 {
                Err(CommError::Io(std::io::Error::new(ErrorKind::NotFound, "no port")))
            } else {
                device_side
                    .take()
                    .ok_or_else(|| CommError::Runtime("opened twice".into()))
            };
            async move { result }
        }));

        panel_side.write_all(b"GEAR_TOGGLE\nFLAPS").await.unwrap();
        panel_side.write_all(b"_UP\n").await.unwrap();

        let first = inbound_rx.recv().await.unwrap();
        assert_eq!(first.line, "GEAR_TOGGLE");
        assert_eq!(first.address, "COM7");
        assert_eq!(inbound_rx.recv().await.unwrap().line, "FLAPS_UP");
        assert_eq!(attempts.load(Ordering::SeqCst), 4);
        assert_eq!(read_state(&state), ConnectionState::Connected);

        drop(panel_side);
        task.await.unwrap();
        assert_eq!(read_state(&state), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_link_writes_outbound_lines() {
        let (link, _inbound_rx, outbound_tx, cmd_tx, state) = test_link("COM8");
        let (device_side, mut panel_side) = tokio::io::duplex(256);
        let mut device_side = Some(device_side);

        let task = tokio::spawn(link.run(move || {
            let io = device_side
                .take()
                .ok_or_else(|| CommError::Runtime("opened twice".into()));
            async move { io }
        }));

        outbound_tx.send(frame_line("GEAR_LED:1")).await.unwrap();
        let mut buf = [0u8; 11];
        panel_side.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"GEAR_LED:1\n");

        cmd_tx.send(DeviceTaskCommand::Shutdown).await.unwrap();
        task.await.unwrap();
        assert_eq!(read_state(&state), ConnectionState::Closed);
    }

    #[test]
    fn test_full_queue_drops_newest() {
        let device = Device::with_queue_capacity(DeviceKind::Serial, "COM3", "panel", 2).unwrap();
        // Connected but never spawned, so nothing drains the queue
        set_state(&device.state, ConnectionState::Connected);

        assert_eq!(device.write_data("A:1"), 4);
        assert_eq!(device.write_data("B:1"), 4);
        assert_eq!(device.write_data("C:1"), 0);
        assert_eq!(device.write_data("D:1"), 0);
        assert_eq!(device.dropped_lines(), 2);
    }

    #[tokio::test]
    async fn test_stalled_peer_fills_queue() {
        let (link, _inbound_rx, outbound_tx, cmd_tx, _state) = test_link("COM10");
        // Smaller than one line, and the panel never reads
        let (device_side, panel_side) = tokio::io::duplex(4);
        let mut device_side = Some(device_side);

        let task = tokio::spawn(link.run(move || {
            let io = device_side
                .take()
                .ok_or_else(|| CommError::Runtime("opened twice".into()));
            async move { io }
        }));

        let mut queued = 0;
        let full = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                match outbound_tx.try_send(frame_line("GEAR_LED:1")) {
                    Ok(()) => queued += 1,
                    Err(TrySendError::Full(_)) => break,
                    Err(TrySendError::Closed(_)) => panic!("link ended"),
                }
                tokio::task::yield_now().await;
            }
        })
        .await;

        assert!(full.is_ok(), "queue never filled");
        // One line stuck in the writer plus the channel capacity
        assert!(queued <= 3, "queued {queued} lines");

        // The stuck write only ends with the transport
        drop(panel_side);
        task.await.unwrap();
        drop(cmd_tx);
    }

    #[tokio::test]
    async fn test_shutdown_while_connecting() {
        let (link, _inbound_rx, _outbound_tx, cmd_tx, state) = test_link("COM9");

        let task = tokio::spawn(link.run(|| async {
            Err::<tokio::io::DuplexStream, _>(CommError::Io(std::io::Error::new(
                ErrorKind::NotFound,
                "no port",
            )))
        }));

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(read_state(&state), ConnectionState::Connecting);

        cmd_tx.send(DeviceTaskCommand::Shutdown).await.unwrap();
        task.await.unwrap();
        assert_eq!(read_state(&state), ConnectionState::Closed);
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn network_address_with_port(host in "[a-z][a-z0-9.-]{0,20}", port in any::<u16>()) {
                let parsed = parse_network_address(&format!("{host}:{port}")).unwrap();
                prop_assert_eq!(parsed, (host, port));
            }

            #[test]
            fn network_address_without_port(host in "[a-z][a-z0-9.-]{0,20}") {
                let parsed = parse_network_address(&host).unwrap();
                prop_assert_eq!(parsed, (host, DEFAULT_DEVICE_PORT));
            }
        }
    }
}
