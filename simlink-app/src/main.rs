//! SimLink
//!
//! Bridges control-panel hardware on serial ports and TCP with a flight
//! simulator. Device lines trigger simulator events through the write
//! mappings; simulator values go back to every device through the read
//! mappings.

mod config;
mod logging;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use simlink_comm::{list_serial_ports, DeviceManager, InboundLine};
use simlink_mapper::{Router, RouterEvent};
use simlink_protocol::{DeviceKind, SimulatorKind};
use simlink_sim::{
    VirtualSimulator, XPlaneBackend, XPlaneConfig, DEFAULT_XPLANE_HOST, DEFAULT_XPLANE_PORT,
};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::config::{ConfigStore, SharedConfig};

/// Cadence of the router loop
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Device given on the command line as `TYPE:ADDRESS[=NAME]`
#[derive(Debug, Clone, PartialEq, Eq)]
struct DeviceSpec {
    kind: DeviceKind,
    address: String,
    name: String,
}

fn parse_device_spec(spec: &str) -> Result<DeviceSpec, String> {
    let (kind, rest) = spec
        .split_once(':')
        .ok_or_else(|| format!("expected TYPE:ADDRESS[=NAME], got {spec:?}"))?;
    let kind = kind.parse::<DeviceKind>().map_err(|e| e.to_string())?;
    let (address, name) = rest.split_once('=').unwrap_or((rest, rest));
    if address.is_empty() {
        return Err(format!("missing device address in {spec:?}"));
    }
    Ok(DeviceSpec {
        kind,
        address: address.to_string(),
        name: name.to_string(),
    })
}

/// SimLink - connect cockpit hardware to your flight simulator
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file [default: <data dir>/SimLink/simlink.json]
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level for SimLink (error, warn, info, debug, trace); overrides RUST_LOG
    #[arg(short, long, env = "LOG_LEVEL")]
    log_level: Option<String>,

    /// Do not write mapping or device changes back to the configuration file
    #[arg(long)]
    no_save: bool,

    /// Add a device and save it, e.g. serial:/dev/ttyACM0=Overhead (repeatable)
    #[arg(long, value_name = "TYPE:ADDRESS[=NAME]", value_parser = parse_device_spec)]
    add_device: Vec<DeviceSpec>,

    /// Remove the saved device(s) at an address (repeatable)
    #[arg(long, value_name = "ADDRESS")]
    remove_device: Vec<String>,

    /// List available serial ports and exit
    #[arg(long)]
    list_ports: bool,

    /// Route to a virtual simulator that only logs what it receives
    #[arg(long)]
    dry_run: bool,

    /// Host running the X-Plane plugin
    #[arg(long, default_value = DEFAULT_XPLANE_HOST)]
    xplane_host: String,

    /// Port of the X-Plane plugin
    #[arg(long, default_value_t = DEFAULT_XPLANE_PORT)]
    xplane_port: u16,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_dir = config::default_log_dir().ok();
    let _log_guard = logging::init(args.log_level.as_deref(), log_dir.as_deref());

    if args.list_ports {
        return print_ports();
    }

    info!("Starting SimLink {}", env!("CARGO_PKG_VERSION"));

    let config_path = match &args.config {
        Some(path) => path.clone(),
        None => config::default_config_path()?,
    };
    let store = ConfigStore::open(&config_path)
        .with_context(|| format!("Failed to load {}", config_path.display()))?;
    let shared = SharedConfig::new(store);

    let (mut manager, mut inbound) = DeviceManager::new();
    load_devices(&args, &shared, &mut manager);

    let mut router = build_router(&args, &shared)?;
    manager.start().context("Failed to start device manager")?;

    if let Err(e) = router.connect() {
        warn!("Simulator not ready ({}), retrying in the background", e);
    }

    run(&mut router, &manager, &mut inbound).await;

    info!("Shutting down");
    router.close();
    if let Err(e) = manager.stop() {
        warn!("Device manager did not stop cleanly: {}", e);
    }
    info!("SimLink stopped");
    Ok(())
}

fn print_ports() -> Result<()> {
    let ports = list_serial_ports()?;
    if ports.is_empty() {
        println!("No serial ports found");
    }
    for port in ports {
        println!("{}", port.describe());
    }
    Ok(())
}

/// Saved devices, then the command line's removals and additions
///
/// Only the command-line changes are saved.
fn load_devices(args: &Args, shared: &SharedConfig, manager: &mut DeviceManager) {
    let saved: Vec<_> = shared
        .lock()
        .devices()
        .into_iter()
        .map(|(kind, entry)| (kind, entry.address.clone(), entry.name.clone()))
        .collect();
    for (kind, address, name) in saved {
        if let Err(e) = manager.add_device(kind, &address, &name) {
            error!("Skipping device {} ({}): {}", name, address, e);
        }
    }

    if !args.no_save {
        manager.set_change_tracker(Box::new(shared.clone()));
    }
    for address in &args.remove_device {
        if manager.remove_device(address) == 0 {
            warn!("No device at {} to remove", address);
        }
    }
    for spec in &args.add_device {
        if let Err(e) = manager.add_device(spec.kind, &spec.address, &spec.name) {
            error!("Cannot add device {} ({}): {}", spec.name, spec.address, e);
        }
    }
}

/// Router with the configured simulator, its backend and saved mappings
fn build_router(args: &Args, shared: &SharedConfig) -> Result<Router> {
    let simulator = shared.lock().simulator();
    let mut builder = Router::builder(simulator);

    if args.dry_run {
        info!("Dry run: simulator events are logged, not sent");
        for kind in [SimulatorKind::SimConnect, SimulatorKind::XPlane] {
            let (sim, _handle) = VirtualSimulator::new(kind);
            builder = builder.backend(Box::new(sim));
        }
    } else {
        if simulator == SimulatorKind::SimConnect {
            bail!("This build has no SimConnect client; select xplane or run with --dry-run");
        }
        let xplane = XPlaneBackend::new(XPlaneConfig {
            host: args.xplane_host.clone(),
            port: args.xplane_port,
            ..XPlaneConfig::default()
        });
        builder = builder.backend(Box::new(xplane));
    }

    let builder = shared.lock().apply_mappings(builder);
    if args.no_save {
        info!("Configuration changes will not be saved");
    }
    Ok(builder
        .change_tracker(Box::new(shared.clone()))
        .save_on_change(!args.no_save)
        .build())
}

/// Main loop: device lines in, router ticks, device lines out
async fn run(
    router: &mut Router,
    manager: &DeviceManager,
    inbound: &mut mpsc::Receiver<InboundLine>,
) {
    let mut poll = tokio::time::interval(POLL_INTERVAL);
    poll.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            line = inbound.recv() => {
                let Some(InboundLine { address, line }) = line else {
                    warn!("Device channel closed");
                    break;
                };
                debug!("{} -> {}", address, line);
                // Failures are logged by the router
                let _ = router.write_event(&line, "");
            }
            _ = poll.tick() => {
                router.tick();
                forward_events(router, manager);
            }
            result = &mut shutdown => {
                if let Err(e) = result {
                    error!("Failed to listen for Ctrl+C: {}", e);
                }
                info!("Shutdown signal received");
                break;
            }
        }
    }
}

fn forward_events(router: &mut Router, manager: &DeviceManager) {
    for event in router.drain_events() {
        match event {
            RouterEvent::Broadcast(line) => {
                let sent = manager.send_all(&line);
                debug!("{} -> {} device(s)", line, sent);
            }
            RouterEvent::StateChanged { from, to } => {
                info!("Simulator link {:?} -> {:?}", from, to);
            }
            RouterEvent::SimulatorChanged(kind) => {
                info!("Simulator changed to {}", kind);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn args(extra: &[&str]) -> Args {
        let mut argv = vec!["simlink"];
        argv.extend_from_slice(extra);
        Args::parse_from(argv)
    }

    fn store(contents: &str) -> (TempDir, SharedConfig) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(config::CONFIG_FILE);
        std::fs::write(&path, contents).unwrap();
        let store = ConfigStore::open(&path).unwrap();
        (dir, SharedConfig::new(store))
    }

    fn saved_addresses(shared: &SharedConfig) -> Vec<String> {
        let data = std::fs::read_to_string(shared.lock().path()).unwrap();
        let document: config::ConfigDocument = serde_json::from_str(&data).unwrap();
        document.devices.into_iter().map(|d| d.address).collect()
    }

    #[test]
    fn test_args_defaults() {
        let args = args(&[]);
        assert!(args.config.is_none());
        assert!(!args.no_save);
        assert!(args.add_device.is_empty());
        assert!(args.remove_device.is_empty());
        assert!(!args.dry_run);
        assert_eq!(args.xplane_host, DEFAULT_XPLANE_HOST);
        assert_eq!(args.xplane_port, DEFAULT_XPLANE_PORT);
    }

    #[test]
    fn test_simconnect_requires_dry_run() {
        let (_dir, store) = store(r#"{"simulator":{"type":"simconnect"}}"#);
        assert!(build_router(&args(&[]), &store).is_err());
    }

    #[test]
    fn test_dry_run_routes_saved_mappings() {
        let (_dir, store) = store(
            r#"{"mappings":{"write":[{"raw_name":"GEAR","sim_name":"GEAR_TOGGLE","parameter":""}]},
                "simulator":{"type":"simconnect"}}"#,
        );
        let mut router = build_router(&args(&["--dry-run"]), &store).unwrap();
        router.connect().unwrap();

        assert_eq!(router.write_event("GEAR", "").unwrap(), 1);
        assert!(router.save_on_change());
    }

    #[test]
    fn test_no_save_disables_tracking() {
        let (_dir, store) = store(r#"{"simulator":{"type":"xplane"}}"#);
        let router = build_router(&args(&["--dry-run", "--no-save"]), &store).unwrap();
        assert!(!router.save_on_change());
        assert_eq!(router.simulator(), SimulatorKind::XPlane);
    }

    #[test]
    fn test_device_spec_parsing() {
        assert_eq!(
            parse_device_spec("network:192.168.1.40:5465=MCP").unwrap(),
            DeviceSpec {
                kind: DeviceKind::Network,
                address: "192.168.1.40:5465".into(),
                name: "MCP".into(),
            }
        );
        let spec = parse_device_spec("serial:/dev/ttyACM0").unwrap();
        assert_eq!(spec.name, "/dev/ttyACM0");
        assert!(parse_device_spec("usb:COM3").is_err());
        assert!(parse_device_spec("serial:").is_err());
        assert!(parse_device_spec("COM3").is_err());
    }

    #[test]
    fn test_command_line_devices_are_saved() {
        let (_dir, shared) = store(
            r#"{"devices":[{"name":"Panel","address":"COM3","type":"serial"},
                           {"name":"Radio","address":"COM4","type":"serial"}]}"#,
        );
        let args = args(&["--remove-device", "COM4", "--add-device", "network:10.0.0.2=MCP"]);
        let (mut manager, _inbound) = DeviceManager::new();
        load_devices(&args, &shared, &mut manager);

        let running: Vec<_> = manager.devices().into_iter().map(|d| d.address).collect();
        assert_eq!(running, ["COM3", "10.0.0.2"]);
        assert_eq!(saved_addresses(&shared), ["COM3", "10.0.0.2"]);
    }

    #[test]
    fn test_no_save_keeps_devices_unsaved() {
        let (_dir, shared) = store(r#"{"devices":[{"name":"Panel","address":"COM3","type":"serial"}]}"#);
        let args = args(&["--no-save", "--add-device", "serial:COM5"]);
        let (mut manager, _inbound) = DeviceManager::new();
        load_devices(&args, &shared, &mut manager);

        assert_eq!(manager.devices().len(), 2);
        assert_eq!(saved_addresses(&shared), ["COM3"]);
    }
}
