//! Persisted configuration
//!
//! One JSON document holds the devices, both mapping tables and the selected
//! simulator. [`ConfigStore`] loads it at startup and, as the router's
//! [`ChangeTracker`] and the device manager's [`DeviceTracker`], rewrites it
//! after every change. [`SharedConfig`] lets both hold the same store.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use simlink_comm::DeviceTracker;
use simlink_mapper::{ChangeTracker, RouterBuilder};
use simlink_protocol::{canonical_sim_name, DataType, DeviceKind, SimulatorKind};
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Directory under the platform data directory
pub const APP_DIR: &str = "SimLink";

/// Configuration file name
pub const CONFIG_FILE: &str = "simlink.json";

/// Errors from loading or saving the configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not determine the data directory")]
    NoDataDir,

    #[error("failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize configuration: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// `<data dir>/SimLink`
pub fn data_dir() -> Result<PathBuf, ConfigError> {
    dirs::data_dir()
        .map(|dir| dir.join(APP_DIR))
        .ok_or(ConfigError::NoDataDir)
}

/// `<data dir>/SimLink/simlink.json`
pub fn default_config_path() -> Result<PathBuf, ConfigError> {
    data_dir().map(|dir| dir.join(CONFIG_FILE))
}

/// `<data dir>/SimLink/logs`
pub fn default_log_dir() -> Result<PathBuf, ConfigError> {
    data_dir().map(|dir| dir.join("logs"))
}

/// Saved device
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceEntry {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub address: String,
    /// "serial" or "network"
    #[serde(rename = "type", default)]
    pub kind: String,
}

/// Saved read mapping
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadEntry {
    #[serde(default)]
    pub raw_name: String,
    #[serde(default)]
    pub sim_name: String,
    #[serde(default = "default_datatype")]
    pub datatype: String,
}

/// Saved write mapping
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteEntry {
    #[serde(default)]
    pub raw_name: String,
    #[serde(default)]
    pub sim_name: String,
    #[serde(default)]
    pub parameter: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappingTables {
    #[serde(default)]
    pub read: Vec<ReadEntry>,
    #[serde(default)]
    pub write: Vec<WriteEntry>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulatorEntry {
    /// "simconnect" or "xplane"
    #[serde(rename = "type", default)]
    pub kind: String,
}

/// The whole configuration file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigDocument {
    #[serde(default)]
    pub devices: Vec<DeviceEntry>,
    #[serde(default)]
    pub mappings: MappingTables,
    #[serde(default)]
    pub simulator: SimulatorEntry,
}

fn default_datatype() -> String {
    DataType::default().name().to_string()
}

/// Configuration file and its in-memory document
#[derive(Debug)]
pub struct ConfigStore {
    path: PathBuf,
    document: ConfigDocument,
}

impl ConfigStore {
    /// Load the configuration at `path`
    ///
    /// A missing file is created with an empty document. A file that does
    /// not parse is logged and treated as empty; it is only overwritten by
    /// the next change.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();

        if !path.exists() {
            info!("{} does not exist, creating", path.display());
            let store = Self {
                path,
                document: ConfigDocument::default(),
            };
            store.save()?;
            return Ok(store);
        }

        let data = fs::read_to_string(&path).map_err(|source| ConfigError::Io {
            path: path.clone(),
            source,
        })?;
        let document = match serde_json::from_str(&data) {
            Ok(document) => document,
            Err(e) => {
                error!(
                    "Failed to parse {}: {}; starting with no mappings",
                    path.display(),
                    e
                );
                ConfigDocument::default()
            }
        };
        info!("Loaded configuration from {}", path.display());
        Ok(Self { path, document })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn document(&self) -> &ConfigDocument {
        &self.document
    }

    /// Write the document to disk
    pub fn save(&self) -> Result<(), ConfigError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|source| ConfigError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let json = serde_json::to_string_pretty(&self.document)?;
        fs::write(&self.path, json).map_err(|source| ConfigError::Io {
            path: self.path.clone(),
            source,
        })?;
        debug!("Configuration saved to {}", self.path.display());
        Ok(())
    }

    fn persist(&self) {
        if let Err(e) = self.save() {
            error!("Failed to save configuration: {}", e);
        }
    }

    /// Selected simulator; SimConnect when missing or unknown
    pub fn simulator(&self) -> SimulatorKind {
        let kind = &self.document.simulator.kind;
        if kind.is_empty() {
            error!("Configuration is missing the simulator entry, using SimConnect");
            return SimulatorKind::SimConnect;
        }
        kind.parse().unwrap_or_else(|e| {
            error!("{}, using SimConnect", e);
            SimulatorKind::SimConnect
        })
    }

    /// Valid saved devices; invalid entries are logged and skipped
    pub fn devices(&self) -> Vec<(DeviceKind, &DeviceEntry)> {
        self.document
            .devices
            .iter()
            .filter_map(|entry| {
                if entry.address.is_empty() {
                    error!("Device entry {:?} is missing its address", entry.name);
                    return None;
                }
                match entry.kind.parse::<DeviceKind>() {
                    Ok(kind) => Some((kind, entry)),
                    Err(e) => {
                        error!("Skipping device {}: {}", entry.address, e);
                        None
                    }
                }
            })
            .collect()
    }

    /// Add the saved mappings to a router builder
    ///
    /// Entries missing a name or with an unknown datatype are logged and
    /// skipped.
    pub fn apply_mappings(&self, mut builder: RouterBuilder) -> RouterBuilder {
        for entry in &self.document.mappings.read {
            if entry.raw_name.is_empty() || entry.sim_name.is_empty() {
                error!("Read mapping entry is missing raw_name or sim_name");
                continue;
            }
            let datatype = match entry.datatype.parse::<DataType>() {
                Ok(datatype) => datatype,
                Err(e) => {
                    error!("Skipping read mapping {}: {}", entry.raw_name, e);
                    continue;
                }
            };
            debug!(
                "Read mapping from configuration: {} --> {} ({})",
                entry.raw_name, entry.sim_name, datatype
            );
            builder = builder.read_mapping(&entry.raw_name, &entry.sim_name, datatype);
        }

        for entry in &self.document.mappings.write {
            if entry.raw_name.is_empty() || entry.sim_name.is_empty() {
                error!("Write mapping entry is missing raw_name or sim_name");
                continue;
            }
            debug!(
                "Write mapping from configuration: {} --> {}:{}",
                entry.raw_name, entry.sim_name, entry.parameter
            );
            builder = builder.write_mapping(&entry.raw_name, &entry.sim_name, &entry.parameter);
        }
        builder
    }

    /// Save a device; an address that is already saved is left alone
    pub fn add_device(&mut self, kind: DeviceKind, address: &str, name: &str) -> bool {
        if self.document.devices.iter().any(|d| d.address == address) {
            debug!("Device {} already saved", address);
            return false;
        }
        self.document.devices.push(DeviceEntry {
            name: name.to_string(),
            address: address.to_string(),
            kind: kind.name().to_string(),
        });
        self.persist();
        true
    }

    /// Forget every device with this address
    pub fn remove_device(&mut self, address: &str) -> bool {
        let before = self.document.devices.len();
        self.document.devices.retain(|d| d.address != address);
        if self.document.devices.len() == before {
            return false;
        }
        self.persist();
        true
    }
}

impl ChangeTracker for ConfigStore {
    fn write_mapping_added(&mut self, device_event_name: &str, sim_event_name: &str, parameter: &str) {
        let writes = &mut self.document.mappings.write;
        if writes.iter().any(|m| m.raw_name == device_event_name) {
            debug!("Write mapping {} already saved", device_event_name);
            return;
        }
        writes.push(WriteEntry {
            raw_name: device_event_name.to_string(),
            sim_name: sim_event_name.to_string(),
            parameter: parameter.to_string(),
        });
        self.persist();
    }

    fn write_mapping_removed(&mut self, device_event_name: &str) {
        let writes = &mut self.document.mappings.write;
        let before = writes.len();
        writes.retain(|m| m.raw_name != device_event_name);
        if writes.len() == before {
            warn!("Write mapping {} was not saved", device_event_name);
            return;
        }
        self.persist();
    }

    fn read_mapping_added(&mut self, device_event_name: &str, sim_event_name: &str, datatype: DataType) {
        let reads = &mut self.document.mappings.read;
        let key = canonical_sim_name(sim_event_name);
        if reads.iter().any(|m| canonical_sim_name(&m.sim_name) == key) {
            debug!("Read mapping {} already saved", sim_event_name);
            return;
        }
        reads.push(ReadEntry {
            raw_name: device_event_name.to_string(),
            sim_name: sim_event_name.to_string(),
            datatype: datatype.name().to_string(),
        });
        self.persist();
    }

    fn read_mapping_removed(&mut self, sim_event_name: &str) {
        let reads = &mut self.document.mappings.read;
        let before = reads.len();
        let key = canonical_sim_name(sim_event_name);
        reads.retain(|m| canonical_sim_name(&m.sim_name) != key);
        if reads.len() == before {
            warn!("Read mapping {} was not saved", sim_event_name);
            return;
        }
        self.persist();
    }

    fn simulator_changed(&mut self, kind: SimulatorKind) {
        debug!("Saving simulator type {}", kind);
        self.document.simulator.kind = kind.name().to_string();
        self.persist();
    }
}

impl DeviceTracker for ConfigStore {
    fn device_added(&mut self, kind: DeviceKind, address: &str, name: &str) {
        self.add_device(kind, address, name);
    }

    fn device_removed(&mut self, address: &str) {
        if !self.remove_device(address) {
            warn!("Device {} was not saved", address);
        }
    }
}

/// A [`ConfigStore`] shared by the router and the device manager
#[derive(Debug, Clone)]
pub struct SharedConfig {
    inner: Arc<Mutex<ConfigStore>>,
}

impl SharedConfig {
    pub fn new(store: ConfigStore) -> Self {
        Self {
            inner: Arc::new(Mutex::new(store)),
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, ConfigStore> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl ChangeTracker for SharedConfig {
    fn write_mapping_added(&mut self, device_event_name: &str, sim_event_name: &str, parameter: &str) {
        self.lock()
            .write_mapping_added(device_event_name, sim_event_name, parameter);
    }

    fn write_mapping_removed(&mut self, device_event_name: &str) {
        self.lock().write_mapping_removed(device_event_name);
    }

    fn read_mapping_added(&mut self, device_event_name: &str, sim_event_name: &str, datatype: DataType) {
        self.lock()
            .read_mapping_added(device_event_name, sim_event_name, datatype);
    }

    fn read_mapping_removed(&mut self, sim_event_name: &str) {
        self.lock().read_mapping_removed(sim_event_name);
    }

    fn simulator_changed(&mut self, kind: SimulatorKind) {
        self.lock().simulator_changed(kind);
    }
}

impl DeviceTracker for SharedConfig {
    fn device_added(&mut self, kind: DeviceKind, address: &str, name: &str) {
        self.lock().device_added(kind, address, name);
    }

    fn device_removed(&mut self, address: &str) {
        self.lock().device_removed(address);
    }
}
