//! Mapping tables between device and simulator event names
//!
//! Write mappings are keyed by device event name and hold a list of
//! simulator targets. Registration only ever creates one target per key;
//! the list shape keeps room for fan-out without changing dispatch.
//!
//! Read mappings are keyed by simulator event name without its namespace,
//! which is both the duplicate check and the lookup key when a value
//! arrives. `xplane:sim/cockpit/gear` and `sim/cockpit/gear` share a key.

use std::collections::HashMap;

use simlink_protocol::{canonical_sim_name, DataType};
use tracing::debug;

use crate::error::{MapperError, MappingKind};

/// One simulator event a device event dispatches to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteTarget {
    pub sim_event_name: String,
    /// Used when the device sends no explicit value
    pub default_parameter: String,
}

/// Device event with its simulator targets
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteMapping {
    pub device_event_name: String,
    pub targets: Vec<WriteTarget>,
}

/// Simulator value forwarded to devices under a device event name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadMapping {
    pub device_event_name: String,
    pub sim_event_name: String,
    pub datatype: DataType,
}

/// Write and read mapping tables
#[derive(Debug, Default)]
pub struct EventRegistry {
    writes: HashMap<String, Vec<WriteTarget>>,
    reads: HashMap<String, ReadMapping>,
}

impl EventRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a write mapping; an existing device event name is left untouched
    pub fn insert_write(
        &mut self,
        device_event_name: &str,
        sim_event_name: &str,
        default_parameter: &str,
    ) -> Result<&WriteTarget, MapperError> {
        if self.writes.contains_key(device_event_name) {
            return Err(MapperError::DuplicateRegistration {
                kind: MappingKind::Write,
                name: device_event_name.to_string(),
            });
        }

        let targets = self
            .writes
            .entry(device_event_name.to_string())
            .or_default();
        targets.push(WriteTarget {
            sim_event_name: sim_event_name.to_string(),
            default_parameter: default_parameter.to_string(),
        });
        debug!(
            "Write mapping {} -> {} ({:?})",
            device_event_name, sim_event_name, default_parameter
        );
        Ok(&targets[targets.len() - 1])
    }

    /// Add a read mapping; an existing simulator event name is left untouched
    pub fn insert_read(
        &mut self,
        device_event_name: &str,
        sim_event_name: &str,
        datatype: DataType,
    ) -> Result<&ReadMapping, MapperError> {
        let key = canonical_sim_name(sim_event_name);
        if self.reads.contains_key(key) {
            return Err(MapperError::DuplicateRegistration {
                kind: MappingKind::Read,
                name: sim_event_name.to_string(),
            });
        }

        debug!(
            "Read mapping {} -> {} ({})",
            sim_event_name, device_event_name, datatype
        );
        let mapping = self
            .reads
            .entry(key.to_string())
            .or_insert(ReadMapping {
                device_event_name: device_event_name.to_string(),
                sim_event_name: sim_event_name.to_string(),
                datatype,
            });
        Ok(mapping)
    }

    /// Remove the write mapping for a device event name
    pub fn remove_write(&mut self, device_event_name: &str) -> Result<WriteMapping, MapperError> {
        self.writes
            .remove_entry(device_event_name)
            .map(|(device_event_name, targets)| WriteMapping {
                device_event_name,
                targets,
            })
            .ok_or_else(|| MapperError::UnknownEvent {
                kind: MappingKind::Write,
                name: device_event_name.to_string(),
            })
    }

    /// Remove the read mapping for a simulator event name, with or without
    /// its namespace
    pub fn remove_read(&mut self, sim_event_name: &str) -> Result<ReadMapping, MapperError> {
        self.reads
            .remove(canonical_sim_name(sim_event_name))
            .ok_or_else(|| MapperError::UnknownEvent {
                kind: MappingKind::Read,
                name: sim_event_name.to_string(),
            })
    }

    /// Targets for a device event name
    pub fn write_targets(&self, device_event_name: &str) -> Option<&[WriteTarget]> {
        self.writes.get(device_event_name).map(Vec::as_slice)
    }

    /// Mapping for a simulator event name as reported by a backend
    pub fn read_mapping(&self, sim_event_name: &str) -> Option<&ReadMapping> {
        self.reads.get(canonical_sim_name(sim_event_name))
    }

    /// All write mappings, ordered by device event name
    pub fn write_mappings(&self) -> Vec<WriteMapping> {
        let mut mappings: Vec<_> = self
            .writes
            .iter()
            .map(|(name, targets)| WriteMapping {
                device_event_name: name.clone(),
                targets: targets.clone(),
            })
            .collect();
        mappings.sort_by(|a, b| a.device_event_name.cmp(&b.device_event_name));
        mappings
    }

    /// All read mappings, ordered by simulator event name
    pub fn read_mappings(&self) -> Vec<ReadMapping> {
        let mut mappings: Vec<_> = self.reads.values().cloned().collect();
        mappings.sort_by(|a, b| a.sim_event_name.cmp(&b.sim_event_name));
        mappings
    }

    pub fn write_len(&self) -> usize {
        self.writes.len()
    }

    pub fn read_len(&self) -> usize {
        self.reads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty() && self.reads.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_write_keeps_first() {
        let mut registry = EventRegistry::new();
        registry.insert_write("GEAR_TOGGLE", "GEAR_TOGGLE", "").unwrap();
        let err = registry.insert_write("GEAR_TOGGLE", "GEAR_DOWN", "1").unwrap_err();

        assert!(matches!(
            err,
            MapperError::DuplicateRegistration {
                kind: MappingKind::Write,
                ..
            }
        ));
        let targets = registry.write_targets("GEAR_TOGGLE").unwrap();
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].sim_event_name, "GEAR_TOGGLE");
    }

    #[test]
    fn test_read_keyed_by_sim_name() {
        let mut registry = EventRegistry::new();
        registry
            .insert_read("GEAR_LED", "simconnect:GEAR HANDLE POSITION", DataType::Int32)
            .unwrap();
        // Same device name, different sim name is a separate mapping
        registry
            .insert_read("GEAR_LED", "simconnect:GEAR IS ON GROUND", DataType::Int32)
            .unwrap();
        // Same sim name is a duplicate
        assert!(registry
            .insert_read("NOSE_LED", "simconnect:GEAR HANDLE POSITION", DataType::Int32)
            .is_err());

        assert_eq!(registry.read_len(), 2);
        assert_eq!(
            registry
                .read_mapping("simconnect:GEAR HANDLE POSITION")
                .unwrap()
                .device_event_name,
            "GEAR_LED"
        );
    }

    #[test]
    fn test_read_lookup_ignores_namespace() {
        let mut registry = EventRegistry::new();
        registry
            .insert_read("GEAR_LED", "sim/cockpit/gear", DataType::Float64)
            .unwrap();

        assert!(registry.read_mapping("xplane:sim/cockpit/gear").is_some());
        assert!(registry.read_mapping("xplane:sim/cockpit/flaps").is_none());
        // Only simulator namespaces are stripped
        assert!(registry.read_mapping("other:sim/cockpit/gear").is_none());
    }

    #[test]
    fn test_namespaced_alias_is_duplicate() {
        let mut registry = EventRegistry::new();
        registry
            .insert_read("GEAR_LED", "sim/cockpit/gear", DataType::Float64)
            .unwrap();
        let err = registry
            .insert_read("OTHER_LED", "xplane:sim/cockpit/gear", DataType::Float64)
            .unwrap_err();

        assert!(matches!(
            err,
            MapperError::DuplicateRegistration {
                kind: MappingKind::Read,
                ..
            }
        ));
        assert_eq!(registry.read_len(), 1);
        let mapping = registry.read_mapping("xplane:sim/cockpit/gear").unwrap();
        assert_eq!(mapping.device_event_name, "GEAR_LED");
        assert_eq!(mapping.sim_event_name, "sim/cockpit/gear");

        let removed = registry.remove_read("xplane:sim/cockpit/gear").unwrap();
        assert_eq!(removed.device_event_name, "GEAR_LED");
        assert_eq!(registry.read_len(), 0);
    }

    #[test]
    fn test_remove_unknown() {
        let mut registry = EventRegistry::new();
        assert!(matches!(
            registry.remove_write("NOPE"),
            Err(MapperError::UnknownEvent { .. })
        ));
        assert!(registry.remove_read("NOPE").is_err());
    }

    #[test]
    fn test_listings_are_sorted() {
        let mut registry = EventRegistry::new();
        registry.insert_write("B", "sim_b", "").unwrap();
        registry.insert_write("A", "sim_a", "1").unwrap();
        registry.insert_read("X", "s2", DataType::Int64).unwrap();
        registry.insert_read("Y", "s1", DataType::Int64).unwrap();

        let writes: Vec<_> = registry
            .write_mappings()
            .into_iter()
            .map(|m| m.device_event_name)
            .collect();
        assert_eq!(writes, ["A", "B"]);

        let reads: Vec<_> = registry
            .read_mappings()
            .into_iter()
            .map(|m| m.sim_event_name)
            .collect();
        assert_eq!(reads, ["s1", "s2"]);
    }
}
