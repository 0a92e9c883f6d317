//! Device Registry
//!
//! Each monitored station is represented by one device, identified by
//! `(domain, station_id)` and owned by the config entries that created it.

use std::collections::HashSet;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::storage::{Storable, Storage, StorageResult};

pub const STORAGE_KEY: &str = "core.device_registry";
pub const STORAGE_VERSION: u32 = 1;
pub const STORAGE_MINOR_VERSION: u32 = 1;

/// Device entry type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceEntryType {
    /// A web service rather than a physical device
    Service,
}

/// A device identifier (domain, id) pair
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceIdentifier(pub String, pub String);

impl DeviceIdentifier {
    pub fn new(domain: impl Into<String>, id: impl Into<String>) -> Self {
        Self(domain.into(), id.into())
    }

    pub fn domain(&self) -> &str {
        &self.0
    }

    pub fn id(&self) -> &str {
        &self.1
    }
}

/// A registered device entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceEntry {
    /// Internal ULID
    pub id: String,

    #[serde(default)]
    pub identifiers: Vec<DeviceIdentifier>,

    #[serde(default)]
    pub config_entries: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manufacturer: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry_type: Option<DeviceEntryType>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub configuration_url: Option<String>,

    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,

    #[serde(default = "Utc::now")]
    pub modified_at: DateTime<Utc>,
}

impl DeviceEntry {
    pub fn new(name: Option<&str>) -> Self {
        let now = Utc::now();
        Self {
            id: ulid::Ulid::new().to_string().to_lowercase(),
            identifiers: Vec::new(),
            config_entries: Vec::new(),
            name: name.map(String::from),
            manufacturer: None,
            entry_type: None,
            configuration_url: None,
            created_at: now,
            modified_at: now,
        }
    }

    pub fn with_config_entry(mut self, config_entry_id: impl Into<String>) -> Self {
        let id = config_entry_id.into();
        if !self.config_entries.contains(&id) {
            self.config_entries.push(id);
        }
        self
    }
}

/// Properties an integration reports for its device
#[derive(Debug, Clone, Default)]
pub struct DeviceRegistration<'a> {
    pub config_entry_id: &'a str,
    pub identifiers: &'a [DeviceIdentifier],
    pub name: Option<&'a str>,
    pub manufacturer: Option<&'a str>,
    pub entry_type: Option<DeviceEntryType>,
    pub configuration_url: Option<&'a str>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviceRegistryData {
    pub devices: Vec<DeviceEntry>,
}

impl Storable for DeviceRegistryData {
    const KEY: &'static str = STORAGE_KEY;
    const VERSION: u32 = STORAGE_VERSION;
    const MINOR_VERSION: u32 = STORAGE_MINOR_VERSION;
}

/// Device registry with identifier and config entry indexes
pub struct DeviceRegistry {
    storage: Arc<Storage>,

    /// Primary index: device_id -> entry, in creation order
    by_id: RwLock<IndexMap<String, Arc<DeviceEntry>>>,

    /// identifier -> device_id
    by_identifier: DashMap<DeviceIdentifier, String>,

    /// config_entry_id -> device_ids
    by_config_entry_id: DashMap<String, HashSet<String>>,
}

impl DeviceRegistry {
    pub fn new(storage: Arc<Storage>) -> Self {
        Self {
            storage,
            by_id: RwLock::new(IndexMap::new()),
            by_identifier: DashMap::new(),
            by_config_entry_id: DashMap::new(),
        }
    }

    pub async fn load(&self) -> StorageResult<()> {
        if let Some(data) = self.storage.load::<DeviceRegistryData>().await? {
            info!("Loading {} devices from storage", data.devices.len());
            for entry in data.devices {
                self.index_entry(Arc::new(entry));
            }
        }
        Ok(())
    }

    pub async fn save(&self) -> StorageResult<()> {
        let data = DeviceRegistryData {
            devices: self.iter().iter().map(|d| (**d).clone()).collect(),
        };
        self.storage.save(&data).await?;
        debug!("Saved {} devices to storage", data.devices.len());
        Ok(())
    }

    fn index_entry(&self, entry: Arc<DeviceEntry>) {
        for identifier in &entry.identifiers {
            self.by_identifier
                .insert(identifier.clone(), entry.id.clone());
        }
        for config_entry_id in &entry.config_entries {
            self.by_config_entry_id
                .entry(config_entry_id.clone())
                .or_default()
                .insert(entry.id.clone());
        }
        if let Ok(mut idx) = self.by_id.write() {
            idx.insert(entry.id.clone(), entry);
        }
    }

    fn unindex_entry(&self, entry: &DeviceEntry) {
        for identifier in &entry.identifiers {
            self.by_identifier.remove(identifier);
        }
        for config_entry_id in &entry.config_entries {
            if let Some(mut ids) = self.by_config_entry_id.get_mut(config_entry_id) {
                ids.remove(&entry.id);
            }
        }
    }

    pub fn get(&self, device_id: &str) -> Option<Arc<DeviceEntry>> {
        self.by_id
            .read()
            .ok()
            .and_then(|idx| idx.get(device_id).cloned())
    }

    pub fn get_by_identifier(&self, domain: &str, id: &str) -> Option<Arc<DeviceEntry>> {
        self.by_identifier
            .get(&DeviceIdentifier::new(domain, id))
            .and_then(|device_id| self.get(device_id.value()))
    }

    pub fn get_by_config_entry_id(&self, config_entry_id: &str) -> Vec<Arc<DeviceEntry>> {
        self.by_config_entry_id
            .get(config_entry_id)
            .map(|ids| ids.iter().filter_map(|id| self.get(id)).collect())
            .unwrap_or_default()
    }

    /// Get or create the device matching any of the given identifiers
    ///
    /// An existing device is linked to the config entry and gets the reported
    /// properties; otherwise a new device is created.
    pub fn async_get_or_create(&self, registration: DeviceRegistration<'_>) -> Arc<DeviceEntry> {
        let existing = registration
            .identifiers
            .iter()
            .find_map(|ident| self.get_by_identifier(ident.domain(), ident.id()));

        let mut entry = match existing {
            Some(existing) => {
                debug!("Found existing device by identifier: {}", existing.id);
                self.unindex_entry(&existing);
                let mut entry = (*existing).clone();
                entry.modified_at = Utc::now();
                entry
            }
            None => DeviceEntry::new(registration.name),
        };

        for identifier in registration.identifiers {
            if !entry.identifiers.contains(identifier) {
                entry.identifiers.push(identifier.clone());
            }
        }
        entry = entry.with_config_entry(registration.config_entry_id);
        if registration.name.is_some() {
            entry.name = registration.name.map(String::from);
        }
        entry.manufacturer = registration.manufacturer.map(String::from);
        entry.entry_type = registration.entry_type;
        entry.configuration_url = registration.configuration_url.map(String::from);

        let entry = Arc::new(entry);
        if !self.is_registered(&entry.id) {
            info!("Registered new device: {}", entry.id);
        }
        self.index_entry(Arc::clone(&entry));
        entry
    }

    pub fn remove(&self, device_id: &str) -> Option<Arc<DeviceEntry>> {
        let entry = self
            .by_id
            .write()
            .ok()
            .and_then(|mut idx| idx.shift_remove(device_id))?;
        self.unindex_entry(&entry);
        info!("Removed device: {}", device_id);
        Some(entry)
    }

    /// Detach a config entry from its devices, removing orphaned devices
    pub fn clear_config_entry(&self, config_entry_id: &str) {
        for device in self.get_by_config_entry_id(config_entry_id) {
            if device.config_entries.len() <= 1 {
                self.remove(&device.id);
                continue;
            }

            self.unindex_entry(&device);
            let mut entry = (*device).clone();
            entry.config_entries.retain(|id| id != config_entry_id);
            entry.modified_at = Utc::now();
            self.index_entry(Arc::new(entry));
        }
    }

    fn is_registered(&self, device_id: &str) -> bool {
        self.by_id
            .read()
            .map(|idx| idx.contains_key(device_id))
            .unwrap_or(false)
    }

    pub fn iter(&self) -> Vec<Arc<DeviceEntry>> {
        self.by_id
            .read()
            .map(|idx| idx.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.by_id.read().map(|idx| idx.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
