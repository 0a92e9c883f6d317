//! Entity Registry
//!
//! Remembers every entity an integration has created, keyed by
//! `(domain, platform, unique_id)`, so that the same station keeps the same
//! entity ID across restarts.

use std::collections::HashSet;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::storage::{Storable, Storage, StorageResult};

pub const STORAGE_KEY: &str = "core.entity_registry";
pub const STORAGE_VERSION: u32 = 1;
pub const STORAGE_MINOR_VERSION: u32 = 1;

/// Reason an entity was disabled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisabledBy {
    /// The config entry asked for new entities to start disabled
    Integration,
    User,
}

/// A registered entity entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityEntry {
    /// Internal ULID
    pub id: String,
    /// Full entity ID (domain.object_id)
    pub entity_id: String,
    /// Integration that provides this entity
    pub platform: String,
    /// Platform-specific unique identifier, e.g. `"{station_id}_water_level"`
    pub unique_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_entry_id: Option<String>,

    /// Name the integration gave the entity
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_device_class: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit_of_measurement: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub translation_key: Option<String>,
    #[serde(default)]
    pub has_entity_name: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disabled_by: Option<DisabledBy>,

    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub modified_at: DateTime<Utc>,
}

impl EntityEntry {
    pub fn new(
        entity_id: impl Into<String>,
        platform: impl Into<String>,
        unique_id: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: ulid::Ulid::new().to_string().to_lowercase(),
            entity_id: entity_id.into(),
            platform: platform.into(),
            unique_id: unique_id.into(),
            device_id: None,
            config_entry_id: None,
            original_name: None,
            original_device_class: None,
            unit_of_measurement: None,
            translation_key: None,
            has_entity_name: false,
            disabled_by: None,
            created_at: now,
            modified_at: now,
        }
    }

    pub fn domain(&self) -> &str {
        self.entity_id
            .split_once('.')
            .map(|(domain, _)| domain)
            .unwrap_or(&self.entity_id)
    }

    pub fn is_disabled(&self) -> bool {
        self.disabled_by.is_some()
    }

    fn key(&self) -> RegistryKey {
        (
            self.domain().to_string(),
            self.platform.clone(),
            self.unique_id.clone(),
        )
    }
}

/// Optional properties recorded when an entity is registered
#[derive(Debug, Clone, Default)]
pub struct EntityRegistration<'a> {
    pub config_entry_id: Option<&'a str>,
    pub device_id: Option<&'a str>,
    pub original_name: Option<&'a str>,
    pub original_device_class: Option<&'a str>,
    pub unit_of_measurement: Option<&'a str>,
    pub translation_key: Option<&'a str>,
    pub has_entity_name: bool,
    /// Only applied when the entry is first created
    pub disabled_by: Option<DisabledBy>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EntityRegistryData {
    pub entities: Vec<EntityEntry>,
}

impl Storable for EntityRegistryData {
    const KEY: &'static str = STORAGE_KEY;
    const VERSION: u32 = STORAGE_VERSION;
    const MINOR_VERSION: u32 = STORAGE_MINOR_VERSION;
}

type RegistryKey = (String, String, String);

/// Entity registry with secondary indexes
///
/// Entries are stored as `Arc<EntityEntry>` so reads never clone an entry.
pub struct EntityRegistry {
    storage: Arc<Storage>,

    /// Primary index: entity_id -> entry, in registration order
    by_entity_id: RwLock<IndexMap<String, Arc<EntityEntry>>>,

    /// (domain, platform, unique_id) -> entity_id
    by_key: DashMap<RegistryKey, String>,

    /// config_entry_id -> entity_ids
    by_config_entry_id: DashMap<String, HashSet<String>>,

    /// device_id -> entity_ids
    by_device_id: DashMap<String, HashSet<String>>,
}

impl EntityRegistry {
    pub fn new(storage: Arc<Storage>) -> Self {
        Self {
            storage,
            by_entity_id: RwLock::new(IndexMap::new()),
            by_key: DashMap::new(),
            by_config_entry_id: DashMap::new(),
            by_device_id: DashMap::new(),
        }
    }

    pub async fn load(&self) -> StorageResult<()> {
        if let Some(data) = self.storage.load::<EntityRegistryData>().await? {
            info!("Loading {} entities from storage", data.entities.len());
            for entry in data.entities {
                self.index_entry(Arc::new(entry));
            }
        }
        Ok(())
    }

    pub async fn save(&self) -> StorageResult<()> {
        let data = EntityRegistryData {
            entities: self.iter().iter().map(|e| (**e).clone()).collect(),
        };
        self.storage.save(&data).await?;
        debug!("Saved {} entities to storage", data.entities.len());
        Ok(())
    }

    fn index_entry(&self, entry: Arc<EntityEntry>) {
        let entity_id = entry.entity_id.clone();

        self.by_key.insert(entry.key(), entity_id.clone());
        if let Some(ref config_entry_id) = entry.config_entry_id {
            self.by_config_entry_id
                .entry(config_entry_id.clone())
                .or_default()
                .insert(entity_id.clone());
        }
        if let Some(ref device_id) = entry.device_id {
            self.by_device_id
                .entry(device_id.clone())
                .or_default()
                .insert(entity_id.clone());
        }

        if let Ok(mut idx) = self.by_entity_id.write() {
            idx.insert(entity_id, entry);
        }
    }

    fn unindex_entry(&self, entry: &EntityEntry) {
        self.by_key.remove(&entry.key());
        if let Some(ref config_entry_id) = entry.config_entry_id {
            if let Some(mut ids) = self.by_config_entry_id.get_mut(config_entry_id) {
                ids.remove(&entry.entity_id);
            }
        }
        if let Some(ref device_id) = entry.device_id {
            if let Some(mut ids) = self.by_device_id.get_mut(device_id) {
                ids.remove(&entry.entity_id);
            }
        }
    }

    pub fn get(&self, entity_id: &str) -> Option<Arc<EntityEntry>> {
        self.by_entity_id
            .read()
            .ok()
            .and_then(|idx| idx.get(entity_id).cloned())
    }

    /// Look up the entity ID registered for a platform's unique ID
    pub fn async_get_entity_id(&self, domain: &str, platform: &str, unique_id: &str) -> Option<String> {
        self.by_key
            .get(&(domain.to_string(), platform.to_string(), unique_id.to_string()))
            .map(|r| r.value().clone())
    }

    pub fn get_by_config_entry_id(&self, config_entry_id: &str) -> Vec<Arc<EntityEntry>> {
        self.by_config_entry_id
            .get(config_entry_id)
            .map(|ids| ids.iter().filter_map(|id| self.get(id)).collect())
            .unwrap_or_default()
    }

    pub fn get_by_device_id(&self, device_id: &str) -> Vec<Arc<EntityEntry>> {
        self.by_device_id
            .get(device_id)
            .map(|ids| ids.iter().filter_map(|id| self.get(id)).collect())
            .unwrap_or_default()
    }

    /// Get or create the registry entry of an entity
    ///
    /// An existing entry keeps its entity ID; only the properties the
    /// integration reports are refreshed. New entries get
    /// `{domain}.{suggested_object_id}`, suffixed with `_2`, `_3`, ... when taken.
    pub fn async_get_or_create(
        &self,
        domain: &str,
        platform: &str,
        unique_id: &str,
        suggested_object_id: &str,
        registration: EntityRegistration<'_>,
    ) -> Arc<EntityEntry> {
        let apply = |entry: &mut EntityEntry| {
            entry.config_entry_id = registration.config_entry_id.map(String::from);
            entry.device_id = registration.device_id.map(String::from);
            entry.original_name = registration.original_name.map(String::from);
            entry.original_device_class = registration.original_device_class.map(String::from);
            entry.unit_of_measurement = registration.unit_of_measurement.map(String::from);
            entry.translation_key = registration.translation_key.map(String::from);
            entry.has_entity_name = registration.has_entity_name;
        };

        if let Some(entity_id) = self.async_get_entity_id(domain, platform, unique_id) {
            debug!("Found existing entity by unique_id: {}", entity_id);
            if let Some(updated) = self.update(&entity_id, |entry| {
                apply(entry);
                entry.modified_at = Utc::now();
            }) {
                return updated;
            }
        }

        let entity_id = self.generate_entity_id(domain, suggested_object_id);
        let mut entry = EntityEntry::new(entity_id, platform, unique_id);
        apply(&mut entry);
        entry.disabled_by = registration.disabled_by;

        let entry = Arc::new(entry);
        self.index_entry(Arc::clone(&entry));
        info!("Registered new entity: {}", entry.entity_id);
        entry
    }

    /// Update an entry in place, returning the new entry
    pub fn update<F>(&self, entity_id: &str, f: F) -> Option<Arc<EntityEntry>>
    where
        F: FnOnce(&mut EntityEntry),
    {
        let current = self.get(entity_id)?;
        self.unindex_entry(&current);

        let mut entry = (*current).clone();
        f(&mut entry);
        // The entity ID is the primary key and never changes here
        entry.entity_id = current.entity_id.clone();

        let entry = Arc::new(entry);
        self.index_entry(Arc::clone(&entry));
        Some(entry)
    }

    pub fn remove(&self, entity_id: &str) -> Option<Arc<EntityEntry>> {
        let entry = self
            .by_entity_id
            .write()
            .ok()
            .and_then(|mut idx| idx.shift_remove(entity_id))?;
        self.unindex_entry(&entry);
        info!("Removed entity: {}", entity_id);
        Some(entry)
    }

    pub fn is_registered(&self, entity_id: &str) -> bool {
        self.by_entity_id
            .read()
            .map(|idx| idx.contains_key(entity_id))
            .unwrap_or(false)
    }

    /// Generate an entity ID that doesn't conflict with existing registrations
    pub fn generate_entity_id(&self, domain: &str, suggested_object_id: &str) -> String {
        let preferred = format!("{}.{}", domain, suggested_object_id);
        if !self.is_registered(&preferred) {
            return preferred;
        }

        (2..)
            .map(|n| format!("{}_{}", preferred, n))
            .find(|candidate| !self.is_registered(candidate))
            .unwrap_or(preferred)
    }

    pub fn entity_ids(&self) -> Vec<String> {
        self.by_entity_id
            .read()
            .map(|idx| idx.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Snapshot of all entries in registration order
    pub fn iter(&self) -> Vec<Arc<EntityEntry>> {
        self.by_entity_id
            .read()
            .map(|idx| idx.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.by_entity_id.read().map(|idx| idx.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
