//! Entity platforms
//!
//! An [`EntityPlatform`] owns the entities one config entry adds to one
//! entity domain. Adding an entity registers its device and registry entry,
//! picks its entity ID and writes its first state.

use std::sync::{Arc, Mutex};

use ha_core::{slugify, Context, EntityId};
use ha_registries::{DeviceRegistration, DisabledBy, EntityRegistration, Registries};
use ha_state_store::StateStore;
use indexmap::IndexMap;
use tracing::{debug, info, warn};

use crate::entity::{friendly_name, Entity, EntityHandle};

struct PlatformEntity {
    entity: Arc<dyn Entity>,
    handle: EntityHandle,
}

pub struct EntityPlatform {
    states: Arc<StateStore>,
    registries: Arc<Registries>,
    /// Entity domain, e.g. `sensor`
    domain: &'static str,
    /// Integration providing the entities
    platform_name: String,
    config_entry_id: String,
    /// Register entities seen for the first time as disabled
    disable_new_entities: bool,
    entities: Mutex<IndexMap<String, PlatformEntity>>,
}

impl EntityPlatform {
    pub fn new(
        states: Arc<StateStore>,
        registries: Arc<Registries>,
        domain: &'static str,
        platform_name: impl Into<String>,
        config_entry_id: impl Into<String>,
    ) -> Self {
        Self {
            states,
            registries,
            domain,
            platform_name: platform_name.into(),
            config_entry_id: config_entry_id.into(),
            disable_new_entities: false,
            entities: Mutex::new(IndexMap::new()),
        }
    }

    /// Follow the config entry's `pref_disable_new_entities`
    pub fn disable_new_entities(mut self, disable: bool) -> Self {
        self.disable_new_entities = disable;
        self
    }

    pub fn domain(&self) -> &'static str {
        self.domain
    }

    pub fn platform_name(&self) -> &str {
        &self.platform_name
    }

    /// Add entities and write their initial state
    ///
    /// Returns the entity IDs that were added. Entities whose registry entry
    /// is disabled, or whose unique id is already on this platform, are
    /// skipped.
    pub fn async_add_entities(&self, new_entities: Vec<Arc<dyn Entity>>) -> Vec<EntityId> {
        let mut added = Vec::with_capacity(new_entities.len());

        for entity in new_entities {
            let unique_id = entity.unique_id();
            if self.contains(&unique_id) {
                warn!(
                    "Platform {} does not generate unique IDs. ID {} already exists",
                    self.platform_name, unique_id
                );
                continue;
            }
            if let Some(entity_id) = self.add_entity(unique_id, entity) {
                added.push(entity_id);
            }
        }

        info!(
            "Added {} {} entities for {}",
            added.len(),
            self.domain,
            self.platform_name
        );
        added
    }

    fn add_entity(&self, unique_id: String, entity: Arc<dyn Entity>) -> Option<EntityId> {
        let device = entity.device_info().map(|info| {
            self.registries.devices.async_get_or_create(DeviceRegistration {
                config_entry_id: &self.config_entry_id,
                identifiers: &info.identifiers,
                name: info.name.as_deref(),
                manufacturer: info.manufacturer.as_deref(),
                entry_type: info.entry_type,
                configuration_url: info.configuration_url.as_deref(),
            })
        });

        let friendly_name = friendly_name(
            entity.as_ref(),
            device.as_ref().and_then(|d| d.name.as_deref()),
        );
        let suggested_object_id = suggested_object_id(friendly_name.as_deref(), &unique_id);
        let entity_name = entity.name();

        let entry = self.registries.entities.async_get_or_create(
            self.domain,
            &self.platform_name,
            &unique_id,
            &suggested_object_id,
            EntityRegistration {
                config_entry_id: Some(&self.config_entry_id),
                device_id: device.as_ref().map(|d| d.id.as_str()),
                original_name: entity_name.as_deref(),
                original_device_class: entity.device_class(),
                unit_of_measurement: entity.unit_of_measurement(),
                translation_key: entity.translation_key(),
                has_entity_name: entity.has_entity_name(),
                disabled_by: self
                    .disable_new_entities
                    .then_some(DisabledBy::Integration),
            },
        );

        if entry.is_disabled() {
            debug!("Not adding disabled entity {}", entry.entity_id);
            return None;
        }

        let entity_id = match entry.entity_id.parse::<EntityId>() {
            Ok(entity_id) => entity_id,
            Err(err) => {
                warn!("Invalid entity ID {}: {}", entry.entity_id, err);
                return None;
            }
        };

        let handle = EntityHandle::new(entity_id.clone(), friendly_name, self.states.clone());
        entity.clone().added_to_hass(handle.clone());
        handle.write_state(entity.as_ref());

        if let Ok(mut entities) = self.entities.lock() {
            entities.insert(unique_id, PlatformEntity { entity, handle });
        }
        Some(entity_id)
    }

    fn contains(&self, unique_id: &str) -> bool {
        self.entities
            .lock()
            .map(|entities| entities.contains_key(unique_id))
            .unwrap_or(false)
    }

    pub fn entity_ids(&self) -> Vec<EntityId> {
        self.entities
            .lock()
            .map(|entities| {
                entities
                    .values()
                    .map(|e| e.handle.entity_id().clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.entities.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove every entity from the state machine
    ///
    /// Registry entries stay so entity IDs survive a reload.
    pub fn async_reset(&self) {
        let removed: Vec<PlatformEntity> = match self.entities.lock() {
            Ok(mut entities) => entities.drain(..).map(|(_, e)| e).collect(),
            Err(_) => return,
        };

        for PlatformEntity { entity, handle } in removed {
            entity.will_remove_from_hass();
            self.states.remove(handle.entity_id(), Context::new());
        }
        debug!("Reset {} platform of {}", self.domain, self.platform_name);
    }
}

/// Slug of the friendly name, else of the unique id
fn suggested_object_id(friendly_name: Option<&str>, unique_id: &str) -> String {
    [friendly_name.map(slugify), Some(slugify(unique_id))]
        .into_iter()
        .flatten()
        .find(|slug| !slug.is_empty())
        .unwrap_or_else(|| "unnamed_device".to_string())
}
