//! IMGW-PIB binary sensor platform

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use ha_core::{STATE_OFF, STATE_ON};
use ha_helpers::{
    CoordinatorEntity, CoordinatorUpdateHandler, DeviceInfo, Entity, EntityHandle, EntityPlatform,
};
use serde_json::Value;

use super::consts::ATTRIBUTION;
use super::coordinator::{ImgwPibDataUpdateCoordinator, ImgwPibUpdater};
use super::model::HydrologicalData;

pub const DOMAIN: &str = "binary_sensor";

pub struct ImgwPibBinarySensorEntityDescription {
    pub key: &'static str,
    pub translation_key: &'static str,
    /// English entity name
    pub name: &'static str,
    pub device_class: &'static str,
    pub value: fn(&HydrologicalData) -> Option<bool>,
    pub attrs: fn(&HydrologicalData) -> HashMap<String, Value>,
}

pub const BINARY_SENSOR_TYPES: &[ImgwPibBinarySensorEntityDescription] = &[
    ImgwPibBinarySensorEntityDescription {
        key: "flood_warning",
        translation_key: "flood_warning",
        name: "Flood warning",
        device_class: "safety",
        value: |data| data.flood_warning,
        attrs: |data| {
            HashMap::from([(
                "warning_level".to_string(),
                Value::from(data.flood_warning_level.value),
            )])
        },
    },
    ImgwPibBinarySensorEntityDescription {
        key: "flood_alarm",
        translation_key: "flood_alarm",
        name: "Flood alarm",
        device_class: "safety",
        value: |data| data.flood_alarm,
        attrs: |data| {
            HashMap::from([(
                "alarm_level".to_string(),
                Value::from(data.flood_alarm_level.value),
            )])
        },
    },
];

/// Add one binary sensor per description the current snapshot has a value for
pub fn async_setup_entry(
    platform: &EntityPlatform,
    coordinator: &Arc<ImgwPibDataUpdateCoordinator>,
    device_info: &DeviceInfo,
) {
    let Some(data) = coordinator.data() else {
        return;
    };

    let entities: Vec<Arc<dyn Entity>> = BINARY_SENSOR_TYPES
        .iter()
        .filter(|description| (description.value)(&data).is_some())
        .map(|description| {
            Arc::new(ImgwPibBinarySensorEntity::new(
                coordinator.clone(),
                description,
                device_info.clone(),
            )) as Arc<dyn Entity>
        })
        .collect();

    platform.async_add_entities(entities);
}

pub struct ImgwPibBinarySensorEntity {
    coordinator_entity: CoordinatorEntity<ImgwPibUpdater>,
    description: &'static ImgwPibBinarySensorEntityDescription,
    unique_id: String,
    device_info: DeviceInfo,
    is_on: RwLock<Option<bool>>,
}

impl ImgwPibBinarySensorEntity {
    pub fn new(
        coordinator: Arc<ImgwPibDataUpdateCoordinator>,
        description: &'static ImgwPibBinarySensorEntityDescription,
        device_info: DeviceInfo,
    ) -> Self {
        let unique_id = format!("{}_{}", coordinator.updater().station_id(), description.key);
        let is_on = coordinator.data().and_then(|data| (description.value)(&data));

        Self {
            coordinator_entity: CoordinatorEntity::new(coordinator),
            description,
            unique_id,
            device_info,
            is_on: RwLock::new(is_on),
        }
    }

    pub fn is_on(&self) -> Option<bool> {
        self.is_on.read().ok().and_then(|v| *v)
    }
}

impl Entity for ImgwPibBinarySensorEntity {
    fn platform_domain(&self) -> &'static str {
        DOMAIN
    }

    fn unique_id(&self) -> String {
        self.unique_id.clone()
    }

    fn has_entity_name(&self) -> bool {
        true
    }

    fn name(&self) -> Option<String> {
        Some(self.description.name.to_string())
    }

    fn translation_key(&self) -> Option<&'static str> {
        Some(self.description.translation_key)
    }

    fn device_info(&self) -> Option<DeviceInfo> {
        Some(self.device_info.clone())
    }

    /// Unlike sensors, a binary sensor is also unavailable while the
    /// snapshot has no value for it
    fn available(&self) -> bool {
        self.coordinator_entity.available()
            && self
                .coordinator_entity
                .data()
                .and_then(|data| (self.description.value)(&data))
                .is_some()
    }

    fn state(&self) -> Option<String> {
        self.is_on()
            .map(|on| (if on { STATE_ON } else { STATE_OFF }).to_string())
    }

    fn device_class(&self) -> Option<&'static str> {
        Some(self.description.device_class)
    }

    fn attribution(&self) -> Option<&'static str> {
        Some(ATTRIBUTION)
    }

    fn extra_state_attributes(&self) -> HashMap<String, Value> {
        self.coordinator_entity
            .data()
            .map(|data| (self.description.attrs)(&data))
            .unwrap_or_default()
    }

    fn added_to_hass(self: Arc<Self>, handle: EntityHandle) {
        self.coordinator_entity.async_added_to_hass(&self, handle);
    }

    fn will_remove_from_hass(&self) {
        self.coordinator_entity.async_will_remove_from_hass();
    }
}

impl CoordinatorUpdateHandler for ImgwPibBinarySensorEntity {
    fn handle_coordinator_update(&self) {
        let value = self
            .coordinator_entity
            .data()
            .and_then(|data| (self.description.value)(&data));
        if let Ok(mut is_on) = self.is_on.write() {
            *is_on = value;
        }
    }
}
