//! IMGW-PIB sensor platform

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use ha_core::attrs;
use ha_helpers::{
    format_float, CoordinatorEntity, CoordinatorUpdateHandler, DeviceInfo, Entity, EntityHandle,
    EntityPlatform,
};
use serde_json::Value;

use super::consts::ATTRIBUTION;
use super::coordinator::{ImgwPibDataUpdateCoordinator, ImgwPibUpdater};
use super::model::HydrologicalData;

pub const DOMAIN: &str = "sensor";

pub struct ImgwPibSensorEntityDescription {
    pub key: &'static str,
    pub translation_key: &'static str,
    /// English entity name
    pub name: &'static str,
    pub device_class: &'static str,
    pub state_class: &'static str,
    pub native_unit_of_measurement: &'static str,
    /// Decimals frontends should show; the state keeps full precision
    pub suggested_display_precision: u8,
    pub value: fn(&HydrologicalData) -> Option<f64>,
}

pub const SENSOR_TYPES: &[ImgwPibSensorEntityDescription] = &[
    ImgwPibSensorEntityDescription {
        key: "water_level",
        translation_key: "water_level",
        name: "Water level",
        device_class: "distance",
        state_class: "measurement",
        native_unit_of_measurement: "cm",
        suggested_display_precision: 0,
        value: |data| data.water_level.value,
    },
    ImgwPibSensorEntityDescription {
        key: "water_temperature",
        translation_key: "water_temperature",
        name: "Water temperature",
        device_class: "temperature",
        state_class: "measurement",
        native_unit_of_measurement: "°C",
        suggested_display_precision: 1,
        value: |data| data.water_temperature.value,
    },
];

/// Add one sensor per description the current snapshot has a value for
pub fn async_setup_entry(
    platform: &EntityPlatform,
    coordinator: &Arc<ImgwPibDataUpdateCoordinator>,
    device_info: &DeviceInfo,
) {
    let Some(data) = coordinator.data() else {
        return;
    };

    let entities: Vec<Arc<dyn Entity>> = SENSOR_TYPES
        .iter()
        .filter(|description| (description.value)(&data).is_some())
        .map(|description| {
            Arc::new(ImgwPibSensorEntity::new(
                coordinator.clone(),
                description,
                device_info.clone(),
            )) as Arc<dyn Entity>
        })
        .collect();

    platform.async_add_entities(entities);
}

pub struct ImgwPibSensorEntity {
    coordinator_entity: CoordinatorEntity<ImgwPibUpdater>,
    description: &'static ImgwPibSensorEntityDescription,
    unique_id: String,
    device_info: DeviceInfo,
    native_value: RwLock<Option<f64>>,
}

impl ImgwPibSensorEntity {
    pub fn new(
        coordinator: Arc<ImgwPibDataUpdateCoordinator>,
        description: &'static ImgwPibSensorEntityDescription,
        device_info: DeviceInfo,
    ) -> Self {
        let unique_id = format!("{}_{}", coordinator.updater().station_id(), description.key);
        let native_value = coordinator
            .data()
            .and_then(|data| (description.value)(&data));

        Self {
            coordinator_entity: CoordinatorEntity::new(coordinator),
            description,
            unique_id,
            device_info,
            native_value: RwLock::new(native_value),
        }
    }

    pub fn native_value(&self) -> Option<f64> {
        self.native_value.read().ok().and_then(|v| *v)
    }
}

impl Entity for ImgwPibSensorEntity {
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

    fn available(&self) -> bool {
        self.coordinator_entity.available()
    }

    fn state(&self) -> Option<String> {
        self.native_value().map(format_float)
    }

    fn device_class(&self) -> Option<&'static str> {
        Some(self.description.device_class)
    }

    fn unit_of_measurement(&self) -> Option<&'static str> {
        Some(self.description.native_unit_of_measurement)
    }

    fn attribution(&self) -> Option<&'static str> {
        Some(ATTRIBUTION)
    }

    fn capability_attributes(&self) -> HashMap<String, Value> {
        HashMap::from([(
            attrs::STATE_CLASS.to_string(),
            Value::from(self.description.state_class),
        )])
    }

    fn added_to_hass(self: Arc<Self>, handle: EntityHandle) {
        self.coordinator_entity.async_added_to_hass(&self, handle);
    }

    fn will_remove_from_hass(&self) {
        self.coordinator_entity.async_will_remove_from_hass();
    }
}

impl CoordinatorUpdateHandler for ImgwPibSensorEntity {
    fn handle_coordinator_update(&self) {
        // A failed refresh keeps the old snapshot, so the value survives it
        let value = self
            .coordinator_entity
            .data()
            .and_then(|data| (self.description.value)(&data));
        if let Ok(mut native_value) = self.native_value.write() {
            *native_value = value;
        }
    }
}
