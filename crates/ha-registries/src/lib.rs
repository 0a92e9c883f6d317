//! Home Assistant Registries
//!
//! Persistent registries for the entities and devices created by config
//! entries. Both use JSON persistence in the `.storage/` directory.

pub mod storage;

pub mod device_registry;
pub mod entity_registry;

pub use storage::{Storable, Storage, StorageError, StorageFile, StorageResult};

pub use entity_registry::{
    DisabledBy, EntityEntry, EntityRegistration, EntityRegistry, EntityRegistryData,
};

pub use device_registry::{
    DeviceEntry, DeviceEntryType, DeviceIdentifier, DeviceRegistration, DeviceRegistry,
    DeviceRegistryData,
};

use std::sync::Arc;

/// All registries bundled together
pub struct Registries {
    pub storage: Arc<Storage>,
    pub entities: EntityRegistry,
    pub devices: DeviceRegistry,
}

impl Registries {
    pub fn new(config_dir: impl AsRef<std::path::Path>) -> Self {
        let storage = Arc::new(Storage::new(config_dir));

        Self {
            entities: EntityRegistry::new(storage.clone()),
            devices: DeviceRegistry::new(storage.clone()),
            storage,
        }
    }

    pub async fn load_all(&self) -> StorageResult<()> {
        self.entities.load().await?;
        self.devices.load().await?;
        Ok(())
    }

    pub async fn save_all(&self) -> StorageResult<()> {
        self.entities.save().await?;
        self.devices.save().await?;
        Ok(())
    }

    /// Drop every entity and device owned by a config entry
    pub fn remove_config_entry(&self, config_entry_id: &str) {
        for entity in self.entities.get_by_config_entry_id(config_entry_id) {
            self.entities.remove(&entity.entity_id);
        }
        self.devices.clear_config_entry(config_entry_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_registries_bundle() {
        let temp_dir = TempDir::new().unwrap();
        let registries = Registries::new(temp_dir.path());

        let identifiers = [DeviceIdentifier::new("imgw_pib", "123")];
        let device = registries.devices.async_get_or_create(DeviceRegistration {
            config_entry_id: "entry1",
            identifiers: &identifiers,
            name: Some("Station"),
            ..Default::default()
        });
        registries.entities.async_get_or_create(
            "sensor",
            "imgw_pib",
            "123_water_level",
            "station_water_level",
            EntityRegistration {
                config_entry_id: Some("entry1"),
                device_id: Some(&device.id),
                ..Default::default()
            },
        );

        registries.save_all().await.unwrap();

        let registries2 = Registries::new(temp_dir.path());
        registries2.load_all().await.unwrap();
        assert_eq!(registries2.entities.len(), 1);
        assert_eq!(registries2.devices.len(), 1);

        registries2.remove_config_entry("entry1");
        assert!(registries2.entities.is_empty());
        assert!(registries2.devices.is_empty());
    }
}
