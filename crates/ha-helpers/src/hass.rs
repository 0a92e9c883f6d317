//! The host object integrations are set up against

use std::path::{Path, PathBuf};
use std::sync::Arc;

use ha_config_entries::{ConfigEntries, ConfigEntriesResult, ConfigEntry};
use ha_event_bus::EventBus;
use ha_registries::{Registries, StorageResult};
use ha_state_store::StateStore;
use tracing::info;

use crate::data_entry_flow::FlowManager;

/// Shared handles to the event bus, state machine, registries, config
/// entries and config flows
pub struct HomeAssistant {
    pub config_dir: PathBuf,
    pub bus: Arc<EventBus>,
    pub states: Arc<StateStore>,
    pub registries: Arc<Registries>,
    pub config_entries: Arc<ConfigEntries>,
    pub flows: FlowManager,
}

impl HomeAssistant {
    pub fn new(config_dir: impl AsRef<Path>) -> Arc<Self> {
        let config_dir = config_dir.as_ref().to_path_buf();
        let bus = Arc::new(EventBus::new());
        let states = Arc::new(StateStore::new(bus.clone()));
        let registries = Arc::new(Registries::new(&config_dir));
        let config_entries = Arc::new(ConfigEntries::new(registries.storage.clone()));
        let flows = FlowManager::new(config_entries.clone());

        Arc::new(Self {
            config_dir,
            bus,
            states,
            registries,
            config_entries,
            flows,
        })
    }

    /// Load registries and config entries from storage
    pub async fn async_load(&self) -> StorageResult<()> {
        self.registries.load_all().await?;
        self.config_entries.load().await?;
        info!(
            "Loaded {} config entries from {}",
            self.config_entries.len(),
            self.config_dir.display()
        );
        Ok(())
    }

    pub async fn async_save(&self) -> StorageResult<()> {
        self.registries.save_all().await
    }

    /// Unload and delete a config entry with its entities and devices
    pub async fn async_remove_config_entry(&self, entry_id: &str) -> ConfigEntriesResult<ConfigEntry> {
        let entry = self.config_entries.remove(entry_id).await?;
        self.registries.remove_config_entry(entry_id);
        self.registries.save_all().await?;
        Ok(entry)
    }
}
