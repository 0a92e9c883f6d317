//! IMGW-PIB integration
//!
//! Hydrological data (water level and temperature, flood warning and alarm)
//! for stations of the Polish Institute of Meteorology and Water Management.
//! Each config entry monitors one station through one polling coordinator.

pub mod binary_sensor;
pub mod client;
pub mod config_flow;
pub mod consts;
pub mod coordinator;
pub mod diagnostics;
pub mod model;
pub mod sensor;

use std::sync::{Arc, Weak};

use dashmap::DashMap;
use futures::FutureExt;
use ha_config_entries::{ConfigEntry, ConfigEntryNotReady, SetupError};
use ha_helpers::{ConfigFlow, DeviceInfo, EntityPlatform, HomeAssistant};
use tracing::{debug, info, warn};

pub use client::{ImgwPibClient, ImgwPibConnector, ImgwPibError, ImgwPibResult};
pub use config_flow::ImgwPibFlowHandler;
pub use consts::{CONF_STATION_ID, DOMAIN, UPDATE_INTERVAL};
pub use coordinator::{ImgwPibDataUpdateCoordinator, ImgwPibUpdater};
pub use diagnostics::async_get_config_entry_diagnostics;
pub use model::{HydrologicalData, SensorData};

/// What a loaded entry keeps alive
pub struct ImgwPibRuntimeData {
    pub coordinator: Arc<ImgwPibDataUpdateCoordinator>,
    pub device_info: DeviceInfo,
    platforms: Vec<EntityPlatform>,
}

impl ImgwPibRuntimeData {
    pub fn platform(&self, domain: &str) -> Option<&EntityPlatform> {
        self.platforms.iter().find(|p| p.domain() == domain)
    }
}

pub struct ImgwPib {
    hass: Weak<HomeAssistant>,
    connector: Arc<dyn ImgwPibConnector>,
    runtime: DashMap<String, Arc<ImgwPibRuntimeData>>,
}

impl ImgwPib {
    /// Register the config flow and the entry setup/unload handlers
    pub fn async_setup(hass: &Arc<HomeAssistant>, connector: Arc<dyn ImgwPibConnector>) -> Arc<Self> {
        let integration = Arc::new(Self {
            hass: Arc::downgrade(hass),
            connector,
            runtime: DashMap::new(),
        });

        let flow_connector = integration.connector.clone();
        hass.flows.register_handler(
            DOMAIN,
            Arc::new(move || {
                Box::new(ImgwPibFlowHandler::new(flow_connector.clone())) as Box<dyn ConfigFlow>
            }),
        );

        let setup = integration.clone();
        hass.config_entries.register_setup_handler(
            DOMAIN,
            Arc::new(move |entry| {
                let integration = setup.clone();
                async move { integration.async_setup_entry(entry).await }.boxed()
            }),
        );

        let unload = integration.clone();
        hass.config_entries.register_unload_handler(
            DOMAIN,
            Arc::new(move |entry| {
                let integration = unload.clone();
                async move { integration.async_unload_entry(entry).await }.boxed()
            }),
        );

        debug!("Set up {} integration", DOMAIN);
        integration
    }

    pub async fn async_setup_entry(&self, entry: ConfigEntry) -> Result<(), SetupError> {
        let hass = self
            .hass
            .upgrade()
            .ok_or_else(|| SetupError::Failed("Home Assistant is not running".to_string()))?;
        let station_id = entry
            .data_str(CONF_STATION_ID)
            .ok_or_else(|| SetupError::Failed(format!("Missing {} in entry data", CONF_STATION_ID)))?
            .to_string();

        let client = self
            .connector
            .create(Some(&station_id))
            .await
            .map_err(|err| ConfigEntryNotReady(err.to_string()))?;

        let coordinator = coordinator::new_coordinator(client.clone(), &station_id);
        coordinator.async_config_entry_first_refresh(&entry).await?;
        let data = coordinator
            .data()
            .ok_or_else(|| ConfigEntryNotReady(format!("No data for station {}", station_id)))?;

        let device_info = coordinator::device_info(
            &station_id,
            coordinator::device_name(client.as_ref(), &station_id, &data),
        );

        let platforms: Vec<EntityPlatform> = consts::PLATFORMS
            .iter()
            .map(|&domain| {
                let platform = EntityPlatform::new(
                    hass.states.clone(),
                    hass.registries.clone(),
                    domain,
                    DOMAIN,
                    &entry.entry_id,
                )
                .disable_new_entities(entry.pref_disable_new_entities);
                match domain {
                    binary_sensor::DOMAIN => {
                        binary_sensor::async_setup_entry(&platform, &coordinator, &device_info)
                    }
                    sensor::DOMAIN => sensor::async_setup_entry(&platform, &coordinator, &device_info),
                    other => warn!("Unknown platform {}", other),
                }
                platform
            })
            .collect();

        if let Err(err) = hass.registries.save_all().await {
            warn!("Failed to save registries: {}", err);
        }

        self.runtime.insert(
            entry.entry_id.clone(),
            Arc::new(ImgwPibRuntimeData {
                coordinator,
                device_info,
                platforms,
            }),
        );
        info!("Set up IMGW-PIB station {} ({})", station_id, entry.title);
        Ok(())
    }

    pub async fn async_unload_entry(&self, entry: ConfigEntry) -> bool {
        let Some((_, runtime)) = self.runtime.remove(&entry.entry_id) else {
            warn!("No runtime data for entry {}", entry.entry_id);
            return true;
        };

        runtime.coordinator.async_shutdown().await;
        for platform in &runtime.platforms {
            platform.async_reset();
        }
        debug!("Unloaded IMGW-PIB entry {}", entry.entry_id);
        true
    }

    pub fn runtime_data(&self, entry_id: &str) -> Option<Arc<ImgwPibRuntimeData>> {
        self.runtime.get(entry_id).map(|r| r.clone())
    }

    pub fn config_entry(&self, entry_id: &str) -> Option<ConfigEntry> {
        self.hass.upgrade()?.config_entries.get(entry_id)
    }
}
