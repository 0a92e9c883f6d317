//! Polling coordinator for one IMGW-PIB station

use std::sync::Arc;

use async_trait::async_trait;
use ha_helpers::{DataUpdateCoordinator, DataUpdater, DeviceInfo, UpdateFailed};
use ha_registries::{DeviceEntryType, DeviceIdentifier};
use tracing::debug;

use super::client::ImgwPibClient;
use super::consts::{DOMAIN, HYDROLOGICAL_STATION_URL, MANUFACTURER, UPDATE_INTERVAL};
use super::model::HydrologicalData;

pub struct ImgwPibUpdater {
    client: Arc<dyn ImgwPibClient>,
    station_id: String,
}

impl ImgwPibUpdater {
    pub fn new(client: Arc<dyn ImgwPibClient>, station_id: impl Into<String>) -> Self {
        Self {
            client,
            station_id: station_id.into(),
        }
    }

    pub fn station_id(&self) -> &str {
        &self.station_id
    }
}

#[async_trait]
impl DataUpdater for ImgwPibUpdater {
    type Data = HydrologicalData;

    async fn async_update_data(&self) -> Result<HydrologicalData, UpdateFailed> {
        debug!(station_id = %self.station_id, "Fetching hydrological data");
        self.client
            .get_hydrological_data()
            .await
            .map_err(|err| UpdateFailed(err.to_string()))
    }
}

pub type ImgwPibDataUpdateCoordinator = DataUpdateCoordinator<ImgwPibUpdater>;

pub fn new_coordinator(
    client: Arc<dyn ImgwPibClient>,
    station_id: &str,
) -> Arc<ImgwPibDataUpdateCoordinator> {
    DataUpdateCoordinator::new(DOMAIN, UPDATE_INTERVAL, ImgwPibUpdater::new(client, station_id))
}

/// The service device representing a station
pub fn device_info(station_id: &str, name: String) -> DeviceInfo {
    DeviceInfo {
        identifiers: vec![DeviceIdentifier::new(DOMAIN, station_id)],
        name: Some(name),
        manufacturer: Some(MANUFACTURER.to_string()),
        entry_type: Some(DeviceEntryType::Service),
        configuration_url: Some(format!("{}{}", HYDROLOGICAL_STATION_URL, station_id)),
    }
}

/// Device name: the catalog's label for the station, else `"{station} ({river})"`
pub fn device_name(client: &dyn ImgwPibClient, station_id: &str, data: &HydrologicalData) -> String {
    client
        .hydrological_stations()
        .get(station_id)
        .cloned()
        .unwrap_or_else(|| data.display_name())
}
