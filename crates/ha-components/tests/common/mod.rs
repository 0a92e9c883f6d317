//! Shared test harness for the IMGW-PIB integration
//!
//! `FakeConnector` stands in for the API client: tests script what the
//! station returns and inspect which calls were made.

#![allow(dead_code)]

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use ha_components::imgw_pib::{
    HydrologicalData, ImgwPib, ImgwPibClient, ImgwPibConnector, ImgwPibError, ImgwPibResult,
    ImgwPibRuntimeData, CONF_STATION_ID, DOMAIN,
};
use ha_config_entries::ConfigEntry;
use ha_helpers::HomeAssistant;
use indexmap::IndexMap;
use serde_json::Value;
use tempfile::TempDir;

pub const STATION_ID: &str = "123";

pub const WATER_LEVEL: &str = "sensor.river_name_station_name_water_level";
pub const WATER_TEMPERATURE: &str = "sensor.river_name_station_name_water_temperature";
pub const FLOOD_ALARM: &str = "binary_sensor.river_name_station_name_flood_alarm";
pub const FLOOD_WARNING: &str = "binary_sensor.river_name_station_name_flood_warning";

pub fn load_fixture(name: &str) -> String {
    let path = Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name);

    std::fs::read_to_string(&path)
        .unwrap_or_else(|e| panic!("Failed to load fixture '{}' from {:?}: {}", name, path, e))
}

pub fn load_json_fixture(name: &str) -> Value {
    let content = load_fixture(name);
    serde_json::from_str(&content)
        .unwrap_or_else(|e| panic!("Failed to parse fixture '{}' as JSON: {}", name, e))
}

pub fn hydrological_data() -> HydrologicalData {
    serde_json::from_value(load_json_fixture("hydrological_data.json"))
        .expect("fixture matches HydrologicalData")
}

pub fn hydrological_stations() -> IndexMap<String, String> {
    serde_json::from_value(load_json_fixture("hydrological_stations.json"))
        .expect("fixture is a station catalog")
}

/// One scripted station, shared by every client the connector creates
pub struct FakeClient {
    data: Mutex<ImgwPibResult<HydrologicalData>>,
    /// Last successful snapshot, the base for `update_data` after an outage
    last_ok: Mutex<HydrologicalData>,
    stations_error: Mutex<Option<ImgwPibError>>,
    stations: IndexMap<String, String>,
    pub data_calls: AtomicUsize,
    pub station_list_calls: AtomicUsize,
}

impl FakeClient {
    pub fn set_data(&self, data: ImgwPibResult<HydrologicalData>) {
        if let Ok(snapshot) = &data {
            *self.last_ok.lock().unwrap() = snapshot.clone();
        }
        *self.data.lock().unwrap() = data;
    }

    /// Apply `f` to the last successful data and serve the result
    pub fn update_data(&self, f: impl FnOnce(&mut HydrologicalData)) {
        let mut next = self.last_ok.lock().unwrap().clone();
        f(&mut next);
        self.set_data(Ok(next));
    }

    pub fn fail_station_list(&self, err: ImgwPibError) {
        *self.stations_error.lock().unwrap() = Some(err);
    }
}

#[async_trait]
impl ImgwPibClient for FakeClient {
    async fn get_hydrological_data(&self) -> ImgwPibResult<HydrologicalData> {
        self.data_calls.fetch_add(1, Ordering::SeqCst);
        self.data.lock().unwrap().clone()
    }

    async fn update_hydrological_stations(&self) -> ImgwPibResult<()> {
        self.station_list_calls.fetch_add(1, Ordering::SeqCst);
        match self.stations_error.lock().unwrap().clone() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn hydrological_stations(&self) -> IndexMap<String, String> {
        self.stations.clone()
    }
}

pub struct FakeConnector {
    pub client: Arc<FakeClient>,
    /// Station ids passed to `create`, None for catalog-only clients
    pub created: Mutex<Vec<Option<String>>>,
}

impl FakeConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            client: Arc::new(FakeClient {
                data: Mutex::new(Ok(hydrological_data())),
                last_ok: Mutex::new(hydrological_data()),
                stations_error: Mutex::new(None),
                stations: hydrological_stations(),
                data_calls: AtomicUsize::new(0),
                station_list_calls: AtomicUsize::new(0),
            }),
            created: Mutex::new(Vec::new()),
        })
    }

    pub fn station_clients_created(&self) -> usize {
        self.created
            .lock()
            .unwrap()
            .iter()
            .filter(|id| id.is_some())
            .count()
    }
}

#[async_trait]
impl ImgwPibConnector for FakeConnector {
    async fn create(&self, station_id: Option<&str>) -> ImgwPibResult<Arc<dyn ImgwPibClient>> {
        self.created.lock().unwrap().push(station_id.map(String::from));
        Ok(self.client.clone())
    }
}

pub struct TestEnv {
    pub dir: TempDir,
    pub hass: Arc<HomeAssistant>,
    pub integration: Arc<ImgwPib>,
    pub connector: Arc<FakeConnector>,
}

impl TestEnv {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let hass = HomeAssistant::new(dir.path());
        let connector = FakeConnector::new();
        let integration = ImgwPib::async_setup(&hass, connector.clone());
        Self {
            dir,
            hass,
            integration,
            connector,
        }
    }

    /// Add an entry for `station_id` and set it up
    pub async fn add_entry(&self, station_id: &str, f: impl FnOnce(&mut ConfigEntry)) -> ConfigEntry {
        let mut entry = ConfigEntry::new(DOMAIN, "Station Name (River Name)")
            .with_data([(CONF_STATION_ID.to_string(), Value::from(station_id))].into())
            .with_unique_id(station_id);
        f(&mut entry);

        let entry = self.hass.config_entries.add(entry).await.unwrap();
        self.hass.config_entries.setup(&entry.entry_id).await.unwrap();
        self.hass.config_entries.get(&entry.entry_id).unwrap()
    }

    pub fn runtime(&self, entry: &ConfigEntry) -> Arc<ImgwPibRuntimeData> {
        self.integration.runtime_data(&entry.entry_id).unwrap()
    }

    /// Run one coordinator refresh for `entry`
    pub async fn refresh(&self, entry: &ConfigEntry) {
        self.runtime(entry).coordinator.async_refresh().await;
    }

    pub fn state(&self, entity_id: &str) -> Option<String> {
        self.hass.states.get_state(entity_id)
    }
}

/// A set-up environment with one entry for the fixture station
pub async fn init_integration() -> (TestEnv, ConfigEntry) {
    let env = TestEnv::new();
    let entry = env.add_entry(STATION_ID, |_| {}).await;
    (env, entry)
}
