//! IMGW-PIB entry lifecycle tests

mod common;

use std::sync::atomic::Ordering;
use std::time::Duration;

use common::*;
use ha_components::imgw_pib::{ImgwPibError, UPDATE_INTERVAL};
use ha_config_entries::ConfigEntryState;
use ha_registries::DisabledBy;
use tokio_test::assert_ok;

#[tokio::test]
async fn test_setup_retry_when_station_unreachable() {
    let env = TestEnv::new();
    env.connector
        .client
        .set_data(Err(ImgwPibError::Transport("connection refused".into())));

    let entry = env.add_entry(STATION_ID, |_| {}).await;
    assert_eq!(entry.state, ConfigEntryState::SetupRetry);
    assert_eq!(entry.reason.as_deref(), Some("Connection error: connection refused"));
    assert!(env.integration.runtime_data(&entry.entry_id).is_none());
    assert_eq!(env.hass.states.entity_count(), 0);

    env.connector.client.set_data(Ok(hydrological_data()));
    assert_ok!(env.hass.config_entries.setup(&entry.entry_id).await);

    let entry = env.hass.config_entries.get(&entry.entry_id).unwrap();
    assert_eq!(entry.state, ConfigEntryState::Loaded);
    assert_eq!(env.state(WATER_LEVEL).as_deref(), Some("526.0"));
}

#[tokio::test]
async fn test_unload_entry() {
    let (env, entry) = init_integration().await;
    let coordinator = env.runtime(&entry).coordinator.clone();
    assert!(coordinator.is_polling());
    assert_eq!(coordinator.listener_count(), 4);
    assert_eq!(env.runtime(&entry).platform("sensor").unwrap().len(), 2);
    assert_eq!(env.runtime(&entry).platform("binary_sensor").unwrap().len(), 2);

    assert_ok!(env.hass.config_entries.unload(&entry.entry_id).await);

    let entry = env.hass.config_entries.get(&entry.entry_id).unwrap();
    assert_eq!(entry.state, ConfigEntryState::NotLoaded);
    assert!(env.integration.runtime_data(&entry.entry_id).is_none());
    assert!(!coordinator.is_polling());
    assert_eq!(coordinator.listener_count(), 0);
    assert_eq!(env.hass.states.entity_count(), 0);

    // Registry entries survive so a reload keeps the entity ids
    assert!(env.hass.registries.entities.get(WATER_LEVEL).is_some());
}

#[tokio::test]
async fn test_reload_keeps_entity_ids() {
    let (env, entry) = init_integration().await;

    assert_ok!(env.hass.config_entries.reload(&entry.entry_id).await);

    assert_eq!(env.state(WATER_LEVEL).as_deref(), Some("526.0"));
    assert_eq!(env.state(FLOOD_ALARM).as_deref(), Some("off"));
    assert_eq!(env.hass.registries.entities.len(), 4);
}

#[tokio::test]
async fn test_remove_entry_clears_registries() {
    let (env, entry) = init_integration().await;
    assert_eq!(env.hass.registries.entities.len(), 4);
    assert_eq!(env.hass.registries.devices.len(), 1);

    assert_ok!(env.hass.async_remove_config_entry(&entry.entry_id).await);

    assert!(env.hass.config_entries.get(&entry.entry_id).is_none());
    assert_eq!(env.hass.states.entity_count(), 0);
    assert!(env.hass.registries.entities.is_empty());
    assert!(env.hass.registries.devices.is_empty());
}

#[tokio::test]
async fn test_polling_disabled() {
    let env = TestEnv::new();
    let entry = env
        .add_entry(STATION_ID, |entry| entry.pref_disable_polling = true)
        .await;

    assert_eq!(entry.state, ConfigEntryState::Loaded);
    assert!(!env.runtime(&entry).coordinator.is_polling());
    assert_eq!(env.state(WATER_LEVEL).as_deref(), Some("526.0"));
}

#[tokio::test]
async fn test_new_entities_disabled_by_entry_preference() {
    let env = TestEnv::new();
    let entry = env
        .add_entry(STATION_ID, |entry| entry.pref_disable_new_entities = true)
        .await;

    assert_eq!(entry.state, ConfigEntryState::Loaded);
    assert_eq!(env.hass.states.entity_count(), 0);
    assert!(env.runtime(&entry).platform("sensor").unwrap().is_empty());

    let registered = env.hass.registries.entities.get(WATER_LEVEL).unwrap();
    assert_eq!(registered.disabled_by, Some(DisabledBy::Integration));
}

#[tokio::test(start_paused = true)]
async fn test_periodic_refresh() {
    let (env, entry) = init_integration().await;
    let fetches = env.connector.client.data_calls.load(Ordering::SeqCst);

    env.connector.client.update_data(|data| {
        data.water_level.value = Some(540.0);
        data.flood_warning = Some(true);
    });
    tokio::time::sleep(UPDATE_INTERVAL + Duration::from_secs(1)).await;

    assert!(env.connector.client.data_calls.load(Ordering::SeqCst) > fetches);
    assert_eq!(env.state(WATER_LEVEL).as_deref(), Some("540.0"));
    assert_eq!(env.state(FLOOD_WARNING).as_deref(), Some("on"));
    assert!(env.runtime(&entry).coordinator.last_update_success());
}

#[tokio::test]
async fn test_entries_are_persisted() {
    let (env, entry) = init_integration().await;

    let hass = ha_helpers::HomeAssistant::new(env.dir.path());
    hass.async_load().await.unwrap();

    let loaded = hass.config_entries.get(&entry.entry_id).unwrap();
    assert_eq!(loaded.unique_id.as_deref(), Some(STATION_ID));
    assert_eq!(loaded.data_str("station_id"), Some(STATION_ID));
    assert_eq!(loaded.state, ConfigEntryState::NotLoaded);
    assert_eq!(
        hass.registries
            .entities
            .async_get_entity_id("sensor", "imgw_pib", "123_water_level")
            .as_deref(),
        Some(WATER_LEVEL)
    );
}
