//! IMGW-PIB binary sensor platform tests

mod common;

use common::*;
use ha_components::imgw_pib::ImgwPibError;
use ha_core::STATE_UNAVAILABLE;
use serde_json::json;

#[tokio::test]
async fn test_binary_sensor_states() {
    let (env, _entry) = init_integration().await;

    let alarm = env.hass.states.get(FLOOD_ALARM).unwrap();
    assert_eq!(alarm.state, "off");
    assert_eq!(alarm.attributes["alarm_level"], json!(630.0));
    assert_eq!(alarm.attributes["device_class"], "safety");
    assert_eq!(alarm.attributes["attribution"], "Data provided by IMGW-PIB");
    assert_eq!(
        alarm.attributes["friendly_name"],
        "River Name (Station Name) Flood alarm"
    );

    let warning = env.hass.states.get(FLOOD_WARNING).unwrap();
    assert_eq!(warning.state, "off");
    assert_eq!(warning.attributes["warning_level"], json!(590.0));

    let registered = env.hass.registries.entities.get(FLOOD_WARNING).unwrap();
    assert_eq!(registered.unique_id, "123_flood_warning");
}

#[tokio::test]
async fn test_binary_sensor_not_created_without_value() {
    let env = TestEnv::new();
    env.connector.client.update_data(|data| {
        data.flood_alarm = None;
    });
    env.add_entry(STATION_ID, |_| {}).await;

    assert!(env.state(FLOOD_ALARM).is_none());
    assert_eq!(env.state(FLOOD_WARNING).as_deref(), Some("off"));
    assert!(env.hass.registries.entities.get(FLOOD_ALARM).is_none());
}

#[tokio::test]
async fn test_availability() {
    let (env, entry) = init_integration().await;
    assert_eq!(env.state(FLOOD_ALARM).as_deref(), Some("off"));

    env.connector
        .client
        .set_data(Err(ImgwPibError::Transport("connection refused".into())));
    env.refresh(&entry).await;

    let alarm = env.hass.states.get(FLOOD_ALARM).unwrap();
    assert_eq!(alarm.state, STATE_UNAVAILABLE);
    assert!(!alarm.attributes.contains_key("alarm_level"));

    env.connector.client.set_data(Ok(hydrological_data()));
    env.refresh(&entry).await;

    let alarm = env.hass.states.get(FLOOD_ALARM).unwrap();
    assert_eq!(alarm.state, "off");
    assert_eq!(alarm.attributes["alarm_level"], json!(630.0));
}

#[tokio::test]
async fn test_flood_alarm_turns_on() {
    let (env, entry) = init_integration().await;

    env.connector.client.update_data(|data| {
        data.flood_alarm = Some(true);
        data.flood_alarm_level.value = Some(500.0);
    });
    env.refresh(&entry).await;

    let alarm = env.hass.states.get(FLOOD_ALARM).unwrap();
    assert_eq!(alarm.state, "on");
    assert_eq!(alarm.attributes["alarm_level"], json!(500.0));
    assert_eq!(env.state(FLOOD_WARNING).as_deref(), Some("off"));
}

#[tokio::test]
async fn test_missing_value_makes_only_binary_unavailable() {
    let (env, entry) = init_integration().await;

    env.connector.client.update_data(|data| {
        data.flood_warning = None;
        data.flood_warning_level.value = None;
        data.water_temperature.value = None;
    });
    env.refresh(&entry).await;

    assert_eq!(env.state(FLOOD_WARNING).as_deref(), Some(STATE_UNAVAILABLE));
    assert_eq!(env.state(FLOOD_ALARM).as_deref(), Some("off"));
    // Sensors only follow the last refresh
    assert_eq!(env.state(WATER_TEMPERATURE).as_deref(), Some("unknown"));

    env.connector.client.update_data(|data| {
        data.flood_warning = Some(true);
        data.flood_warning_level.value = Some(590.0);
    });
    env.refresh(&entry).await;

    let warning = env.hass.states.get(FLOOD_WARNING).unwrap();
    assert_eq!(warning.state, "on");
    assert_eq!(warning.attributes["warning_level"], json!(590.0));
}

#[tokio::test]
async fn test_missing_level_attribute_is_null() {
    let (env, entry) = init_integration().await;

    env.connector.client.update_data(|data| {
        data.flood_alarm_level.value = None;
    });
    env.refresh(&entry).await;

    let alarm = env.hass.states.get(FLOOD_ALARM).unwrap();
    assert_eq!(alarm.state, "off");
    assert!(alarm.attributes["alarm_level"].is_null());
}
