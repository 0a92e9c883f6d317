//! Entity abstraction
//!
//! An entity turns integration data into a host [`State`](ha_core::State).
//! It never stores its rendered state: every render goes through an
//! [`EntityHandle`] into the state store.

use std::collections::HashMap;
use std::sync::Arc;

use ha_core::{attrs, Context, EntityId, State, STATE_UNAVAILABLE, STATE_UNKNOWN};
use ha_registries::{DeviceEntryType, DeviceIdentifier};
use ha_state_store::StateStore;
use serde_json::Value;
use tracing::trace;

/// Device an entity belongs to, as reported by the integration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub identifiers: Vec<DeviceIdentifier>,
    pub name: Option<String>,
    pub manufacturer: Option<String>,
    pub entry_type: Option<DeviceEntryType>,
    pub configuration_url: Option<String>,
}

/// Behaviour every entity exposes to the host
///
/// Only `platform_domain`, `unique_id` and `state` are required; everything
/// else defaults to "not provided".
pub trait Entity: Send + Sync {
    /// Entity domain, e.g. `"sensor"` or `"binary_sensor"`
    fn platform_domain(&self) -> &'static str;

    fn unique_id(&self) -> String;

    /// When true, the entity name is shown prefixed with the device name
    fn has_entity_name(&self) -> bool {
        false
    }

    /// Entity name, without the device part
    fn name(&self) -> Option<String> {
        None
    }

    fn translation_key(&self) -> Option<&'static str> {
        None
    }

    fn device_info(&self) -> Option<DeviceInfo> {
        None
    }

    fn available(&self) -> bool {
        true
    }

    /// Rendered state value; None renders as `unknown`
    fn state(&self) -> Option<String>;

    fn device_class(&self) -> Option<&'static str> {
        None
    }

    fn unit_of_measurement(&self) -> Option<&'static str> {
        None
    }

    fn attribution(&self) -> Option<&'static str> {
        None
    }

    /// Attributes that describe what the entity can report (e.g. state class);
    /// present even while unavailable
    fn capability_attributes(&self) -> HashMap<String, Value> {
        HashMap::new()
    }

    /// Attributes that depend on the current data; only present while available
    fn extra_state_attributes(&self) -> HashMap<String, Value> {
        HashMap::new()
    }

    /// Called once the entity has an entity ID and can write its state
    fn added_to_hass(self: Arc<Self>, _handle: EntityHandle) {}

    fn will_remove_from_hass(&self) {}
}

/// Render an entity into its state value and attributes
pub fn calculate_state(
    entity: &dyn Entity,
    friendly_name: Option<&str>,
) -> (String, HashMap<String, Value>) {
    let mut attributes = entity.capability_attributes();

    let state = if entity.available() {
        attributes.extend(entity.extra_state_attributes());
        entity.state().unwrap_or_else(|| STATE_UNKNOWN.to_string())
    } else {
        STATE_UNAVAILABLE.to_string()
    };

    if let Some(unit) = entity.unit_of_measurement() {
        attributes.insert(attrs::UNIT_OF_MEASUREMENT.to_string(), Value::from(unit));
    }
    if let Some(attribution) = entity.attribution() {
        attributes.insert(attrs::ATTRIBUTION.to_string(), Value::from(attribution));
    }
    if let Some(device_class) = entity.device_class() {
        attributes.insert(attrs::DEVICE_CLASS.to_string(), Value::from(device_class));
    }
    if let Some(name) = friendly_name {
        attributes.insert(attrs::FRIENDLY_NAME.to_string(), Value::from(name));
    }

    (state, attributes)
}

/// Render a float the way state values are written
///
/// `526` becomes `"526.0"`. Exponents below -4 or from 16 up use signed
/// two-digit scientific notation (`"1e+16"`, `"1.5e-07"`), and non-finite
/// values are `"nan"`, `"inf"` or `"-inf"`.
pub fn format_float(value: f64) -> String {
    if value.is_nan() {
        return "nan".to_string();
    }
    if value.is_infinite() {
        return if value > 0.0 { "inf" } else { "-inf" }.to_string();
    }

    let scientific = format!("{:e}", value);
    let (mantissa, exponent) = scientific.split_once('e').unwrap_or((&scientific, "0"));
    let exponent: i32 = exponent.parse().unwrap_or(0);

    if (-4..16).contains(&exponent) {
        let fixed = value.to_string();
        if fixed.contains('.') {
            fixed
        } else {
            format!("{}.0", fixed)
        }
    } else {
        let sign = if exponent < 0 { '-' } else { '+' };
        format!("{}e{}{:02}", mantissa, sign, exponent.abs())
    }
}

/// Friendly name of an entity given its device's name
pub fn friendly_name(entity: &dyn Entity, device_name: Option<&str>) -> Option<String> {
    let name = entity.name();
    if !entity.has_entity_name() {
        return name;
    }
    match (device_name, name) {
        (Some(device), Some(name)) => Some(format!("{} {}", device, name)),
        (Some(device), None) => Some(device.to_string()),
        (None, name) => name,
    }
}

/// Where an entity writes its state once added
#[derive(Clone)]
pub struct EntityHandle {
    entity_id: EntityId,
    friendly_name: Option<String>,
    states: Arc<StateStore>,
}

impl EntityHandle {
    pub fn new(entity_id: EntityId, friendly_name: Option<String>, states: Arc<StateStore>) -> Self {
        Self {
            entity_id,
            friendly_name,
            states,
        }
    }

    pub fn entity_id(&self) -> &EntityId {
        &self.entity_id
    }

    pub fn friendly_name(&self) -> Option<&str> {
        self.friendly_name.as_deref()
    }

    /// Render `entity` and write the result to the state store
    pub fn write_state(&self, entity: &dyn Entity) -> State {
        let (state, attributes) = calculate_state(entity, self.friendly_name.as_deref());
        trace!(entity_id = %self.entity_id, state = %state, "Writing entity state");
        self.states
            .set(self.entity_id.clone(), state, attributes, Context::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Fixed {
        available: bool,
        value: Option<String>,
    }

    impl Entity for Fixed {
        fn platform_domain(&self) -> &'static str {
            "sensor"
        }

        fn unique_id(&self) -> String {
            "fixed".to_string()
        }

        fn has_entity_name(&self) -> bool {
            true
        }

        fn name(&self) -> Option<String> {
            Some("Water level".to_string())
        }

        fn available(&self) -> bool {
            self.available
        }

        fn state(&self) -> Option<String> {
            self.value.clone()
        }

        fn unit_of_measurement(&self) -> Option<&'static str> {
            Some("cm")
        }

        fn capability_attributes(&self) -> HashMap<String, Value> {
            HashMap::from([("state_class".to_string(), json!("measurement"))])
        }

        fn extra_state_attributes(&self) -> HashMap<String, Value> {
            HashMap::from([("extra".to_string(), json!(1))])
        }
    }

    #[test]
    fn test_available_entity() {
        let entity = Fixed {
            available: true,
            value: Some("526.0".to_string()),
        };
        let (state, attributes) = calculate_state(&entity, Some("Station Water level"));

        assert_eq!(state, "526.0");
        assert_eq!(attributes["unit_of_measurement"], "cm");
        assert_eq!(attributes["state_class"], "measurement");
        assert_eq!(attributes["extra"], 1);
        assert_eq!(attributes["friendly_name"], "Station Water level");
    }

    #[test]
    fn test_missing_value_is_unknown() {
        let entity = Fixed {
            available: true,
            value: None,
        };
        assert_eq!(calculate_state(&entity, None).0, STATE_UNKNOWN);
    }

    #[test]
    fn test_unavailable_drops_extra_attributes() {
        let entity = Fixed {
            available: false,
            value: Some("526.0".to_string()),
        };
        let (state, attributes) = calculate_state(&entity, None);

        assert_eq!(state, STATE_UNAVAILABLE);
        assert!(!attributes.contains_key("extra"));
        assert_eq!(attributes["state_class"], "measurement");
    }

    #[test]
    fn test_friendly_name() {
        let entity = Fixed {
            available: true,
            value: None,
        };
        assert_eq!(
            friendly_name(&entity, Some("River (Station)")).as_deref(),
            Some("River (Station) Water level")
        );
        assert_eq!(friendly_name(&entity, None).as_deref(), Some("Water level"));
    }

    #[test]
    fn test_format_float() {
        assert_eq!(format_float(526.0), "526.0");
        assert_eq!(format_float(10.8), "10.8");
        assert_eq!(format_float(-1.25), "-1.25");
        assert_eq!(format_float(0.0), "0.0");
        assert_eq!(format_float(0.0001), "0.0001");
        assert_eq!(format_float(1e15), "1000000000000000.0");
    }

    #[test]
    fn test_format_float_edges() {
        assert_eq!(format_float(1e16), "1e+16");
        assert_eq!(format_float(2.5e20), "2.5e+20");
        assert_eq!(format_float(1.5e-7), "1.5e-07");
        assert_eq!(format_float(-3e-5), "-3e-05");
        assert_eq!(format_float(f64::NAN), "nan");
        assert_eq!(format_float(f64::INFINITY), "inf");
        assert_eq!(format_float(f64::NEG_INFINITY), "-inf");
    }
}
