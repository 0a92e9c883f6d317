//! Diagnostics support for IMGW-PIB

use ha_helpers::{async_redact_data, DiagnosticsError, DiagnosticsResult};
use serde_json::{json, Value};

use super::ImgwPib;

/// Entry keys hidden from diagnostics; a station id is not sensitive
const TO_REDACT: &[&str] = &[];

/// The config entry and the latest snapshot of its station
pub async fn async_get_config_entry_diagnostics(
    integration: &ImgwPib,
    entry_id: &str,
) -> DiagnosticsResult<Value> {
    let entry = integration
        .config_entry(entry_id)
        .ok_or_else(|| DiagnosticsError::EntryNotFound(entry_id.to_string()))?;
    let data = integration
        .runtime_data(entry_id)
        .and_then(|runtime| runtime.coordinator.data())
        .ok_or_else(|| DiagnosticsError::NotLoaded(entry_id.to_string()))?;

    Ok(json!({
        "config_entry_data": async_redact_data(&entry.as_dict(), TO_REDACT),
        "hydrological_data": serde_json::to_value(&*data)?,
    }))
}
