//! Snapshot of one hydrological station

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One measured quantity; `value` is None when the station does not report it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorData {
    pub name: String,
    pub value: Option<f64>,
    pub unit: Option<String>,
}

/// Everything the API reports for a station at one point in time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HydrologicalData {
    pub station: String,
    pub river: String,
    pub station_id: String,
    pub water_level: SensorData,
    pub flood_alarm_level: SensorData,
    pub flood_warning_level: SensorData,
    pub water_temperature: SensorData,
    pub flood_alarm: Option<bool>,
    pub flood_warning: Option<bool>,
    pub water_level_measurement_date: Option<DateTime<Utc>>,
    pub water_temperature_measurement_date: Option<DateTime<Utc>>,
}

impl HydrologicalData {
    /// Entry title and device name fallback, e.g. `"Warszawa (Wisła)"`
    pub fn display_name(&self) -> String {
        format!("{} ({})", self.station, self.river)
    }
}
