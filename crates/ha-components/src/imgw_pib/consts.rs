//! Constants for the IMGW-PIB integration

use std::time::Duration;

pub const DOMAIN: &str = "imgw_pib";

pub const CONF_STATION_ID: &str = "station_id";

pub const ATTRIBUTION: &str = "Data provided by IMGW-PIB";
pub const MANUFACTURER: &str = "IMGW-PIB";

/// Prefix of a hydrological station's page; the station id is appended
pub const HYDROLOGICAL_STATION_URL: &str = "https://hydro.imgw.pl/#/station/hydro/";

pub const UPDATE_INTERVAL: Duration = Duration::from_secs(30 * 60);

/// Entity domains the integration provides
pub const PLATFORMS: [&str; 2] = ["binary_sensor", "sensor"];
