//! Seam to the IMGW-PIB API client

use std::sync::Arc;

use async_trait::async_trait;
use indexmap::IndexMap;
use thiserror::Error;

use super::model::HydrologicalData;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ImgwPibError {
    #[error("Connection error: {0}")]
    Transport(String),

    #[error("Request timed out")]
    Timeout,

    #[error("API error: {0}")]
    Api(String),

    #[error("Unexpected error: {0}")]
    Unexpected(String),
}

impl ImgwPibError {
    /// Transport failures and timeouts, as opposed to errors reported by the API
    pub fn is_connection_error(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Timeout)
    }
}

pub type ImgwPibResult<T> = Result<T, ImgwPibError>;

/// A client bound to one station, or to none when only listing stations
#[async_trait]
pub trait ImgwPibClient: Send + Sync {
    async fn get_hydrological_data(&self) -> ImgwPibResult<HydrologicalData>;

    /// Refresh the station catalog
    async fn update_hydrological_stations(&self) -> ImgwPibResult<()>;

    /// Station id to display name, as of the last catalog refresh
    fn hydrological_stations(&self) -> IndexMap<String, String>;
}

/// Creates clients; creating one for a station validates the station id
#[async_trait]
pub trait ImgwPibConnector: Send + Sync {
    async fn create(&self, station_id: Option<&str>) -> ImgwPibResult<Arc<dyn ImgwPibClient>>;
}
