//! Config flow for IMGW-PIB

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use ha_helpers::{
    ConfigFlow, FlowContext, FlowInput, FlowResult, FlowResultT, FormField, SelectOptionDict,
    SelectSelectorConfig, SelectSelectorMode, Selector, STEP_USER,
};
use serde_json::Value;
use tracing::{debug, error};

use super::client::{ImgwPibConnector, ImgwPibError, ImgwPibResult};
use super::consts::CONF_STATION_ID;

/// Fetch the station's data once; returns the entry title
async fn validate_input(connector: &dyn ImgwPibConnector, station_id: &str) -> ImgwPibResult<String> {
    let client = connector.create(Some(station_id)).await?;
    let hydrological_data = client.get_hydrological_data().await?;
    Ok(hydrological_data.display_name())
}

pub struct ImgwPibFlowHandler {
    connector: Arc<dyn ImgwPibConnector>,
}

impl ImgwPibFlowHandler {
    pub fn new(connector: Arc<dyn ImgwPibConnector>) -> Self {
        Self { connector }
    }

    /// Stations that are not configured yet, sorted by name
    async fn station_selector(&self, ctx: &FlowContext) -> ImgwPibResult<Selector> {
        let client = self.connector.create(None).await?;
        client.update_hydrological_stations().await?;

        let configured = ctx.async_current_ids();
        let options = client
            .hydrological_stations()
            .into_iter()
            .filter(|(station_id, _)| !configured.contains(station_id))
            .map(|(value, label)| SelectOptionDict { value, label })
            .collect();

        Ok(Selector::Select(
            SelectSelectorConfig {
                mode: SelectSelectorMode::List,
                ..SelectSelectorConfig::new(options)
            }
            .sorted(),
        ))
    }
}

#[async_trait]
impl ConfigFlow for ImgwPibFlowHandler {
    async fn async_step_user(
        &mut self,
        ctx: &mut FlowContext,
        user_input: Option<FlowInput>,
    ) -> FlowResultT {
        let mut errors = HashMap::new();

        if let Some(input) = user_input {
            match input.get(CONF_STATION_ID).and_then(Value::as_str) {
                None => {
                    errors.insert(CONF_STATION_ID.to_string(), "required".to_string());
                }
                Some(station_id) => {
                    ctx.async_set_unique_id(station_id);
                    ctx.abort_if_unique_id_configured()?;

                    match validate_input(self.connector.as_ref(), station_id).await {
                        Ok(title) => {
                            let data = HashMap::from([(
                                CONF_STATION_ID.to_string(),
                                Value::from(station_id),
                            )]);
                            return Ok(FlowResult::create_entry(title, data));
                        }
                        Err(err) => {
                            let reason = match err {
                                ref err if err.is_connection_error() => "cannot_connect",
                                ImgwPibError::Api(_) => "api_error",
                                err => {
                                    error!(station_id, "Unexpected exception: {}", err);
                                    "unknown"
                                }
                            };
                            errors.insert("base".to_string(), reason.to_string());
                        }
                    }
                }
            }
        }

        let selector = match self.station_selector(ctx).await {
            Ok(selector) => selector,
            Err(err) => {
                debug!("Cannot fetch the hydrological station list: {}", err);
                return Ok(FlowResult::abort("no_station_list"));
            }
        };

        Ok(FlowResult::form(
            STEP_USER,
            vec![FormField::required(CONF_STATION_ID, selector)],
            errors,
        ))
    }
}
