//! Home Assistant integration helpers
//!
//! The pieces integrations are built from: the [`HomeAssistant`] host
//! object, polling coordinators, entities and entity platforms, config flows
//! with their selectors, and diagnostics.

pub mod data_entry_flow;
pub mod diagnostics;
pub mod entity;
pub mod entity_platform;
pub mod hass;
pub mod selector;
pub mod update_coordinator;

pub use data_entry_flow::{
    ConfigFlow, FlowContext, FlowError, FlowFactory, FlowInput, FlowManager, FlowResult,
    FlowResultT, FlowResultType, FormField, STEP_USER,
};
pub use diagnostics::{async_redact_data, DiagnosticsError, DiagnosticsResult, REDACTED};
pub use entity::{calculate_state, format_float, DeviceInfo, Entity, EntityHandle};
pub use entity_platform::EntityPlatform;
pub use hass::HomeAssistant;
pub use selector::{SelectOptionDict, SelectSelectorConfig, SelectSelectorMode, Selector};
pub use update_coordinator::{
    CoordinatorEntity, CoordinatorUpdateHandler, DataUpdateCoordinator, DataUpdater, ListenerId,
    UpdateFailed,
};
