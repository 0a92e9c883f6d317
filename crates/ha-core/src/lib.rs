//! Core types for Home Assistant
//!
//! This crate provides the fundamental types shared by the host slice and the
//! integrations built on it: EntityId, State, Event and Context.

mod context;
mod entity_id;
mod event;
mod state;

pub use context::Context;
pub use entity_id::{slugify, EntityId, EntityIdError};
pub use event::{Event, EventData, EventOrigin, EventType};
pub use state::State;

/// Longest state value the store accepts
pub const MAX_STATE_LENGTH: usize = 255;

/// State of an entity whose value is not known
pub const STATE_UNKNOWN: &str = "unknown";

/// State of an entity that cannot currently be reached
pub const STATE_UNAVAILABLE: &str = "unavailable";

/// Binary "on" state
pub const STATE_ON: &str = "on";

/// Binary "off" state
pub const STATE_OFF: &str = "off";

/// Standard state attribute names
pub mod attrs {
    pub const ATTRIBUTION: &str = "attribution";
    pub const DEVICE_CLASS: &str = "device_class";
    pub const FRIENDLY_NAME: &str = "friendly_name";
    pub const STATE_CLASS: &str = "state_class";
    pub const UNIT_OF_MEASUREMENT: &str = "unit_of_measurement";
}

/// Standard event types used by Home Assistant
pub mod events {
    use super::*;

    /// Event type for state changes
    pub const STATE_CHANGED: &str = "state_changed";

    /// Data for STATE_CHANGED events
    #[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
    pub struct StateChangedData {
        pub entity_id: EntityId,
        pub old_state: Option<State>,
        pub new_state: Option<State>,
    }

    impl EventData for StateChangedData {
        fn event_type() -> &'static str {
            STATE_CHANGED
        }
    }
}
