//! State type representing an entity's current state

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Context, EntityId, MAX_STATE_LENGTH, STATE_UNKNOWN};

/// The state of an entity at a point in time
///
/// A state is the string value rendered by an entity (e.g. `"on"`,
/// `"526.0"`, `"unavailable"`) plus its attributes and timestamps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct State {
    pub entity_id: EntityId,

    pub state: String,

    #[serde(default)]
    pub attributes: HashMap<String, serde_json::Value>,

    /// When the state value last changed
    pub last_changed: DateTime<Utc>,

    /// When the state value or attributes were last written
    pub last_updated: DateTime<Utc>,

    /// When the integration last reported this state, changed or not
    pub last_reported: DateTime<Utc>,

    pub context: Context,
}

impl State {
    /// Create a new state with current timestamp
    ///
    /// Values longer than [`MAX_STATE_LENGTH`] are replaced by `unknown`.
    pub fn new(
        entity_id: EntityId,
        state: impl Into<String>,
        attributes: HashMap<String, serde_json::Value>,
        context: Context,
    ) -> Self {
        let now = Utc::now();
        Self {
            entity_id,
            state: clamp_state(state.into()),
            attributes,
            last_changed: now,
            last_updated: now,
            last_reported: now,
            context,
        }
    }

    /// Create the successor of this state
    ///
    /// `last_changed` only moves when the value changes and `last_updated`
    /// only moves when the value or the attributes change; `last_reported`
    /// always moves.
    pub fn with_update(
        &self,
        new_state: impl Into<String>,
        new_attributes: HashMap<String, serde_json::Value>,
        context: Context,
    ) -> Self {
        let now = Utc::now();
        let new_state = clamp_state(new_state.into());
        let state_changed = self.state != new_state;
        let attributes_changed = self.attributes != new_attributes;

        Self {
            entity_id: self.entity_id.clone(),
            state: new_state,
            attributes: new_attributes,
            last_changed: if state_changed { now } else { self.last_changed },
            last_updated: if state_changed || attributes_changed {
                now
            } else {
                self.last_updated
            },
            last_reported: now,
            context,
        }
    }
}

fn clamp_state(state: String) -> String {
    if state.len() > MAX_STATE_LENGTH {
        STATE_UNKNOWN.to_string()
    } else {
        state
    }
}

impl PartialEq for State {
    fn eq(&self, other: &Self) -> bool {
        // Timestamps and context are not compared
        self.entity_id == other.entity_id
            && self.state == other.state
            && self.attributes == other.attributes
    }
}
