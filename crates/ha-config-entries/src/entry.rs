//! Config entries
//!
//! One entry is one configured integration instance; for IMGW-PIB, one
//! monitored hydrological station. The persisted part is the identity, data
//! and preferences; the lifecycle state lives only in memory.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;

use crate::state_machine::InvalidTransition;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConfigEntryState {
    #[default]
    NotLoaded,
    SetupInProgress,
    Loaded,
    /// The integration rejected the entry; a reload may fix it
    SetupError,
    /// Upstream not reachable yet, a setup attempt is scheduled
    SetupRetry,
    UnloadInProgress,
    FailedUnload,
}

impl ConfigEntryState {
    /// States an entry can be unloaded or reloaded from
    pub fn is_recoverable(&self) -> bool {
        use ConfigEntryState::*;
        matches!(self, NotLoaded | Loaded | SetupError | SetupRetry)
    }
}

/// How the entry was created
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConfigEntrySource {
    /// Through the config flow
    #[default]
    User,
}

/// Reason an entry was disabled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigEntryDisabledBy {
    User,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigEntry {
    pub entry_id: String,
    pub domain: String,
    pub title: String,

    /// Set by the config flow, e.g. `{"station_id": "152210170"}`
    #[serde(default)]
    pub data: HashMap<String, Value>,
    #[serde(default)]
    pub options: HashMap<String, Value>,

    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default = "default_version")]
    pub minor_version: u32,

    /// At most one entry per domain carries a given unique id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unique_id: Option<String>,
    #[serde(default)]
    pub source: ConfigEntrySource,

    #[serde(skip, default)]
    pub state: ConfigEntryState,
    /// Why the entry is in an error or retry state
    #[serde(skip, default)]
    pub reason: Option<String>,
    /// Setup attempts since the last settled state
    #[serde(skip, default)]
    pub tries: u32,

    #[serde(default)]
    pub pref_disable_new_entities: bool,
    /// Set up without starting the periodic refresh
    #[serde(default)]
    pub pref_disable_polling: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disabled_by: Option<ConfigEntryDisabledBy>,

    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub modified_at: DateTime<Utc>,
}

fn default_version() -> u32 {
    1
}

impl ConfigEntry {
    pub fn new(domain: impl Into<String>, title: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            entry_id: ulid::Ulid::new().to_string(),
            domain: domain.into(),
            title: title.into(),
            data: HashMap::new(),
            options: HashMap::new(),
            version: 1,
            minor_version: 1,
            unique_id: None,
            source: ConfigEntrySource::User,
            state: ConfigEntryState::NotLoaded,
            reason: None,
            tries: 0,
            pref_disable_new_entities: false,
            pref_disable_polling: false,
            disabled_by: None,
            created_at: now,
            modified_at: now,
        }
    }

    pub fn with_data(mut self, data: HashMap<String, Value>) -> Self {
        self.data = data;
        self
    }

    pub fn with_unique_id(mut self, unique_id: impl Into<String>) -> Self {
        self.unique_id = Some(unique_id.into());
        self
    }

    pub fn is_disabled(&self) -> bool {
        self.disabled_by.is_some()
    }

    pub fn is_loaded(&self) -> bool {
        self.state == ConfigEntryState::Loaded
    }

    /// String value of a data key
    pub fn data_str(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(|v| v.as_str())
    }

    /// Move to `new_state` if the lifecycle allows it, recording `reason`
    pub fn try_set_state(
        &mut self,
        new_state: ConfigEntryState,
        reason: Option<String>,
    ) -> Result<(), InvalidTransition> {
        self.state.try_transition(new_state)?;

        self.state = new_state;
        self.reason = reason;

        // Only a settled state clears the retry count
        if !matches!(
            new_state,
            ConfigEntryState::SetupRetry | ConfigEntryState::SetupInProgress
        ) {
            self.tries = 0;
        }

        Ok(())
    }

    pub fn increment_tries(&mut self) -> u32 {
        self.tries += 1;
        self.tries
    }

    /// Dictionary view of the entry as exposed to diagnostics
    pub fn as_dict(&self) -> serde_json::Value {
        json!({
            "created_at": self.created_at,
            "data": self.data,
            "disabled_by": self.disabled_by,
            "domain": self.domain,
            "entry_id": self.entry_id,
            "minor_version": self.minor_version,
            "modified_at": self.modified_at,
            "options": self.options,
            "pref_disable_new_entities": self.pref_disable_new_entities,
            "pref_disable_polling": self.pref_disable_polling,
            "source": self.source,
            "title": self.title,
            "unique_id": self.unique_id,
            "version": self.version,
        })
    }
}

/// Partial update applied by [`ConfigEntries::update`](crate::ConfigEntries::update)
#[derive(Debug, Default)]
pub struct ConfigEntryUpdate {
    pub title: Option<String>,
    pub data: Option<HashMap<String, Value>>,
    pub options: Option<HashMap<String, Value>>,
    pub pref_disable_polling: Option<bool>,
    pub disabled_by: Option<Option<ConfigEntryDisabledBy>>,
}

impl ConfigEntryUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn data(mut self, data: HashMap<String, Value>) -> Self {
        self.data = Some(data);
        self
    }

    pub fn options(mut self, options: HashMap<String, Value>) -> Self {
        self.options = Some(options);
        self
    }

    pub fn pref_disable_polling(mut self, disable: bool) -> Self {
        self.pref_disable_polling = Some(disable);
        self
    }

    pub fn disabled_by(mut self, disabled_by: Option<ConfigEntryDisabledBy>) -> Self {
        self.disabled_by = Some(disabled_by);
        self
    }
}
