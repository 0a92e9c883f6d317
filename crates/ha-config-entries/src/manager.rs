//! Config entry store and lifecycle
//!
//! Owns every config entry, persists them, and drives their setup/unload
//! lifecycle through the handlers integrations register per domain.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use futures::future::BoxFuture;
use ha_registries::{Storable, Storage, StorageResult};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::entry::{ConfigEntry, ConfigEntryState, ConfigEntryUpdate};
use crate::state_machine::{calculate_retry_delay, InvalidTransition};

pub const STORAGE_KEY: &str = "core.config_entries";
pub const STORAGE_VERSION: u32 = 1;
pub const STORAGE_MINOR_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum ConfigEntriesError {
    #[error("Unknown config entry {0}")]
    NotFound(String),

    #[error("{domain} already has an entry with unique id {unique_id}")]
    AlreadyExists { domain: String, unique_id: String },

    #[error("Entry cannot be unloaded while {0:?}")]
    CannotUnload(ConfigEntryState),

    #[error("Setup failed: {0}")]
    SetupFailed(String),

    #[error("Unload failed for entry {0}")]
    UnloadFailed(String),

    #[error(transparent)]
    InvalidState(#[from] InvalidTransition),

    #[error("Config entry storage: {0}")]
    Storage(#[from] ha_registries::StorageError),
}

pub type ConfigEntriesResult<T> = Result<T, ConfigEntriesError>;

/// Raised by an integration when its backend is not reachable yet
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct ConfigEntryNotReady(pub String);

/// Outcome of an integration's setup handler
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SetupError {
    /// Temporary failure, setup is retried with backoff
    #[error("not ready: {0}")]
    NotReady(String),

    /// Permanent failure
    #[error("{0}")]
    Failed(String),
}

impl From<ConfigEntryNotReady> for SetupError {
    fn from(err: ConfigEntryNotReady) -> Self {
        SetupError::NotReady(err.0)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigEntriesData {
    pub entries: Vec<ConfigEntry>,
}

impl Storable for ConfigEntriesData {
    const KEY: &'static str = STORAGE_KEY;
    const VERSION: u32 = STORAGE_VERSION;
    const MINOR_VERSION: u32 = STORAGE_MINOR_VERSION;
}

/// Async setup handler registered by an integration
pub type SetupHandler =
    Arc<dyn Fn(ConfigEntry) -> BoxFuture<'static, Result<(), SetupError>> + Send + Sync>;

/// Async unload handler; resolves to false when the integration could not unload
pub type UnloadHandler = Arc<dyn Fn(ConfigEntry) -> BoxFuture<'static, bool> + Send + Sync>;

/// All config entries, indexed by id, domain and unique id
pub struct ConfigEntries {
    storage: Arc<Storage>,

    entries: DashMap<String, ConfigEntry>,

    /// domain -> entry ids
    by_domain: DashMap<String, HashSet<String>>,

    /// (domain, unique id) -> entry id
    by_unique_id: DashMap<(String, String), String>,

    /// Serializes setup and unload
    setup_lock: Mutex<()>,

    setup_handlers: DashMap<String, SetupHandler>,
    unload_handlers: DashMap<String, UnloadHandler>,
}

impl ConfigEntries {
    pub fn new(storage: Arc<Storage>) -> Self {
        Self {
            storage,
            entries: DashMap::new(),
            by_domain: DashMap::new(),
            by_unique_id: DashMap::new(),
            setup_lock: Mutex::new(()),
            setup_handlers: DashMap::new(),
            unload_handlers: DashMap::new(),
        }
    }

    pub async fn load(&self) -> StorageResult<()> {
        if let Some(data) = self.storage.load::<ConfigEntriesData>().await? {
            info!("Restoring {} config entries", data.entries.len());
            for entry in data.entries {
                self.index_entry(&entry);
            }
        }
        Ok(())
    }

    pub async fn save(&self) -> StorageResult<()> {
        let data = ConfigEntriesData {
            entries: self.iter().collect(),
        };
        self.storage.save(&data).await?;
        debug!("Persisted {} config entries", data.entries.len());
        Ok(())
    }

    fn index_entry(&self, entry: &ConfigEntry) {
        let entry_id = entry.entry_id.clone();

        self.entries.insert(entry_id.clone(), entry.clone());
        self.by_domain
            .entry(entry.domain.clone())
            .or_default()
            .insert(entry_id.clone());
        if let Some(ref unique_id) = entry.unique_id {
            self.by_unique_id
                .insert((entry.domain.clone(), unique_id.clone()), entry_id);
        }
    }

    fn unindex_entry(&self, entry: &ConfigEntry) {
        if let Some(mut ids) = self.by_domain.get_mut(&entry.domain) {
            ids.remove(&entry.entry_id);
        }
        if let Some(ref unique_id) = entry.unique_id {
            self.by_unique_id
                .remove(&(entry.domain.clone(), unique_id.clone()));
        }
        self.entries.remove(&entry.entry_id);
    }

    pub fn get(&self, entry_id: &str) -> Option<ConfigEntry> {
        self.entries.get(entry_id).map(|r| r.value().clone())
    }

    pub fn get_by_domain(&self, domain: &str) -> Vec<ConfigEntry> {
        let mut entries: Vec<ConfigEntry> = self
            .by_domain
            .get(domain)
            .map(|ids| ids.iter().filter_map(|id| self.get(id)).collect())
            .unwrap_or_default();
        entries.sort_by_key(|e| e.created_at);
        entries
    }

    pub fn get_by_unique_id(&self, domain: &str, unique_id: &str) -> Option<ConfigEntry> {
        self.by_unique_id
            .get(&(domain.to_string(), unique_id.to_string()))
            .and_then(|entry_id| self.get(&entry_id))
    }

    /// Add and persist a new config entry
    pub async fn add(&self, entry: ConfigEntry) -> ConfigEntriesResult<ConfigEntry> {
        if let Some(ref unique_id) = entry.unique_id {
            if self.get_by_unique_id(&entry.domain, unique_id).is_some() {
                return Err(ConfigEntriesError::AlreadyExists {
                    domain: entry.domain.clone(),
                    unique_id: unique_id.clone(),
                });
            }
        }

        self.index_entry(&entry);
        self.save().await?;

        info!(
            "Config entry {} added for {} ({})",
            entry.title, entry.domain, entry.entry_id
        );
        Ok(entry)
    }

    pub async fn update(
        &self,
        entry_id: &str,
        update: ConfigEntryUpdate,
    ) -> ConfigEntriesResult<ConfigEntry> {
        let mut updated = self
            .get(entry_id)
            .ok_or_else(|| ConfigEntriesError::NotFound(entry_id.to_string()))?;
        self.unindex_entry(&updated);

        if let Some(title) = update.title {
            updated.title = title;
        }
        if let Some(data) = update.data {
            updated.data = data;
        }
        if let Some(options) = update.options {
            updated.options = options;
        }
        if let Some(pref) = update.pref_disable_polling {
            updated.pref_disable_polling = pref;
        }
        if let Some(disabled_by) = update.disabled_by {
            updated.disabled_by = disabled_by;
        }
        updated.modified_at = Utc::now();

        self.index_entry(&updated);
        self.save().await?;

        debug!("Config entry {} updated", entry_id);
        Ok(updated)
    }

    /// Remove an entry, unloading it first when it is set up
    ///
    /// An entry whose unload already failed is removed without another attempt.
    pub async fn remove(&self, entry_id: &str) -> ConfigEntriesResult<ConfigEntry> {
        let entry = self
            .get(entry_id)
            .ok_or_else(|| ConfigEntriesError::NotFound(entry_id.to_string()))?;

        match self.unload(entry_id).await {
            Ok(()) => {}
            Err(ConfigEntriesError::CannotUnload(ConfigEntryState::FailedUnload)) => {
                warn!("Removing entry {} that failed to unload", entry_id);
            }
            Err(err) => return Err(err),
        }

        self.unindex_entry(&entry);
        self.save().await?;

        info!(
            "Config entry {} removed from {} ({})",
            entry.title, entry.domain, entry_id
        );
        Ok(entry)
    }

    fn set_state(
        &self,
        entry_id: &str,
        state: ConfigEntryState,
        reason: Option<String>,
    ) -> ConfigEntriesResult<()> {
        let mut entry = self
            .entries
            .get_mut(entry_id)
            .ok_or_else(|| ConfigEntriesError::NotFound(entry_id.to_string()))?;
        entry.try_set_state(state, reason)?;
        debug!("Entry {} is now {:?}", entry_id, state);
        Ok(())
    }

    pub fn register_setup_handler(&self, domain: &str, handler: SetupHandler) {
        self.setup_handlers.insert(domain.to_string(), handler);
        debug!("Setup handler registered for {}", domain);
    }

    pub fn register_unload_handler(&self, domain: &str, handler: UnloadHandler) {
        self.unload_handlers.insert(domain.to_string(), handler);
        debug!("Registered unload handler for domain: {}", domain);
    }

    /// Set up an entry by calling its integration's setup handler
    ///
    /// A [`SetupError::NotReady`] leaves the entry in `SetupRetry` and
    /// schedules another attempt with exponential backoff; that outcome is
    /// not an error for the caller.
    pub async fn setup(self: &Arc<Self>, entry_id: &str) -> ConfigEntriesResult<()> {
        let _lock = self.setup_lock.lock().await;

        let entry = self
            .get(entry_id)
            .ok_or_else(|| ConfigEntriesError::NotFound(entry_id.to_string()))?;

        if entry.is_disabled() {
            debug!("Entry {} is disabled, not setting up", entry_id);
            return Ok(());
        }

        self.set_state(entry_id, ConfigEntryState::SetupInProgress, None)?;

        let Some(handler) = self.setup_handlers.get(&entry.domain).map(|h| h.clone()) else {
            self.set_state(entry_id, ConfigEntryState::Loaded, None)?;
            debug!(
                "No setup handler for domain {}, marking as loaded",
                entry.domain
            );
            return Ok(());
        };

        let result = handler(self.get(entry_id).unwrap_or_else(|| entry.clone())).await;
        match result {
            Ok(()) => {
                self.set_state(entry_id, ConfigEntryState::Loaded, None)?;
                info!("Set up {} ({})", entry.title, entry_id);
                Ok(())
            }
            Err(SetupError::NotReady(reason)) => {
                self.set_state(entry_id, ConfigEntryState::SetupRetry, Some(reason.clone()))?;
                let delay = calculate_retry_delay(entry.tries);
                if let Some(mut current) = self.entries.get_mut(entry_id) {
                    current.increment_tries();
                }

                if entry.tries == 0 {
                    warn!(
                        "Config entry '{}' for {} integration not ready yet: {}; Retrying in {:?}",
                        entry.title, entry.domain, reason, delay
                    );
                } else {
                    debug!(
                        "Config entry '{}' for {} integration not ready yet: {}; Retrying in {:?}",
                        entry.title, entry.domain, reason, delay
                    );
                }

                self.schedule_retry(entry_id.to_string(), delay);
                Ok(())
            }
            Err(SetupError::Failed(reason)) => {
                error!("Setup failed for entry {}: {}", entry_id, reason);
                self.set_state(entry_id, ConfigEntryState::SetupError, Some(reason.clone()))?;
                Err(ConfigEntriesError::SetupFailed(reason))
            }
        }
    }

    fn schedule_retry(self: &Arc<Self>, entry_id: String, delay: std::time::Duration) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;

            // Unloading or removing the entry cancels the retry
            let pending = this
                .get(&entry_id)
                .map(|e| e.state == ConfigEntryState::SetupRetry)
                .unwrap_or(false);
            if pending {
                if let Err(err) = this.retry_setup(entry_id).await {
                    warn!("Retried setup failed: {}", err);
                }
            }
        });
    }

    fn retry_setup(self: Arc<Self>, entry_id: String) -> BoxFuture<'static, ConfigEntriesResult<()>> {
        Box::pin(async move { self.setup(&entry_id).await })
    }

    /// Unload an entry through its integration's unload handler
    pub async fn unload(&self, entry_id: &str) -> ConfigEntriesResult<()> {
        let _lock = self.setup_lock.lock().await;

        let entry = self
            .get(entry_id)
            .ok_or_else(|| ConfigEntriesError::NotFound(entry_id.to_string()))?;

        if entry.state == ConfigEntryState::NotLoaded {
            return Ok(());
        }
        if !entry.state.is_recoverable() {
            return Err(ConfigEntriesError::CannotUnload(entry.state));
        }

        let was_loaded = entry.is_loaded();
        self.set_state(entry_id, ConfigEntryState::UnloadInProgress, None)?;

        let handler = self.unload_handlers.get(&entry.domain).map(|h| h.clone());
        let unloaded = match handler {
            // Only a loaded entry has anything to tear down
            Some(handler) if was_loaded => handler(entry.clone()).await,
            _ => true,
        };

        if !unloaded {
            self.set_state(entry_id, ConfigEntryState::FailedUnload, None)?;
            return Err(ConfigEntriesError::UnloadFailed(entry_id.to_string()));
        }

        self.set_state(entry_id, ConfigEntryState::NotLoaded, None)?;
        info!("Unloaded {} ({})", entry.title, entry_id);
        Ok(())
    }

    pub async fn reload(self: &Arc<Self>, entry_id: &str) -> ConfigEntriesResult<()> {
        self.unload(entry_id).await?;
        self.setup(entry_id).await
    }

    pub fn entry_ids(&self) -> Vec<String> {
        self.entries.iter().map(|r| r.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = ConfigEntry> + '_ {
        self.entries.iter().map(|r| r.value().clone())
    }

    /// Set up every stored entry, collecting the individual results
    pub async fn setup_all(self: &Arc<Self>) -> Vec<ConfigEntriesResult<()>> {
        let mut results = Vec::new();
        for entry_id in self.entry_ids() {
            results.push(self.setup(&entry_id).await);
        }
        results
    }
}
