//! Polling data update coordinator
//!
//! A coordinator owns one upstream fetch, refreshes it on a fixed interval and
//! hands the resulting snapshot to every entity listening to it. Entities never
//! talk to the upstream themselves.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ha_config_entries::{ConfigEntry, ConfigEntryNotReady};
use indexmap::IndexMap;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, instrument};

use crate::entity::{Entity, EntityHandle};

/// Error returned by an updater when a fetch fails
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct UpdateFailed(pub String);

/// The fetch a coordinator drives
#[async_trait]
pub trait DataUpdater: Send + Sync + 'static {
    type Data: Send + Sync + 'static;

    async fn async_update_data(&self) -> Result<Self::Data, UpdateFailed>;
}

pub type ListenerId = u64;

type Listener = Arc<dyn Fn() + Send + Sync>;

/// Periodically refreshed snapshot shared by a set of entities
///
/// The snapshot is published as an `Arc` and replaced wholesale on every
/// successful refresh. A failed refresh keeps the previous snapshot and only
/// flips `last_update_success`. Listeners are notified after every refresh,
/// successful or not.
pub struct DataUpdateCoordinator<U: DataUpdater> {
    name: String,
    update_interval: Duration,
    updater: U,

    data: RwLock<Option<Arc<U::Data>>>,
    last_update_success: AtomicBool,
    last_exception: RwLock<Option<String>>,
    last_update_success_time: RwLock<Option<DateTime<Utc>>>,

    listeners: Mutex<IndexMap<ListenerId, Listener>>,
    next_listener_id: AtomicU64,

    /// Serializes refreshes, one fetch in flight at a time
    refresh_lock: tokio::sync::Mutex<()>,

    shutdown_tx: broadcast::Sender<()>,
    shut_down: AtomicBool,
    polling: Mutex<Option<JoinHandle<()>>>,
}

impl<U: DataUpdater> DataUpdateCoordinator<U> {
    pub fn new(name: impl Into<String>, update_interval: Duration, updater: U) -> Arc<Self> {
        let (shutdown_tx, _) = broadcast::channel(1);
        Arc::new(Self {
            name: name.into(),
            update_interval,
            updater,
            data: RwLock::new(None),
            last_update_success: AtomicBool::new(true),
            last_exception: RwLock::new(None),
            last_update_success_time: RwLock::new(None),
            listeners: Mutex::new(IndexMap::new()),
            next_listener_id: AtomicU64::new(0),
            refresh_lock: tokio::sync::Mutex::new(()),
            shutdown_tx,
            shut_down: AtomicBool::new(false),
            polling: Mutex::new(None),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn update_interval(&self) -> Duration {
        self.update_interval
    }

    pub fn updater(&self) -> &U {
        &self.updater
    }

    /// Latest snapshot, None until the first successful refresh
    pub fn data(&self) -> Option<Arc<U::Data>> {
        self.data.read().ok().and_then(|data| data.clone())
    }

    pub fn last_update_success(&self) -> bool {
        self.last_update_success.load(Ordering::SeqCst)
    }

    pub fn last_exception(&self) -> Option<String> {
        self.last_exception.read().ok().and_then(|e| e.clone())
    }

    pub fn last_update_success_time(&self) -> Option<DateTime<Utc>> {
        self.last_update_success_time.read().ok().and_then(|t| *t)
    }

    /// Register a callback invoked after every refresh
    pub fn async_add_listener(&self, listener: impl Fn() + Send + Sync + 'static) -> ListenerId {
        let id = self.next_listener_id.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut listeners) = self.listeners.lock() {
            listeners.insert(id, Arc::new(listener));
        }
        id
    }

    pub fn remove_listener(&self, id: ListenerId) {
        if let Ok(mut listeners) = self.listeners.lock() {
            listeners.shift_remove(&id);
        }
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.lock().map(|l| l.len()).unwrap_or(0)
    }

    /// Call every listener in registration order
    pub fn async_update_listeners(&self) {
        // Listeners may add or remove listeners, so call them on a copy
        let listeners: Vec<Listener> = self
            .listeners
            .lock()
            .map(|l| l.values().cloned().collect())
            .unwrap_or_default();
        for listener in listeners {
            listener();
        }
    }

    /// Fetch once and notify listeners
    ///
    /// Failures are absorbed into `last_update_success`; this never errors.
    #[instrument(skip(self), fields(coordinator = %self.name))]
    pub async fn async_refresh(&self) {
        let _guard = self.refresh_lock.lock().await;
        if self.shut_down.load(Ordering::SeqCst) {
            return;
        }

        let result = self.updater.async_update_data().await;

        if self.shut_down.load(Ordering::SeqCst) {
            debug!("Discarding {} data fetched after shutdown", self.name);
            return;
        }

        let was_success = self.last_update_success();
        match result {
            Ok(data) => {
                if let Ok(mut slot) = self.data.write() {
                    *slot = Some(Arc::new(data));
                }
                if let Ok(mut exception) = self.last_exception.write() {
                    *exception = None;
                }
                if let Ok(mut time) = self.last_update_success_time.write() {
                    *time = Some(Utc::now());
                }
                self.last_update_success.store(true, Ordering::SeqCst);
                if !was_success {
                    info!("Fetching {} data recovered", self.name);
                }
            }
            Err(err) => {
                if was_success {
                    error!("Error fetching {} data: {}", self.name, err);
                } else {
                    debug!("Error fetching {} data: {}", self.name, err);
                }
                if let Ok(mut exception) = self.last_exception.write() {
                    *exception = Some(err.0);
                }
                self.last_update_success.store(false, Ordering::SeqCst);
            }
        }

        self.async_update_listeners();
    }

    /// Eager refresh done while a config entry is being set up
    ///
    /// Without a first snapshot there is nothing to build entities from, so a
    /// failure surfaces as [`ConfigEntryNotReady`]. On success periodic
    /// polling starts unless the entry disabled it.
    pub async fn async_config_entry_first_refresh(
        self: &Arc<Self>,
        entry: &ConfigEntry,
    ) -> Result<(), ConfigEntryNotReady> {
        self.async_refresh().await;

        if !self.last_update_success() {
            let reason = self
                .last_exception()
                .unwrap_or_else(|| format!("Error fetching {} data", self.name));
            return Err(ConfigEntryNotReady(reason));
        }

        if entry.pref_disable_polling {
            debug!("Polling disabled for {}", self.name);
        } else {
            self.start();
        }
        Ok(())
    }

    /// Start the periodic refresh task
    ///
    /// The first tick fires one interval from now. Ticks missed while a slow
    /// fetch is in flight are skipped, not queued.
    pub fn start(self: &Arc<Self>) {
        let Ok(mut polling) = self.polling.lock() else {
            return;
        };
        if polling.is_some() || self.shut_down.load(Ordering::SeqCst) {
            return;
        }

        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let coordinator = Arc::downgrade(self);
        let period = self.update_interval;
        let name = self.name.clone();

        *polling = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        debug!("Stopping {} polling", name);
                        break;
                    }
                    _ = ticker.tick() => {
                        let Some(coordinator) = coordinator.upgrade() else {
                            break;
                        };
                        coordinator.async_refresh().await;
                    }
                }
            }
        }));
    }

    /// Stop polling
    ///
    /// A refresh already in flight runs to completion but its result is
    /// dropped and listeners are not notified.
    pub async fn async_shutdown(&self) {
        self.shut_down.store(true, Ordering::SeqCst);
        let _ = self.shutdown_tx.send(());
        if let Ok(mut polling) = self.polling.lock() {
            polling.take();
        }
        debug!("Shut down {} coordinator", self.name);
    }

    pub fn is_polling(&self) -> bool {
        self.polling.lock().map(|p| p.is_some()).unwrap_or(false)
    }
}

/// Hook run on each coordinator notification, before the state is written
pub trait CoordinatorUpdateHandler: Entity {
    fn handle_coordinator_update(&self) {}
}

/// Glue between an entity and the coordinator feeding it
///
/// Entities embed this and delegate availability to it: an entity is
/// available exactly when the last refresh succeeded.
pub struct CoordinatorEntity<U: DataUpdater> {
    coordinator: Arc<DataUpdateCoordinator<U>>,
    listener: Mutex<Option<ListenerId>>,
}

impl<U: DataUpdater> CoordinatorEntity<U> {
    pub fn new(coordinator: Arc<DataUpdateCoordinator<U>>) -> Self {
        Self {
            coordinator,
            listener: Mutex::new(None),
        }
    }

    pub fn coordinator(&self) -> &Arc<DataUpdateCoordinator<U>> {
        &self.coordinator
    }

    pub fn data(&self) -> Option<Arc<U::Data>> {
        self.coordinator.data()
    }

    pub fn available(&self) -> bool {
        self.coordinator.last_update_success()
    }

    /// Subscribe `entity` to coordinator notifications
    ///
    /// The listener only holds a weak reference, so a dropped entity stops
    /// rendering without having to be detached first.
    pub fn async_added_to_hass<E>(&self, entity: &Arc<E>, handle: EntityHandle)
    where
        E: CoordinatorUpdateHandler + 'static,
    {
        let entity = Arc::downgrade(entity);
        let id = self.coordinator.async_add_listener(move || {
            if let Some(entity) = entity.upgrade() {
                entity.handle_coordinator_update();
                handle.write_state(&*entity);
            }
        });

        if let Ok(mut listener) = self.listener.lock() {
            if let Some(previous) = listener.replace(id) {
                self.coordinator.remove_listener(previous);
            }
        }
    }

    pub fn async_will_remove_from_hass(&self) {
        if let Some(id) = self.listener.lock().ok().and_then(|mut l| l.take()) {
            self.coordinator.remove_listener(id);
        }
    }
}
