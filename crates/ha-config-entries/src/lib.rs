//! Config Entries
//!
//! Config entries represent individual integration instances (one per
//! monitored station) and manage their lifecycle: setup, scheduled setup
//! retries, unload and reload.
//!
//! Entries are persisted in `.storage/core.config_entries`.

pub mod entry;
pub mod manager;
pub mod state_machine;

pub use entry::{
    ConfigEntry, ConfigEntryDisabledBy, ConfigEntrySource, ConfigEntryState, ConfigEntryUpdate,
};

pub use manager::{
    ConfigEntries, ConfigEntriesData, ConfigEntriesError, ConfigEntriesResult,
    ConfigEntryNotReady, SetupError, SetupHandler, UnloadHandler, STORAGE_KEY,
    STORAGE_MINOR_VERSION, STORAGE_VERSION,
};

pub use state_machine::{calculate_retry_delay, InvalidTransition};
