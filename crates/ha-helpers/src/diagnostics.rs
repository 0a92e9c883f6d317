//! Diagnostics helpers

use serde_json::Value;
use thiserror::Error;

pub const REDACTED: &str = "**REDACTED**";

#[derive(Debug, Error)]
pub enum DiagnosticsError {
    #[error("Config entry not found: {0}")]
    EntryNotFound(String),

    #[error("Config entry {0} is not loaded")]
    NotLoaded(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type DiagnosticsResult<T> = Result<T, DiagnosticsError>;

/// Replace the values of `to_redact` keys, at any depth, with [`REDACTED`]
///
/// Null values are left alone so that "not set" stays distinguishable.
pub fn async_redact_data(data: &Value, to_redact: &[&str]) -> Value {
    match data {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, value)| {
                    let value = if to_redact.contains(&key.as_str()) && !value.is_null() {
                        Value::from(REDACTED)
                    } else {
                        async_redact_data(value, to_redact)
                    };
                    (key.clone(), value)
                })
                .collect(),
        ),
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| async_redact_data(item, to_redact))
                .collect(),
        ),
        other => other.clone(),
    }
}
