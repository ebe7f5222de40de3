//! Runtime settings protocol
//!
//! Interfacers keep typed settings initialised from their defaults. Updates
//! arrive as untyped tables from the configuration snapshot and are merged key
//! by key: keys the interfacer does not know are ignored, keys it knows replace
//! the current value. A merge that no longer deserialises into the typed
//! settings is rejected as a whole.

use std::sync::{PoisonError, RwLock, RwLockReadGuard};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::ContractError;

/// Untyped settings table as found in the configuration file
pub type Settings = toml::Table;

/// Object-safe view of a settings cell, used by the supervisor side
pub trait ApplySettings: Send + Sync {
    /// Merge `updates` into the current settings.
    ///
    /// Returns the keys that were applied (unknown keys are skipped).
    fn apply(&self, updates: &Settings) -> Result<Vec<String>, ContractError>;

    /// Current settings rendered as a table
    fn snapshot(&self) -> Result<Settings, ContractError>;
}

type Validator<T> = fn(&T) -> Result<(), ContractError>;

/// Typed settings shared between an interfacer loop and the supervisor
///
/// `T` must serialise to a table with every field present, so settings
/// structs avoid `Option` fields (a `None` would drop the key and make it
/// unknown to later updates).
pub struct SettingsCell<T> {
    current: RwLock<T>,
    validator: Option<Validator<T>>,
}

impl<T> SettingsCell<T>
where
    T: Serialize + DeserializeOwned + Clone + Send + Sync,
{
    /// Create a cell holding `defaults`
    pub fn new(defaults: T) -> Self {
        Self {
            current: RwLock::new(defaults),
            validator: None,
        }
    }

    /// Reject merged settings that fail `validator`
    pub fn with_validator(mut self, validator: Validator<T>) -> Self {
        self.validator = Some(validator);
        self
    }

    /// Clone of the current settings
    pub fn get(&self) -> T {
        self.read().clone()
    }

    /// Borrow the current settings
    pub fn read(&self) -> RwLockReadGuard<'_, T> {
        self.current.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn to_table(value: &T) -> Result<Settings, ContractError> {
        match toml::Value::try_from(value) {
            Ok(toml::Value::Table(table)) => Ok(table),
            Ok(other) => Err(ContractError::SettingsConversion(format!(
                "expected a table, got {}",
                other.type_str()
            ))),
            Err(e) => Err(ContractError::SettingsConversion(e.to_string())),
        }
    }
}

impl<T> ApplySettings for SettingsCell<T>
where
    T: Serialize + DeserializeOwned + Clone + Send + Sync,
{
    fn apply(&self, updates: &Settings) -> Result<Vec<String>, ContractError> {
        let mut guard = self.current.write().unwrap_or_else(PoisonError::into_inner);
        let mut table = Self::to_table(&guard)?;

        let mut applied = Vec::new();
        for (key, value) in updates {
            if table.contains_key(key) {
                table.insert(key.clone(), value.clone());
                applied.push(key.clone());
            } else {
                debug!(key = %key, "ignoring unknown setting");
            }
        }

        if applied.is_empty() {
            return Ok(applied);
        }

        let next: T = toml::Value::Table(table)
            .try_into()
            .map_err(|e: toml::de::Error| {
                ContractError::invalid_setting(applied.join(","), e.to_string())
            })?;

        if let Some(validator) = self.validator {
            validator(&next)?;
        }

        *guard = next;
        Ok(applied)
    }

    fn snapshot(&self) -> Result<Settings, ContractError> {
        Self::to_table(&self.read())
    }
}
