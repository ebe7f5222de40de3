//! Adapter common utility functions

use std::time::Duration;

use contracts::{ContractError, Settings};
use serde::de::DeserializeOwned;

use crate::error::{InterfacerError, Result};

/// Channel routing carried by every adapter's settings
pub trait Channels {
    /// Channels readings are published to
    fn pubchannels(&self) -> &[String];

    /// Channels readings are received from
    fn subchannels(&self) -> &[String];
}

/// Fail construction when `init` holds keys the adapter does not accept
pub(crate) fn reject_unknown_init(name: &str, init: &Settings, allowed: &[&str]) -> Result<()> {
    match init.keys().find(|k| !allowed.contains(&k.as_str())) {
        Some(key) => Err(InterfacerError::init(
            name,
            format!("unexpected init setting '{key}'"),
        )),
        None => Ok(()),
    }
}

/// Typed optional init setting
pub(crate) fn init_value<T: DeserializeOwned>(
    name: &str,
    init: &Settings,
    key: &str,
) -> Result<Option<T>> {
    init.get(key)
        .map(|value| {
            value
                .clone()
                .try_into()
                .map_err(|e: toml::de::Error| {
                    InterfacerError::init(name, format!("init setting '{key}': {e}"))
                })
        })
        .transpose()
}

/// Typed required init setting
pub(crate) fn require_init<T: DeserializeOwned>(name: &str, init: &Settings, key: &str) -> Result<T> {
    init_value(name, init, key)?
        .ok_or_else(|| InterfacerError::init(name, format!("missing init setting '{key}'")))
}

/// Check that a duration setting is a positive, representable number of seconds
pub(crate) fn positive_secs(key: &str, value: f64) -> std::result::Result<(), ContractError> {
    if value > 0.0 && Duration::try_from_secs_f64(value).is_ok() {
        Ok(())
    } else {
        Err(ContractError::invalid_setting(
            key,
            format!("must be a positive number of seconds, got {value}"),
        ))
    }
}
