//! Configuration validation
//!
//! Rules:
//! - hub options within range (watchdog >= 0)
//! - interfacer names non-empty
//! - a present type designator is non-empty
//!
//! The log level is not checked here: an unknown name falls back to the
//! default level where it is applied.

use contracts::{ContractError, HubConfig};
use validator::Validate;

/// Validate a HubConfig
///
/// Returns the first error encountered, or Ok(()).
pub fn validate(config: &HubConfig) -> Result<(), ContractError> {
    validate_hub(config)?;
    validate_interfacers(config)?;
    Ok(())
}

/// Range checks declared on the hub settings
fn validate_hub(config: &HubConfig) -> Result<(), ContractError> {
    config
        .validate()
        .map_err(|e| ContractError::config_validation("hub", e.to_string()))
}

/// Interfacer entries
fn validate_interfacers(config: &HubConfig) -> Result<(), ContractError> {
    for (name, spec) in &config.interfacers {
        if name.trim().is_empty() {
            return Err(ContractError::config_validation(
                "interfacers",
                "interfacer name cannot be empty",
            ));
        }
        if let Some(kind) = &spec.kind {
            if kind.trim().is_empty() {
                return Err(ContractError::config_validation(
                    format!("interfacers.{name}.type"),
                    "type cannot be empty (remove the key to disable)",
                ));
            }
        }
    }
    Ok(())
}
