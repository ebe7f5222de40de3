//! # Config Loader
//!
//! Reads hub configuration files into [`HubConfig`] snapshots and watches
//! them for changes ([`ConfigSource`]).
//!
//! Loading rejects only what the supervisor cannot act on: unreadable files,
//! syntax errors and structurally invalid entries. Hub options with a sane
//! fallback, such as an unknown `loglevel`, load as written and are resolved
//! where they are applied, so a typo there never discards the interfacer
//! changes of the same edit.

mod format;
mod source;
mod validator;

pub use contracts::HubConfig;
pub use format::ConfigFormat;
pub use source::{ConfigSource, FileConfigSource, MemoryConfigHandle, MemoryConfigSource};

use std::path::Path;

use contracts::ContractError;

/// Read, parse and validate the file at `path`
///
/// # Errors
/// Unknown extension, read failure, parse failure or validation failure
pub fn load(path: &Path) -> Result<HubConfig, ContractError> {
    let format = ConfigFormat::of(path)?;
    let content = std::fs::read_to_string(path)?;
    load_str(&content, format)
}

/// Parse and validate `content`
pub fn load_str(content: &str, format: ConfigFormat) -> Result<HubConfig, ContractError> {
    let config = format.parse(content)?;
    validator::validate(&config)?;
    Ok(config)
}
