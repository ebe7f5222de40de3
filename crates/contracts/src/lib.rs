//! # Contracts
//!
//! Frozen interface contracts shared by every hub crate: the reading envelope,
//! the hub configuration snapshot and the runtime settings protocol.
//! Business crates depend on this crate, never the other way around.
//!
//! ## Time Model
//! - Envelope timestamps are unix seconds (`f64`), taken by the producing interfacer
//! - Ordering is only meaningful within one `node_id`

mod envelope;
mod error;
mod hub_config;
mod settings;

pub use envelope::*;
pub use error::*;
pub use hub_config::*;
pub use settings::{ApplySettings, Settings, SettingsCell};
