//! # Interfacers
//!
//! Pluggable I/O units driven by the supervisor.
//!
//! Responsibilities:
//! - Define the [`Interfacer`] contract and its per-instance context
//! - Own instance lifecycles through [`InterfacerHandle`] (start, cooperative
//!   stop, bounded join, runtime settings, bus subscriptions)
//! - Resolve configured type designators through the [`Registry`]
//! - Ship the built-in kinds: `command`, `socket`, `generator`, `log`, `file`
//!
//! ## Usage Example
//!
//! ```ignore
//! use interfacers::{HubContext, Registry};
//!
//! let registry = Registry::with_defaults();
//! let mut handle = registry.create("power", "command", &init, &hub)?;
//! handle.apply_runtime_settings(&runtime)?;
//! handle.start()?;
//!
//! handle.request_stop();
//! handle.join(Duration::from_secs(5)).await;
//! ```

pub mod adapters;
mod error;
mod handle;
mod interfacer;
mod registry;
mod stop;

// Re-exports
pub use error::{InterfacerError, Result};
pub use handle::{InterfacerHandle, InterfacerState};
pub use interfacer::{HubContext, Interfacer, InterfacerContext, LocalInterfacer, PreparedInterfacer};
pub use registry::{Factory, Registry};
pub use stop::StopSignal;
