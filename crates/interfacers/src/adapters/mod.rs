//! Built-in interfacer kinds
//!
//! Each adapter exposes its type designator as `KIND` and a `factory`
//! building it from init settings.

#[macro_use]
mod macros;

pub mod common;

#[cfg(feature = "command")]
pub mod command;
pub mod file;
pub mod generator;
pub mod log;
pub mod socket;

#[cfg(feature = "command")]
pub use command::{CommandInterfacer, CommandSettings};
pub use file::{FileSinkInterfacer, FileSinkSettings};
pub use generator::{GeneratorInterfacer, GeneratorSettings};
pub use log::{LogSinkInterfacer, LogSinkSettings};
pub use socket::{SocketInterfacer, SocketSettings};
