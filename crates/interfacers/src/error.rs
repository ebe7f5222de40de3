//! Interfacer error types

use contracts::ContractError;
use thiserror::Error;

/// Interfacer error
#[derive(Debug, Error)]
pub enum InterfacerError {
    /// No factory registered for the configured type
    #[error("unknown interfacer type '{kind}' for '{name}'")]
    UnknownKind {
        /// Interfacer name
        name: String,
        /// Configured type designator
        kind: String,
    },

    /// Construction from init settings failed
    #[error("failed to create interfacer '{name}': {message}")]
    Init {
        /// Interfacer name
        name: String,
        /// Error message
        message: String,
    },

    /// Runtime settings were rejected
    #[error("invalid runtime settings for '{name}': {source}")]
    Settings {
        /// Interfacer name
        name: String,
        /// Underlying error
        #[source]
        source: ContractError,
    },

    /// Start called on an instance that was already started
    #[error("interfacer '{name}' was already started")]
    AlreadyStarted {
        /// Interfacer name
        name: String,
    },

    /// Failure inside a running loop (command failed, bad line, ...)
    #[error("{0}")]
    Runtime(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Bus registration failed
    #[error(transparent)]
    Bus(#[from] bus::BusError),
}

impl InterfacerError {
    /// Create an init error
    pub fn init(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Init {
            name: name.into(),
            message: message.into(),
        }
    }
}

/// Interfacer result type alias
pub type Result<T> = std::result::Result<T, InterfacerError>;
