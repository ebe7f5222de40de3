//! Supervisor errors

use interfacers::InterfacerError;
use thiserror::Error;

/// Errors raised while bringing an interfacer up
#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("interfacer '{name}' has no type")]
    MissingType { name: String },

    #[error("interfacer '{name}' lacks init_settings or runtime_settings")]
    IncompleteSettings { name: String },

    #[error(transparent)]
    Interfacer(#[from] InterfacerError),
}

impl SupervisorError {
    /// Whether the factory rejected the init settings
    pub fn is_init(&self) -> bool {
        matches!(self, Self::Interfacer(InterfacerError::Init { .. }))
    }
}

pub type Result<T> = std::result::Result<T, SupervisorError>;
