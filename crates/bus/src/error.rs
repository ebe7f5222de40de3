//! Bus error types

use thiserror::Error;

/// Bus-specific errors
#[derive(Debug, Error)]
pub enum BusError {
    /// Delivery worker could not be started
    #[error("failed to start delivery worker for '{subscriber}' on '{channel}': {source}")]
    WorkerSpawn {
        channel: String,
        subscriber: String,
        #[source]
        source: std::io::Error,
    },

    /// Handler error (from contract)
    #[error("handler error: {0}")]
    Contract(#[from] contracts::ContractError),
}
