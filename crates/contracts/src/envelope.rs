//! ReadingEnvelope - the record carried on the bus
//!
//! One unit of telemetry in flight between interfacers.

use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Node identifier of a logical data source
pub type NodeId = u32;

/// Reading envelope
///
/// Published on the bus behind an `Arc`, so every subscriber sees the same
/// immutable value. An interfacer that transforms a reading builds a new
/// envelope instead of mutating the one it received.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadingEnvelope {
    /// Logical source node
    pub node_id: NodeId,

    /// Capture time, unix seconds
    pub timestamp: f64,

    /// Payload exactly as received (kept for re-decoding / diagnostics)
    #[serde(default)]
    pub raw_payload: Bytes,

    /// Numeric readings extracted from the payload, in payload order
    #[serde(default)]
    pub decoded_values: Vec<f64>,

    /// Provenance, e.g. `command://power` (logging/tracing only)
    #[serde(default)]
    pub origin_uri: String,
}

impl ReadingEnvelope {
    /// Create an envelope stamped with the current time
    pub fn new(node_id: NodeId, origin_uri: impl Into<String>) -> Self {
        Self {
            node_id,
            timestamp: now(),
            raw_payload: Bytes::new(),
            decoded_values: Vec::new(),
            origin_uri: origin_uri.into(),
        }
    }

    /// Attach the raw payload
    pub fn with_raw(mut self, raw: impl Into<Bytes>) -> Self {
        self.raw_payload = raw.into();
        self
    }

    /// Attach decoded values
    pub fn with_values(mut self, values: Vec<f64>) -> Self {
        self.decoded_values = values;
        self
    }

    /// Override the capture timestamp
    pub fn with_timestamp(mut self, timestamp: f64) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Whether any value was decoded
    pub fn has_values(&self) -> bool {
        !self.decoded_values.is_empty()
    }
}

/// Current wall-clock time in unix seconds
pub fn now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or_default()
}
