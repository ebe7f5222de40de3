//! # Bus
//!
//! In-process publish/subscribe bus connecting interfacers.
//!
//! Responsibilities:
//! - Name-addressed channels, many subscribers per channel
//! - Snapshot fan-out of `Arc<ReadingEnvelope>` at publish time
//! - Isolate slow or failing subscribers, never block the publisher

pub mod bus;
pub mod error;
pub mod metrics;
pub mod subscription;

pub use crate::bus::{Bus, DEFAULT_CLOSE_TIMEOUT, DEFAULT_QUEUE_CAPACITY};
pub use crate::error::BusError;
pub use crate::metrics::{SubscriberMetrics, SubscriberStats};
pub use crate::subscription::{EnvelopeHandler, Subscription};
pub use contracts::ReadingEnvelope;
