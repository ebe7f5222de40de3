//! Bus - channel registry and publish fan-out

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};

use contracts::ReadingEnvelope;
use metrics::counter;
use tracing::{debug, info, instrument, trace, warn};

use crate::error::BusError;
use crate::metrics::SubscriberStats;
use crate::subscription::{EnvelopeHandler, Outlet, Subscription};

/// Default per-subscriber queue capacity
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// Default drain bound of [`Bus::close`]
pub const DEFAULT_CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

type Registry = HashMap<String, Vec<Subscription>>;

/// In-process publish/subscribe bus
///
/// Cheap to clone; all clones share one registration table. The table lock
/// is only held to register, unregister or snapshot outlets, never while a
/// handler runs.
#[derive(Clone)]
pub struct Bus {
    registry: Arc<RwLock<Registry>>,
    queue_capacity: usize,
}

impl Default for Bus {
    fn default() -> Self {
        Self::new()
    }
}

impl Bus {
    /// Create a bus with the default queue capacity
    pub fn new() -> Self {
        Self::with_queue_capacity(DEFAULT_QUEUE_CAPACITY)
    }

    /// Create a bus whose subscriptions buffer up to `queue_capacity` envelopes
    pub fn with_queue_capacity(queue_capacity: usize) -> Self {
        Self {
            registry: Arc::new(RwLock::new(HashMap::new())),
            queue_capacity: queue_capacity.max(1),
        }
    }

    /// Register `handler` for every future publish on `channel`
    ///
    /// Idempotent per `(channel, subscriber)`: subscribing again keeps the
    /// existing subscription and returns `Ok(false)`.
    #[instrument(name = "bus_subscribe", skip(self, handler))]
    pub fn subscribe(
        &self,
        channel: &str,
        subscriber: &str,
        handler: EnvelopeHandler,
    ) -> Result<bool, BusError> {
        let mut registry = self.registry.write().unwrap_or_else(PoisonError::into_inner);
        let subs = registry.entry(channel.to_string()).or_default();

        if subs.iter().any(|s| s.subscriber() == subscriber) {
            trace!(channel, subscriber, "already subscribed");
            return Ok(false);
        }

        subs.push(Subscription::spawn(
            channel,
            subscriber,
            handler,
            self.queue_capacity,
        )?);
        debug!(channel, subscriber, "subscribed");
        Ok(true)
    }

    /// Remove a registration; no-op when absent
    ///
    /// The subscriber's worker drains whatever is already queued and exits.
    #[instrument(name = "bus_unsubscribe", skip(self))]
    pub fn unsubscribe(&self, channel: &str, subscriber: &str) -> bool {
        let mut registry = self.registry.write().unwrap_or_else(PoisonError::into_inner);
        let Some(subs) = registry.get_mut(channel) else {
            return false;
        };

        let before = subs.len();
        subs.retain(|s| s.subscriber() != subscriber);
        let removed = subs.len() != before;
        if subs.is_empty() {
            registry.remove(channel);
        }
        if removed {
            debug!(channel, subscriber, "unsubscribed");
        }
        removed
    }

    /// Remove every registration held by `subscriber`
    pub fn unsubscribe_all(&self, subscriber: &str) -> usize {
        let channels = self.channels_of(subscriber);
        channels
            .iter()
            .filter(|channel| self.unsubscribe(channel, subscriber))
            .count()
    }

    /// Publish an envelope to every current subscriber of `channel`
    ///
    /// Never blocks: each subscriber gets a non-blocking enqueue, and a full
    /// queue drops the envelope for that subscriber only. Returns the number
    /// of subscribers that accepted it.
    pub fn publish(&self, channel: &str, envelope: ReadingEnvelope) -> usize {
        self.publish_shared(channel, Arc::new(envelope))
    }

    /// Publish an already shared envelope
    pub fn publish_shared(&self, channel: &str, envelope: Arc<ReadingEnvelope>) -> usize {
        let outlets = self.snapshot(channel);
        counter!("hub_envelopes_published_total", "channel" => channel.to_string()).increment(1);

        if outlets.is_empty() {
            trace!(channel, node_id = envelope.node_id, "no subscribers");
            return 0;
        }

        outlets
            .iter()
            .filter(|outlet| outlet.try_send(channel, Arc::clone(&envelope)))
            .count()
    }

    /// Subscribers of `channel` at this instant
    fn snapshot(&self, channel: &str) -> Vec<Outlet> {
        let registry = self.registry.read().unwrap_or_else(PoisonError::into_inner);
        registry
            .get(channel)
            .map(|subs| subs.iter().map(|s| s.outlet().clone()).collect())
            .unwrap_or_default()
    }

    /// Number of subscribers on `channel`
    pub fn subscriber_count(&self, channel: &str) -> usize {
        let registry = self.registry.read().unwrap_or_else(PoisonError::into_inner);
        registry.get(channel).map_or(0, Vec::len)
    }

    /// Channels `subscriber` is registered on
    pub fn channels_of(&self, subscriber: &str) -> Vec<String> {
        let registry = self.registry.read().unwrap_or_else(PoisonError::into_inner);
        let mut channels: Vec<String> = registry
            .iter()
            .filter(|(_, subs)| subs.iter().any(|s| s.subscriber() == subscriber))
            .map(|(channel, _)| channel.clone())
            .collect();
        channels.sort();
        channels
    }

    /// Metrics of every subscription as `(channel, subscriber, snapshot)`
    pub fn metrics(&self) -> Vec<(String, String, SubscriberStats)> {
        let registry = self.registry.read().unwrap_or_else(PoisonError::into_inner);
        registry
            .iter()
            .flat_map(|(channel, subs)| {
                subs.iter().map(move |s| {
                    (
                        channel.clone(),
                        s.subscriber().to_string(),
                        s.metrics().snapshot(),
                    )
                })
            })
            .collect()
    }

    /// Drop every subscription and wait for their workers to drain
    ///
    /// Same as [`Bus::close_within`] with [`DEFAULT_CLOSE_TIMEOUT`].
    pub fn close(&self) {
        self.close_within(DEFAULT_CLOSE_TIMEOUT);
    }

    /// Drop every subscription and wait up to `timeout` for the workers
    ///
    /// Workers whose handler is still busy at the deadline are logged and
    /// detached. Returns how many were detached. Blocks the calling thread.
    pub fn close_within(&self, timeout: Duration) -> usize {
        let drained: Vec<Subscription> = {
            let mut registry = self.registry.write().unwrap_or_else(PoisonError::into_inner);
            registry.drain().flat_map(|(_, subs)| subs).collect()
        };

        info!(subscriptions = drained.len(), "closing bus");
        let deadline = Instant::now() + timeout;
        let stuck = drained
            .into_iter()
            .map(|sub| sub.shutdown_until(deadline))
            .filter(|drained| !drained)
            .count();
        if stuck > 0 {
            warn!(stuck, ?timeout, "bus closed with busy subscribers");
        }
        stuck
    }
}
