//! Subscription - one subscriber on one channel, with isolated queue and worker

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use contracts::{ContractError, ReadingEnvelope};
use metrics::counter;
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use crate::error::BusError;
use crate::metrics::SubscriberMetrics;

/// Log the first drop of a subscription, then every Nth
const DROP_LOG_EVERY: u64 = 100;

/// Worker completion poll while draining
const DRAIN_POLL: Duration = Duration::from_millis(5);

/// Receiver function invoked for every envelope published on a channel
///
/// Runs on the subscription's own worker thread, so it may block on I/O
/// without holding up the publisher or other subscribers.
pub type EnvelopeHandler = Arc<dyn Fn(&ReadingEnvelope) -> Result<(), ContractError> + Send + Sync>;

/// Sending side of a subscription, cloned into publish snapshots
#[derive(Clone)]
pub(crate) struct Outlet {
    subscriber: String,
    tx: mpsc::Sender<Arc<ReadingEnvelope>>,
    metrics: Arc<SubscriberMetrics>,
}

impl Outlet {
    /// Queue an envelope (non-blocking)
    ///
    /// Returns true if queued, false if the queue was full or the worker is gone
    pub(crate) fn try_send(&self, channel: &str, envelope: Arc<ReadingEnvelope>) -> bool {
        match self.tx.try_send(envelope) {
            Ok(()) => {
                self.metrics
                    .observe_depth(self.tx.max_capacity() - self.tx.capacity());
                true
            }
            Err(mpsc::error::TrySendError::Full(e)) => {
                let dropped = self.metrics.record_dropped();
                counter!("hub_envelopes_dropped_total", "channel" => channel.to_string())
                    .increment(1);
                if dropped == 1 || dropped % DROP_LOG_EVERY == 0 {
                    warn!(
                        channel = %channel,
                        subscriber = %self.subscriber,
                        node_id = e.node_id,
                        dropped,
                        "Queue full, envelope dropped"
                    );
                }
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                error!(channel = %channel, subscriber = %self.subscriber, "Subscriber worker closed unexpectedly");
                false
            }
        }
    }

    pub(crate) fn subscriber(&self) -> &str {
        &self.subscriber
    }

    pub(crate) fn metrics(&self) -> &Arc<SubscriberMetrics> {
        &self.metrics
    }
}

/// Handle to a running subscription worker
pub struct Subscription {
    channel: String,
    outlet: Outlet,
    worker: Option<JoinHandle<()>>,
}

impl Subscription {
    /// Create the queue and start the delivery worker
    pub fn spawn(
        channel: impl Into<String>,
        subscriber: impl Into<String>,
        handler: EnvelopeHandler,
        queue_capacity: usize,
    ) -> Result<Self, BusError> {
        let channel = channel.into();
        let subscriber = subscriber.into();
        let (tx, rx) = mpsc::channel(queue_capacity.max(1));
        let metrics = Arc::new(SubscriberMetrics::new());

        let worker_metrics = Arc::clone(&metrics);
        let worker_channel = channel.clone();
        let worker_subscriber = subscriber.clone();

        let worker = thread::Builder::new()
            .name(format!("bus-{subscriber}"))
            .spawn(move || {
                delivery_worker(rx, handler, worker_metrics, worker_channel, worker_subscriber)
            })
            .map_err(|source| BusError::WorkerSpawn {
                channel: channel.clone(),
                subscriber: subscriber.clone(),
                source,
            })?;

        Ok(Self {
            channel,
            outlet: Outlet {
                subscriber,
                tx,
                metrics,
            },
            worker: Some(worker),
        })
    }

    /// Channel name
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Subscriber id
    pub fn subscriber(&self) -> &str {
        self.outlet.subscriber()
    }

    /// Get current metrics
    pub fn metrics(&self) -> &Arc<SubscriberMetrics> {
        self.outlet.metrics()
    }

    /// Send an envelope to this subscriber only (non-blocking)
    pub fn try_send(&self, envelope: Arc<ReadingEnvelope>) -> bool {
        self.outlet.try_send(&self.channel, envelope)
    }

    pub(crate) fn outlet(&self) -> &Outlet {
        &self.outlet
    }

    /// Close the queue and wait until `deadline` for the worker to drain it
    ///
    /// Returns `false` if the worker is still busy at the deadline. It is then
    /// detached and exits on its own once the handler returns. Blocks the
    /// calling thread; call from synchronous code or `spawn_blocking`.
    pub fn shutdown_until(mut self, deadline: Instant) -> bool {
        let worker = self.worker.take();
        let channel = self.channel.clone();
        let subscriber = self.outlet.subscriber.clone();
        let metrics = Arc::clone(&self.outlet.metrics);
        // Dropping the last sender lets the worker fall out of its loop
        drop(self);

        let Some(worker) = worker else {
            return true;
        };
        while !worker.is_finished() {
            if Instant::now() >= deadline {
                warn!(
                    channel = %channel,
                    subscriber = %subscriber,
                    queued = metrics.snapshot().depth,
                    "Subscriber worker still busy, detaching"
                );
                return false;
            }
            thread::sleep(DRAIN_POLL);
        }
        if worker.join().is_err() {
            error!(channel = %channel, subscriber = %subscriber, "Subscriber worker panicked");
        }
        debug!(channel = %channel, subscriber = %subscriber, "Subscription shutdown complete");
        true
    }
}

/// Worker loop that feeds queued envelopes to the handler
fn delivery_worker(
    mut rx: mpsc::Receiver<Arc<ReadingEnvelope>>,
    handler: EnvelopeHandler,
    metrics: Arc<SubscriberMetrics>,
    channel: String,
    subscriber: String,
) {
    debug!(channel = %channel, subscriber = %subscriber, "Subscriber worker started");

    while let Some(envelope) = rx.blocking_recv() {
        metrics.observe_depth(rx.len());

        match panic::catch_unwind(AssertUnwindSafe(|| handler(&envelope))) {
            Ok(Ok(())) => {
                metrics.record_delivered();
            }
            Ok(Err(e)) => {
                metrics.record_failed();
                counter!("hub_handler_failures_total", "channel" => channel.clone()).increment(1);
                error!(
                    channel = %channel,
                    subscriber = %subscriber,
                    node_id = envelope.node_id,
                    error = %e,
                    "Handler failed"
                );
            }
            Err(payload) => {
                metrics.record_failed();
                counter!("hub_handler_failures_total", "channel" => channel.clone()).increment(1);
                error!(
                    channel = %channel,
                    subscriber = %subscriber,
                    node_id = envelope.node_id,
                    panic = %panic_message(payload.as_ref()),
                    "Handler panicked"
                );
            }
        }
    }

    debug!(channel = %channel, subscriber = %subscriber, "Subscriber worker stopped");
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("<non-string panic>")
}
