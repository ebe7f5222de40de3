//! Interfacer contract
//!
//! An interfacer is a unit of I/O work (a polled command, a socket listener,
//! a sink) that runs as its own task, publishes readings onto the bus and
//! optionally receives readings from the channels it subscribes to.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use bus::{Bus, EnvelopeHandler};
use contracts::{ApplySettings, NodeTable, ReadingEnvelope};
use tokio::sync::watch;
use tracing::trace;

use crate::stop::StopSignal;

/// Behaviour every interfacer kind implements
///
/// `run` owns the interfacer for the lifetime of its task and must return
/// soon after `ctx.stop()` is requested. Long waits (sleeps, child
/// processes, socket reads) are bounded so the stop flag is observed within
/// a fraction of a second.
#[trait_variant::make(Interfacer: Send)]
pub trait LocalInterfacer {
    /// Settings cell shared with the supervisor for runtime updates
    fn settings(&self) -> Arc<dyn ApplySettings>;

    /// Handler for readings delivered from subscribed channels.
    ///
    /// Pure sources return `None`. The handler runs on a bus worker thread,
    /// not on the interfacer task.
    fn receiver(&self, hub: &HubContext) -> Option<EnvelopeHandler>;

    /// Main loop
    async fn run(self, ctx: InterfacerContext);
}

/// Hub-wide facilities handed to every interfacer
#[derive(Clone)]
pub struct HubContext {
    /// Shared bus
    pub bus: Bus,
    /// Latest node table from the configuration
    pub nodes: watch::Receiver<Arc<NodeTable>>,
}

impl HubContext {
    /// Create a context over `bus` following `nodes`
    pub fn new(bus: Bus, nodes: watch::Receiver<Arc<NodeTable>>) -> Self {
        Self { bus, nodes }
    }

    /// Context with an empty, never-updated node table
    pub fn detached(bus: Bus) -> Self {
        let (_tx, nodes) = watch::channel(Arc::new(NodeTable::new()));
        Self { bus, nodes }
    }

    /// Snapshot of the current node table
    pub fn node_table(&self) -> Arc<NodeTable> {
        self.nodes.borrow().clone()
    }
}

/// Per-instance context passed to [`Interfacer::run`]
#[derive(Clone)]
pub struct InterfacerContext {
    name: Arc<str>,
    hub: HubContext,
    stop: StopSignal,
}

impl InterfacerContext {
    pub(crate) fn new(name: &str, hub: HubContext, stop: StopSignal) -> Self {
        Self {
            name: name.into(),
            hub,
            stop,
        }
    }

    /// Configured interfacer name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Stop flag for this instance
    pub fn stop(&self) -> &StopSignal {
        &self.stop
    }

    /// Shared bus
    pub fn bus(&self) -> &Bus {
        &self.hub.bus
    }

    /// Snapshot of the current node table
    pub fn nodes(&self) -> Arc<NodeTable> {
        self.hub.node_table()
    }

    /// Publish `envelope` on every channel in `channels`, in order.
    ///
    /// Returns the total number of subscribers the envelope was queued for.
    pub fn publish(&self, channels: &[String], envelope: ReadingEnvelope) -> usize {
        let envelope = Arc::new(envelope);
        let mut queued = 0;
        for channel in channels {
            queued += self.hub.bus.publish_shared(channel, envelope.clone());
        }
        trace!(
            interfacer = %self.name,
            node_id = envelope.node_id,
            channels = channels.len(),
            queued,
            "published reading"
        );
        queued
    }
}

pub(crate) type RunFuture = Pin<Box<dyn Future<Output = ()> + Send>>;
pub(crate) type Launch = Box<dyn FnOnce(InterfacerContext) -> RunFuture + Send>;
type Bind = Box<dyn FnOnce(&HubContext) -> (Option<EnvelopeHandler>, Launch) + Send>;

/// Type-erased interfacer ready to be wrapped in a handle
///
/// [`Interfacer`] has an `async fn` and is not object safe; factories return
/// this instead so the registry can hold heterogeneous kinds.
pub struct PreparedInterfacer {
    settings: Arc<dyn ApplySettings>,
    bind: Bind,
}

impl PreparedInterfacer {
    /// Erase a concrete interfacer
    pub fn new<I>(interfacer: I) -> Self
    where
        I: Interfacer + Send + 'static,
    {
        let settings = Interfacer::settings(&interfacer);
        Self {
            settings,
            bind: Box::new(move |hub| {
                let receiver = Interfacer::receiver(&interfacer, hub);
                let launch: Launch = Box::new(move |ctx| Box::pin(Interfacer::run(interfacer, ctx)));
                (receiver, launch)
            }),
        }
    }

    pub(crate) fn into_parts(
        self,
        hub: &HubContext,
    ) -> (Arc<dyn ApplySettings>, Option<EnvelopeHandler>, Launch) {
        let (receiver, launch) = (self.bind)(hub);
        (self.settings, receiver, launch)
    }
}
