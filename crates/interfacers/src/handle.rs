//! Supervisor-side handle for one running interfacer
//!
//! Owns the task, the stop flag and the bus subscriptions of a single
//! instance. A handle is created from a [`PreparedInterfacer`], started once,
//! asked to stop, and joined with a bound before it is discarded.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bus::EnvelopeHandler;
use contracts::{ApplySettings, Settings};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::error::{InterfacerError, Result};
use crate::interfacer::{HubContext, InterfacerContext, Launch, PreparedInterfacer};
use crate::stop::StopSignal;

static NEXT_INSTANCE: AtomicU64 = AtomicU64::new(1);

/// Lifecycle state of an interfacer instance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterfacerState {
    /// Constructed, task not started yet
    Created,
    /// Task running, no stop requested
    Running,
    /// Stop requested, task still running
    StopRequested,
    /// Task finished (or never will run again)
    Stopped,
}

/// Handle to one interfacer instance
pub struct InterfacerHandle {
    name: String,
    kind: String,
    init_settings: Settings,
    instance_id: u64,
    subscriber_id: String,
    settings: Arc<dyn ApplySettings>,
    receiver: Option<EnvelopeHandler>,
    hub: HubContext,
    stop: StopSignal,
    launch: Option<Launch>,
    worker: Option<JoinHandle<()>>,
    subscribed: Vec<String>,
}

impl InterfacerHandle {
    /// Wrap a prepared interfacer. The task is not started.
    pub fn new(
        name: impl Into<String>,
        kind: impl Into<String>,
        init_settings: Settings,
        prepared: PreparedInterfacer,
        hub: HubContext,
    ) -> Self {
        let name = name.into();
        let instance_id = NEXT_INSTANCE.fetch_add(1, Ordering::Relaxed);
        let (settings, receiver, launch) = prepared.into_parts(&hub);

        Self {
            subscriber_id: format!("{name}#{instance_id}"),
            name,
            kind: kind.into(),
            init_settings,
            instance_id,
            settings,
            receiver,
            hub,
            stop: StopSignal::new(),
            launch: Some(launch),
            worker: None,
            subscribed: Vec::new(),
        }
    }

    /// Configured name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Type designator the instance was created from
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Init settings the instance was constructed with
    pub fn init_settings(&self) -> &Settings {
        &self.init_settings
    }

    /// Process-unique id of this instance
    ///
    /// A re-created interfacer gets a new id even when its name is unchanged.
    pub fn instance_id(&self) -> u64 {
        self.instance_id
    }

    /// Channels the instance is currently subscribed to
    pub fn subscribed_channels(&self) -> &[String] {
        &self.subscribed
    }

    /// Current runtime settings
    pub fn current_settings(&self) -> Option<Settings> {
        self.settings.snapshot().ok()
    }

    /// Lifecycle state
    pub fn state(&self) -> InterfacerState {
        if self.launch.is_some() {
            InterfacerState::Created
        } else if !self.is_alive() {
            InterfacerState::Stopped
        } else if self.stop.is_requested() {
            InterfacerState::StopRequested
        } else {
            InterfacerState::Running
        }
    }

    /// Whether the task is still executing
    pub fn is_alive(&self) -> bool {
        self.worker.as_ref().is_some_and(|w| !w.is_finished())
    }

    /// Spawn the interfacer task and register its subscriptions
    ///
    /// Must be called from within a tokio runtime.
    #[instrument(name = "interfacer_start", skip(self), fields(interfacer = %self.name, kind = %self.kind))]
    pub fn start(&mut self) -> Result<()> {
        let launch = self.launch.take().ok_or_else(|| InterfacerError::AlreadyStarted {
            name: self.name.clone(),
        })?;

        if let Err(e) = self.sync_subscriptions() {
            self.launch = Some(launch);
            return Err(e);
        }

        let ctx = InterfacerContext::new(&self.name, self.hub.clone(), self.stop.clone());
        let run = launch(ctx);
        let name = self.name.clone();
        self.worker = Some(tokio::spawn(async move {
            run.await;
            debug!(interfacer = %name, "interfacer loop returned");
        }));

        info!(
            instance = self.instance_id,
            subscriptions = self.subscribed.len(),
            "interfacer started"
        );
        Ok(())
    }

    /// Merge runtime settings into the instance
    ///
    /// On error the previous settings stay in effect. Subscriptions follow
    /// the `subchannels` setting while the task is running.
    pub fn apply_runtime_settings(&mut self, updates: &Settings) -> Result<Vec<String>> {
        let applied = self
            .settings
            .apply(updates)
            .map_err(|source| InterfacerError::Settings {
                name: self.name.clone(),
                source,
            })?;

        if self.state() == InterfacerState::Running {
            self.sync_subscriptions()?;
        }

        debug!(interfacer = %self.name, keys = ?applied, "runtime settings applied");
        Ok(applied)
    }

    /// Set the cooperative stop flag. Does not wait.
    pub fn request_stop(&self) {
        if !self.stop.is_requested() {
            debug!(interfacer = %self.name, "stop requested");
        }
        self.stop.request();
    }

    /// Wait up to `timeout` for the task to exit
    ///
    /// Returns `true` when the task has exited (or never started). The bus
    /// subscriptions are released either way; a task that did not exit in
    /// time keeps running detached until it notices the stop flag.
    #[instrument(name = "interfacer_join", skip(self), fields(interfacer = %self.name))]
    pub async fn join(&mut self, timeout: Duration) -> bool {
        let exited = match self.worker.as_mut() {
            None => true,
            Some(worker) => match tokio::time::timeout(timeout, worker).await {
                Ok(Ok(())) => true,
                Ok(Err(e)) => {
                    warn!(error = %e, "interfacer task ended abnormally");
                    true
                }
                Err(_) => false,
            },
        };

        self.release_subscriptions();

        if exited {
            self.worker = None;
            debug!("interfacer joined");
        } else {
            warn!(?timeout, "interfacer did not stop in time");
        }
        exited
    }

    /// Wait for the task to exit, without a bound
    pub async fn wait(&mut self) {
        if let Some(worker) = self.worker.take() {
            if let Err(e) = worker.await {
                warn!(interfacer = %self.name, error = %e, "interfacer task ended abnormally");
            }
        }
        self.release_subscriptions();
    }

    fn subchannels(&self) -> Vec<String> {
        let table = match self.settings.snapshot() {
            Ok(table) => table,
            Err(e) => {
                warn!(interfacer = %self.name, error = %e, "cannot read settings snapshot");
                return Vec::new();
            }
        };

        let mut channels: Vec<String> = table
            .get("subchannels")
            .and_then(|v| v.as_array())
            .map(|items| {
                items
                    .iter()
                    .filter_map(|v| v.as_str())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        channels.sort();
        channels.dedup();
        channels
    }

    fn sync_subscriptions(&mut self) -> Result<()> {
        let Some(handler) = self.receiver.clone() else {
            return Ok(());
        };

        let wanted = self.subchannels();
        let bus = &self.hub.bus;

        for channel in self.subscribed.iter().filter(|c| !wanted.contains(c)) {
            bus.unsubscribe(channel, &self.subscriber_id);
            debug!(interfacer = %self.name, channel = %channel, "unsubscribed");
        }
        self.subscribed.retain(|c| wanted.contains(c));

        for channel in wanted {
            if self.subscribed.contains(&channel) {
                continue;
            }
            bus.subscribe(&channel, &self.subscriber_id, handler.clone())?;
            debug!(interfacer = %self.name, channel = %channel, "subscribed");
            self.subscribed.push(channel);
        }
        Ok(())
    }

    fn release_subscriptions(&mut self) {
        for channel in self.subscribed.drain(..) {
            self.hub.bus.unsubscribe(&channel, &self.subscriber_id);
        }
    }
}

impl Drop for InterfacerHandle {
    fn drop(&mut self) {
        self.stop.request();
        self.release_subscriptions();
    }
}

impl std::fmt::Debug for InterfacerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InterfacerHandle")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("instance_id", &self.instance_id)
            .field("state", &self.state())
            .finish()
    }
}
