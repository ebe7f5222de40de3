//! Supervisor main loop
//!
//! Holds exactly one [`InterfacerHandle`] per configured name and reconciles
//! the set against the configuration source on change.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bus::Bus;
use config_loader::ConfigSource;
use contracts::{HubConfig, HubSettings, InterfacerSpec, NodeTable};
use interfacers::{HubContext, InterfacerHandle, Registry};
use observability::LogLevelHandle;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::error::{Result, SupervisorError};
use crate::health::HealthMonitor;
use crate::reconcile::{LiveEntry, ReconcilePlan, TeardownReason};

/// Loop timing
#[derive(Debug, Clone)]
pub struct SupervisorOptions {
    /// Pause between passes
    pub tick: Duration,
    /// Bound on waiting for a torn-down interfacer to exit
    pub teardown_timeout: Duration,
}

impl Default for SupervisorOptions {
    fn default() -> Self {
        Self {
            tick: Duration::from_millis(200),
            teardown_timeout: Duration::from_secs(5),
        }
    }
}

/// Lifecycle owner of every interfacer
pub struct Supervisor<S: ConfigSource> {
    source: S,
    registry: Registry,
    hub: HubContext,
    nodes_tx: watch::Sender<Arc<NodeTable>>,
    interfacers: BTreeMap<String, InterfacerHandle>,
    /// Torn down but still running past the join bound
    lingering: Vec<InterfacerHandle>,
    reported_dead: HashSet<u64>,
    health: HealthMonitor,
    log_level: Option<LogLevelHandle>,
    options: SupervisorOptions,
}

impl<S: ConfigSource> Supervisor<S> {
    /// Supervisor with no interfacers yet; the first pass creates them
    pub fn new(source: S, registry: Registry, bus: Bus, options: SupervisorOptions) -> Self {
        let (nodes_tx, nodes_rx) = watch::channel(Arc::new(source.current().nodes.clone()));
        Self {
            source,
            registry,
            hub: HubContext::new(bus, nodes_rx),
            nodes_tx,
            interfacers: BTreeMap::new(),
            lingering: Vec::new(),
            reported_dead: HashSet::new(),
            health: HealthMonitor::disabled(),
            log_level: None,
            options,
        }
    }

    /// Drive readiness and watchdog through `health`
    pub fn with_health(mut self, health: HealthMonitor) -> Self {
        self.health = health;
        self
    }

    /// Apply the configured log level through `level`
    pub fn with_log_level(mut self, level: LogLevelHandle) -> Self {
        self.log_level = Some(level);
        self
    }

    /// Bus shared with every interfacer
    pub fn bus(&self) -> &Bus {
        &self.hub.bus
    }

    /// Registered handle for `name`
    pub fn interfacer(&self, name: &str) -> Option<&InterfacerHandle> {
        self.interfacers.get(name)
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<&str> {
        self.interfacers.keys().map(String::as_str).collect()
    }

    /// Torn-down instances that have not exited yet
    pub fn lingering(&self) -> usize {
        self.lingering.len()
    }

    /// Health state machine
    pub fn health(&self) -> &HealthMonitor {
        &self.health
    }

    /// Reconcile against the source's current snapshot
    pub async fn reconcile_now(&mut self) -> ReconcilePlan {
        let config = self.source.current().clone();
        self.apply_config(&config).await
    }

    /// Bring the registered set in line with `config`
    ///
    /// Hub options and the node table first, then teardown, creation and
    /// in-place updates. Failures are logged per name and never abort the
    /// pass.
    #[instrument(name = "reconcile", skip_all, fields(configured = config.interfacers.len()))]
    pub async fn apply_config(&mut self, config: &HubConfig) -> ReconcilePlan {
        let started = Instant::now();

        self.apply_hub_settings(&config.hub);
        self.nodes_tx.send_replace(Arc::new(config.nodes.clone()));

        let plan = ReconcilePlan::compute(
            self.interfacers.values().map(|h| LiveEntry {
                name: h.name(),
                kind: h.kind(),
                init_settings: h.init_settings(),
            }),
            config,
        );

        for name in &plan.incomplete {
            error!(
                interfacer = %name,
                "unable to update interfacer, init_settings or runtime_settings missing"
            );
        }
        for name in &plan.disabled {
            debug!(interfacer = %name, "interfacer has no type, skipping");
        }

        self.teardown(&plan.teardown).await;

        for name in &plan.create {
            let Some(spec) = config.interfacers.get(name) else {
                continue;
            };
            match self.create(name, spec) {
                Ok(handle) => {
                    observability::record_interfacer_created(handle.kind());
                    self.interfacers.insert(name.clone(), handle);
                }
                Err(e) if e.is_init() => {
                    error!(interfacer = %name, error = %e, "failed to create interfacer");
                }
                Err(e) => {
                    error!(interfacer = %name, error = %e, "unable to create interfacer");
                }
            }
        }

        for name in &plan.update {
            let (Some(handle), Some(runtime)) = (
                self.interfacers.get_mut(name),
                config.interfacers.get(name).and_then(|s| s.runtime_settings.as_ref()),
            ) else {
                continue;
            };
            if let Err(e) = handle.apply_runtime_settings(runtime) {
                error!(interfacer = %name, error = %e, "runtime settings rejected, keeping previous");
            }
        }

        observability::record_reconcile_ms(started.elapsed().as_secs_f64() * 1000.0);
        info!(
            created = plan.create.len(),
            torn_down = plan.teardown.len(),
            updated = plan.update.len(),
            running = self.interfacers.len(),
            "configuration applied"
        );
        plan
    }

    fn apply_hub_settings(&mut self, hub: &HubSettings) {
        if let Some(level) = &self.log_level {
            if let Err(e) = level.set_level(&hub.loglevel) {
                warn!(loglevel = %hub.loglevel, error = %e, "keeping previous logging level");
            }
        }
        self.health.update_settings(hub);
    }

    /// Construct, configure and start one interfacer
    fn create(&self, name: &str, spec: &InterfacerSpec) -> Result<InterfacerHandle> {
        let kind = spec.kind.as_deref().ok_or_else(|| SupervisorError::MissingType {
            name: name.to_string(),
        })?;
        let (Some(init), Some(runtime)) = (&spec.init_settings, &spec.runtime_settings) else {
            return Err(SupervisorError::IncompleteSettings {
                name: name.to_string(),
            });
        };

        info!(interfacer = %name, kind, "creating interfacer");
        let mut handle = self.registry.create(name, kind, init, &self.hub)?;
        handle.apply_runtime_settings(runtime)?;
        handle.start()?;
        Ok(handle)
    }

    /// Stop every doomed instance, then join each with the teardown bound
    async fn teardown(&mut self, doomed: &[(String, TeardownReason)]) {
        let mut stopping = Vec::with_capacity(doomed.len());
        for (name, reason) in doomed {
            let Some(handle) = self.interfacers.remove(name) else {
                continue;
            };
            info!(interfacer = %name, %reason, "tearing down interfacer");
            handle.request_stop();
            self.reported_dead.remove(&handle.instance_id());
            observability::record_interfacer_torn_down(&reason.to_string());
            stopping.push(handle);
        }

        for mut handle in stopping {
            if !handle.join(self.options.teardown_timeout).await {
                warn!(
                    interfacer = handle.name(),
                    instance = handle.instance_id(),
                    "interfacer still running after teardown, leaving it to finish"
                );
                self.lingering.push(handle);
            }
        }
    }

    /// Warn once about every dead instance; `true` when all are alive
    fn liveness_pass(&mut self) -> bool {
        self.lingering.retain(InterfacerHandle::is_alive);

        let mut alive = 0;
        for handle in self.interfacers.values() {
            if handle.is_alive() {
                alive += 1;
            } else if self.reported_dead.insert(handle.instance_id()) {
                warn!(
                    interfacer = handle.name(),
                    kind = handle.kind(),
                    "interfacer thread is dead"
                );
            }
        }

        observability::record_interfacers_alive(alive, self.interfacers.len());
        alive == self.interfacers.len()
    }

    /// One supervisor pass
    ///
    /// Returns the plan when the configuration changed.
    pub async fn tick(&mut self) -> Option<ReconcilePlan> {
        let plan = if self.source.has_changed() {
            Some(self.reconcile_now().await)
        } else {
            None
        };

        let all_alive = self.liveness_pass();
        self.health.pass(all_alive);
        plan
    }

    /// Run until `shutdown` fires, then stop everything
    pub async fn run(mut self, shutdown: CancellationToken) {
        info!(tick = ?self.options.tick, kinds = ?self.registry, "supervisor starting");
        self.reconcile_now().await;

        loop {
            self.tick().await;
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.options.tick) => {}
            }
        }

        self.shutdown().await;
    }

    /// Stop every interfacer and wait for all of them
    #[instrument(name = "supervisor_shutdown", skip_all, fields(interfacers = self.interfacers.len()))]
    pub async fn shutdown(mut self) {
        info!("stopping all interfacers");
        for handle in self.interfacers.values().chain(&self.lingering) {
            handle.request_stop();
        }

        for (name, mut handle) in std::mem::take(&mut self.interfacers) {
            debug!(interfacer = %name, "waiting for interfacer to exit");
            handle.wait().await;
        }
        for mut handle in std::mem::take(&mut self.lingering) {
            handle.join(self.options.teardown_timeout).await;
        }

        let bus = self.hub.bus.clone();
        let bound = self.options.teardown_timeout;
        match tokio::task::spawn_blocking(move || bus.close_within(bound)).await {
            Ok(0) => {}
            Ok(stuck) => warn!(stuck, "receivers still busy at exit, not waiting for them"),
            Err(e) => warn!(error = %e, "bus shutdown failed"),
        }
        info!("Exit completed");
    }
}

impl<S: ConfigSource> std::fmt::Debug for Supervisor<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Supervisor")
            .field("interfacers", &self.interfacers)
            .field("lingering", &self.lingering.len())
            .field("health", &self.health)
            .finish()
    }
}
