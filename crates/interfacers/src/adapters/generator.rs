//! Synthetic reading source
//!
//! Publishes a fixed set of values for one node at a fixed interval. Each
//! value grows by `step` per emitted reading, which makes ordering visible
//! downstream. Useful for testing deployments without hardware.

use std::sync::Arc;
use std::time::Duration;

use bus::EnvelopeHandler;
use contracts::{ApplySettings, ContractError, NodeId, ReadingEnvelope, Settings, SettingsCell};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::adapters::common::{init_value, positive_secs, reject_unknown_init, Channels};
use crate::error::Result;
use crate::interfacer::{HubContext, Interfacer, InterfacerContext, PreparedInterfacer};

/// Type designator
pub const KIND: &str = "generator";

/// Runtime settings of the generator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratorSettings {
    pub subchannels: Vec<String>,
    pub pubchannels: Vec<String>,
    /// Seconds between readings
    pub interval_secs: f64,
    /// Base values of every reading
    pub values: Vec<f64>,
    /// Increment applied per reading
    pub step: f64,
}

impl Default for GeneratorSettings {
    fn default() -> Self {
        Self {
            subchannels: Vec::new(),
            pubchannels: vec!["ch1".into()],
            interval_secs: 1.0,
            values: vec![0.0],
            step: 1.0,
        }
    }
}

impl_channels!(GeneratorSettings);

impl GeneratorSettings {
    fn validate(&self) -> std::result::Result<(), ContractError> {
        positive_secs("interval_secs", self.interval_secs)
    }
}

/// Synthetic source
pub struct GeneratorInterfacer {
    node: NodeId,
    settings: Arc<SettingsCell<GeneratorSettings>>,
}

impl GeneratorInterfacer {
    /// Create a generator for `node`
    pub fn new(node: NodeId) -> Self {
        Self {
            node,
            settings: Arc::new(
                SettingsCell::new(GeneratorSettings::default())
                    .with_validator(GeneratorSettings::validate),
            ),
        }
    }

    /// Values of the `seq`-th reading
    fn values_at(settings: &GeneratorSettings, seq: u64) -> Vec<f64> {
        settings
            .values
            .iter()
            .map(|v| v + settings.step * seq as f64)
            .collect()
    }
}

impl Interfacer for GeneratorInterfacer {
    fn settings(&self) -> Arc<dyn ApplySettings> {
        self.settings.clone()
    }

    fn receiver(&self, _hub: &HubContext) -> Option<EnvelopeHandler> {
        None
    }

    async fn run(self, ctx: InterfacerContext) {
        let origin = format!("generator://{}", ctx.name());
        let mut seq = 0u64;

        loop {
            let settings = self.settings.get();
            let envelope = ReadingEnvelope::new(self.node, origin.as_str())
                .with_values(Self::values_at(&settings, seq));
            let queued = ctx.publish(settings.pubchannels(), envelope);
            trace!(interfacer = %ctx.name(), seq, queued, "generated reading");
            seq += 1;

            if ctx.stop().sleep(Duration::from_secs_f64(settings.interval_secs)).await {
                break;
            }
        }

        debug!(interfacer = %ctx.name(), emitted = seq, "generator stopped");
    }
}

/// Factory: accepts `node` (default 1)
pub fn factory(name: &str, init: &Settings) -> Result<PreparedInterfacer> {
    reject_unknown_init(name, init, &["node"])?;
    let node: NodeId = init_value(name, init, "node")?.unwrap_or(1);
    Ok(PreparedInterfacer::new(GeneratorInterfacer::new(node)))
}
