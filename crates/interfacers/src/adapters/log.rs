//! Logging sink
//!
//! Writes every reading received on its subscribed channels to the log,
//! labelled with names, scales and units from the `[nodes]` table.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bus::EnvelopeHandler;
use contracts::{ApplySettings, NodeConfig, ReadingEnvelope, Settings, SettingsCell};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::adapters::common::reject_unknown_init;
use crate::error::Result;
use crate::interfacer::{HubContext, Interfacer, InterfacerContext, PreparedInterfacer};

/// Type designator
pub const KIND: &str = "log";

/// Runtime settings of the log sink
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogSinkSettings {
    pub subchannels: Vec<String>,
    pub pubchannels: Vec<String>,
}

impl Default for LogSinkSettings {
    fn default() -> Self {
        Self {
            subchannels: vec!["ch1".into()],
            pubchannels: Vec::new(),
        }
    }
}

impl_channels!(LogSinkSettings);

/// Render a reading with node metadata, e.g. `house power=1234 W`
pub fn describe(envelope: &ReadingEnvelope, node: Option<&NodeConfig>) -> String {
    let mut out = match node.and_then(|n| n.nodename.as_deref()) {
        Some(name) => name.to_string(),
        None => format!("node {}", envelope.node_id),
    };

    for (i, value) in envelope.decoded_values.iter().enumerate() {
        let (label, scaled, unit) = match node {
            Some(n) => (n.value_name(i), n.scale(i, *value), n.units.get(i).map(String::as_str)),
            None => ((i + 1).to_string(), *value, None),
        };
        out.push_str(&format!(" {label}={scaled}"));
        if let Some(unit) = unit.filter(|u| !u.is_empty()) {
            out.push(' ');
            out.push_str(unit);
        }
    }
    out
}

/// Sink logging readings at info level
pub struct LogSinkInterfacer {
    settings: Arc<SettingsCell<LogSinkSettings>>,
    received: Arc<AtomicU64>,
}

impl LogSinkInterfacer {
    pub fn new() -> Self {
        Self {
            settings: Arc::new(SettingsCell::new(LogSinkSettings::default())),
            received: Arc::new(AtomicU64::new(0)),
        }
    }
}

impl Default for LogSinkInterfacer {
    fn default() -> Self {
        Self::new()
    }
}

impl Interfacer for LogSinkInterfacer {
    fn settings(&self) -> Arc<dyn ApplySettings> {
        self.settings.clone()
    }

    fn receiver(&self, hub: &HubContext) -> Option<EnvelopeHandler> {
        let nodes = hub.nodes.clone();
        let received = self.received.clone();
        Some(Arc::new(move |envelope: &ReadingEnvelope| {
            received.fetch_add(1, Ordering::Relaxed);
            let table = nodes.borrow().clone();
            let line = describe(envelope, NodeConfig::lookup(&table, envelope.node_id));
            info!(origin = %envelope.origin_uri, timestamp = envelope.timestamp, "{line}");
            Ok(())
        }))
    }

    async fn run(self, ctx: InterfacerContext) {
        ctx.stop().requested().await;
        debug!(
            interfacer = %ctx.name(),
            received = self.received.load(Ordering::Relaxed),
            "log sink stopped"
        );
    }
}

/// Factory: the log sink takes no init settings
pub fn factory(name: &str, init: &Settings) -> Result<PreparedInterfacer> {
    reject_unknown_init(name, init, &[])?;
    Ok(PreparedInterfacer::new(LogSinkInterfacer::new()))
}
