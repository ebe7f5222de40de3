//! HubConfig - Config Loader output
//!
//! The configuration snapshot the supervisor reconciles against: hub options,
//! the node table and one entry per named interfacer.

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};
use validator::Validate;

use crate::{NodeId, Settings};

/// Complete hub configuration snapshot
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Validate)]
pub struct HubConfig {
    /// Hub-level options
    #[serde(default)]
    #[validate(nested)]
    pub hub: HubSettings,

    /// Node metadata handed to interfacers that label or decode readings
    #[serde(default)]
    pub nodes: NodeTable,

    /// Interfacer name -> desired spec
    #[serde(default)]
    pub interfacers: BTreeMap<String, InterfacerSpec>,
}

impl HubConfig {
    /// Names of entries carrying a type designator
    pub fn enabled_names(&self) -> impl Iterator<Item = &str> {
        self.interfacers
            .iter()
            .filter(|(_, spec)| spec.kind.is_some())
            .map(|(name, _)| name.as_str())
    }
}

/// Hub-level options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct HubSettings {
    /// Log level name (DEBUG/INFO/WARNING/ERROR/CRITICAL, case-insensitive)
    #[serde(default = "default_loglevel")]
    pub loglevel: String,

    /// Also log to the local syslog socket
    #[serde(default, deserialize_with = "deserialize_flag")]
    pub use_syslog: bool,

    /// Watchdog interval override; `WATCHDOG_USEC` from the environment wins
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(range(min = 0.0))]
    pub systemd_watchdog_timeout_secs: Option<f64>,

    /// Strict heartbeat mode: only heartbeat while every interfacer is alive
    #[serde(default = "default_true", deserialize_with = "deserialize_flag")]
    pub systemd_heartbeat_require_all_threads: bool,

    /// Prometheus exporter port (absent or 0 = disabled)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics_port: Option<u16>,
}

impl Default for HubSettings {
    fn default() -> Self {
        Self {
            loglevel: default_loglevel(),
            use_syslog: false,
            systemd_watchdog_timeout_secs: None,
            systemd_heartbeat_require_all_threads: true,
            metrics_port: None,
        }
    }
}

fn default_loglevel() -> String {
    "WARNING".to_string()
}

fn default_true() -> bool {
    true
}

/// Desired state of one named interfacer
///
/// Every field is optional so incomplete entries survive parsing: a missing
/// `type` disables the entry, missing settings sections mark it incomplete.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InterfacerSpec {
    /// Type designator (registry key)
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,

    /// Construction-time settings; any change forces destroy-and-recreate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub init_settings: Option<Settings>,

    /// Settings applied in place while running
    #[serde(
        default,
        alias = "runtimesettings",
        skip_serializing_if = "Option::is_none"
    )]
    pub runtime_settings: Option<Settings>,
}

impl InterfacerSpec {
    /// Spec with a type and both settings sections
    pub fn new(kind: impl Into<String>, init_settings: Settings, runtime_settings: Settings) -> Self {
        Self {
            kind: Some(kind.into()),
            init_settings: Some(init_settings),
            runtime_settings: Some(runtime_settings),
        }
    }

    /// Both settings sections are present
    pub fn is_complete(&self) -> bool {
        self.init_settings.is_some() && self.runtime_settings.is_some()
    }
}

/// Node id (as written in the config) -> node metadata
pub type NodeTable = BTreeMap<String, NodeConfig>;

/// Metadata for one node
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Human readable node name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nodename: Option<String>,

    /// Value names, positional
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub names: Vec<String>,

    /// Value scale factors, positional
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub scales: Vec<f64>,

    /// Value units, positional
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub units: Vec<String>,
}

impl NodeConfig {
    /// Look up the node entry for an id
    pub fn lookup(table: &NodeTable, node_id: NodeId) -> Option<&NodeConfig> {
        table.get(&node_id.to_string())
    }

    /// Name of the value at `index`, falling back to its position
    pub fn value_name(&self, index: usize) -> String {
        self.names
            .get(index)
            .cloned()
            .unwrap_or_else(|| (index + 1).to_string())
    }

    /// Apply the configured scale for the value at `index`
    pub fn scale(&self, index: usize, value: f64) -> f64 {
        self.scales.get(index).map_or(value, |s| value * s)
    }
}

/// Accept `true`/`false` as well as the `yes`/`no`/`y`/`1` strings older
/// config files use.
pub fn deserialize_flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Text(String),
        Int(i64),
    }

    Ok(match Flag::deserialize(deserializer)? {
        Flag::Bool(b) => b,
        Flag::Text(s) => matches!(s.to_lowercase().as_str(), "1" | "y" | "yes" | "true"),
        Flag::Int(i) => i != 0,
    })
}
