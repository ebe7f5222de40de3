//! # Observability
//!
//! Tracing + Prometheus metrics for the hub.
//!
//! ## Features
//!
//! - Tracing initialisation (JSON/Pretty/Compact formats)
//! - Destination: stderr or a size-rotating file, plus optional syslog
//! - Log level reloadable at runtime through [`LogLevelHandle`]
//! - Prometheus metrics export
//!
//! ## Usage Example
//!
//! ```ignore
//! let level = observability::init_with_config(ObservabilityConfig {
//!     log_file: Some("/var/log/sensor-hub.log".into()),
//!     ..Default::default()
//! })?;
//!
//! // later, after a configuration reload
//! level.set_level("DEBUG")?;
//! ```

pub mod level;
pub mod metrics;
pub mod writer;

use std::path::PathBuf;

use anyhow::{Context, Result};
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::{Layer, Layered, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, reload, EnvFilter, Registry};

// Re-exports
pub use crate::level::{parse_hub_level, LogLevelHandle, DEFAULT_HUB_LEVEL};
pub use crate::metrics::{
    record_heartbeat, record_interfacer_created, record_interfacer_torn_down,
    record_interfacers_alive, record_reconcile_ms,
};
pub use crate::writer::{RotatingFile, SyslogWriter, ROTATE_BYTES, SYSLOG_SOCKET};

/// Tag prefixed to syslog messages
pub const SYSLOG_TAG: &str = "sensor-hub";

/// Observability configuration
#[derive(Debug, Clone)]
pub struct ObservabilityConfig {
    /// Log format
    pub log_format: LogFormat,
    /// Log file (None = stderr)
    pub log_file: Option<PathBuf>,
    /// Also send events to the local syslog
    pub use_syslog: bool,
    /// Prometheus port (None = disabled)
    pub metrics_port: Option<u16>,
    /// Initial level, in configuration naming (`WARNING`, `debug`, ...)
    pub default_log_level: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_format: LogFormat::Compact,
            log_file: None,
            use_syslog: false,
            metrics_port: None,
            default_log_level: DEFAULT_HUB_LEVEL.to_string(),
        }
    }
}

/// Log format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// JSON structured logs
    Json,
    /// Human readable multi-line format
    Pretty,
    /// Compact single-line format
    #[default]
    Compact,
}

type Base = Layered<reload::Layer<EnvFilter, Registry>, Registry>;
type BoxedLayer = Box<dyn Layer<Base> + Send + Sync + 'static>;

fn fmt_layer<W>(format: LogFormat, writer: W, ansi: bool) -> BoxedLayer
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let layer = fmt::layer()
        .with_writer(writer)
        .with_ansi(ansi)
        .with_thread_names(true);

    match format {
        LogFormat::Json => layer
            .json()
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .boxed(),
        LogFormat::Pretty => layer.pretty().boxed(),
        LogFormat::Compact => layer.compact().boxed(),
    }
}

fn syslog_layer(writer: SyslogWriter) -> BoxedLayer {
    fmt::layer()
        .with_writer(writer)
        .with_ansi(false)
        .without_time()
        .with_target(false)
        .with_thread_names(true)
        .compact()
        .boxed()
}

/// Initialise tracing (and metrics when a port is set)
///
/// `RUST_LOG`, when set, overrides `default_log_level` and pins the filter.
/// A syslog socket that cannot be opened is reported and skipped.
pub fn init_with_config(config: ObservabilityConfig) -> Result<LogLevelHandle> {
    // 1. Initialize Tracing
    let (filter, pinned) = match EnvFilter::try_from_default_env() {
        Ok(filter) => (filter, true),
        Err(_) => {
            let level = parse_hub_level(&config.default_log_level).with_context(|| {
                format!("invalid log level '{}'", config.default_log_level)
            })?;
            (EnvFilter::new(level.to_string()), false)
        }
    };
    let (filter, reload_handle) = reload::Layer::new(filter);

    let mut layers: Vec<BoxedLayer> = Vec::new();
    match &config.log_file {
        Some(path) => {
            let file = RotatingFile::open(path, ROTATE_BYTES)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            layers.push(fmt_layer(config.log_format, file, false));
        }
        None => layers.push(fmt_layer(config.log_format, std::io::stderr, true)),
    }

    let mut syslog_error = None;
    if config.use_syslog {
        match SyslogWriter::connect(SYSLOG_SOCKET, SYSLOG_TAG) {
            Ok(writer) => layers.push(syslog_layer(writer)),
            Err(e) => syslog_error = Some(e),
        }
    }

    tracing_subscriber::registry()
        .with(filter)
        .with(layers)
        .try_init()
        .context("Failed to initialize tracing subscriber")?;

    if let Some(e) = syslog_error {
        tracing::warn!(socket = SYSLOG_SOCKET, error = %e, "syslog unavailable, continuing without it");
    }

    let level = LogLevelHandle::new(reload_handle, pinned);
    if !pinned {
        level.set_level(&config.default_log_level)?;
    }

    // 2. Initialize Prometheus Exporter (if enabled)
    if let Some(port) = config.metrics_port {
        init_metrics_only(port)?;
    }

    tracing::info!(
        log_format = ?config.log_format,
        log_file = ?config.log_file,
        use_syslog = config.use_syslog,
        metrics_port = ?config.metrics_port,
        "Observability initialized"
    );

    Ok(level)
}

/// Install the Prometheus recorder and its HTTP listener on `port`
pub fn init_metrics_only(port: u16) -> Result<()> {
    PrometheusBuilder::new()
        .with_http_listener(([0, 0, 0, 0], port))
        .install()
        .context("Failed to install Prometheus recorder")?;

    tracing::info!(port = port, "Prometheus metrics endpoint initialized");
    Ok(())
}
