//! Hub run loop: configuration, logging, supervisor, signals.

use anyhow::{Context, Result};
use bus::Bus;
use config_loader::{ConfigSource, FileConfigSource};
use interfacers::Registry;
use observability::{parse_hub_level, ObservabilityConfig, DEFAULT_HUB_LEVEL};
use supervisor::{HealthMonitor, Supervisor, SupervisorOptions};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::cli::Cli;

/// Run the hub until SIGINT/SIGTERM
pub async fn run_hub(cli: &Cli) -> Result<()> {
    // Configuration first: hub options decide where logs go
    let source = FileConfigSource::open(&cli.config_file)
        .with_context(|| format!("Failed to load config from {}", cli.config_file.display()))?;
    let hub = source.current().hub.clone();

    let configured_level = cli.level_override().unwrap_or(hub.loglevel.as_str());
    let initial_level = if parse_hub_level(configured_level).is_some() {
        configured_level
    } else {
        DEFAULT_HUB_LEVEL
    };

    let log_level = observability::init_with_config(ObservabilityConfig {
        log_format: cli.log_format.into(),
        log_file: cli.logfile.clone(),
        use_syslog: hub.use_syslog,
        metrics_port: hub.metrics_port.filter(|&port| port != 0),
        default_log_level: initial_level.to_string(),
    })?;

    if initial_level != configured_level {
        warn!(loglevel = %configured_level, fallback = DEFAULT_HUB_LEVEL, "logging level invalid");
    }

    let registry = Registry::with_defaults();
    info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %cli.config_file.display(),
        interfacers = source.current().interfacers.len(),
        kinds = ?registry,
        "sensor hub starting"
    );

    let mut supervisor = Supervisor::new(source, registry, Bus::new(), SupervisorOptions::default())
        .with_health(HealthMonitor::from_env(&hub));
    if cli.level_override().is_none() {
        supervisor = supervisor.with_log_level(log_level);
    }

    let shutdown = CancellationToken::new();
    let trigger = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        warn!("Received shutdown signal, stopping interfacers...");
        trigger.cancel();
    });

    supervisor.run(shutdown).await;
    Ok(())
}

/// Resolve on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
