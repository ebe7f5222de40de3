//! CLI argument definitions using clap.

use clap::{Parser, ValueEnum};
use std::path::PathBuf;

/// Default configuration file location
pub const DEFAULT_CONFIG: &str = "/etc/sensor-hub/sensor-hub.toml";

/// Sensor Hub - gateway between sensor sources and telemetry sinks
#[derive(Parser, Debug)]
#[command(
    name = "sensor-hub",
    author,
    version,
    about = "Sensor reading gateway",
    long_about = "Ingests readings from sockets, commands and other sources and \n\
                  republishes them toward telemetry sinks.\n\n\
                  The configuration file is watched and applied while running."
)]
pub struct Cli {
    /// Configuration file (TOML or JSON)
    #[arg(long, default_value = DEFAULT_CONFIG, env = "SENSOR_HUB_CONFIG")]
    pub config_file: PathBuf,

    /// Log to this file (rotated at 5 MiB) instead of stderr
    #[arg(long, env = "SENSOR_HUB_LOGFILE")]
    pub logfile: Option<PathBuf>,

    /// Print the parsed configuration and exit
    #[arg(long)]
    pub show_settings: bool,

    /// Print --show-settings output as JSON
    #[arg(long, requires = "show_settings")]
    pub json: bool,

    /// Increase logging verbosity (-v for debug, -vv for trace); overrides hub.loglevel
    #[arg(short, long, action = clap::ArgAction::Count, env = "SENSOR_HUB_VERBOSE")]
    pub verbose: u8,

    /// Only log errors; overrides hub.loglevel
    #[arg(short, long, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Log output format
    #[arg(long, value_enum, default_value = "compact", env = "SENSOR_HUB_LOG_FORMAT")]
    pub log_format: LogFormat,
}

impl Cli {
    /// Level forced from the command line, if any
    pub fn level_override(&self) -> Option<&'static str> {
        if self.quiet {
            return Some("ERROR");
        }
        match self.verbose {
            0 => None,
            1 => Some("DEBUG"),
            _ => Some("TRACE"),
        }
    }
}

/// Log output format
#[derive(ValueEnum, Clone, Copy, Debug, Default)]
pub enum LogFormat {
    /// JSON structured logging
    Json,
    /// Human-readable pretty format
    Pretty,
    /// Compact single-line format
    #[default]
    Compact,
}

impl From<LogFormat> for observability::LogFormat {
    fn from(format: LogFormat) -> Self {
        match format {
            LogFormat::Json => Self::Json,
            LogFormat::Pretty => Self::Pretty,
            LogFormat::Compact => Self::Compact,
        }
    }
}
