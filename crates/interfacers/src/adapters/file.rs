//! JSON lines file sink
//!
//! Appends every received reading to `path` as one JSON object per line.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use bus::EnvelopeHandler;
use contracts::{ApplySettings, ContractError, ReadingEnvelope, Settings, SettingsCell};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::adapters::common::{reject_unknown_init, require_init};
use crate::error::{InterfacerError, Result};
use crate::interfacer::{HubContext, Interfacer, InterfacerContext, PreparedInterfacer};

/// Type designator
pub const KIND: &str = "file";

/// Runtime settings of the file sink
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileSinkSettings {
    pub subchannels: Vec<String>,
    pub pubchannels: Vec<String>,
    /// Flush after every line instead of on shutdown
    pub flush_each: bool,
}

impl Default for FileSinkSettings {
    fn default() -> Self {
        Self {
            subchannels: vec!["ch1".into()],
            pubchannels: Vec::new(),
            flush_each: true,
        }
    }
}

impl_channels!(FileSinkSettings);

/// File sink
pub struct FileSinkInterfacer {
    path: PathBuf,
    writer: Arc<Mutex<BufWriter<File>>>,
    settings: Arc<SettingsCell<FileSinkSettings>>,
    written: Arc<AtomicU64>,
}

impl FileSinkInterfacer {
    /// Open (or create) `path` for appending
    pub fn open(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            writer: Arc::new(Mutex::new(BufWriter::new(file))),
            settings: Arc::new(SettingsCell::new(FileSinkSettings::default())),
            written: Arc::new(AtomicU64::new(0)),
        })
    }

    fn write_line(
        writer: &Mutex<BufWriter<File>>,
        envelope: &ReadingEnvelope,
        flush: bool,
    ) -> std::result::Result<(), ContractError> {
        let line = serde_json::to_string(envelope).map_err(|e| ContractError::Other(e.to_string()))?;
        let mut writer = writer.lock().unwrap_or_else(PoisonError::into_inner);
        writeln!(writer, "{line}")?;
        if flush {
            writer.flush()?;
        }
        Ok(())
    }
}

impl Interfacer for FileSinkInterfacer {
    fn settings(&self) -> Arc<dyn ApplySettings> {
        self.settings.clone()
    }

    fn receiver(&self, _hub: &HubContext) -> Option<EnvelopeHandler> {
        let writer = self.writer.clone();
        let settings = self.settings.clone();
        let written = self.written.clone();
        Some(Arc::new(move |envelope: &ReadingEnvelope| {
            let flush = settings.read().flush_each;
            Self::write_line(&writer, envelope, flush)?;
            written.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }))
    }

    async fn run(self, ctx: InterfacerContext) {
        ctx.stop().requested().await;

        let flushed = self
            .writer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .flush();
        if let Err(e) = flushed {
            warn!(interfacer = %ctx.name(), path = %self.path.display(), error = %e, "final flush failed");
        }
        debug!(
            interfacer = %ctx.name(),
            written = self.written.load(Ordering::Relaxed),
            "file sink stopped"
        );
    }
}

/// Factory: requires `path`
pub fn factory(name: &str, init: &Settings) -> Result<PreparedInterfacer> {
    reject_unknown_init(name, init, &["path"])?;
    let path: PathBuf = require_init(name, init, "path")?;
    let interfacer = FileSinkInterfacer::open(&path).map_err(|e| {
        InterfacerError::init(name, format!("cannot open {}: {e}", path.display()))
    })?;
    Ok(PreparedInterfacer::new(interfacer))
}
