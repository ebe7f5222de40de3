//! Configuration sources polled by the supervisor
//!
//! A source answers two questions on every supervisor tick: did the desired
//! configuration change, and what is it now.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::SystemTime;

use contracts::{ContractError, HubConfig};
use tracing::{debug, error, info};


/// Supplier of configuration snapshots
pub trait ConfigSource: Send {
    /// Check for a new snapshot; `true` when `current()` changed since the last call
    fn has_changed(&mut self) -> bool;

    /// Current snapshot
    fn current(&self) -> &HubConfig;
}

/// File-backed source reloaded when the file modification time changes
///
/// The first load happens in [`FileConfigSource::open`] and is fatal on error.
/// Later reloads that fail to read or validate are logged and the previous
/// snapshot stays current.
pub struct FileConfigSource {
    path: PathBuf,
    current: HubConfig,
    last_modified: Option<SystemTime>,
}

impl FileConfigSource {
    /// Load the initial snapshot
    ///
    /// # Errors
    /// Any error of [`crate::load`]
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, ContractError> {
        let path = path.into();
        let last_modified = Self::modified(&path);
        let current = crate::load(&path)?;
        info!(path = %path.display(), interfacers = current.interfacers.len(), "configuration loaded");

        Ok(Self {
            path,
            current,
            last_modified,
        })
    }

    /// Path being watched
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn modified(path: &Path) -> Option<SystemTime> {
        std::fs::metadata(path).and_then(|m| m.modified()).ok()
    }
}

impl ConfigSource for FileConfigSource {
    fn has_changed(&mut self) -> bool {
        let modified = Self::modified(&self.path);
        if modified == self.last_modified {
            return false;
        }
        self.last_modified = modified;

        match crate::load(&self.path) {
            Ok(config) if config == self.current => {
                debug!(path = %self.path.display(), "file touched, configuration unchanged");
                false
            }
            Ok(config) => {
                info!(path = %self.path.display(), "configuration file changed");
                self.current = config;
                true
            }
            Err(e) => {
                error!(
                    path = %self.path.display(),
                    error = %e,
                    "failed to reload configuration, keeping previous"
                );
                false
            }
        }
    }

    fn current(&self) -> &HubConfig {
        &self.current
    }
}

#[derive(Default)]
struct Shared {
    config: HubConfig,
    generation: u64,
}

/// In-memory source, updated through a [`MemoryConfigHandle`]
///
/// Used when the hub is embedded and configuration comes from elsewhere
/// (and by tests).
pub struct MemoryConfigSource {
    shared: Arc<Mutex<Shared>>,
    current: HubConfig,
    seen: u64,
}

/// Cloneable writer side of a [`MemoryConfigSource`]
#[derive(Clone)]
pub struct MemoryConfigHandle {
    shared: Arc<Mutex<Shared>>,
}

impl MemoryConfigSource {
    /// Create a source whose current snapshot is `initial`
    pub fn new(initial: HubConfig) -> (Self, MemoryConfigHandle) {
        let shared = Arc::new(Mutex::new(Shared {
            config: initial.clone(),
            generation: 0,
        }));
        let source = Self {
            shared: shared.clone(),
            current: initial,
            seen: 0,
        };
        (source, MemoryConfigHandle { shared })
    }
}

impl MemoryConfigHandle {
    /// Publish a new snapshot
    pub fn set(&self, config: HubConfig) {
        let mut shared = self.shared.lock().unwrap_or_else(PoisonError::into_inner);
        shared.config = config;
        shared.generation += 1;
    }

    /// Edit the latest snapshot in place
    pub fn update(&self, edit: impl FnOnce(&mut HubConfig)) {
        let mut shared = self.shared.lock().unwrap_or_else(PoisonError::into_inner);
        edit(&mut shared.config);
        shared.generation += 1;
    }
}

impl ConfigSource for MemoryConfigSource {
    fn has_changed(&mut self) -> bool {
        let shared = self.shared.lock().unwrap_or_else(PoisonError::into_inner);
        if shared.generation == self.seen {
            return false;
        }
        self.seen = shared.generation;
        self.current = shared.config.clone();
        true
    }

    fn current(&self) -> &HubConfig {
        &self.current
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::{InterfacerSpec, Settings};
    use std::io::Write;
    use std::time::Duration;

    const BASE: &str = r#"
[interfacers.sink]
type = "log"
[interfacers.sink.init_settings]
[interfacers.sink.runtime_settings]
"#;

    fn write_config(file: &mut tempfile::NamedTempFile, content: &str) {
        let f = file.as_file_mut();
        f.set_len(0).unwrap();
        std::io::Seek::rewind(f).unwrap();
        f.write_all(content.as_bytes()).unwrap();
        f.sync_all().unwrap();
    }

    fn bump_mtime(file: &tempfile::NamedTempFile, offset_secs: u64) {
        let when = SystemTime::now() + Duration::from_secs(offset_secs);
        file.as_file().set_modified(when).unwrap();
    }

    #[test]
    fn test_file_source_detects_change() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        write_config(&mut file, BASE);

        let mut source = FileConfigSource::open(file.path()).unwrap();
        assert!(!source.has_changed());
        assert_eq!(source.current().interfacers.len(), 1);

        write_config(&mut file, &format!("{BASE}\n[interfacers.other]\n"));
        bump_mtime(&file, 10);

        assert!(source.has_changed());
        assert_eq!(source.current().interfacers.len(), 2);
        assert!(!source.has_changed());
    }

    #[test]
    fn test_file_source_keeps_previous_on_bad_reload() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        write_config(&mut file, BASE);
        let mut source = FileConfigSource::open(file.path()).unwrap();

        write_config(&mut file, "not [[ toml");
        bump_mtime(&file, 10);

        assert!(!source.has_changed());
        assert_eq!(source.current().interfacers.len(), 1);
    }

    #[test]
    fn test_file_source_open_fails_fast() {
        let result = FileConfigSource::open("/nonexistent/hub.toml");
        assert!(result.is_err());
    }

    #[test]
    fn test_memory_source_generation() {
        let (mut source, handle) = MemoryConfigSource::new(HubConfig::default());
        assert!(!source.has_changed());

        handle.update(|c| {
            c.interfacers.insert(
                "a".into(),
                InterfacerSpec::new("log", Settings::new(), Settings::new()),
            );
        });
        assert!(source.has_changed());
        assert!(source.current().interfacers.contains_key("a"));
        assert!(!source.has_changed());
    }
}
