//! Runtime log level control
//!
//! The hub configuration names levels the way the configuration file always
//! has (`DEBUG`, `INFO`, `WARNING`, `ERROR`, `CRITICAL`). They map onto
//! tracing level filters and can be changed while the process runs.

use std::sync::{Arc, Mutex, PoisonError};

use anyhow::{anyhow, Result};
use tracing::{debug, info};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{reload, EnvFilter, Registry};

/// Level used when the configuration does not name one
pub const DEFAULT_HUB_LEVEL: &str = "WARNING";

/// Map a configuration level name to a tracing level filter
///
/// Case-insensitive; `CRITICAL` has no tracing counterpart and maps to
/// `ERROR`.
pub fn parse_hub_level(level: &str) -> Option<LevelFilter> {
    match level.trim().to_uppercase().as_str() {
        "TRACE" => Some(LevelFilter::TRACE),
        "DEBUG" => Some(LevelFilter::DEBUG),
        "INFO" => Some(LevelFilter::INFO),
        "WARNING" | "WARN" => Some(LevelFilter::WARN),
        "ERROR" | "CRITICAL" => Some(LevelFilter::ERROR),
        _ => None,
    }
}

/// Handle to the installed filter
///
/// Cheap to clone. When `RUST_LOG` drove the initial filter the handle is
/// pinned and configuration level changes are ignored.
#[derive(Clone)]
pub struct LogLevelHandle {
    inner: reload::Handle<EnvFilter, Registry>,
    current: Arc<Mutex<Option<LevelFilter>>>,
    pinned: bool,
}

impl LogLevelHandle {
    /// Wrap a reload handle
    pub fn new(inner: reload::Handle<EnvFilter, Registry>, pinned: bool) -> Self {
        Self {
            inner,
            current: Arc::new(Mutex::new(None)),
            pinned,
        }
    }

    /// Whether the filter comes from `RUST_LOG`
    pub fn is_pinned(&self) -> bool {
        self.pinned
    }

    /// Level last applied through this handle
    pub fn current(&self) -> Option<LevelFilter> {
        *self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Switch to `level`
    ///
    /// Returns `Ok(true)` when the filter changed, `Ok(false)` when it
    /// already was at that level (or is pinned).
    pub fn set_level(&self, level: &str) -> Result<bool> {
        let filter = parse_hub_level(level).ok_or_else(|| anyhow!("logging level {level} invalid"))?;

        if self.pinned {
            debug!(level, "log filter pinned by RUST_LOG, ignoring configured level");
            return Ok(false);
        }

        let mut current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        if *current == Some(filter) {
            return Ok(false);
        }

        self.inner
            .reload(EnvFilter::new(filter.to_string()))
            .map_err(|e| anyhow!("cannot reload log filter: {e}"))?;
        *current = Some(filter);
        info!(level = %level.to_uppercase(), "logging level set");
        Ok(true)
    }
}

impl std::fmt::Debug for LogLevelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogLevelHandle")
            .field("current", &self.current())
            .field("pinned", &self.pinned)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_hub_level() {
        assert_eq!(parse_hub_level("debug"), Some(LevelFilter::DEBUG));
        assert_eq!(parse_hub_level("WARNING"), Some(LevelFilter::WARN));
        assert_eq!(parse_hub_level("Critical"), Some(LevelFilter::ERROR));
        assert_eq!(parse_hub_level("chatty"), None);
        assert!(parse_hub_level(DEFAULT_HUB_LEVEL).is_some());
    }

    #[test]
    fn test_set_level_changes_once() {
        let (_layer, handle) = reload::Layer::<EnvFilter, Registry>::new(EnvFilter::new("warn"));
        let level = LogLevelHandle::new(handle, false);

        assert!(level.set_level("debug").unwrap());
        assert!(!level.set_level("DEBUG").unwrap());
        assert_eq!(level.current(), Some(LevelFilter::DEBUG));
        assert!(level.set_level("info").unwrap());
        assert!(level.set_level("nonsense").is_err());
        assert_eq!(level.current(), Some(LevelFilter::INFO));
    }

    #[test]
    fn test_pinned_ignores_changes() {
        let (_layer, handle) = reload::Layer::<EnvFilter, Registry>::new(EnvFilter::new("warn"));
        let level = LogLevelHandle::new(handle, true);
        assert!(!level.set_level("debug").unwrap());
        assert_eq!(level.current(), None);
    }
}
