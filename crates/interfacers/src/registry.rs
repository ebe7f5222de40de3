//! Interfacer registry
//!
//! Maps type designators to factories. The supervisor resolves every
//! configured interfacer through the registry; there is no dynamic loading.

use std::collections::BTreeMap;
use std::sync::Arc;

use contracts::Settings;
use tracing::{debug, instrument};

use crate::adapters;
use crate::error::{InterfacerError, Result};
use crate::handle::InterfacerHandle;
use crate::interfacer::{HubContext, PreparedInterfacer};

/// Builds a prepared interfacer from its name and init settings
pub type Factory = Arc<dyn Fn(&str, &Settings) -> Result<PreparedInterfacer> + Send + Sync>;

/// Type designator -> factory
#[derive(Clone, Default)]
pub struct Registry {
    factories: BTreeMap<String, Factory>,
}

impl Registry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in kind
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        #[cfg(feature = "command")]
        registry.register(adapters::command::KIND, adapters::command::factory);
        registry.register(adapters::socket::KIND, adapters::socket::factory);
        registry.register(adapters::generator::KIND, adapters::generator::factory);
        registry.register(adapters::log::KIND, adapters::log::factory);
        registry.register(adapters::file::KIND, adapters::file::factory);
        registry
    }

    /// Register (or replace) the factory for `kind`
    pub fn register<F>(&mut self, kind: impl Into<String>, factory: F)
    where
        F: Fn(&str, &Settings) -> Result<PreparedInterfacer> + Send + Sync + 'static,
    {
        let kind = kind.into();
        debug!(kind = %kind, "interfacer kind registered");
        self.factories.insert(kind, Arc::new(factory));
    }

    /// Whether `kind` has a factory
    pub fn contains(&self, kind: &str) -> bool {
        self.factories.contains_key(kind)
    }

    /// Registered type designators
    pub fn kinds(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }

    /// Construct an instance of `kind` named `name`. The task is not started.
    #[instrument(name = "registry_create", skip(self, init_settings, hub))]
    pub fn create(
        &self,
        name: &str,
        kind: &str,
        init_settings: &Settings,
        hub: &HubContext,
    ) -> Result<InterfacerHandle> {
        let factory = self
            .factories
            .get(kind)
            .ok_or_else(|| InterfacerError::UnknownKind {
                name: name.to_string(),
                kind: kind.to_string(),
            })?;

        let prepared = factory(name, init_settings)?;
        Ok(InterfacerHandle::new(
            name,
            kind,
            init_settings.clone(),
            prepared,
            hub.clone(),
        ))
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.kinds()).finish()
    }
}
