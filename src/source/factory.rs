//! Backend construction registry.
//!
//! Maps backend names to constructors chosen at configuration time. The
//! facade asks this registry for a named backend (or the default) and gets
//! back a boxed [`SourceBackend`] handle, or `None` when construction is
//! not possible; construction failure is never an error event.

use std::sync::Arc;

use tracing::{debug, warn};

use super::{ReplaySource, SimulatedSource, SourceBackend, SourceConfig};

/// Constructor registered for one backend name.
///
/// Returns `None` when the backend cannot be built in the current
/// environment (missing capability, bad parameters).
pub type SourceConstructor =
    Arc<dyn Fn(&SourceConfig) -> Option<Box<dyn SourceBackend>> + Send + Sync>;

/// Name-keyed registry of backend constructors.
///
/// Registration order is preserved; the first registered backend is the
/// default unless [`SourceFactory::set_default`] picks another.
#[derive(Clone)]
pub struct SourceFactory {
    constructors: Vec<(String, SourceConstructor)>,
    default_name: Option<String>,
}

impl SourceFactory {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            constructors: Vec::new(),
            default_name: None,
        }
    }

    /// Registry pre-populated with the built-in backends, with the
    /// simulated backend as default.
    pub fn with_builtin_sources() -> Self {
        let mut factory = Self::new();
        factory.register(SimulatedSource::NAME, |config| {
            Some(Box::new(SimulatedSource::from_config(config)))
        });
        factory.register(ReplaySource::NAME, |config| {
            Some(Box::new(ReplaySource::from_config(config)))
        });
        factory
    }

    /// Register a constructor under a name, replacing any previous one.
    pub fn register<F>(&mut self, name: impl Into<String>, constructor: F)
    where
        F: Fn(&SourceConfig) -> Option<Box<dyn SourceBackend>> + Send + Sync + 'static,
    {
        let name = name.into();
        self.constructors.retain(|(n, _)| *n != name);
        self.constructors.push((name, Arc::new(constructor)));
    }

    /// Pick the default backend by name. Ignored for unknown names.
    pub fn set_default(&mut self, name: impl Into<String>) {
        let name = name.into();
        if self.constructors.iter().any(|(n, _)| *n == name) {
            self.default_name = Some(name);
        } else {
            warn!(%name, "cannot set unknown backend as default");
        }
    }

    /// Names of all registered backends, in registration order.
    pub fn available_sources(&self) -> Vec<String> {
        self.constructors.iter().map(|(n, _)| n.clone()).collect()
    }

    /// Construct the named backend. `None` for unknown names or when the
    /// constructor declines.
    pub fn create_source(&self, name: &str, config: &SourceConfig) -> Option<Box<dyn SourceBackend>> {
        let constructor = self
            .constructors
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, c)| c)?;

        let backend = constructor(config);
        if backend.is_none() {
            debug!(name, "backend constructor declined");
        }
        backend
    }

    /// Name the default backend resolves to, if any is registered.
    pub fn default_source_name(&self) -> Option<String> {
        self.default_name
            .clone()
            .or_else(|| self.constructors.first().map(|(n, _)| n.clone()))
    }

    /// Construct the default backend, if any is registered.
    pub fn create_default_source(&self, config: &SourceConfig) -> Option<Box<dyn SourceBackend>> {
        let name = self.default_source_name()?;
        self.create_source(&name, config)
    }
}

impl Default for SourceFactory {
    fn default() -> Self {
        Self::with_builtin_sources()
    }
}
