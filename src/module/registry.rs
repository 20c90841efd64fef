//! Registry for module factories.
//!
//! Module types register an explicit factory keyed by name; creating by
//! name replaces metaclass-style auto-registration with a plain lookup.

use std::sync::Arc;

use dashmap::DashMap;

use crate::core::errors::{ModError, Result};
use crate::module::node::Module;

type ModuleFactory = Box<dyn Fn() -> Arc<dyn Module> + Send + Sync>;

/// Registry mapping module-type names to factories.
#[derive(Clone, Default)]
pub struct ModuleRegistry {
    factories: Arc<DashMap<String, Arc<ModuleFactory>>>,
}

impl ModuleRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            factories: Arc::new(DashMap::new()),
        }
    }

    /// Register a factory under `name`. Registering the same name twice
    /// is a usage error.
    pub fn register(
        &self,
        name: impl Into<String>,
        factory: impl Fn() -> Arc<dyn Module> + Send + Sync + 'static,
    ) -> Result<()> {
        let name = name.into();
        if self.factories.contains_key(&name) {
            return Err(ModError::usage(format!(
                "module type already registered: {name}"
            )));
        }
        self.factories.insert(name, Arc::new(Box::new(factory)));
        Ok(())
    }

    /// Instantiate a registered module type by name.
    pub fn create(&self, name: &str) -> Result<Arc<dyn Module>> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| ModError::usage(format!("unknown module type: {name}")))?
            .value()
            .clone();
        Ok((*factory)())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// List all registered type names.
    pub fn list(&self) -> Vec<String> {
        self.factories.iter().map(|e| e.key().clone()).collect()
    }
}
