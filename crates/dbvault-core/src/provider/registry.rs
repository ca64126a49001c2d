//! Name → provider lookup.
//!
//! Built once during initialization (mutable), then shared read-only.
//! Keys are lower-cased so lookups are case-insensitive.

use std::collections::BTreeMap;
use std::sync::Arc;

use lazy_static::lazy_static;

use super::{DatabaseProvider, MongoDb, MySql, Postgres, Supabase, ToolProvider};
use crate::errors::{Result, VaultError};
use crate::executor::ToolExecutor;

lazy_static! {
    static ref DEFAULT_REGISTRY: ProviderRegistry =
        ProviderRegistry::with_builtin(ToolExecutor::default());
}

/// Process-wide registry of the built-in providers.
pub fn default_registry() -> &'static ProviderRegistry {
    &DEFAULT_REGISTRY
}

#[derive(Default)]
pub struct ProviderRegistry {
    providers: BTreeMap<String, Arc<dyn DatabaseProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self {
            providers: BTreeMap::new(),
        }
    }

    /// Registry holding Supabase, MongoDB, MySQL and PostgreSQL.
    pub fn with_builtin(executor: ToolExecutor) -> Self {
        let builtin: Vec<Arc<dyn DatabaseProvider>> = vec![
            Arc::new(ToolProvider::new(Supabase::new(), executor.clone())),
            Arc::new(ToolProvider::new(MongoDb, executor.clone())),
            Arc::new(ToolProvider::new(MySql, executor.clone())),
            Arc::new(ToolProvider::new(Postgres, executor)),
        ];

        let mut registry = Self::new();
        for provider in builtin {
            let name = provider.descriptor().name.to_lowercase();
            registry.providers.insert(name, provider);
        }
        registry
    }

    /// Adds a provider. Existing registrations are never replaced.
    pub fn register(&mut self, provider: Arc<dyn DatabaseProvider>) -> Result<()> {
        let name = provider.descriptor().name.to_lowercase();
        if self.providers.contains_key(&name) {
            return Err(VaultError::DuplicateProvider(name));
        }
        self.providers.insert(name, provider);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn DatabaseProvider>> {
        self.providers
            .get(&name.trim().to_lowercase())
            .cloned()
            .ok_or_else(|| VaultError::UnknownProvider {
                name: name.to_string(),
                available: self.names(),
            })
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        self.providers.keys().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn DatabaseProvider>> {
        self.providers.values()
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}
