//! Resolves a [`StorageBackend`] by the configured `storage-plugin` name.

use std::collections::HashMap;
use std::sync::Arc;

use crate::{StorageBackend, StorageError};

#[derive(Default)]
pub struct StorageRegistry {
    backends: HashMap<String, Arc<dyn StorageBackend>>,
}

impl StorageRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, plugin_name: impl Into<String>, backend: Arc<dyn StorageBackend>) {
        self.backends.insert(plugin_name.into(), backend);
    }

    pub fn resolve(&self, plugin_name: &str) -> Result<Arc<dyn StorageBackend>, StorageError> {
        self.backends
            .get(plugin_name)
            .cloned()
            .ok_or_else(|| StorageError::UnknownPlugin(plugin_name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::tests::FakeStorageBackend;

    #[test]
    fn resolve_unknown_plugin_errors() {
        let registry = StorageRegistry::new();
        assert!(matches!(
            registry.resolve("no.such.plugin"),
            Err(StorageError::UnknownPlugin(_))
        ));
    }

    #[test]
    fn resolve_registered_plugin_succeeds() {
        let mut registry = StorageRegistry::new();
        registry.register("fake", Arc::new(FakeStorageBackend::default()));
        assert!(registry.resolve("fake").is_ok());
    }
}
