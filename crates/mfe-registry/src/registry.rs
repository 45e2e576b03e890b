//! In-memory module directory.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, warn};

use mfe_core::{Manifest, ModuleName};

use crate::error::RegistryResult;

/// Name-keyed map of registered manifests.
///
/// Manifests are immutable once registered; registering the same name again
/// replaces the entry wholesale.
#[derive(Debug, Default, Clone)]
pub struct ModuleRegistry {
    modules: BTreeMap<ModuleName, Arc<Manifest>>,
}

impl ModuleRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a manifest, returning the entry it replaced.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Manifest`](crate::RegistryError::Manifest)
    /// if the version is not valid semver.
    pub fn register(&mut self, manifest: Manifest) -> RegistryResult<Option<Arc<Manifest>>> {
        manifest.semver()?;
        let name = manifest.name.clone();
        let previous = self.modules.insert(name.clone(), Arc::new(manifest));
        if previous.is_some() {
            debug!(module = %name, "Replaced registered manifest");
        } else {
            debug!(module = %name, "Registered manifest");
        }
        Ok(previous)
    }

    /// Register every manifest, skipping (and logging) invalid ones.
    ///
    /// Returns the number registered.
    pub fn register_all(&mut self, manifests: impl IntoIterator<Item = Manifest>) -> usize {
        let mut count = 0usize;
        for manifest in manifests {
            let name = manifest.name.clone();
            match self.register(manifest) {
                Ok(_) => count = count.saturating_add(1),
                Err(e) => warn!(module = %name, error = %e, "Skipping invalid manifest"),
            }
        }
        count
    }

    /// Remove a manifest.
    pub fn unregister(&mut self, name: &str) -> Option<Arc<Manifest>> {
        self.modules.remove(name)
    }

    /// Look up a manifest.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<Manifest>> {
        self.modules.get(name).cloned()
    }

    /// Every manifest, ordered by name.
    #[must_use]
    pub fn get_all(&self) -> Vec<Arc<Manifest>> {
        self.modules.values().cloned().collect()
    }

    /// Whether `name` is registered.
    #[must_use]
    pub fn has(&self, name: &str) -> bool {
        self.modules.contains_key(name)
    }

    /// Registered names, ordered.
    #[must_use]
    pub fn names(&self) -> Vec<ModuleName> {
        self.modules.keys().cloned().collect()
    }

    /// Number of registered manifests.
    #[must_use]
    pub fn len(&self) -> usize {
        self.modules.len()
    }

    /// Whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// Remove everything.
    pub fn clear(&mut self) {
        self.modules.clear();
    }
}
