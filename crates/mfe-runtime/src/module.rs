//! The contract a loadable module bundle must satisfy.
//!
//! A bundle exports a [`RemoteModule`] entry and declares, in its
//! [`BundleMetadata`], which [`MountConvention`] its `mount` expects. The
//! loader branches on that declaration; it never guesses from shape.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use futures::FutureExt;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

use mfe_services::{ServiceContainer, ServiceMap};

use crate::error::{ModuleError, ModuleResult};
use crate::surface::MountSurface;

/// How a module wants its services handed over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MountConvention {
    /// A [`ServiceContainer`] with `get`/`require`.
    Container,
    /// A flat, fully built [`ServiceMap`].
    FlatServices,
}

/// Services passed to [`RemoteModule::mount`].
#[derive(Debug, Clone)]
pub enum MountServices {
    /// For [`MountConvention::Container`].
    Container(ServiceContainer),
    /// For [`MountConvention::FlatServices`].
    Flat(ServiceMap),
}

/// Teardown captured from a successful mount.
pub type Cleanup = Box<dyn FnOnce() -> BoxFuture<'static, ModuleResult<()>> + Send>;

/// What `mount` returned.
pub enum MountOutcome {
    /// Nothing to call on unmount; [`RemoteModule::unmount`] is used.
    Mounted,
    /// A closure to call on unmount instead of [`RemoteModule::unmount`].
    WithCleanup(Cleanup),
}

impl MountOutcome {
    /// Wrap an async cleanup closure.
    pub fn cleanup<F, Fut>(f: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ModuleResult<()>> + Send + 'static,
    {
        Self::WithCleanup(Box::new(move || f().boxed()))
    }
}

impl fmt::Debug for MountOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Mounted => f.write_str("Mounted"),
            Self::WithCleanup(_) => f.write_str("WithCleanup"),
        }
    }
}

/// The entry point of a loaded module.
///
/// A module receives only the surface and its service view; anything it
/// needs beyond that (including bridging to its own UI framework version) is
/// its own business.
#[async_trait]
pub trait RemoteModule: Send + Sync {
    /// Render into `surface`.
    async fn mount(
        &self,
        surface: Arc<dyn MountSurface>,
        services: MountServices,
    ) -> ModuleResult<MountOutcome>;

    /// Tear down, when `mount` returned no cleanup.
    async fn unmount(&self, _surface: Arc<dyn MountSurface>) -> ModuleResult<()> {
        Ok(())
    }
}

/// Metadata a bundle declares about itself.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleMetadata {
    /// Name the bundle was built as.
    pub name: Option<String>,
    /// Declared calling convention; a bundle without one is invalid.
    pub convention: Option<MountConvention>,
}

/// An imported bundle.
#[derive(Clone, Default)]
pub struct ModuleBundle {
    /// The default export; a bundle without one is invalid.
    pub entry: Option<Arc<dyn RemoteModule>>,
    /// Self-declared metadata.
    pub metadata: BundleMetadata,
}

impl ModuleBundle {
    /// A well-formed bundle.
    pub fn new(entry: Arc<dyn RemoteModule>, convention: MountConvention) -> Self {
        Self {
            entry: Some(entry),
            metadata: BundleMetadata {
                name: None,
                convention: Some(convention),
            },
        }
    }

    /// Set the self-declared name.
    #[must_use]
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.metadata.name = Some(name.into());
        self
    }

    /// Check the contract, returning the entry and convention.
    ///
    /// # Errors
    ///
    /// Returns [`ModuleError::InvalidModule`] if the entry or the declared
    /// convention is missing.
    pub fn validate(&self, module: &str) -> ModuleResult<(Arc<dyn RemoteModule>, MountConvention)> {
        let invalid = |reason: &str| ModuleError::InvalidModule {
            module: module.to_string(),
            reason: reason.to_string(),
        };
        let entry = self
            .entry
            .clone()
            .ok_or_else(|| invalid("bundle exports no mount entry"))?;
        let convention = self
            .metadata
            .convention
            .ok_or_else(|| invalid("bundle does not declare a mount convention"))?;
        Ok((entry, convention))
    }
}

impl fmt::Debug for ModuleBundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleBundle")
            .field("has_entry", &self.entry.is_some())
            .field("metadata", &self.metadata)
            .finish()
    }
}

/// Fetches and evaluates the bundle at a manifest URL.
#[async_trait]
pub trait ModuleImporter: Send + Sync {
    /// Import the bundle at `url`.
    async fn import(&self, url: &str) -> ModuleResult<ModuleBundle>;
}

/// Importer backed by a table of bundles linked into the host.
#[derive(Default)]
pub struct StaticImporter {
    bundles: DashMap<String, ModuleBundle>,
}

impl StaticImporter {
    /// Create an empty importer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `bundle` for `url`, replacing any previous bundle.
    pub fn insert(&self, url: impl Into<String>, bundle: ModuleBundle) {
        self.bundles.insert(url.into(), bundle);
    }

    /// Stop serving `url`.
    pub fn remove(&self, url: &str) -> bool {
        self.bundles.remove(url).is_some()
    }

    /// Snapshot of the URLs served.
    #[must_use]
    pub fn urls(&self) -> Vec<String> {
        let mut urls: Vec<String> = self.bundles.iter().map(|e| e.key().clone()).collect();
        urls.sort();
        urls
    }
}

impl From<HashMap<String, ModuleBundle>> for StaticImporter {
    fn from(bundles: HashMap<String, ModuleBundle>) -> Self {
        Self {
            bundles: bundles.into_iter().collect(),
        }
    }
}

impl fmt::Debug for StaticImporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticImporter")
            .field("urls", &self.urls())
            .finish()
    }
}

#[async_trait]
impl ModuleImporter for StaticImporter {
    async fn import(&self, url: &str) -> ModuleResult<ModuleBundle> {
        self.bundles
            .get(url)
            .map(|b| b.value().clone())
            .ok_or_else(|| ModuleError::load_failed(url, "no bundle served at this URL"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop;

    #[async_trait]
    impl RemoteModule for Noop {
        async fn mount(
            &self,
            _surface: Arc<dyn MountSurface>,
            _services: MountServices,
        ) -> ModuleResult<MountOutcome> {
            Ok(MountOutcome::Mounted)
        }
    }

    #[test]
    fn test_bundle_validation() {
        let good = ModuleBundle::new(Arc::new(Noop), MountConvention::Container);
        assert_eq!(good.validate("x").unwrap().1, MountConvention::Container);

        let no_entry = ModuleBundle::default();
        assert!(matches!(
            no_entry.validate("x"),
            Err(ModuleError::InvalidModule { .. })
        ));

        let mut undeclared = good.clone();
        undeclared.metadata.convention = None;
        let err = undeclared.validate("x").err().unwrap();
        assert!(err.to_string().contains("mount convention"));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_static_importer() {
        let importer = StaticImporter::new();
        importer.insert("/a.js", ModuleBundle::new(Arc::new(Noop), MountConvention::FlatServices));
        assert!(importer.import("/a.js").await.is_ok());

        let err = importer.import("/missing.js").await.unwrap_err();
        assert!(err.is_retryable());
        assert!(importer.remove("/a.js"));
        assert!(importer.urls().is_empty());
    }
}
