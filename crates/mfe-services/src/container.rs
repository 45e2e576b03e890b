//! Read-only service views handed to loaded modules.

use std::any::Any;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use crate::error::{ServiceError, ServiceResult};
use crate::provider::ServiceInstance;
use crate::registry::RegistryInner;

/// Every visible service, fully built, keyed by name.
pub type ServiceMap = BTreeMap<String, ServiceInstance>;

/// A read-only view over a [`ServiceRegistry`](crate::ServiceRegistry).
///
/// Containers share singletons with their registry and with each other.
/// A restricted container hides every name outside its allow-list; hidden
/// names behave exactly like unregistered ones.
#[derive(Clone)]
pub struct ServiceContainer {
    inner: Arc<RegistryInner>,
    visible: Option<Arc<BTreeSet<String>>>,
    path: Vec<String>,
}

impl fmt::Debug for ServiceContainer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceContainer")
            .field("visible", &self.visible)
            .field("resolving", &self.path)
            .finish_non_exhaustive()
    }
}

impl ServiceContainer {
    pub(crate) fn new(inner: Arc<RegistryInner>, visible: Option<Arc<BTreeSet<String>>>) -> Self {
        Self {
            inner,
            visible,
            path: Vec::new(),
        }
    }

    /// The container passed to a provider's factory: unrestricted, and aware
    /// of the services currently under construction.
    pub(crate) fn for_provider(inner: Arc<RegistryInner>, path: Vec<String>) -> Self {
        Self {
            inner,
            visible: None,
            path,
        }
    }

    fn is_visible(&self, name: &str) -> bool {
        self.visible.as_ref().is_none_or(|v| v.contains(name))
    }

    /// Whether this container exposes only an allow-list.
    #[must_use]
    pub fn is_restricted(&self) -> bool {
        self.visible.is_some()
    }

    /// Whether `name` is registered and visible.
    #[must_use]
    pub fn has(&self, name: &str) -> bool {
        self.is_visible(name) && self.inner.contains(name)
    }

    /// Visible registered names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.inner
            .names()
            .into_iter()
            .filter(|n| self.is_visible(n))
            .collect()
    }

    /// Get a service, building it on first request.
    ///
    /// # Errors
    ///
    /// Returns resolution failures such as
    /// [`ServiceError::CircularDependency`]; an absent name is `Ok(None)`.
    pub async fn get(&self, name: &str) -> ServiceResult<Option<ServiceInstance>> {
        if !self.is_visible(name) {
            return Ok(None);
        }
        self.inner.resolve(name, &self.path).await
    }

    /// Get a mandatory service.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::MissingService`] if the name is absent or
    /// hidden.
    pub async fn require(&self, name: &str) -> ServiceResult<ServiceInstance> {
        self.get(name)
            .await?
            .ok_or_else(|| ServiceError::MissingService {
                name: name.to_string(),
            })
    }

    /// Get a service downcast to `T`.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::TypeMismatch`] if the instance is not a `T`.
    pub async fn get_as<T: Any + Send + Sync>(&self, name: &str) -> ServiceResult<Option<Arc<T>>> {
        match self.get(name).await? {
            None => Ok(None),
            Some(instance) => downcast(name, instance).map(Some),
        }
    }

    /// Get a mandatory service downcast to `T`.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::MissingService`] or
    /// [`ServiceError::TypeMismatch`].
    pub async fn require_as<T: Any + Send + Sync>(&self, name: &str) -> ServiceResult<Arc<T>> {
        let instance = self.require(name).await?;
        downcast(name, instance)
    }

    /// Build every visible service into a flat map.
    ///
    /// This is what modules using the flat calling convention receive.
    ///
    /// # Errors
    ///
    /// Returns the first resolution failure.
    pub async fn get_all_services(&self) -> ServiceResult<ServiceMap> {
        let mut services = ServiceMap::new();
        for name in self.names() {
            if let Some(instance) = self.get(&name).await? {
                services.insert(name, instance);
            }
        }
        Ok(services)
    }
}

fn downcast<T: Any + Send + Sync>(name: &str, instance: ServiceInstance) -> ServiceResult<Arc<T>> {
    instance
        .downcast::<T>()
        .map_err(|_| ServiceError::TypeMismatch {
            name: name.to_string(),
            expected: std::any::type_name::<T>(),
        })
}
