//! Service providers: named factories for one capability instance.

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use futures::future::BoxFuture;

use crate::container::ServiceContainer;
use crate::error::ServiceResult;

/// A built capability, shared by every container of a registry.
///
/// Register trait objects wrapped once more (`Arc::new(logger as Arc<dyn
/// Logger>)`) and read them back with `get_as::<Arc<dyn Logger>>()`.
pub type ServiceInstance = Arc<dyn Any + Send + Sync>;

/// Version advertised by providers that do not declare one.
pub const DEFAULT_SERVICE_VERSION: &str = "1.0.0";

/// Wrap a value as a [`ServiceInstance`].
pub fn instance<T: Any + Send + Sync>(value: T) -> ServiceInstance {
    Arc::new(value)
}

/// A named factory capable of producing one capability instance.
///
/// Dependencies are resolved depth-first before [`create`](Self::create) is
/// called, so a provider can `require` them from the container it receives.
/// Declaration order at registration time does not matter.
#[async_trait]
pub trait ServiceProvider: Send + Sync {
    /// Capability key, e.g. `logger` or `eventBus`.
    fn name(&self) -> &str;

    /// Semver of the capability this provider builds.
    fn version(&self) -> &str {
        DEFAULT_SERVICE_VERSION
    }

    /// Names that must be built before this provider.
    fn dependencies(&self) -> &[String] {
        &[]
    }

    /// Lazy providers are built on first request; eager ones during
    /// [`ServiceRegistry::initialize`](crate::ServiceRegistry::initialize).
    fn lazy(&self) -> bool {
        true
    }

    /// Build the instance.
    async fn create(&self, container: &ServiceContainer) -> ServiceResult<ServiceInstance>;

    /// Tear down an instance this provider built.
    async fn dispose(&self, _instance: &ServiceInstance) -> ServiceResult<()> {
        Ok(())
    }
}

type Factory =
    Box<dyn Fn(ServiceContainer) -> BoxFuture<'static, ServiceResult<ServiceInstance>> + Send + Sync>;
type Disposer = Box<dyn Fn(&ServiceInstance) + Send + Sync>;

/// A [`ServiceProvider`] built from a closure.
///
/// ```ignore
/// let notification = FnProvider::new("notification", |c| async move {
///     let logger = c.require("logger").await?;
///     Ok(instance(Notifier::new(logger)))
/// })
/// .with_dependencies(["logger"]);
/// ```
pub struct FnProvider {
    name: String,
    version: String,
    dependencies: Vec<String>,
    lazy: bool,
    factory: Factory,
    disposer: Option<Disposer>,
}

impl FnProvider {
    /// Create a lazy provider with the default version and no dependencies.
    pub fn new<F, Fut>(name: impl Into<String>, factory: F) -> Self
    where
        F: Fn(ServiceContainer) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ServiceResult<ServiceInstance>> + Send + 'static,
    {
        Self {
            name: name.into(),
            version: DEFAULT_SERVICE_VERSION.to_string(),
            dependencies: Vec::new(),
            lazy: true,
            factory: Box::new(move |container| factory(container).boxed()),
            disposer: None,
        }
    }

    /// A provider that hands out a clone of `value`.
    pub fn from_value<T>(name: impl Into<String>, value: T) -> Self
    where
        T: Any + Clone + Send + Sync,
    {
        Self::new(name, move |_| {
            let value = value.clone();
            async move { Ok(instance(value)) }
        })
    }

    /// Set the advertised version.
    #[must_use]
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Set the dependencies.
    #[must_use]
    pub fn with_dependencies<I, S>(mut self, dependencies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies = dependencies.into_iter().map(Into::into).collect();
        self
    }

    /// Build during `initialize` instead of on first request.
    #[must_use]
    pub fn eager(mut self) -> Self {
        self.lazy = false;
        self
    }

    /// Run `disposer` when the registry is torn down.
    #[must_use]
    pub fn with_dispose(mut self, disposer: impl Fn(&ServiceInstance) + Send + Sync + 'static) -> Self {
        self.disposer = Some(Box::new(disposer));
        self
    }
}

impl fmt::Debug for FnProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnProvider")
            .field("name", &self.name)
            .field("version", &self.version)
            .field("dependencies", &self.dependencies)
            .field("lazy", &self.lazy)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl ServiceProvider for FnProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn version(&self) -> &str {
        &self.version
    }

    fn dependencies(&self) -> &[String] {
        &self.dependencies
    }

    fn lazy(&self) -> bool {
        self.lazy
    }

    async fn create(&self, container: &ServiceContainer) -> ServiceResult<ServiceInstance> {
        (self.factory)(container.clone()).await
    }

    async fn dispose(&self, instance: &ServiceInstance) -> ServiceResult<()> {
        if let Some(disposer) = &self.disposer {
            disposer(instance);
        }
        Ok(())
    }
}
