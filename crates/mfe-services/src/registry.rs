//! Service registry: registration, lazy construction and teardown.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::FutureExt;
use futures::future::BoxFuture;
use serde::Serialize;
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, info, trace, warn};

use crate::container::ServiceContainer;
use crate::error::{ServiceError, ServiceResult};
use crate::provider::{DEFAULT_SERVICE_VERSION, ServiceInstance, ServiceProvider, instance};

/// What to bind a service name to.
pub enum Registration {
    /// A ready-made instance, e.g. a built-in logger.
    Instance {
        /// The instance.
        instance: ServiceInstance,
        /// Advertised version.
        version: String,
    },
    /// A factory invoked on first request (or during `initialize` if eager).
    Provider(Arc<dyn ServiceProvider>),
}

impl Registration {
    /// Bind a value with the default version.
    pub fn instance<T: std::any::Any + Send + Sync>(value: T) -> Self {
        Self::Instance {
            instance: instance(value),
            version: DEFAULT_SERVICE_VERSION.to_string(),
        }
    }

    /// Bind a provider.
    pub fn provider(provider: impl ServiceProvider + 'static) -> Self {
        Self::Provider(Arc::new(provider))
    }
}

impl fmt::Debug for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Instance { version, .. } => f
                .debug_struct("Instance")
                .field("version", version)
                .finish_non_exhaustive(),
            Self::Provider(p) => f.debug_tuple("Provider").field(&p.name()).finish(),
        }
    }
}

/// Public summary of one registered service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceDescriptor {
    /// Capability key.
    pub name: String,
    /// Advertised version.
    pub version: String,
    /// Whether the singleton has been built.
    pub built: bool,
}

pub(crate) struct Slot {
    version: String,
    dependencies: Vec<String>,
    lazy: bool,
    provider: Option<Arc<dyn ServiceProvider>>,
    cell: OnceCell<ServiceInstance>,
    /// Set once a build has been claimed so the slot can no longer be swapped.
    claimed: AtomicBool,
}

impl Slot {
    fn is_claimed(&self) -> bool {
        self.cell.initialized() || self.claimed.load(Ordering::SeqCst)
    }
}

/// State shared by a registry and every container it hands out.
#[derive(Default)]
pub(crate) struct RegistryInner {
    slots: DashMap<String, Arc<Slot>>,
    built: Mutex<Vec<(String, Arc<Slot>)>>,
}

impl RegistryInner {
    fn slot(&self, name: &str) -> Option<Arc<Slot>> {
        self.slots.get(name).map(|s| Arc::clone(s.value()))
    }

    pub(crate) fn contains(&self, name: &str) -> bool {
        self.slots.contains_key(name)
    }

    pub(crate) fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.slots.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Depth-first check of the declared dependency graph below `root`.
    fn check_acyclic(&self, root: &str) -> ServiceResult<()> {
        let mut stack = Vec::new();
        let mut done = HashSet::new();
        self.visit(root, &mut stack, &mut done)
    }

    fn visit(
        &self,
        name: &str,
        stack: &mut Vec<String>,
        done: &mut HashSet<String>,
    ) -> ServiceResult<()> {
        if done.contains(name) {
            return Ok(());
        }
        if stack.iter().any(|s| s == name) {
            let mut path = stack.clone();
            path.push(name.to_string());
            return Err(ServiceError::CircularDependency { path });
        }
        let Some(slot) = self.slot(name) else {
            return Ok(());
        };
        stack.push(name.to_string());
        for dep in &slot.dependencies {
            self.visit(dep, stack, done)?;
        }
        stack.pop();
        done.insert(name.to_string());
        Ok(())
    }

    /// Resolve `name`, building it (and its dependencies first) if needed.
    ///
    /// `path` holds the names whose construction is in progress on this
    /// resolution chain; meeting one of them again is a cycle. Concurrent
    /// callers for the same unbuilt name await the one in-flight build.
    pub(crate) fn resolve<'a>(
        self: &'a Arc<Self>,
        name: &'a str,
        path: &'a [String],
    ) -> BoxFuture<'a, ServiceResult<Option<ServiceInstance>>> {
        async move {
            if path.iter().any(|p| p == name) {
                let mut cycle = path.to_vec();
                cycle.push(name.to_string());
                return Err(ServiceError::CircularDependency { path: cycle });
            }

            let Some(slot) = self.slot(name) else {
                return Ok(None);
            };
            if let Some(built) = slot.cell.get() {
                trace!(service = name, "Service cache hit");
                return Ok(Some(Arc::clone(built)));
            }
            let Some(provider) = slot.provider.clone() else {
                return Ok(None);
            };
            self.check_acyclic(name)?;

            let mut chain = path.to_vec();
            chain.push(name.to_string());
            slot.claimed.store(true, Ordering::SeqCst);

            let result = slot
                .cell
                .get_or_try_init(|| self.build(name, &slot, provider, chain))
                .await;
            match result {
                Ok(built) => Ok(Some(Arc::clone(built))),
                Err(e) => {
                    if !slot.cell.initialized() {
                        slot.claimed.store(false, Ordering::SeqCst);
                    }
                    Err(e)
                },
            }
        }
        .boxed()
    }

    async fn build(
        self: &Arc<Self>,
        name: &str,
        slot: &Arc<Slot>,
        provider: Arc<dyn ServiceProvider>,
        chain: Vec<String>,
    ) -> ServiceResult<ServiceInstance> {
        for dep in &slot.dependencies {
            debug!(service = name, dependency = %dep, "Resolving dependency");
            if self.resolve(dep, &chain).await?.is_none() {
                return Err(ServiceError::UnknownDependency {
                    service: name.to_string(),
                    dependency: dep.clone(),
                });
            }
        }

        let container = ServiceContainer::for_provider(Arc::clone(self), chain);
        let built = provider.create(&container).await?;
        self.built
            .lock()
            .await
            .push((name.to_string(), Arc::clone(slot)));
        debug!(service = name, version = %slot.version, "Service constructed");
        Ok(built)
    }
}

/// The host's set of named service providers.
///
/// Cloning a registry yields another handle to the same services. Every
/// container created from it shares the same singleton instances;
/// containers only differ in which names they expose.
///
/// # Re-registration
///
/// Registering a name again replaces the previous binding (with a warning)
/// as long as the previous binding has not been built. Once a build for a
/// name has started, re-registering it fails with
/// [`ServiceError::AlreadyResolved`], so two callers can never observe two
/// different instances under one name.
#[derive(Clone, Default)]
pub struct ServiceRegistry {
    inner: Arc<RegistryInner>,
}

impl fmt::Debug for ServiceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceRegistry")
            .field("services", &self.inner.names())
            .finish()
    }
}

impl ServiceRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `name` to an instance or a provider.
    ///
    /// Dependencies are not checked here; they are resolved at use time.
    ///
    /// # Errors
    ///
    /// - [`ServiceError::InvalidName`] if `name` is empty.
    /// - [`ServiceError::AlreadyResolved`] if `name` is already built.
    pub fn register(&self, name: impl Into<String>, registration: Registration) -> ServiceResult<()> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(ServiceError::InvalidName(name));
        }

        let slot = match registration {
            Registration::Instance { instance, version } => Slot {
                version,
                dependencies: Vec::new(),
                lazy: true,
                provider: None,
                cell: OnceCell::new_with(Some(instance)),
                claimed: AtomicBool::new(true),
            },
            Registration::Provider(provider) => Slot {
                version: provider.version().to_string(),
                dependencies: provider.dependencies().to_vec(),
                lazy: provider.lazy(),
                provider: Some(provider),
                cell: OnceCell::new(),
                claimed: AtomicBool::new(false),
            },
        };

        match self.inner.slots.entry(name.clone()) {
            Entry::Occupied(mut existing) => {
                if existing.get().provider.is_none() || existing.get().is_claimed() {
                    return Err(ServiceError::AlreadyResolved { name });
                }
                warn!(service = %name, "Overriding previously registered service provider");
                existing.insert(Arc::new(slot));
            },
            Entry::Vacant(vacant) => {
                debug!(service = %name, version = %slot.version, "Registered service");
                vacant.insert(Arc::new(slot));
            },
        }
        Ok(())
    }

    /// Bind `name` to a ready-made value.
    ///
    /// # Errors
    ///
    /// See [`register`](Self::register).
    pub fn register_instance<T: std::any::Any + Send + Sync>(
        &self,
        name: impl Into<String>,
        value: T,
    ) -> ServiceResult<()> {
        self.register(name, Registration::instance(value))
    }

    /// Register a provider under its own name.
    ///
    /// # Errors
    ///
    /// See [`register`](Self::register).
    pub fn register_provider(&self, provider: impl ServiceProvider + 'static) -> ServiceResult<()> {
        let name = provider.name().to_string();
        self.register(name, Registration::provider(provider))
    }

    /// Validate the declared graph and build every eager provider.
    ///
    /// # Errors
    ///
    /// Fails loudly with the first configuration error found: an unknown
    /// dependency, a cycle, or an eager provider whose factory fails.
    pub async fn initialize(&self) -> ServiceResult<()> {
        let names = self.inner.names();
        for name in &names {
            let Some(slot) = self.inner.slot(name) else {
                continue;
            };
            if let Some(dep) = slot.dependencies.iter().find(|d| !self.inner.contains(d)) {
                return Err(ServiceError::UnknownDependency {
                    service: name.clone(),
                    dependency: dep.clone(),
                });
            }
            self.inner.check_acyclic(name)?;
        }

        let mut eager = 0usize;
        for name in &names {
            if self.inner.slot(name).is_some_and(|s| !s.lazy) {
                self.inner.resolve(name, &[]).await?;
                eager = eager.saturating_add(1);
            }
        }
        info!(services = names.len(), eager, "Service registry initialized");
        Ok(())
    }

    /// A container exposing every registered service.
    #[must_use]
    pub fn create_container(&self) -> ServiceContainer {
        ServiceContainer::new(Arc::clone(&self.inner), None)
    }

    /// A container exposing only `names`.
    ///
    /// Hidden services still resolve as dependencies of visible ones.
    #[must_use]
    pub fn create_restricted_container<I, S>(&self, names: I) -> ServiceContainer
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let visible = names.into_iter().map(Into::into).collect();
        ServiceContainer::new(Arc::clone(&self.inner), Some(Arc::new(visible)))
    }

    /// Resolve a service, building it on first request.
    ///
    /// # Errors
    ///
    /// Returns resolution failures such as [`ServiceError::CircularDependency`].
    pub async fn get(&self, name: &str) -> ServiceResult<Option<ServiceInstance>> {
        self.inner.resolve(name, &[]).await
    }

    /// Resolve a mandatory service.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::MissingService`] if `name` is not registered.
    pub async fn require(&self, name: &str) -> ServiceResult<ServiceInstance> {
        self.get(name)
            .await?
            .ok_or_else(|| ServiceError::MissingService {
                name: name.to_string(),
            })
    }

    /// Whether `name` is registered.
    #[must_use]
    pub fn has(&self, name: &str) -> bool {
        self.inner.contains(name)
    }

    /// Registered names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.inner.names()
    }

    /// Number of registered services.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.slots.len()
    }

    /// Whether nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.slots.is_empty()
    }

    /// Name, version and build state of every service, sorted by name.
    #[must_use]
    pub fn describe(&self) -> Vec<ServiceDescriptor> {
        let mut out: Vec<ServiceDescriptor> = self
            .inner
            .slots
            .iter()
            .map(|e| ServiceDescriptor {
                name: e.key().clone(),
                version: e.value().version.clone(),
                built: e.value().cell.initialized(),
            })
            .collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }

    /// Names of provider-built services in construction order.
    pub async fn construction_order(&self) -> Vec<String> {
        self.inner
            .built
            .lock()
            .await
            .iter()
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Dispose every provider-built instance in reverse build order, then
    /// forget all registrations.
    ///
    /// Dispose failures are logged and do not stop the teardown. Calling
    /// this again is a no-op.
    pub async fn dispose(&self) {
        let built = std::mem::take(&mut *self.inner.built.lock().await);
        for (name, slot) in built.iter().rev() {
            let (Some(provider), Some(instance)) = (&slot.provider, slot.cell.get()) else {
                continue;
            };
            match provider.dispose(instance).await {
                Ok(()) => debug!(service = %name, "Service disposed"),
                Err(e) => warn!(service = %name, error = %e, "Service dispose failed"),
            }
        }

        let registered = self.inner.slots.len();
        self.inner.slots.clear();
        if registered > 0 || !built.is_empty() {
            info!(registered, disposed = built.len(), "Service registry disposed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::FnProvider;
    use std::sync::Mutex as StdMutex;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn logged(name: &'static str, log: &Arc<StdMutex<Vec<String>>>) -> FnProvider {
        let log = Arc::clone(log);
        FnProvider::new(name, move |_| {
            let log = Arc::clone(&log);
            async move {
                log.lock().unwrap().push(name.to_string());
                Ok(instance(name.to_string()))
            }
        })
    }

    #[tokio::test]
    async fn test_instances_are_lazy_singletons() {
        let registry = ServiceRegistry::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        registry
            .register_provider(FnProvider::new("counter", move |_| {
                c.fetch_add(1, Ordering::SeqCst);
                async { Ok(instance(42u32)) }
            }))
            .unwrap();

        assert_eq!(count.load(Ordering::SeqCst), 0);
        let a = registry.require("counter").await.unwrap();
        let b = registry.create_container().require("counter").await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_dependencies_build_first_regardless_of_registration_order() {
        let log = Arc::new(StdMutex::new(Vec::new()));
        let registry = ServiceRegistry::new();
        registry
            .register_provider(logged("b", &log).with_dependencies(["a"]))
            .unwrap();
        registry.register_provider(logged("a", &log)).unwrap();

        registry.get("b").await.unwrap().unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["a", "b"]);
        assert_eq!(registry.construction_order().await, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_cycle_is_reported() {
        let log = Arc::new(StdMutex::new(Vec::new()));
        let registry = ServiceRegistry::new();
        registry
            .register_provider(logged("a", &log).with_dependencies(["b"]))
            .unwrap();
        registry
            .register_provider(logged("b", &log).with_dependencies(["a"]))
            .unwrap();

        let err = registry.get("a").await.unwrap_err();
        assert_eq!(
            err,
            ServiceError::CircularDependency {
                path: vec!["a".into(), "b".into(), "a".into()]
            }
        );
        assert!(log.lock().unwrap().is_empty());
        assert!(matches!(
            registry.initialize().await,
            Err(ServiceError::CircularDependency { .. })
        ));
    }

    #[tokio::test]
    async fn test_undeclared_cycle_is_caught_at_resolution() {
        let registry = ServiceRegistry::new();
        registry
            .register_provider(FnProvider::new("a", |c: ServiceContainer| async move {
                c.require("b").await
            }))
            .unwrap();
        registry
            .register_provider(FnProvider::new("b", |c: ServiceContainer| async move {
                c.require("a").await
            }))
            .unwrap();

        let err = registry.get("a").await.unwrap_err();
        assert!(matches!(err, ServiceError::CircularDependency { .. }), "{err}");
    }

    #[tokio::test]
    async fn test_missing_and_unknown_dependency() {
        let log = Arc::new(StdMutex::new(Vec::new()));
        let registry = ServiceRegistry::new();
        registry
            .register_provider(logged("notification", &log).with_dependencies(["logger"]))
            .unwrap();

        assert!(registry.get("nothing").await.unwrap().is_none());
        assert!(matches!(
            registry.require("nothing").await,
            Err(ServiceError::MissingService { .. })
        ));
        assert_eq!(
            registry.initialize().await.unwrap_err(),
            ServiceError::UnknownDependency {
                service: "notification".into(),
                dependency: "logger".into()
            }
        );
    }

    #[tokio::test]
    async fn test_initialize_builds_eager_providers_and_surfaces_failures() {
        let log = Arc::new(StdMutex::new(Vec::new()));
        let registry = ServiceRegistry::new();
        registry.register_provider(logged("lazy", &log)).unwrap();
        registry.register_provider(logged("eager", &log).eager()).unwrap();
        registry.initialize().await.unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["eager"]);

        let broken = ServiceRegistry::new();
        broken
            .register_provider(
                FnProvider::new("db", |_| async {
                    Err(ServiceError::construction("db", "connection refused"))
                })
                .eager(),
            )
            .unwrap();
        assert!(matches!(
            broken.initialize().await,
            Err(ServiceError::Construction { .. })
        ));
    }

    #[tokio::test]
    async fn test_override_before_build_last_wins() {
        let registry = ServiceRegistry::new();
        registry
            .register_provider(FnProvider::from_value("theme", "light"))
            .unwrap();
        registry
            .register_provider(FnProvider::from_value("theme", "dark"))
            .unwrap();

        let theme = registry.require("theme").await.unwrap();
        assert_eq!(*theme.downcast::<&str>().unwrap(), "dark");
    }

    #[tokio::test]
    async fn test_reregistration_after_build_is_rejected() {
        let registry = ServiceRegistry::new();
        registry
            .register_provider(FnProvider::from_value("theme", "light"))
            .unwrap();
        let first = registry.require("theme").await.unwrap();

        let err = registry
            .register_provider(FnProvider::from_value("theme", "dark"))
            .unwrap_err();
        assert_eq!(err, ServiceError::AlreadyResolved { name: "theme".into() });
        assert!(Arc::ptr_eq(&first, &registry.require("theme").await.unwrap()));

        registry.register_instance("logger", 1u8).unwrap();
        assert!(registry.register_instance("logger", 2u8).is_err());
    }

    #[tokio::test]
    async fn test_concurrent_first_resolution_builds_once() {
        let registry = ServiceRegistry::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        registry
            .register_provider(FnProvider::new("slow", move |_| {
                c.fetch_add(1, Ordering::SeqCst);
                async {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    Ok(instance(()))
                }
            }))
            .unwrap();

        let c1 = registry.create_container();
        let c2 = registry.create_container();
        let (a, b) = tokio::join!(c1.require("slow"), c2.require("slow"));
        assert!(Arc::ptr_eq(&a.unwrap(), &b.unwrap()));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_build_can_be_retried() {
        let registry = ServiceRegistry::new();
        let attempts = Arc::new(AtomicUsize::new(0));
        let a = Arc::clone(&attempts);
        registry
            .register_provider(FnProvider::new("flaky", move |_| {
                let n = a.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 0 {
                        Err(ServiceError::construction("flaky", "first call fails"))
                    } else {
                        Ok(instance(n))
                    }
                }
            }))
            .unwrap();

        assert!(registry.get("flaky").await.is_err());
        assert!(registry.get("flaky").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_dispose_runs_in_reverse_build_order_once() {
        let disposed = Arc::new(StdMutex::new(Vec::new()));
        let registry = ServiceRegistry::new();
        for (name, deps) in [("logger", vec![]), ("notification", vec!["logger"])] {
            let d = Arc::clone(&disposed);
            registry
                .register_provider(
                    FnProvider::from_value(name, name)
                        .with_dependencies(deps)
                        .with_dispose(move |_| d.lock().unwrap().push(name)),
                )
                .unwrap();
        }
        registry.register_instance("config", "static").unwrap();

        registry.require("notification").await.unwrap();
        registry.dispose().await;
        registry.dispose().await;

        assert_eq!(*disposed.lock().unwrap(), vec!["notification", "logger"]);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_describe_reports_build_state() {
        let registry = ServiceRegistry::new();
        registry
            .register_provider(FnProvider::from_value("auth", ()).with_version("2.1.0"))
            .unwrap();
        registry.register_instance("logger", ()).unwrap();

        let described = registry.describe();
        assert_eq!(
            described,
            vec![
                ServiceDescriptor {
                    name: "auth".into(),
                    version: "2.1.0".into(),
                    built: false
                },
                ServiceDescriptor {
                    name: "logger".into(),
                    version: "1.0.0".into(),
                    built: true
                },
            ]
        );
    }

    #[test]
    fn test_empty_name_rejected() {
        let registry = ServiceRegistry::new();
        assert!(matches!(
            registry.register_instance("  ", ()),
            Err(ServiceError::InvalidName(_))
        ));
    }
}
