//! Host facade tying the registry, services, checker and loader together.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::{Instrument, info, warn};

use mfe_core::{Environment, ModuleName};
use mfe_registry::{LoadReport, RegistryService};
use mfe_services::{ServiceContainer, ServiceRegistry};
use mfe_telemetry::LoadContext;

use crate::compat::{CompatibilityChecker, CompatibilityResult, HostProfile};
use crate::error::{ModuleError, ModuleResult};
use crate::loader::{LoaderConfig, ModuleLoader};
use crate::record::{ModuleHandle, ModuleRecord};
use crate::surface::{MountSurface, SurfaceContent, SurfaceId};

/// Per-call overrides for [`MfeHost::load_module`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadOptions {
    /// Load despite compatibility errors. Honored in development only.
    pub force: bool,
    /// Override the load timeout.
    pub timeout: Option<Duration>,
    /// Override the automatic retry count.
    pub max_retries: Option<u32>,
    /// Override the delay between attempts.
    pub retry_delay: Option<Duration>,
}

impl LoadOptions {
    /// Options that request the development-only "load anyway" override.
    #[must_use]
    pub fn forced() -> Self {
        Self {
            force: true,
            ..Self::default()
        }
    }
}

/// The host runtime.
///
/// Construct one at startup and pass it by reference; it owns the module
/// directory, the service registry and every mounted module.
#[derive(Debug)]
pub struct MfeHost {
    environment: Environment,
    profile: HostProfile,
    registry: Arc<RegistryService>,
    services: ServiceRegistry,
    loader: ModuleLoader,
}

impl MfeHost {
    /// Assemble a production host.
    pub fn new(
        profile: HostProfile,
        registry: Arc<RegistryService>,
        services: ServiceRegistry,
        loader: ModuleLoader,
    ) -> Self {
        Self {
            environment: Environment::default(),
            profile,
            registry,
            services,
            loader,
        }
    }

    /// Set the host environment.
    #[must_use]
    pub fn with_environment(mut self, environment: Environment) -> Self {
        self.environment = environment;
        self
    }

    /// Validate the service graph, build eager services and load the
    /// module directory.
    ///
    /// # Errors
    ///
    /// Returns [`ModuleError::Service`] for a broken service graph and
    /// [`ModuleError::Registry`] if no source for the directory was usable.
    pub async fn start(&self) -> ModuleResult<LoadReport> {
        self.services.initialize().await?;
        let report = self.registry.load_from_url(None).await?;
        info!(
            environment = %self.environment,
            source = ?report.source,
            modules = report.registered,
            services = self.services.len(),
            "Host started"
        );
        Ok(report)
    }

    /// A checker over the current profile and registered services.
    #[must_use]
    pub fn checker(&self) -> CompatibilityChecker {
        CompatibilityChecker::new(self.profile.clone().with_services(self.services.describe()))
    }

    /// Check one registered module.
    ///
    /// # Errors
    ///
    /// Returns [`ModuleError::NotFound`] if the module is not registered.
    pub async fn check(&self, name: &str) -> ModuleResult<CompatibilityResult> {
        let manifest = self
            .registry
            .get(name)
            .await
            .ok_or_else(|| ModuleError::NotFound(name.to_string()))?;
        Ok(self.checker().check_compatibility(&manifest))
    }

    /// Check every registered module.
    pub async fn check_all(&self) -> BTreeMap<ModuleName, CompatibilityResult> {
        let manifests = self.registry.get_all().await;
        self.checker().check_registry(&manifests)
    }

    /// Look up, check and load a module onto `surface`.
    ///
    /// The surface always ends up showing something: the module, the
    /// loading state, a compatibility panel or a failure fallback. Whatever
    /// occupied the surface is unloaded first, including when the load is
    /// refused.
    ///
    /// # Errors
    ///
    /// Returns [`ModuleError::NotFound`], [`ModuleError::Incompatible`]
    /// (nothing is fetched in that case) or anything
    /// [`ModuleLoader::load_with`] returns.
    pub async fn load_module(
        &self,
        name: &str,
        surface: Arc<dyn MountSurface>,
        options: LoadOptions,
    ) -> ModuleResult<ModuleHandle> {
        let ctx = LoadContext::new(name, surface.id().as_str());
        self.lookup_and_load(name, surface, options)
            .instrument(ctx.span())
            .await
    }

    async fn lookup_and_load(
        &self,
        name: &str,
        surface: Arc<dyn MountSurface>,
        options: LoadOptions,
    ) -> ModuleResult<ModuleHandle> {
        let Some(manifest) = self.registry.get(name).await else {
            let err = ModuleError::NotFound(name.to_string());
            self.loader.detach(surface.id()).await;
            surface.render(SurfaceContent::Failed {
                module: name.to_string(),
                error: err.to_string(),
                retryable: false,
            });
            return Err(err);
        };

        let result = self.checker().check_compatibility(&manifest);
        for warning in &result.warnings {
            warn!(module = name, warning = %warning, "Compatibility warning");
        }
        if !result.compatible {
            let override_allowed = self.environment.is_development();
            if options.force && override_allowed {
                warn!(module = name, errors = ?result.errors, "Loading incompatible module on explicit override");
            } else {
                self.loader.detach(surface.id()).await;
                surface.render(SurfaceContent::Incompatible {
                    module: name.to_string(),
                    errors: result.errors.clone(),
                    override_allowed,
                });
                return Err(ModuleError::Incompatible {
                    module: name.to_string(),
                    errors: result.errors,
                });
            }
        }

        let container = self.container_for(&manifest);
        let config = self.effective_config(&options).await;
        self.loader
            .load_with(manifest, container, surface, config)
            .await
    }

    /// Unload a module. Idempotent.
    pub async fn unload_module(&self, handle: ModuleHandle) -> Option<ModuleRecord> {
        self.loader.unload(handle).await
    }

    /// Manual retry of a failed module.
    ///
    /// # Errors
    ///
    /// See [`ModuleLoader::retry`].
    pub async fn retry(&self, handle: ModuleHandle) -> ModuleResult<ModuleHandle> {
        self.loader.retry(handle).await
    }

    /// Navigate away from a surface.
    pub async fn detach(&self, surface: &SurfaceId) -> Option<ModuleRecord> {
        self.loader.detach(surface).await
    }

    /// Unload every module, then dispose every built service.
    pub async fn shutdown(&self) {
        let unloaded = self.loader.unload_all().await;
        self.services.dispose().await;
        info!(unloaded, "Host shut down");
    }

    /// Host environment.
    #[must_use]
    pub fn environment(&self) -> Environment {
        self.environment
    }

    /// Base host profile (services are merged in by [`MfeHost::checker`]).
    #[must_use]
    pub fn profile(&self) -> &HostProfile {
        &self.profile
    }

    /// The module directory.
    #[must_use]
    pub fn registry(&self) -> &Arc<RegistryService> {
        &self.registry
    }

    /// The service registry.
    #[must_use]
    pub fn services(&self) -> &ServiceRegistry {
        &self.services
    }

    /// The loader.
    #[must_use]
    pub fn loader(&self) -> &ModuleLoader {
        &self.loader
    }

    /// Current-schema modules see only the services they declare; legacy
    /// modules declare nothing and see everything.
    fn container_for(&self, manifest: &mfe_core::Manifest) -> ServiceContainer {
        if manifest.is_legacy() {
            self.services.create_container()
        } else {
            self.services
                .create_restricted_container(manifest.declared_services())
        }
    }

    /// Loader defaults, then the directory's `defaultLoading`, then `options`.
    ///
    /// Zero timeouts are ignored with a warning.
    async fn effective_config(&self, options: &LoadOptions) -> LoaderConfig {
        let mut config = self.loader.config();
        if let Some(document) = self.registry.last_document().await {
            let defaults = document.config.default_loading;
            match defaults.timeout {
                Some(0) => warn!("Ignoring zero defaultLoading.timeout from registry directory"),
                Some(ms) => config.load_timeout = Duration::from_millis(ms),
                None => {},
            }
            if let Some(retries) = defaults.retries {
                config.max_retries = retries;
            }
        }
        match options.timeout {
            Some(timeout) if timeout.is_zero() => warn!("Ignoring zero load timeout option"),
            Some(timeout) => config.load_timeout = timeout,
            None => {},
        }
        if let Some(retries) = options.max_retries {
            config.max_retries = retries;
        }
        if let Some(delay) = options.retry_delay {
            config.retry_delay = delay;
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use mfe_core::{Manifest, RegistryDocument, ServiceRequirement};
    use mfe_registry::{RegistryError, RegistryFetcher, RegistryResult, RegistryServiceConfig};
    use mfe_services::FnProvider;
    use mfe_storage::MemoryKvStore;
    use semver::Version;
    use serde_json::json;

    use super::*;
    use crate::module::{
        ModuleBundle, MountConvention, MountOutcome, MountServices, RemoteModule, StaticImporter,
    };
    use crate::record::ModuleState;
    use crate::surface::MemorySurface;

    struct ServedDocument(Option<RegistryDocument>);

    #[async_trait]
    impl RegistryFetcher for ServedDocument {
        async fn fetch(&self, url: &str) -> RegistryResult<RegistryDocument> {
            self.0.clone().ok_or_else(|| RegistryError::Fetch {
                url: url.to_string(),
                message: "offline".into(),
            })
        }
    }

    /// Renders the names visible in its container.
    struct ServiceLister;

    #[async_trait]
    impl RemoteModule for ServiceLister {
        async fn mount(
            &self,
            surface: Arc<dyn MountSurface>,
            services: MountServices,
        ) -> ModuleResult<MountOutcome> {
            let body = match services {
                MountServices::Container(c) => c.names().join(","),
                MountServices::Flat(map) => map.keys().cloned().collect::<Vec<_>>().join(","),
            };
            surface.render(SurfaceContent::Module {
                module: "lister".into(),
                body,
            });
            Ok(MountOutcome::Mounted)
        }
    }

    struct Broken;

    #[async_trait]
    impl RemoteModule for Broken {
        async fn mount(
            &self,
            _surface: Arc<dyn MountSurface>,
            _services: MountServices,
        ) -> ModuleResult<MountOutcome> {
            Err(ModuleError::load_failed("broken", "always"))
        }
    }

    fn host_with(document: Option<RegistryDocument>) -> MfeHost {
        let registry = RegistryService::new(
            RegistryServiceConfig::default().with_url("https://registry.test/mfes.json"),
            Arc::new(ServedDocument(document)),
            Arc::new(MemoryKvStore::new()),
        )
        .unwrap();

        let services = ServiceRegistry::new();
        services.register_instance("logger", "log").unwrap();
        services.register_instance("auth", "auth").unwrap();

        let importer = StaticImporter::new();
        importer.insert("/lister.js", ModuleBundle::new(Arc::new(ServiceLister), MountConvention::Container));
        importer.insert("/broken.js", ModuleBundle::new(Arc::new(Broken), MountConvention::Container));

        let loader = ModuleLoader::new(Arc::new(importer)).with_config(LoaderConfig {
            max_retries: 3,
            retry_delay: Duration::from_millis(10),
            load_timeout: Duration::from_secs(5),
        });
        MfeHost::new(
            HostProfile::new(Version::new(2, 0, 0)),
            Arc::new(registry),
            services,
            loader,
        )
    }

    fn current(name: &str, url: &str, services: &[&str]) -> Manifest {
        let mut manifest = Manifest::new(ModuleName::new(name).unwrap(), "1.0.0", url);
        manifest.requirements.services = services
            .iter()
            .map(|s| ServiceRequirement::required(*s))
            .collect();
        manifest
    }

    #[tokio::test]
    async fn test_unknown_module_renders_failure() {
        let host = host_with(None);
        let surface = Arc::new(MemorySurface::new("main"));
        let err = host
            .load_module("ghost", surface.clone(), LoadOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ModuleError::NotFound(_)));
        assert!(matches!(surface.content(), SurfaceContent::Failed { .. }));
    }

    #[tokio::test]
    async fn test_incompatible_module_is_refused_before_import() {
        let host = host_with(None);
        host.registry()
            .register(current("x", "/lister.js", &["eventBus"]))
            .await
            .unwrap();
        let surface = Arc::new(MemorySurface::new("main"));

        let err = host
            .load_module("x", surface.clone(), LoadOptions::forced())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("eventBus"));
        assert!(host.loader().is_empty());
        assert!(matches!(
            surface.content(),
            SurfaceContent::Incompatible { override_allowed: false, .. }
        ));
    }

    #[tokio::test]
    async fn test_override_is_honored_in_development() {
        let host = host_with(None).with_environment(Environment::Development);
        host.registry()
            .register(current("x", "/lister.js", &["eventBus"]))
            .await
            .unwrap();

        let surface = Arc::new(MemorySurface::new("main"));
        assert!(
            host.load_module("x", surface.clone(), LoadOptions::default())
                .await
                .is_err()
        );
        assert!(matches!(
            surface.content(),
            SurfaceContent::Incompatible { override_allowed: true, .. }
        ));

        let handle = host
            .load_module("x", surface, LoadOptions::forced())
            .await
            .unwrap();
        assert_eq!(host.loader().state(handle), Some(ModuleState::Mounted));
    }

    #[tokio::test]
    async fn test_current_modules_see_only_declared_services() {
        let host = host_with(None);
        host.registry()
            .register(current("lister", "/lister.js", &["logger"]))
            .await
            .unwrap();
        let surface = Arc::new(MemorySurface::new("main"));

        host.load_module("lister", surface.clone(), LoadOptions::default())
            .await
            .unwrap();
        assert_eq!(
            surface.content(),
            SurfaceContent::Module {
                module: "lister".into(),
                body: "logger".into(),
            }
        );
    }

    #[tokio::test]
    async fn test_legacy_modules_see_every_service() {
        let host = host_with(None);
        let legacy = Manifest::from_value(json!({
            "name": "old", "version": "1.0.0", "url": "/lister.js"
        }))
        .unwrap();
        assert!(legacy.is_legacy());
        host.registry().register(legacy).await.unwrap();
        let surface = Arc::new(MemorySurface::new("main"));

        host.load_module("old", surface.clone(), LoadOptions::default())
            .await
            .unwrap();
        assert!(matches!(
            surface.content(),
            SurfaceContent::Module { body, .. } if body == "auth,logger"
        ));
    }

    #[tokio::test]
    async fn test_start_applies_directory_loading_defaults() {
        let broken = current("broken", "/broken.js", &[]);
        let mut document = RegistryDocument::from_manifests(&[broken]).unwrap();
        document.config.default_loading.retries = Some(0);
        let host = host_with(Some(document));

        let report = host.start().await.unwrap();
        assert_eq!(report.registered, 1);

        let handle = host
            .load_module("broken", Arc::new(MemorySurface::new("main")), LoadOptions::default())
            .await
            .unwrap();
        let record = host.loader().record(handle).unwrap();
        assert_eq!(record.state, ModuleState::Failed);
        assert_eq!(record.retry_count, 1);
    }

    #[tokio::test]
    async fn test_options_override_directory_defaults() {
        let host = host_with(None);
        host.registry()
            .register(current("broken", "/broken.js", &[]))
            .await
            .unwrap();
        let options = LoadOptions {
            max_retries: Some(1),
            ..LoadOptions::default()
        };
        let handle = host
            .load_module("broken", Arc::new(MemorySurface::new("main")), options)
            .await
            .unwrap();
        assert_eq!(host.loader().record(handle).unwrap().retry_count, 2);
    }

    #[tokio::test]
    async fn test_zero_timeouts_are_ignored() {
        let lister = current("lister", "/lister.js", &["logger"]);
        let mut document = RegistryDocument::from_manifests(&[lister]).unwrap();
        document.config.default_loading.timeout = Some(0);
        let host = host_with(Some(document));
        host.start().await.unwrap();

        let config = host.effective_config(&LoadOptions::default()).await;
        assert_eq!(config.load_timeout, Duration::from_secs(5));
        let zero = LoadOptions {
            timeout: Some(Duration::ZERO),
            ..LoadOptions::default()
        };
        assert_eq!(
            host.effective_config(&zero).await.load_timeout,
            Duration::from_secs(5)
        );

        let handle = host
            .load_module("lister", Arc::new(MemorySurface::new("main")), LoadOptions::default())
            .await
            .unwrap();
        assert_eq!(host.loader().state(handle), Some(ModuleState::Mounted));
    }

    #[tokio::test]
    async fn test_refused_loads_unmount_the_occupant() {
        let host = host_with(None);
        host.registry()
            .register(current("lister", "/lister.js", &["logger"]))
            .await
            .unwrap();
        host.registry()
            .register(current("x", "/lister.js", &["eventBus"]))
            .await
            .unwrap();
        let surface = Arc::new(MemorySurface::new("main"));

        let first = host
            .load_module("lister", surface.clone(), LoadOptions::default())
            .await
            .unwrap();
        assert!(
            host.load_module("x", surface.clone(), LoadOptions::default())
                .await
                .is_err()
        );
        assert!(host.loader().record(first).is_none());
        assert!(host.loader().occupant(surface.id()).is_none());
        assert!(matches!(surface.content(), SurfaceContent::Incompatible { .. }));

        let second = host
            .load_module("lister", surface.clone(), LoadOptions::default())
            .await
            .unwrap();
        let err = host
            .load_module("ghost", surface.clone(), LoadOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ModuleError::NotFound(_)));
        assert!(host.loader().record(second).is_none());
        assert!(host.loader().is_empty());
        assert!(matches!(surface.content(), SurfaceContent::Failed { .. }));
    }

    #[tokio::test]
    async fn test_check_all_reports_every_module() {
        let host = host_with(None);
        host.registry()
            .register(current("ok", "/lister.js", &["logger"]))
            .await
            .unwrap();
        host.registry()
            .register(current("x", "/lister.js", &["eventBus"]))
            .await
            .unwrap();

        let results = host.check_all().await;
        assert_eq!(results.len(), 2);
        assert!(results[&ModuleName::new("ok").unwrap()].compatible);
        assert!(!results[&ModuleName::new("x").unwrap()].compatible);
        assert!(host.check("x").await.unwrap().errors[0].contains("eventBus"));
    }

    #[tokio::test]
    async fn test_shutdown_unloads_and_disposes() {
        let host = host_with(None);
        let disposed = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&disposed);
        host.services()
            .register_provider(
                FnProvider::from_value("theme", "dark")
                    .with_dispose(move |_| {
                        counter.fetch_add(1, Ordering::SeqCst);
                    }),
            )
            .unwrap();
        host.registry()
            .register(current("lister", "/lister.js", &["theme"]))
            .await
            .unwrap();
        host.services().require("theme").await.unwrap();
        host.load_module("lister", Arc::new(MemorySurface::new("main")), LoadOptions::default())
            .await
            .unwrap();

        host.shutdown().await;
        assert!(host.loader().is_empty());
        assert_eq!(disposed.load(Ordering::SeqCst), 1);
    }
}
