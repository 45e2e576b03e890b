//! Test harness helpers.

use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tracing_subscriber::EnvFilter;

use mfe_core::{Environment, Manifest};
use mfe_registry::{RegistryService, RegistryServiceConfig};
use mfe_runtime::{HostProfile, LoaderConfig, MemorySurface, MfeHost, ModuleLoader, StaticImporter};
use mfe_services::ServiceRegistry;
use mfe_storage::{KvStore, MemoryKvStore};

use crate::fixtures::document_of;
use crate::mocks::ScriptedFetcher;

/// Directory URL the harness registry reads by default.
pub const TEST_REGISTRY_URL: &str = "https://registry.test/mfes.json";

/// Fallback URL configured on the harness registry.
pub const TEST_FALLBACK_URL: &str = "https://backup.test/mfes.json";

/// Create a temporary directory for testing.
///
/// # Panics
///
/// Panics if the temporary directory cannot be created.
#[must_use]
pub fn test_dir() -> TempDir {
    TempDir::new().expect("Failed to create temp directory")
}

/// Set up test logging with the given filter.
///
/// Safe to call from every test; only the first call installs a subscriber.
pub fn setup_test_logging(filter: &str) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_test_writer()
        .try_init();
}

/// Set up test logging with default filter (warn level).
pub fn setup_test_logging_default() {
    setup_test_logging("warn");
}

/// A host wired to in-memory collaborators the test can reach into.
#[derive(Debug)]
pub struct TestHost {
    /// The host under test.
    pub host: MfeHost,
    /// Network stand-in for the registry service.
    pub fetcher: Arc<ScriptedFetcher>,
    /// Registry cache.
    pub store: Arc<MemoryKvStore>,
    /// Bundle table.
    pub importer: Arc<StaticImporter>,
    /// Registry service shared with the host.
    pub registry: Arc<RegistryService>,
}

impl TestHost {
    /// A production host at version 1.0.0 with no services and fast
    /// retries.
    ///
    /// # Panics
    ///
    /// Panics if the registry cannot be created.
    #[must_use]
    pub fn new() -> Self {
        Self::build(Environment::Production, ServiceRegistry::new())
    }

    /// A host in `environment` offering `services`.
    ///
    /// # Panics
    ///
    /// Panics if the registry cannot be created.
    #[must_use]
    pub fn build(environment: Environment, services: ServiceRegistry) -> Self {
        Self::with_store(environment, services, Arc::new(MemoryKvStore::new()))
    }

    /// Like [`TestHost::build`] with a caller-owned cache, so a second host
    /// can start from the first one's cache.
    ///
    /// # Panics
    ///
    /// Panics if the registry cannot be created.
    #[must_use]
    pub fn with_store(
        environment: Environment,
        services: ServiceRegistry,
        store: Arc<MemoryKvStore>,
    ) -> Self {
        let fetcher = Arc::new(ScriptedFetcher::new());
        let config = RegistryServiceConfig::for_environment(environment)
            .with_url(TEST_REGISTRY_URL)
            .with_fallback_url(TEST_FALLBACK_URL);
        let registry = Arc::new(
            RegistryService::new(
                config,
                Arc::clone(&fetcher) as Arc<dyn mfe_registry::RegistryFetcher>,
                Arc::clone(&store) as Arc<dyn KvStore>,
            )
            .expect("registry service must build"),
        );
        let importer = Arc::new(StaticImporter::new());
        let loader = ModuleLoader::new(Arc::clone(&importer) as Arc<dyn mfe_runtime::ModuleImporter>)
            .with_config(LoaderConfig {
                max_retries: 2,
                retry_delay: Duration::from_millis(10),
                load_timeout: Duration::from_secs(5),
            });
        let profile = HostProfile::new(semver::Version::new(1, 0, 0));
        let host = MfeHost::new(profile, Arc::clone(&registry), services, loader)
            .with_environment(environment);
        Self {
            host,
            fetcher,
            store,
            importer,
            registry,
        }
    }

    /// Serve `manifests` at [`TEST_REGISTRY_URL`].
    pub fn serve_manifests(&self, manifests: impl IntoIterator<Item = Manifest>) {
        self.fetcher.serve(TEST_REGISTRY_URL, document_of(manifests));
    }

    /// A fresh in-memory surface.
    #[must_use]
    pub fn surface(id: &str) -> Arc<MemorySurface> {
        Arc::new(MemorySurface::new(id))
    }
}

impl Default for TestHost {
    fn default() -> Self {
        Self::new()
    }
}
