//! Bridge from `mfe_config::HostConfig` to runtime types.
//!
//! The config crate has no dependencies on other internal crates. This
//! module translates its sections into the registry, loader, compatibility
//! and logging types, so the conversion happens exactly once.

use std::sync::Arc;

use tracing::debug;

use mfe_config::HostConfig;
use mfe_core::{Environment, lenient_version};
use mfe_registry::{HttpRegistryFetcher, RegistryError, RegistryFetcher, RegistryService, RegistryServiceConfig};
use mfe_services::ServiceRegistry;
use mfe_storage::{JsonFileKvStore, KvStore, MemoryKvStore};
use mfe_telemetry::{LogConfig, LogFormat};

use crate::compat::HostProfile;
use crate::error::ModuleResult;
use crate::host::MfeHost;
use crate::loader::{LoaderConfig, ModuleLoader};
use crate::module::ModuleImporter;

/// Host environment. Unknown names fall back to production.
#[must_use]
pub fn to_environment(cfg: &HostConfig) -> Environment {
    cfg.host.environment.parse().unwrap_or_default()
}

/// Host profile (container, frameworks, browsers) for the compatibility
/// checker. Services are merged in by the host at check time.
///
/// # Errors
///
/// Returns [`crate::ModuleError::Manifest`] if a version cannot be parsed.
pub fn to_host_profile(cfg: &HostConfig) -> ModuleResult<HostProfile> {
    let mut profile = HostProfile::new(lenient_version(&cfg.host.version)?);
    for (name, version) in &cfg.host.frameworks {
        profile = profile.with_framework(name, lenient_version(version)?);
    }
    for (name, version) in &cfg.host.browsers {
        profile = profile.with_browser(name, lenient_version(version)?);
    }
    Ok(profile)
}

/// Loader retry and timeout policy.
#[must_use]
pub fn to_loader_config(cfg: &HostConfig) -> LoaderConfig {
    LoaderConfig {
        max_retries: cfg.loader.max_retries,
        retry_delay: cfg.loader.retry_delay(),
        load_timeout: cfg.loader.load_timeout(),
    }
}

/// Registry URLs and cache TTL. An unset TTL follows the environment
/// policy.
#[must_use]
pub fn to_registry_config(cfg: &HostConfig) -> RegistryServiceConfig {
    let mut config = RegistryServiceConfig::for_environment(to_environment(cfg));
    if let Some(url) = &cfg.registry.url {
        config = config.with_url(url);
    }
    if let Some(url) = &cfg.registry.fallback_url {
        config = config.with_fallback_url(url);
    }
    if let Some(ttl) = cfg.registry.cache_ttl() {
        config = config.with_cache_ttl(ttl);
    }
    config
}

/// Convert config to [`LogConfig`].
#[must_use]
pub fn to_log_config(cfg: &HostConfig) -> LogConfig {
    let format = cfg
        .logging
        .format
        .parse::<LogFormat>()
        .unwrap_or_default();

    let mut log_config = LogConfig::new(&cfg.logging.level).with_format(format);
    for directive in &cfg.logging.directives {
        log_config = log_config.with_directive(directive);
    }
    log_config
}

/// Open the registry cache: a JSON file when `cache_path` is set, memory
/// otherwise.
///
/// # Errors
///
/// Returns [`crate::ModuleError::Registry`] if the cache file exists but
/// cannot be read.
pub async fn open_cache_store(cfg: &HostConfig) -> ModuleResult<Arc<dyn KvStore>> {
    match &cfg.registry.cache_path {
        Some(path) => {
            let store = JsonFileKvStore::open(path).await.map_err(RegistryError::from)?;
            debug!(path = %path.display(), "Using file-backed registry cache");
            Ok(Arc::new(store))
        },
        None => Ok(Arc::new(MemoryKvStore::new())),
    }
}

/// HTTP fetcher honoring the configured request timeout.
///
/// # Errors
///
/// Returns [`crate::ModuleError::Registry`] if the HTTP client cannot be
/// built.
pub fn to_http_fetcher(cfg: &HostConfig) -> ModuleResult<Arc<dyn RegistryFetcher>> {
    let fetcher = HttpRegistryFetcher::with_timeout(cfg.registry.request_timeout())?;
    Ok(Arc::new(fetcher))
}

/// Assemble a host from config with explicit fetcher and cache store.
///
/// # Errors
///
/// Returns an error if the host profile or the registry cache namespace is
/// invalid.
pub fn build_host_with(
    cfg: &HostConfig,
    fetcher: Arc<dyn RegistryFetcher>,
    store: Arc<dyn KvStore>,
    services: ServiceRegistry,
    importer: Arc<dyn ModuleImporter>,
) -> ModuleResult<MfeHost> {
    let registry = RegistryService::new(to_registry_config(cfg), fetcher, store)?;
    let loader = ModuleLoader::new(importer).with_config(to_loader_config(cfg));
    Ok(MfeHost::new(to_host_profile(cfg)?, Arc::new(registry), services, loader)
        .with_environment(to_environment(cfg)))
}

/// Assemble a host from config using HTTP and the configured cache.
///
/// # Errors
///
/// See [`build_host_with`], [`open_cache_store`] and [`to_http_fetcher`].
pub async fn build_host(
    cfg: &HostConfig,
    services: ServiceRegistry,
    importer: Arc<dyn ModuleImporter>,
) -> ModuleResult<MfeHost> {
    let store = open_cache_store(cfg).await?;
    let fetcher = to_http_fetcher(cfg)?;
    build_host_with(cfg, fetcher, store, services, importer)
}
