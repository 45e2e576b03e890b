//! Module registry service: remote directory with TTL cache and fallbacks.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use mfe_core::{Environment, Manifest, ModuleName, RegistryDocument};
use mfe_storage::{KvStore, ScopedKvStore};

use crate::error::{RegistryError, RegistryResult};
use crate::fetcher::RegistryFetcher;
use crate::registry::ModuleRegistry;

/// Store namespace for runtime-owned entries.
pub const CACHE_NAMESPACE: &str = "mfe";

/// Fixed key of the cached registry document.
pub const CACHE_KEY: &str = "mfe-registry-cache";

/// Cache TTL for development hosts (5 minutes).
pub const DEVELOPMENT_CACHE_TTL: Duration = Duration::from_secs(5 * 60);

/// Cache TTL for production hosts (1 hour).
pub const PRODUCTION_CACHE_TTL: Duration = Duration::from_secs(60 * 60);

/// Registry service settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryServiceConfig {
    /// Default directory URL.
    pub url: Option<String>,
    /// Tried once when the requested URL fails.
    pub fallback_url: Option<String>,
    /// How long a cached document is served without a network call.
    pub cache_ttl: Duration,
}

impl RegistryServiceConfig {
    /// Settings with the TTL policy for `environment` and no URLs.
    #[must_use]
    pub fn for_environment(environment: Environment) -> Self {
        Self {
            url: None,
            fallback_url: None,
            cache_ttl: default_ttl(environment),
        }
    }

    /// Set the default URL.
    #[must_use]
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Set the fallback URL.
    #[must_use]
    pub fn with_fallback_url(mut self, url: impl Into<String>) -> Self {
        self.fallback_url = Some(url.into());
        self
    }

    /// Override the cache TTL.
    #[must_use]
    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }
}

impl Default for RegistryServiceConfig {
    fn default() -> Self {
        Self::for_environment(Environment::default())
    }
}

/// Default cache TTL for an environment.
#[must_use]
pub fn default_ttl(environment: Environment) -> Duration {
    match environment {
        Environment::Development => DEVELOPMENT_CACHE_TTL,
        Environment::Production => PRODUCTION_CACHE_TTL,
    }
}

/// Persisted form of the last good registry document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    /// When the document was fetched.
    pub timestamp: DateTime<Utc>,
    /// The document as fetched.
    pub data: RegistryDocument,
}

impl CacheEntry {
    /// Whether the entry is younger than `ttl` at `now`.
    #[must_use]
    pub fn is_fresh(&self, ttl: Duration, now: DateTime<Utc>) -> bool {
        let Ok(ttl) = chrono::Duration::from_std(ttl) else {
            return true;
        };
        self.timestamp
            .checked_add_signed(ttl)
            .is_none_or(|expires| now < expires)
    }
}

/// Where the registry contents came from on the last load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadSource {
    /// The requested URL.
    Network,
    /// The configured fallback URL.
    Fallback,
    /// A cache entry within its TTL.
    FreshCache,
    /// An expired cache entry, used because every URL failed.
    StaleCache,
}

/// Outcome of a successful [`RegistryService::load_from_url`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadReport {
    /// Where the manifests came from.
    pub source: LoadSource,
    /// Manifests registered.
    pub registered: usize,
    /// Entries skipped because they failed validation.
    pub skipped: usize,
}

/// The authoritative, possibly remote, directory of manifests.
///
/// Directory loads replace the whole in-memory map. Network failures are
/// absorbed by the fallback chain: fallback URL, then any cached document
/// even if expired. Only when no cache exists does a load fail.
pub struct RegistryService {
    config: RegistryServiceConfig,
    fetcher: Arc<dyn RegistryFetcher>,
    cache: ScopedKvStore,
    modules: RwLock<ModuleRegistry>,
    last_document: RwLock<Option<RegistryDocument>>,
    load_lock: Mutex<()>,
}

impl std::fmt::Debug for RegistryService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryService")
            .field("config", &self.config)
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}

impl RegistryService {
    /// Create a service caching into `store` under the `mfe` namespace.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Storage`] if the namespace is rejected.
    pub fn new(
        config: RegistryServiceConfig,
        fetcher: Arc<dyn RegistryFetcher>,
        store: Arc<dyn KvStore>,
    ) -> RegistryResult<Self> {
        Ok(Self {
            config,
            fetcher,
            cache: ScopedKvStore::new(store, CACHE_NAMESPACE)?,
            modules: RwLock::new(ModuleRegistry::new()),
            last_document: RwLock::new(None),
            load_lock: Mutex::new(()),
        })
    }

    /// The service settings.
    #[must_use]
    pub fn config(&self) -> &RegistryServiceConfig {
        &self.config
    }

    /// Register a manifest directly, replacing any entry with the same name.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Manifest`] if the version is not semver.
    pub async fn register(&self, manifest: Manifest) -> RegistryResult<()> {
        self.modules.write().await.register(manifest)?;
        Ok(())
    }

    /// Remove a manifest.
    pub async fn unregister(&self, name: &str) -> Option<Arc<Manifest>> {
        self.modules.write().await.unregister(name)
    }

    /// Look up a manifest.
    pub async fn get(&self, name: &str) -> Option<Arc<Manifest>> {
        self.modules.read().await.get(name)
    }

    /// Every registered manifest, ordered by name.
    pub async fn get_all(&self) -> Vec<Arc<Manifest>> {
        self.modules.read().await.get_all()
    }

    /// Whether `name` is registered.
    pub async fn has(&self, name: &str) -> bool {
        self.modules.read().await.has(name)
    }

    /// Registered names, ordered.
    pub async fn names(&self) -> Vec<ModuleName> {
        self.modules.read().await.names()
    }

    /// The most recently applied registry document.
    pub async fn last_document(&self) -> Option<RegistryDocument> {
        self.last_document.read().await.clone()
    }

    /// Load the directory from `url`, or the configured URL.
    ///
    /// A cached document younger than the TTL is served without any network
    /// call.
    ///
    /// # Errors
    ///
    /// - [`RegistryError::NotConfigured`] if no URL is available.
    /// - [`RegistryError::LoadFailed`] if every URL failed and nothing is
    ///   cached.
    pub async fn load_from_url(&self, url: Option<&str>) -> RegistryResult<LoadReport> {
        let url = self.resolve_url(url)?;
        let _guard = self.load_lock.lock().await;

        if let Some(entry) = self.read_cache().await
            && entry.is_fresh(self.config.cache_ttl, Utc::now())
        {
            debug!(url = %url, cached_at = %entry.timestamp, "Registry cache hit");
            return Ok(self.apply(entry.data, LoadSource::FreshCache).await);
        }

        self.fetch_chain(&url).await
    }

    /// Re-fetch from the configured URL, ignoring the cache TTL.
    ///
    /// The fallback chain still applies.
    ///
    /// # Errors
    ///
    /// Same as [`load_from_url`](Self::load_from_url).
    pub async fn refresh(&self) -> RegistryResult<LoadReport> {
        let url = self.resolve_url(None)?;
        let _guard = self.load_lock.lock().await;
        self.fetch_chain(&url).await
    }

    /// Drop the cached document.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Storage`] if the store fails.
    pub async fn clear_cache(&self) -> RegistryResult<bool> {
        let removed = self.cache.delete(CACHE_KEY).await?;
        if removed {
            info!("Registry cache cleared");
        }
        Ok(removed)
    }

    fn resolve_url(&self, url: Option<&str>) -> RegistryResult<String> {
        url.map(str::to_string)
            .or_else(|| self.config.url.clone())
            .ok_or(RegistryError::NotConfigured)
    }

    async fn fetch_chain(&self, url: &str) -> RegistryResult<LoadReport> {
        let mut tried: Vec<&str> = Vec::new();
        let mut candidates = vec![(url, LoadSource::Network)];
        if let Some(fallback) = self.config.fallback_url.as_deref() {
            candidates.push((fallback, LoadSource::Fallback));
        }

        let mut last_error = None;
        for (candidate, source) in candidates {
            if tried.contains(&candidate) {
                continue;
            }
            tried.push(candidate);

            match self.fetcher.fetch(candidate).await {
                Ok(document) => {
                    self.write_cache(&document).await;
                    let report = self.apply(document, source).await;
                    if source == LoadSource::Fallback {
                        warn!(url = %url, fallback = %candidate, "Registry loaded from fallback URL");
                    }
                    return Ok(report);
                },
                Err(e) => {
                    warn!(url = %candidate, error = %e, "Registry fetch failed");
                    last_error = Some(e);
                },
            }
        }

        if let Some(entry) = self.read_cache().await {
            warn!(
                url = %url,
                cached_at = %entry.timestamp,
                "All registry URLs failed, serving cached registry"
            );
            return Ok(self.apply(entry.data, LoadSource::StaleCache).await);
        }

        Err(RegistryError::LoadFailed {
            url: url.to_string(),
            message: last_error.map_or_else(|| "no URL attempted".to_string(), |e| e.to_string()),
        })
    }

    /// Replace the in-memory map with the document's manifests.
    async fn apply(&self, document: RegistryDocument, source: LoadSource) -> LoadReport {
        let mut manifests = Vec::with_capacity(document.mfes.len());
        let mut skipped = 0usize;
        for (index, parsed) in document.manifests().enumerate() {
            match parsed {
                Ok(manifest) => manifests.push(manifest),
                Err(e) => {
                    warn!(index, error = %e, "Skipping invalid registry entry");
                    skipped = skipped.saturating_add(1);
                },
            }
        }

        let parsed = manifests.len();
        let registered = {
            let mut modules = self.modules.write().await;
            modules.clear();
            modules.register_all(manifests)
        };
        let skipped = skipped.saturating_add(parsed.saturating_sub(registered));
        *self.last_document.write().await = Some(document);

        info!(registered, skipped, source = ?source, "Module registry loaded");
        LoadReport {
            source,
            registered,
            skipped,
        }
    }

    async fn read_cache(&self) -> Option<CacheEntry> {
        match self.cache.get_json::<CacheEntry>(CACHE_KEY).await {
            Ok(entry) => entry,
            Err(e) => {
                warn!(error = %e, "Ignoring unreadable registry cache");
                None
            },
        }
    }

    async fn write_cache(&self, document: &RegistryDocument) {
        let entry = CacheEntry {
            timestamp: Utc::now(),
            data: document.clone(),
        };
        if let Err(e) = self.cache.set_json(CACHE_KEY, &entry).await {
            warn!(error = %e, "Failed to persist registry cache");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use mfe_storage::MemoryKvStore;
    use serde_json::json;

    use super::*;

    const PRIMARY: &str = "https://registry.example.com/mfes.json";
    const FALLBACK: &str = "https://backup.example.com/mfes.json";

    #[derive(Default)]
    struct StubFetcher {
        documents: HashMap<String, RegistryDocument>,
        calls: AtomicUsize,
    }

    impl StubFetcher {
        fn serving(url: &str, names: &[&str]) -> Self {
            let mut stub = Self::default();
            stub.documents.insert(url.to_string(), document(names));
            stub
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl RegistryFetcher for StubFetcher {
        async fn fetch(&self, url: &str) -> RegistryResult<RegistryDocument> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.documents
                .get(url)
                .cloned()
                .ok_or_else(|| RegistryError::Fetch {
                    url: url.to_string(),
                    message: "connection refused".into(),
                })
        }
    }

    fn document(names: &[&str]) -> RegistryDocument {
        serde_json::from_value(json!({
            "version": "1.0.0",
            "mfes": names
                .iter()
                .map(|n| json!({ "name": n, "version": "1.0.0", "url": format!("/{n}.js") }))
                .collect::<Vec<_>>()
        }))
        .unwrap()
    }

    fn service(fetcher: Arc<StubFetcher>, store: Arc<dyn KvStore>) -> RegistryService {
        let config = RegistryServiceConfig::for_environment(Environment::Development)
            .with_url(PRIMARY)
            .with_fallback_url(FALLBACK);
        RegistryService::new(config, fetcher, store).unwrap()
    }

    #[tokio::test]
    async fn test_second_load_within_ttl_hits_cache() {
        let fetcher = Arc::new(StubFetcher::serving(PRIMARY, &["cart"]));
        let svc = service(Arc::clone(&fetcher), Arc::new(MemoryKvStore::new()));

        let first = svc.load_from_url(None).await.unwrap();
        let second = svc.load_from_url(None).await.unwrap();
        assert_eq!(first.source, LoadSource::Network);
        assert_eq!(second.source, LoadSource::FreshCache);
        assert_eq!(fetcher.calls(), 1);
        assert!(svc.has("cart").await);
    }

    #[tokio::test]
    async fn test_refresh_ignores_ttl() {
        let fetcher = Arc::new(StubFetcher::serving(PRIMARY, &["cart"]));
        let svc = service(Arc::clone(&fetcher), Arc::new(MemoryKvStore::new()));
        svc.load_from_url(None).await.unwrap();
        svc.refresh().await.unwrap();
        assert_eq!(fetcher.calls(), 2);
    }

    #[tokio::test]
    async fn test_fallback_url_is_used() {
        let fetcher = Arc::new(StubFetcher::serving(FALLBACK, &["profile"]));
        let svc = service(Arc::clone(&fetcher), Arc::new(MemoryKvStore::new()));

        let report = svc.load_from_url(None).await.unwrap();
        assert_eq!(report.source, LoadSource::Fallback);
        assert!(svc.has("profile").await);
        assert_eq!(fetcher.calls(), 2);
    }

    #[tokio::test]
    async fn test_fallback_equal_to_primary_is_not_retried() {
        let fetcher = Arc::new(StubFetcher::default());
        let config = RegistryServiceConfig::for_environment(Environment::Production)
            .with_url(PRIMARY)
            .with_fallback_url(PRIMARY);
        let svc = RegistryService::new(config, fetcher.clone(), Arc::new(MemoryKvStore::new())).unwrap();

        assert!(matches!(
            svc.load_from_url(None).await,
            Err(RegistryError::LoadFailed { .. })
        ));
        assert_eq!(fetcher.calls(), 1);
    }

    #[tokio::test]
    async fn test_expired_cache_served_when_all_urls_fail() {
        let store: Arc<dyn KvStore> = Arc::new(MemoryKvStore::new());
        let stale = CacheEntry {
            timestamp: Utc::now()
                .checked_sub_signed(chrono::Duration::days(2))
                .unwrap(),
            data: document(&["cached"]),
        };
        ScopedKvStore::new(Arc::clone(&store), CACHE_NAMESPACE)
            .unwrap()
            .set_json(CACHE_KEY, &stale)
            .await
            .unwrap();

        let fetcher = Arc::new(StubFetcher::default());
        let svc = service(Arc::clone(&fetcher), store);
        let report = svc.load_from_url(None).await.unwrap();

        assert_eq!(report.source, LoadSource::StaleCache);
        assert_eq!(fetcher.calls(), 2, "expired cache must not short-circuit the network");
        assert!(svc.has("cached").await);
    }

    #[tokio::test]
    async fn test_no_cache_and_no_network_fails() {
        let svc = service(Arc::new(StubFetcher::default()), Arc::new(MemoryKvStore::new()));
        let err = svc.load_from_url(None).await.unwrap_err();
        assert!(matches!(err, RegistryError::LoadFailed { ref url, .. } if url == PRIMARY));
    }

    #[tokio::test]
    async fn test_load_replaces_previous_entries() {
        let mut stub = StubFetcher::serving(PRIMARY, &["a", "b"]);
        stub.documents.insert("https://v2.example.com".into(), document(&["c"]));
        let svc = service(Arc::new(stub), Arc::new(MemoryKvStore::new()));
        svc.register(Manifest::new(ModuleName::from_static("local"), "1.0.0", "/l.js"))
            .await
            .unwrap();

        svc.refresh().await.unwrap();
        assert_eq!(
            svc.names().await,
            vec![ModuleName::from_static("a"), ModuleName::from_static("b")]
        );

        svc.clear_cache().await.unwrap();
        svc.load_from_url(Some("https://v2.example.com")).await.unwrap();
        assert_eq!(svc.names().await, vec![ModuleName::from_static("c")]);
    }

    #[tokio::test]
    async fn test_invalid_entries_are_skipped() {
        let mut doc = document(&["good"]);
        doc.mfes.push(json!({ "name": "bad", "url": "/bad.js" }));
        let mut stub = StubFetcher::default();
        stub.documents.insert(PRIMARY.into(), doc);
        let svc = service(Arc::new(stub), Arc::new(MemoryKvStore::new()));

        let report = svc.load_from_url(None).await.unwrap();
        assert_eq!(report.registered, 1);
        assert_eq!(report.skipped, 1);
        assert!(svc.last_document().await.is_some());
    }

    #[tokio::test]
    async fn test_corrupt_cache_is_ignored() {
        let store: Arc<dyn KvStore> = Arc::new(MemoryKvStore::new());
        store
            .set(CACHE_NAMESPACE, CACHE_KEY, b"{broken".to_vec())
            .await
            .unwrap();
        let fetcher = Arc::new(StubFetcher::serving(PRIMARY, &["cart"]));
        let svc = service(Arc::clone(&fetcher), store);

        assert_eq!(svc.load_from_url(None).await.unwrap().source, LoadSource::Network);
    }

    #[test]
    fn test_cache_freshness() {
        let now = Utc::now();
        let entry = CacheEntry {
            timestamp: now.checked_sub_signed(chrono::Duration::minutes(10)).unwrap(),
            data: RegistryDocument::default(),
        };
        assert!(!entry.is_fresh(DEVELOPMENT_CACHE_TTL, now));
        assert!(entry.is_fresh(PRODUCTION_CACHE_TTL, now));
    }

    #[test]
    fn test_missing_url() {
        let svc = RegistryService::new(
            RegistryServiceConfig::default(),
            Arc::new(StubFetcher::default()),
            Arc::new(MemoryKvStore::new()),
        )
        .unwrap();
        assert!(matches!(svc.resolve_url(None), Err(RegistryError::NotConfigured)));
    }
}
