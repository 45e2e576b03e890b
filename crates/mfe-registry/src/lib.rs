//! MFE Registry - the directory consulted before any module load.
//!
//! - [`ModuleRegistry`]: in-memory, name-keyed manifest map
//! - [`RegistryFetcher`] / [`HttpRegistryFetcher`]: retrieve a registry
//!   document from a URL
//! - [`RegistryService`]: loads the directory with a TTL cache in a
//!   persistent [`KvStore`](mfe_storage::KvStore), a fallback URL and a
//!   last-resort stale cache
//!
//! # Fallback chain
//!
//! 1. A cached document younger than the TTL is served with no network call.
//! 2. The requested URL is fetched.
//! 3. On failure the fallback URL is fetched once (never the same URL twice).
//! 4. On failure any cached document is served, even if expired.
//! 5. Only when nothing is cached does the load fail with
//!    [`RegistryError::LoadFailed`].

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod error;
pub mod fetcher;
pub mod registry;
pub mod service;

pub use error::{RegistryError, RegistryResult};
pub use fetcher::{DEFAULT_REQUEST_TIMEOUT, HttpRegistryFetcher, RegistryFetcher};
pub use registry::ModuleRegistry;
pub use service::{
    CACHE_KEY, CACHE_NAMESPACE, CacheEntry, DEVELOPMENT_CACHE_TTL, LoadReport, LoadSource,
    PRODUCTION_CACHE_TTL, RegistryService, RegistryServiceConfig, default_ttl,
};
