//! Registry error types.

use mfe_core::ManifestError;
use mfe_storage::StorageError;

/// Errors from the module registry and its directory fetches.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// The directory could not be loaded from any URL and no cached copy
    /// exists.
    #[error("failed to load module registry from {url}: {message}")]
    LoadFailed {
        /// The primary URL that was requested.
        url: String,
        /// The last failure in the fallback chain.
        message: String,
    },

    /// A single fetch attempt failed.
    #[error("fetch of {url} failed: {message}")]
    Fetch {
        /// The URL that was fetched.
        url: String,
        /// Transport, status or decode failure.
        message: String,
    },

    /// No URL was passed and none is configured.
    #[error("no registry URL configured")]
    NotConfigured,

    /// A manifest failed validation.
    #[error(transparent)]
    Manifest(#[from] ManifestError),

    /// The cache store failed.
    #[error("registry cache error: {0}")]
    Storage(#[from] StorageError),
}

/// Result type for registry operations.
pub type RegistryResult<T> = Result<T, RegistryError>;
