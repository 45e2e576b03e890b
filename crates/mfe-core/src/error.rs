//! Manifest error types.

/// Errors from manifest parsing and validation.
#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    /// The module name is malformed.
    #[error("invalid module name: {0}")]
    InvalidName(String),

    /// The manifest failed schema validation and must never be loaded.
    #[error("invalid manifest {name}: {}", errors.join("; "))]
    InvalidManifest {
        /// Name of the offending manifest, or `<unnamed>`.
        name: String,
        /// Every validation error that was found.
        errors: Vec<String>,
    },

    /// A version string is not valid semver.
    #[error("invalid version '{value}': {message}")]
    InvalidVersion {
        /// The rejected version string.
        value: String,
        /// Parser message.
        message: String,
    },

    /// A version range could not be parsed.
    #[error("invalid version range '{range}': {message}")]
    InvalidRange {
        /// The rejected range string.
        range: String,
        /// Parser message.
        message: String,
    },

    /// An environment name is not recognised.
    #[error("unknown environment '{0}' (expected development or production)")]
    InvalidEnvironment(String),

    /// JSON (de)serialization failed.
    #[error("manifest JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for manifest operations.
pub type ManifestResult<T> = Result<T, ManifestError>;
