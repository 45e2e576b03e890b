//! Runtime error types.

use mfe_core::ManifestError;
use mfe_registry::RegistryError;
use mfe_services::ServiceError;

use crate::record::ModuleHandle;

/// Errors from checking, loading, mounting and unmounting modules.
#[derive(Debug, thiserror::Error)]
pub enum ModuleError {
    /// The module is not in the registry.
    #[error("module '{0}' is not registered")]
    NotFound(String),

    /// The compatibility check failed; nothing was fetched.
    #[error("module '{module}' is incompatible with this host: {}", errors.join("; "))]
    Incompatible {
        /// Module name.
        module: String,
        /// Blocking compatibility errors.
        errors: Vec<String>,
    },

    /// The imported bundle does not satisfy the module contract.
    /// Retrying cannot fix this.
    #[error("module '{module}' is not a valid module: {reason}")]
    InvalidModule {
        /// Module name.
        module: String,
        /// What is missing.
        reason: String,
    },

    /// Import or mount failed.
    #[error("failed to load module '{module}': {message}")]
    LoadFailed {
        /// Module name.
        module: String,
        /// Failure description.
        message: String,
    },

    /// Import and mount did not settle in time.
    #[error("module '{module}' did not load within {timeout_ms} ms")]
    Timeout {
        /// Module name.
        module: String,
        /// The configured window.
        timeout_ms: u64,
    },

    /// The module panicked inside the isolation boundary.
    #[error("module '{module}' panicked: {message}")]
    Panicked {
        /// Module name.
        module: String,
        /// Panic payload, if it was a string.
        message: String,
    },

    /// The load was superseded by a newer load or the surface was detached.
    #[error("load of module '{module}' on surface '{surface}' was cancelled")]
    Cancelled {
        /// Module name.
        module: String,
        /// Surface the load targeted.
        surface: String,
    },

    /// No live record carries this handle.
    #[error("no module is loaded under handle {0}")]
    UnknownHandle(ModuleHandle),

    /// The operation does not apply in the record's current state.
    #[error("module '{module}' is {state}; {operation} is not possible")]
    InvalidState {
        /// Module name.
        module: String,
        /// Current state.
        state: String,
        /// Rejected operation.
        operation: &'static str,
    },

    /// A manifest is malformed.
    #[error(transparent)]
    Manifest(#[from] ManifestError),

    /// Service resolution failed.
    #[error(transparent)]
    Service(#[from] ServiceError),

    /// The registry could not be loaded.
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

impl ModuleError {
    /// Shorthand for a [`ModuleError::LoadFailed`].
    pub fn load_failed(module: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Self::LoadFailed {
            module: module.into(),
            message: message.to_string(),
        }
    }

    /// Whether the loader's automatic retry may recover from this error.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::LoadFailed { .. } | Self::Timeout { .. } | Self::Panicked { .. }
        )
    }
}

/// Result type for runtime operations.
pub type ModuleResult<T> = Result<T, ModuleError>;
