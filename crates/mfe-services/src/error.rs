//! Service resolution error types.

/// Errors from registering or resolving services.
///
/// `MissingService`, `CircularDependency` and `UnknownDependency` are host
/// configuration bugs: [`ServiceRegistry::initialize`](crate::ServiceRegistry::initialize)
/// reports them at startup wherever the declared graph allows.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ServiceError {
    /// A mandatory service is not registered or not visible to the caller.
    #[error("required service '{name}' is not available")]
    MissingService {
        /// Requested capability name.
        name: String,
    },

    /// Resolution revisited a service that was still being built.
    #[error("circular service dependency: {}", path.join(" -> "))]
    CircularDependency {
        /// Resolution path, ending with the repeated name.
        path: Vec<String>,
    },

    /// A provider declares a dependency that nothing provides.
    #[error("service '{service}' depends on unregistered service '{dependency}'")]
    UnknownDependency {
        /// The dependent service.
        service: String,
        /// The missing dependency.
        dependency: String,
    },

    /// The instance exists but is not of the requested type.
    #[error("service '{name}' is not a {expected}")]
    TypeMismatch {
        /// Requested capability name.
        name: String,
        /// Requested Rust type.
        expected: &'static str,
    },

    /// A provider's factory failed.
    #[error("failed to construct service '{name}': {message}")]
    Construction {
        /// The service being built.
        name: String,
        /// Failure description.
        message: String,
    },

    /// The name is already bound to a built instance and cannot be replaced.
    #[error("service '{name}' is already built and cannot be re-registered")]
    AlreadyResolved {
        /// The service name.
        name: String,
    },

    /// Service names must be non-empty.
    #[error("invalid service name: '{0}'")]
    InvalidName(String),
}

impl ServiceError {
    /// Shorthand for a [`ServiceError::Construction`] failure.
    pub fn construction(name: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Self::Construction {
            name: name.into(),
            message: message.to_string(),
        }
    }
}

/// Result type for service operations.
pub type ServiceResult<T> = Result<T, ServiceError>;
