//! Prelude module - commonly used types for convenient import.
//!
//! Use `use mfe_services::prelude::*;` to import all essential types.

// Errors
pub use crate::{ServiceError, ServiceResult};

// Providers
pub use crate::{FnProvider, ServiceInstance, ServiceProvider, instance};

// Registry and containers
pub use crate::{Registration, ServiceContainer, ServiceMap, ServiceRegistry};
