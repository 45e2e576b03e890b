//! MFE Services - dependency injection for loaded modules.
//!
//! A host registers named capabilities (logger, event bus, auth, ...) once at
//! startup. Each loaded module then receives a read-only view of them:
//!
//! - [`ServiceProvider`]: a named factory with declared dependencies
//! - [`ServiceRegistry`]: registration, lazy singleton construction,
//!   dependency ordering, cycle detection and teardown
//! - [`ServiceContainer`]: the per-consumer view, optionally restricted to an
//!   allow-list of names
//!
//! # Construction guarantees
//!
//! Each name is built at most once per registry. Dependencies are built
//! before their dependents, concurrent first requests share one in-flight
//! build, and a dependency cycle fails with
//! [`ServiceError::CircularDependency`] instead of recursing forever.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod prelude;

pub mod container;
pub mod error;
pub mod provider;
pub mod registry;

pub use container::{ServiceContainer, ServiceMap};
pub use error::{ServiceError, ServiceResult};
pub use provider::{DEFAULT_SERVICE_VERSION, FnProvider, ServiceInstance, ServiceProvider, instance};
pub use registry::{Registration, ServiceDescriptor, ServiceRegistry};
