//! MFE Runtime - checking, loading and isolating remote modules.
//!
//! - [`CompatibilityChecker`]: decides whether a manifest may load on this
//!   host, before anything is fetched
//! - [`ModuleLoader`]: imports a bundle, mounts it with its service view,
//!   retries, times out, and unmounts cleanly; loads are serialized per
//!   surface and superseded loads are discarded
//! - [`ErrorBoundary`]: contains errors and panics from module code and
//!   leaves a retryable fallback on the surface
//! - [`MfeHost`]: the facade running lookup, compatibility, service scoping
//!   and loading in order
//! - [`config_bridge`]: turns an `mfe_config::HostConfig` into the pieces
//!   above
//!
//! # Example
//!
//! ```rust,ignore
//! use mfe_runtime::prelude::*;
//!
//! let host = MfeHost::new(profile, registry, services, loader);
//! host.start().await?;
//! let handle = host
//!     .load_module("cart", surface, LoadOptions::default())
//!     .await?;
//! host.unload_module(handle).await;
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod prelude;

pub mod boundary;
pub mod compat;
pub mod config_bridge;
pub mod error;
pub mod events;
pub mod host;
pub mod loader;
pub mod module;
pub mod record;
pub mod surface;

pub use boundary::{BoundaryReport, ErrorBoundary, ErrorCallback, MAX_REPORTS};
pub use compat::{CompatibilityChecker, CompatibilityResult, HostProfile};
pub use error::{ModuleError, ModuleResult};
pub use events::{LifecycleBus, LifecycleEvent, LifecycleReceiver};
pub use host::{LoadOptions, MfeHost};
pub use loader::{
    DEFAULT_LOAD_TIMEOUT, DEFAULT_MAX_RETRIES, DEFAULT_RETRY_DELAY, LoaderConfig, ModuleLoader,
};
pub use module::{
    BundleMetadata, Cleanup, ModuleBundle, ModuleImporter, MountConvention, MountOutcome,
    MountServices, RemoteModule, StaticImporter,
};
pub use record::{ModuleHandle, ModuleRecord, ModuleState};
pub use surface::{MemorySurface, MountSurface, SurfaceContent, SurfaceId};
