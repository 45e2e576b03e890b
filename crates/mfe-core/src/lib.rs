//! Manifest model and validation for the MFE host runtime.
//!
//! Provides the static description of a loadable module and the rules that
//! decide whether such a description may enter a registry:
//!
//! - [`ModuleName`]: Stable, unique module identifier
//! - [`Manifest`]: Identity, bundle URL, dependencies, compatibility
//!   constraints and required host services of one module
//! - [`validate_manifest`]: Schema validation of an arbitrary JSON value,
//!   distinguishing legacy (V1) from current (V2) manifests
//! - [`VersionRange`]: npm-flavoured semver ranges (`>=1.0.0 <2.0.0`,
//!   `^18 || ^19`, `1.0.0 - 2.0.0`) on top of the `semver` crate
//! - [`RegistryDocument`]: The JSON directory document served by a registry
//! - [`Environment`]: Development or production host
//!
//! # Schema versions
//!
//! Legacy manifests lack the structured `dependencies.runtime` block. They are
//! accepted with a superficial check so that a gradual schema migration never
//! breaks an existing deployment.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]

pub mod prelude;

pub mod document;
pub mod environment;
pub mod error;
pub mod manifest;
pub mod name;
pub mod validate;
pub mod version;

pub use document::{DefaultLoading, RegistryDocConfig, RegistryDocument};
pub use environment::Environment;
pub use error::{ManifestError, ManifestResult};
pub use manifest::{
    Compatibility, Deprecation, Manifest, ManifestDependencies, Requirements, SchemaVersion,
    ServiceRequirement,
};
pub use name::ModuleName;
pub use validate::{ManifestValidation, validate_manifest};
pub use version::{VersionRange, lenient_version};
