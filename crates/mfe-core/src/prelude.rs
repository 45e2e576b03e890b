//! Prelude module - commonly used types for convenient import.
//!
//! Use `use mfe_core::prelude::*;` to import all essential types.

// Errors
pub use crate::{ManifestError, ManifestResult};

// Manifest model
pub use crate::{
    Compatibility, Deprecation, Manifest, ManifestDependencies, ModuleName, Requirements,
    SchemaVersion, ServiceRequirement,
};

// Validation
pub use crate::{ManifestValidation, validate_manifest};

// Versions
pub use crate::{VersionRange, lenient_version};

// Registry document
pub use crate::{RegistryDocConfig, RegistryDocument};

// Host environment
pub use crate::Environment;
