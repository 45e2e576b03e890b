//! Prelude module - commonly used types for convenient import.
//!
//! Use `use mfe_runtime::prelude::*;` to import all essential types.

// Errors
pub use crate::{ModuleError, ModuleResult};

// Compatibility
pub use crate::{CompatibilityChecker, CompatibilityResult, HostProfile};

// Module contract
pub use crate::{
    ModuleBundle, ModuleImporter, MountConvention, MountOutcome, MountServices, RemoteModule,
    StaticImporter,
};

// Surfaces
pub use crate::{MemorySurface, MountSurface, SurfaceContent, SurfaceId};

// Lifecycle
pub use crate::{
    ErrorBoundary, LifecycleEvent, LoadOptions, LoaderConfig, MfeHost, ModuleHandle,
    ModuleLoader, ModuleRecord, ModuleState,
};
