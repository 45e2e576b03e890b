#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
//! Layered configuration for the MFE host runtime.
//!
//! This crate provides a single [`HostConfig`] type covering the host
//! identity, the module directory, the loader policy and logging.
//!
//! # Usage
//!
//! ```rust,no_run
//! use mfe_config::HostConfig;
//!
//! let config = HostConfig::load(Some(std::path::Path::new("mfe.toml"))).unwrap();
//! println!("Registry: {:?}", config.registry.url);
//! ```
//!
//! # Configuration Precedence
//!
//! From highest to lowest priority:
//!
//! 1. **Config file** (TOML, path supplied by the host)
//! 2. **Environment variables** (`MFE_ENV`, `MFE_REGISTRY_URL`,
//!    `MFE_REGISTRY_FALLBACK_URL`, `MFE_LOG_LEVEL`), fallback only
//! 3. **Embedded defaults** (`defaults.toml` compiled into the binary)
//!
//! # Design
//!
//! This crate has **no dependencies on other internal mfe crates**.
//! Conversion into runtime types happens in `mfe_runtime::config_bridge`.

/// Environment variable fallback resolution.
pub mod env;
/// Configuration error types.
pub mod error;
/// Configuration file loading.
pub mod loader;
/// Configuration struct definitions.
pub mod types;
/// Configuration validation rules.
pub mod validate;

pub use error::{ConfigError, ConfigResult};
pub use types::*;

impl HostConfig {
    /// Load configuration with the full precedence chain.
    ///
    /// See [`loader::load`].
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if the file is malformed or the final
    /// configuration fails validation.
    pub fn load(path: Option<&std::path::Path>) -> ConfigResult<Self> {
        loader::load(path)
    }
}
