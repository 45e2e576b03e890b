//! MFE Telemetry - logging and load correlation for the MFE host runtime.
//!
//! This crate provides:
//! - Configurable logging setup with multiple formats and targets
//! - A [`LoadContext`] that ties every log line of one module load together
//!
//! # Example
//!
//! ```rust,no_run
//! use mfe_telemetry::{LoadContext, LogConfig, LogFormat, setup_logging};
//!
//! # fn main() -> Result<(), mfe_telemetry::TelemetryError> {
//! let config = LogConfig::new("info")
//!     .with_format(LogFormat::Compact)
//!     .with_directive("mfe_runtime=debug");
//! setup_logging(&config)?;
//!
//! let ctx = LoadContext::new("cart", "sidebar");
//! let _guard = ctx.span().entered();
//! tracing::info!("Loading module");
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod prelude;

mod context;
mod error;
mod logging;

pub use context::LoadContext;
pub use error::{TelemetryError, TelemetryResult};
pub use logging::{
    FileRotation, LogConfig, LogFormat, LogTarget, setup_default_logging, setup_logging,
};
