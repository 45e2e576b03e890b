//! MFE Test - Shared test utilities for the MFE host runtime.
//!
//! This crate provides scripted fetchers, configurable modules, recording
//! services and manifest fixtures that can be used across the mfe crates as
//! a dev-dependency.
//!
//! # Usage
//!
//! ```rust,ignore
//! use mfe_test::{TestHost, TestModule, current_manifest};
//!
//! #[tokio::test]
//! async fn test_mount() {
//!     let host = TestHost::new();
//!     host.serve_manifests([current_manifest("cart")]);
//!     host.importer.insert("https://cdn.test/cart.js", TestModule::new("cart").bundle());
//!     host.host.start().await.unwrap();
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]

pub mod prelude;

pub mod fixtures;
pub mod harness;
pub mod mocks;

pub use fixtures::*;
pub use harness::*;
pub use mocks::*;
