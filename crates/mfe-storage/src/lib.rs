//! MFE Storage - host-side persistent key-value store.
//!
//! The registry service keeps a copy of the last good registry document in a
//! persistent store so that a host can still start when the directory
//! endpoint is down. This crate provides the store abstraction:
//!
//! - [`KvStore`]: namespaced `get`/`set`/`delete` over string keys
//! - [`MemoryKvStore`]: ephemeral store for tests and short-lived hosts
//! - [`JsonFileKvStore`]: a single JSON file on disk, the host's equivalent
//!   of browser `localStorage`
//! - [`ScopedKvStore`]: a store pre-bound to one namespace with typed JSON
//!   helpers

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod error;
pub mod file;
pub mod kv;

pub use error::{StorageError, StorageResult};
pub use file::JsonFileKvStore;
pub use kv::{KvStore, MemoryKvStore, ScopedKvStore};
