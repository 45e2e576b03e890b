//! Per-load lifecycle records.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use mfe_core::Manifest;

use crate::surface::SurfaceId;

/// Opaque identity of one load attempt sequence on one surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ModuleHandle(Uuid);

impl ModuleHandle {
    /// Allocate a fresh handle.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// The underlying UUID.
    #[must_use]
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ModuleHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ModuleHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of a loaded module.
///
/// ```text
/// Idle -> Loading -> Mounted -> Unmounting -> Unmounted
///            |          |
///            v          v
///          Failed <-----+
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleState {
    /// Created, nothing started.
    Idle,
    /// Import or mount in progress (including retries).
    Loading,
    /// Mounted and live.
    Mounted,
    /// Teardown in progress.
    Unmounting,
    /// Torn down.
    Unmounted,
    /// Settled in the error boundary.
    Failed,
}

impl ModuleState {
    /// Whether the record still owns its surface.
    #[must_use]
    pub fn is_active(self) -> bool {
        matches!(self, Self::Loading | Self::Mounted | Self::Failed)
    }
}

impl fmt::Display for ModuleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Loading => "loading",
            Self::Mounted => "mounted",
            Self::Unmounting => "unmounting",
            Self::Unmounted => "unmounted",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Snapshot of a load's lifecycle.
#[derive(Debug, Clone)]
pub struct ModuleRecord {
    /// Handle returned to the caller.
    pub handle: ModuleHandle,
    /// Manifest the load was started from.
    pub manifest: Arc<Manifest>,
    /// Surface the module renders into.
    pub surface: SurfaceId,
    /// Current state.
    pub state: ModuleState,
    /// Failed attempts so far.
    pub retry_count: u32,
    /// Most recent error, if any.
    pub last_error: Option<String>,
    /// When the module mounted.
    pub mounted_at: Option<DateTime<Utc>>,
}

impl ModuleRecord {
    pub(crate) fn new(manifest: Arc<Manifest>, surface: SurfaceId) -> Self {
        Self {
            handle: ModuleHandle::new(),
            manifest,
            surface,
            state: ModuleState::Idle,
            retry_count: 0,
            last_error: None,
            mounted_at: None,
        }
    }

    /// Module name.
    #[must_use]
    pub fn module(&self) -> &str {
        self.manifest.name.as_str()
    }
}
