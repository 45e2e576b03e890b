//! Mount surfaces: where modules and host fallbacks render.

use std::fmt;
use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};

/// Identifier of a logical mount point (e.g. a page slot).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SurfaceId(String);

impl SurfaceId {
    /// Create a surface id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The id as a string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SurfaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SurfaceId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for SurfaceId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// What a surface currently shows.
///
/// The host renders every state except [`SurfaceContent::Module`], which is
/// whatever the mounted module draws.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SurfaceContent {
    /// Nothing mounted.
    Empty,
    /// A load is in flight.
    Loading {
        /// Module being loaded.
        module: String,
    },
    /// The module's own output.
    Module {
        /// Module that rendered.
        module: String,
        /// Opaque rendering.
        body: String,
    },
    /// The compatibility check refused the module.
    Incompatible {
        /// Refused module.
        module: String,
        /// Why.
        errors: Vec<String>,
        /// Whether a "load anyway" action is offered (development only).
        override_allowed: bool,
    },
    /// The module failed and settled in the boundary fallback.
    Failed {
        /// Failed module.
        module: String,
        /// Last error.
        error: String,
        /// Whether a manual retry action is offered.
        retryable: bool,
    },
}

/// An opaque handle into which a module renders itself.
pub trait MountSurface: Send + Sync {
    /// The surface identity.
    fn id(&self) -> &SurfaceId;

    /// Replace the surface's content.
    fn render(&self, content: SurfaceContent);

    /// Current content.
    fn content(&self) -> SurfaceContent;

    /// Reclaim the surface.
    fn clear(&self) {
        self.render(SurfaceContent::Empty);
    }
}

/// In-memory surface that remembers everything rendered into it.
#[derive(Debug)]
pub struct MemorySurface {
    id: SurfaceId,
    history: Mutex<Vec<SurfaceContent>>,
}

impl MemorySurface {
    /// Create an empty surface.
    pub fn new(id: impl Into<SurfaceId>) -> Self {
        Self {
            id: id.into(),
            history: Mutex::new(vec![SurfaceContent::Empty]),
        }
    }

    /// Every content rendered so far, oldest first.
    #[must_use]
    pub fn history(&self) -> Vec<SurfaceContent> {
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl MountSurface for MemorySurface {
    fn id(&self) -> &SurfaceId {
        &self.id
    }

    fn render(&self, content: SurfaceContent) {
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(content);
    }

    fn content(&self) -> SurfaceContent {
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .last()
            .cloned()
            .unwrap_or(SurfaceContent::Empty)
    }
}
