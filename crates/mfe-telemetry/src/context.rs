//! Correlation context for module loads.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifies one module load across every log line it produces.
///
/// Retries reuse the same `load_id`; a manual retry starts a new context
/// whose `parent_id` points at the failed load.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadContext {
    /// Unique load identifier.
    pub load_id: Uuid,
    /// Load this one retries, if any.
    pub parent_id: Option<Uuid>,
    /// Module being loaded.
    pub module: String,
    /// Surface the module mounts into.
    pub surface: String,
    /// When the load started.
    pub started_at: DateTime<Utc>,
    /// Additional fields.
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl LoadContext {
    /// Create a context for loading `module` into `surface`.
    #[must_use]
    pub fn new(module: impl Into<String>, surface: impl Into<String>) -> Self {
        Self {
            load_id: Uuid::new_v4(),
            parent_id: None,
            module: module.into(),
            surface: surface.into(),
            started_at: Utc::now(),
            metadata: BTreeMap::new(),
        }
    }

    /// Context for a manual retry of this load.
    #[must_use]
    pub fn retry(&self) -> Self {
        Self {
            load_id: Uuid::new_v4(),
            parent_id: Some(self.load_id),
            module: self.module.clone(),
            surface: self.surface.clone(),
            started_at: Utc::now(),
            metadata: self.metadata.clone(),
        }
    }

    /// Add metadata.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Elapsed milliseconds since the load started.
    #[must_use]
    pub fn elapsed_ms(&self) -> i64 {
        Utc::now()
            .signed_duration_since(self.started_at)
            .num_milliseconds()
    }

    /// First eight characters of the load id.
    #[must_use]
    pub fn short_id(&self) -> String {
        self.load_id.simple().to_string().chars().take(8).collect()
    }

    /// Span carrying the correlation fields.
    #[must_use]
    pub fn span(&self) -> tracing::Span {
        tracing::info_span!(
            "module_load",
            load_id = %self.short_id(),
            parent_id = self.parent_id.map(|id| id.to_string()),
            module = %self.module,
            surface = %self.surface,
        )
    }
}
