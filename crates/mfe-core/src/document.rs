//! Registry document served by a module directory.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::ManifestResult;
use crate::manifest::Manifest;

/// The JSON document a registry endpoint serves.
///
/// `mfes` is kept as raw JSON so that one malformed entry does not prevent
/// the rest of the directory from loading; use [`RegistryDocument::manifests`]
/// to validate entries individually.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryDocument {
    /// Document format version.
    #[serde(default)]
    pub version: Option<String>,
    /// Environment the document was published for.
    #[serde(default)]
    pub environment: Option<String>,
    /// Publication timestamp as written by the publisher.
    #[serde(default)]
    pub last_updated: Option<String>,
    /// Module manifests.
    #[serde(default)]
    pub mfes: Vec<serde_json::Value>,
    /// Directory-wide settings.
    #[serde(default)]
    pub config: RegistryDocConfig,
}

/// Directory-wide settings carried by a registry document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryDocConfig {
    /// Loader defaults suggested by the publisher.
    #[serde(default)]
    pub default_loading: DefaultLoading,
    /// Feature switches.
    #[serde(default)]
    pub features: BTreeMap<String, serde_json::Value>,
}

/// Loader defaults suggested by the publisher.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DefaultLoading {
    /// Load timeout in milliseconds.
    #[serde(default)]
    pub timeout: Option<u64>,
    /// Maximum automatic retries.
    #[serde(default)]
    pub retries: Option<u32>,
}

impl RegistryDocument {
    /// Build a document from already-parsed manifests.
    ///
    /// # Errors
    ///
    /// Returns an error if a manifest fails to serialize.
    pub fn from_manifests(manifests: &[Manifest]) -> ManifestResult<Self> {
        let mfes = manifests
            .iter()
            .map(serde_json::to_value)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            mfes,
            ..Self::default()
        })
    }

    /// Validate and parse every entry, preserving order.
    pub fn manifests(&self) -> impl Iterator<Item = ManifestResult<Manifest>> + '_ {
        self.mfes.iter().cloned().map(Manifest::from_value)
    }

    /// Whether a feature switch is set to `true`.
    #[must_use]
    pub fn feature_enabled(&self, name: &str) -> bool {
        self.config
            .features
            .get(name)
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(false)
    }
}
