//! Manifest types.
//!
//! A manifest describes a loadable module: its identity, where its bundle
//! lives, what it bundles and what it expects the host to supply. Manifests
//! are produced by a publishing step and are immutable once registered;
//! replacing one means registering a new manifest under the same name.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::ModuleName;
use crate::error::{ManifestError, ManifestResult};
use crate::validate::validate_manifest;

/// Manifest schema generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchemaVersion {
    /// Not a manifest at all.
    Invalid,
    /// Legacy ("V1") manifest: no structured dependencies, service list or compatibility block.
    Legacy,
    /// Current ("V2") manifest.
    Current,
}

impl SchemaVersion {
    /// Numeric schema id: 0 = invalid, 1 = legacy, 2 = current.
    #[must_use]
    pub fn as_u8(self) -> u8 {
        match self {
            Self::Invalid => 0,
            Self::Legacy => 1,
            Self::Current => 2,
        }
    }

    /// Classify a manifest from the blocks only the current schema has.
    ///
    /// An empty service list declares nothing and is not a marker on its
    /// own; serializing a manifest drops it anyway.
    #[must_use]
    #[allow(clippy::fn_params_excessive_bools)]
    pub fn detect(
        structured_dependencies: bool,
        declares_services: bool,
        has_compatibility: bool,
    ) -> Self {
        if structured_dependencies || declares_services || has_compatibility {
            Self::Current
        } else {
            Self::Legacy
        }
    }
}

/// A module manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    /// Unique module identifier.
    pub name: ModuleName,
    /// Semantic version string.
    pub version: String,
    /// Location of the executable bundle.
    pub url: String,
    /// Human-readable display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    /// Optional description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Bundled and peer dependencies.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dependencies: Option<ManifestDependencies>,
    /// Constraints on the host environment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compatibility: Option<Compatibility>,
    /// Capabilities the module expects from the host.
    #[serde(default, skip_serializing_if = "Requirements::is_empty")]
    pub requirements: Requirements,
    /// Deprecation notice.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deprecated: Option<Deprecation>,
    /// Free-form publisher metadata.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

/// Dependency block of a manifest.
///
/// Current manifests split dependencies into `runtime` (bundled in,
/// informational) and `peer` (supplied by the host). Legacy manifests carry a
/// flat name → range map.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ManifestDependencies {
    /// Current schema.
    Structured {
        /// Dependencies bundled into the module.
        runtime: BTreeMap<String, String>,
        /// Dependencies expected from the host.
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        peer: BTreeMap<String, String>,
    },
    /// Legacy flat map.
    Legacy(BTreeMap<String, String>),
}

/// Host environment constraints.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Compatibility {
    /// Range of container (host) versions the module runs in.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container: Option<String>,
    /// Per-framework version ranges (e.g. `react` → `^18.0.0`).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub frameworks: BTreeMap<String, String>,
    /// Minimum browser versions (e.g. `chrome` → `90`).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub browsers: BTreeMap<String, String>,
}

/// Capabilities required from the host.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Requirements {
    /// Ordered list of required services.
    #[serde(default)]
    pub services: Vec<ServiceRequirement>,
}

impl Requirements {
    /// Whether no services are required.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}

/// A single service the module expects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceRequirement {
    /// Capability key (e.g. `logger`, `eventBus`).
    pub name: String,
    /// Accepted version range of the host's implementation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Optional services never block a load.
    #[serde(default)]
    pub optional: bool,
}

impl ServiceRequirement {
    /// A mandatory requirement with no version constraint.
    #[must_use]
    pub fn required(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: None,
            optional: false,
        }
    }

    /// An optional requirement with no version constraint.
    #[must_use]
    pub fn optional(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: None,
            optional: true,
        }
    }

    /// Constrain the accepted version range.
    #[must_use]
    pub fn with_version(mut self, range: impl Into<String>) -> Self {
        self.version = Some(range.into());
        self
    }
}

/// Deprecation notice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deprecation {
    /// Version or date since which the module is deprecated.
    pub since: String,
    /// Name of the module that replaces this one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replacement: Option<String>,
    /// Free-form explanation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Manifest {
    /// Create a minimal current-schema manifest.
    #[must_use]
    pub fn new(name: ModuleName, version: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name,
            version: version.into(),
            url: url.into(),
            display_name: None,
            description: None,
            dependencies: Some(ManifestDependencies::Structured {
                runtime: BTreeMap::new(),
                peer: BTreeMap::new(),
            }),
            compatibility: None,
            requirements: Requirements::default(),
            deprecated: None,
            metadata: None,
        }
    }

    /// Validate and parse a manifest from an arbitrary JSON value.
    ///
    /// # Errors
    ///
    /// Returns [`ManifestError::InvalidManifest`] if validation reports any
    /// error, or [`ManifestError::Json`] if the value does not deserialize.
    pub fn from_value(value: serde_json::Value) -> ManifestResult<Self> {
        let report = validate_manifest(&value);
        if !report.valid {
            let name = value
                .get("name")
                .and_then(serde_json::Value::as_str)
                .unwrap_or("<unnamed>")
                .to_string();
            return Err(ManifestError::InvalidManifest {
                name,
                errors: report.errors,
            });
        }
        match serde_json::from_value(value.clone()) {
            Ok(manifest) => Ok(manifest),
            // Legacy manifests are only checked for identity; unreadable
            // optional blocks are dropped rather than rejecting the module.
            Err(e) if report.schema == SchemaVersion::Legacy => {
                tracing::debug!(error = %e, "Dropping unreadable fields of legacy manifest");
                Self::legacy_identity(&value)
            },
            Err(e) => Err(e.into()),
        }
    }

    fn legacy_identity(value: &serde_json::Value) -> ManifestResult<Self> {
        let field = |key: &str| {
            value
                .get(key)
                .and_then(serde_json::Value::as_str)
                .map(str::to_string)
        };
        let mut manifest = Self::new(
            ModuleName::new(field("name").unwrap_or_default())?,
            field("version").unwrap_or_default(),
            field("url").unwrap_or_default(),
        );
        manifest.dependencies = None;
        manifest.display_name = field("displayName");
        manifest.description = field("description");
        Ok(manifest)
    }

    /// Validate and parse a manifest from JSON text.
    ///
    /// # Errors
    ///
    /// See [`Manifest::from_value`].
    pub fn from_json(json: &str) -> ManifestResult<Self> {
        Self::from_value(serde_json::from_str(json)?)
    }

    /// Schema generation of this manifest.
    #[must_use]
    pub fn schema(&self) -> SchemaVersion {
        let structured = matches!(
            self.dependencies,
            Some(ManifestDependencies::Structured { .. })
        );
        SchemaVersion::detect(
            structured,
            !self.requirements.is_empty(),
            self.compatibility.is_some(),
        )
    }

    /// Whether this is a legacy (V1) manifest.
    #[must_use]
    pub fn is_legacy(&self) -> bool {
        self.schema() == SchemaVersion::Legacy
    }

    /// Parsed semantic version.
    ///
    /// # Errors
    ///
    /// Returns [`ManifestError::InvalidVersion`] if the version is not semver.
    pub fn semver(&self) -> ManifestResult<semver::Version> {
        semver::Version::parse(&self.version).map_err(|e| ManifestError::InvalidVersion {
            value: self.version.clone(),
            message: e.to_string(),
        })
    }

    /// Peer dependencies (empty for legacy manifests).
    #[must_use]
    pub fn peer_dependencies(&self) -> Option<&BTreeMap<String, String>> {
        match &self.dependencies {
            Some(ManifestDependencies::Structured { peer, .. }) => Some(peer),
            _ => None,
        }
    }

    /// Names of all mandatory service requirements, in declaration order.
    pub fn required_services(&self) -> impl Iterator<Item = &str> {
        self.requirements
            .services
            .iter()
            .filter(|s| !s.optional)
            .map(|s| s.name.as_str())
    }

    /// Names of every declared service requirement, mandatory or optional.
    pub fn declared_services(&self) -> impl Iterator<Item = &str> {
        self.requirements.services.iter().map(|s| s.name.as_str())
    }
}
