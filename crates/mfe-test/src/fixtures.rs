//! Test fixtures for manifests and registry documents.

use std::collections::BTreeMap;

use mfe_core::{
    Compatibility, Manifest, ManifestDependencies, ModuleName, RegistryDocument,
    ServiceRequirement,
};

/// Bundle URL used by the manifest fixtures for `name`.
#[must_use]
pub fn bundle_url(name: &str) -> String {
    format!("https://cdn.test/{name}/remoteEntry.js")
}

/// A current-schema manifest at version 1.0.0 with no requirements.
///
/// # Panics
///
/// Panics if `name` is not a valid module name.
#[must_use]
pub fn current_manifest(name: &str) -> Manifest {
    let name = ModuleName::new(name).expect("fixture module name must be valid");
    let url = bundle_url(name.as_str());
    Manifest::new(name, "1.0.0", url)
}

/// A current-schema manifest requiring `services`, in order.
///
/// # Panics
///
/// Panics if `name` is not a valid module name.
#[must_use]
pub fn manifest_requiring(name: &str, services: &[&str]) -> Manifest {
    let mut manifest = current_manifest(name);
    manifest.requirements.services = services
        .iter()
        .map(|s| ServiceRequirement::required(*s))
        .collect();
    manifest
}

/// A current-schema manifest that only runs in a host at `range`.
///
/// # Panics
///
/// Panics if `name` is not a valid module name.
#[must_use]
pub fn manifest_for_container(name: &str, range: &str) -> Manifest {
    let mut manifest = current_manifest(name);
    manifest.compatibility = Some(Compatibility {
        container: Some(range.to_string()),
        ..Compatibility::default()
    });
    manifest
}

/// A legacy manifest: a flat dependency map and nothing else.
///
/// # Panics
///
/// Panics if `name` is not a valid module name.
#[must_use]
pub fn legacy_manifest(name: &str) -> Manifest {
    let mut manifest = current_manifest(name);
    manifest.dependencies = Some(ManifestDependencies::Legacy(BTreeMap::from([(
        "react".to_string(),
        "^17.0.0".to_string(),
    )])));
    manifest
}

/// A registry document listing `manifests`.
///
/// # Panics
///
/// Panics if a manifest cannot be serialized.
#[must_use]
pub fn document_of(manifests: impl IntoIterator<Item = Manifest>) -> RegistryDocument {
    let manifests: Vec<Manifest> = manifests.into_iter().collect();
    RegistryDocument::from_manifests(&manifests).expect("fixture manifests must serialize")
}
