//! Compatibility checker: may this manifest be loaded on this host?
//!
//! Only violated version ranges and missing mandatory services are errors.
//! Everything else (browser minimums, undeclared frameworks, deprecation) is
//! a warning and never blocks a load.

use std::collections::BTreeMap;
use std::sync::Arc;

use semver::Version;
use serde::{Deserialize, Serialize};

use mfe_core::{Manifest, ModuleName, VersionRange, lenient_version};
use mfe_services::{ServiceDescriptor, ServiceRegistry};

/// What the host offers to loaded modules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostProfile {
    /// Version of the host ("container").
    pub container_version: Version,
    /// Service name → advertised version.
    pub services: BTreeMap<String, String>,
    /// Framework versions supplied by the host (e.g. `react` → 18.2.0).
    pub frameworks: BTreeMap<String, Version>,
    /// Browser versions, when the host knows them.
    pub browsers: BTreeMap<String, Version>,
}

impl HostProfile {
    /// A profile with no services, frameworks or browsers.
    #[must_use]
    pub fn new(container_version: Version) -> Self {
        Self {
            container_version,
            services: BTreeMap::new(),
            frameworks: BTreeMap::new(),
            browsers: BTreeMap::new(),
        }
    }

    /// A profile advertising every service registered in `registry`.
    #[must_use]
    pub fn from_registry(container_version: Version, registry: &ServiceRegistry) -> Self {
        Self::new(container_version).with_services(registry.describe())
    }

    /// Advertise one service.
    #[must_use]
    pub fn with_service(mut self, name: impl Into<String>, version: impl Into<String>) -> Self {
        self.services.insert(name.into(), version.into());
        self
    }

    /// Advertise described services, replacing same-named entries.
    #[must_use]
    pub fn with_services(mut self, services: impl IntoIterator<Item = ServiceDescriptor>) -> Self {
        self.services
            .extend(services.into_iter().map(|s| (s.name, s.version)));
        self
    }

    /// Declare a framework version.
    #[must_use]
    pub fn with_framework(mut self, name: impl Into<String>, version: Version) -> Self {
        self.frameworks.insert(name.into(), version);
        self
    }

    /// Declare a browser version.
    #[must_use]
    pub fn with_browser(mut self, name: impl Into<String>, version: Version) -> Self {
        self.browsers.insert(name.into(), version);
        self
    }
}

/// Outcome of one compatibility check. Never persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompatibilityResult {
    /// True iff `errors` is empty.
    pub compatible: bool,
    /// Blocking problems.
    pub errors: Vec<String>,
    /// Advisory problems.
    pub warnings: Vec<String>,
}

impl CompatibilityResult {
    fn finish(errors: Vec<String>, warnings: Vec<String>) -> Self {
        Self {
            compatible: errors.is_empty(),
            errors,
            warnings,
        }
    }
}

/// Checks manifests against a [`HostProfile`] without side effects.
#[derive(Debug, Clone)]
pub struct CompatibilityChecker {
    profile: HostProfile,
}

impl CompatibilityChecker {
    /// Create a checker for `profile`.
    #[must_use]
    pub fn new(profile: HostProfile) -> Self {
        Self { profile }
    }

    /// The profile checked against.
    #[must_use]
    pub fn profile(&self) -> &HostProfile {
        &self.profile
    }

    /// Check one manifest.
    #[must_use]
    pub fn check_compatibility(&self, manifest: &Manifest) -> CompatibilityResult {
        if manifest.is_legacy() {
            return CompatibilityResult::finish(
                Vec::new(),
                vec![format!(
                    "module '{}' uses the legacy (V1) manifest schema; upgrade recommended",
                    manifest.name
                )],
            );
        }

        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        if let Some(compat) = &manifest.compatibility {
            if let Some(range) = &compat.container {
                self.check_container(range, &mut errors);
            }
            for (framework, range) in &compat.frameworks {
                self.check_framework(framework, range, &mut errors, &mut warnings);
            }
            for (browser, minimum) in &compat.browsers {
                self.check_browser(browser, minimum, &mut warnings);
            }
        }

        if let Some(peers) = manifest.peer_dependencies() {
            self.check_peers(peers, &mut warnings);
        }

        for requirement in manifest.requirements.services.iter().filter(|s| !s.optional) {
            self.check_service(&requirement.name, requirement.version.as_deref(), &mut errors);
        }

        if let Some(deprecated) = &manifest.deprecated {
            let mut warning = format!(
                "module '{}' is deprecated since {}",
                manifest.name, deprecated.since
            );
            if let Some(replacement) = &deprecated.replacement {
                warning.push_str(&format!("; use '{replacement}' instead"));
            }
            if let Some(message) = &deprecated.message {
                warning.push_str(&format!(" ({message})"));
            }
            warnings.push(warning);
        }

        CompatibilityResult::finish(errors, warnings)
    }

    /// Check every manifest independently.
    #[must_use]
    pub fn check_registry<'a, I>(&self, manifests: I) -> BTreeMap<ModuleName, CompatibilityResult>
    where
        I: IntoIterator<Item = &'a Arc<Manifest>>,
    {
        manifests
            .into_iter()
            .map(|m| (m.name.clone(), self.check_compatibility(m)))
            .collect()
    }

    fn check_container(&self, range: &str, errors: &mut Vec<String>) {
        match VersionRange::parse(range) {
            Ok(req) if req.matches(&self.profile.container_version) => {},
            Ok(req) => errors.push(format!(
                "requires container version {}, host is {}",
                req.as_str(),
                self.profile.container_version
            )),
            Err(e) => errors.push(format!("invalid container version constraint: {e}")),
        }
    }

    fn check_framework(
        &self,
        framework: &str,
        range: &str,
        errors: &mut Vec<String>,
        warnings: &mut Vec<String>,
    ) {
        let Some(version) = self.profile.frameworks.get(framework) else {
            warnings.push(format!(
                "framework '{framework}' ({range}) is not provided by the host"
            ));
            return;
        };
        match VersionRange::parse(range) {
            Ok(req) if req.matches(version) => {},
            Ok(req) => errors.push(format!(
                "requires {framework} {}, host provides {version}",
                req.as_str()
            )),
            Err(e) => errors.push(format!("invalid {framework} version constraint: {e}")),
        }
    }

    fn check_browser(&self, browser: &str, minimum: &str, warnings: &mut Vec<String>) {
        let Ok(minimum) = lenient_version(minimum) else {
            warnings.push(format!(
                "unreadable minimum version '{minimum}' for browser '{browser}'"
            ));
            return;
        };
        if let Some(actual) = self.profile.browsers.get(browser)
            && *actual < minimum
        {
            warnings.push(format!(
                "{browser} {actual} is older than the recommended minimum {minimum}"
            ));
        }
    }

    fn check_peers(&self, peers: &BTreeMap<String, String>, warnings: &mut Vec<String>) {
        for (name, range) in peers {
            let (Some(version), Ok(req)) =
                (self.profile.frameworks.get(name), VersionRange::parse(range))
            else {
                continue;
            };
            if !req.matches(version) {
                warnings.push(format!(
                    "peer dependency {name} {range} does not match host version {version}"
                ));
            }
        }
    }

    fn check_service(&self, name: &str, range: Option<&str>, errors: &mut Vec<String>) {
        let Some(advertised) = self.profile.services.get(name) else {
            errors.push(format!("required service '{name}' is not available"));
            return;
        };
        let Some(range) = range else {
            return;
        };
        let req = match VersionRange::parse(range) {
            Ok(req) => req,
            Err(e) => {
                errors.push(format!("service '{name}': {e}"));
                return;
            },
        };
        match lenient_version(advertised) {
            Ok(version) if req.matches(&version) => {},
            Ok(version) => errors.push(format!(
                "service '{name}' version {version} does not satisfy {}",
                req.as_str()
            )),
            Err(_) => errors.push(format!(
                "service '{name}' advertises unreadable version '{advertised}'"
            )),
        }
    }
}
