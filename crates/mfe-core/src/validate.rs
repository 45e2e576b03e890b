//! Manifest schema validation.
//!
//! Validation runs on raw JSON rather than on [`Manifest`](crate::Manifest)
//! so that every problem in a document is reported at once instead of
//! stopping at the first deserialization failure.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::manifest::SchemaVersion;
use crate::name::ModuleName;
use crate::version::{VersionRange, lenient_version};

/// Browsers the compatibility checker knows how to compare.
const KNOWN_BROWSERS: &[&str] = &["chrome", "edge", "firefox", "safari", "opera", "samsung"];

/// Outcome of [`validate_manifest`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestValidation {
    /// Whether the manifest may be registered.
    pub valid: bool,
    /// Detected schema (`Invalid` whenever `valid` is false).
    pub schema: SchemaVersion,
    /// Blocking problems.
    pub errors: Vec<String>,
    /// Advisory problems.
    pub warnings: Vec<String>,
}

impl ManifestValidation {
    /// Numeric schema version: 0 = invalid, 1 = legacy, 2 = current.
    #[must_use]
    pub fn version(&self) -> u8 {
        self.schema.as_u8()
    }
}

/// Validate an arbitrary JSON value as a manifest.
///
/// Legacy manifests (none of `dependencies.runtime`, a non-empty
/// `requirements.services` or `compatibility`) only get the identity checks: name, version and url.
/// Current manifests are checked in full.
#[must_use]
pub fn validate_manifest(value: &Value) -> ManifestValidation {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    let Some(obj) = value.as_object() else {
        return ManifestValidation {
            valid: false,
            schema: SchemaVersion::Invalid,
            errors: vec!["manifest must be a JSON object".into()],
            warnings,
        };
    };

    check_identity(obj, &mut errors);

    let is_current = has_current_markers(obj);

    if is_current {
        check_dependencies(obj, &mut errors);
        check_requirements(obj, &mut errors, &mut warnings);
        check_compatibility(obj, &mut errors, &mut warnings);
        check_deprecation(obj, &mut errors);
    } else {
        warnings.push("legacy (V1) manifest schema; upgrade to the current schema recommended".into());
    }

    let valid = errors.is_empty();
    let schema = match (valid, is_current) {
        (false, _) => SchemaVersion::Invalid,
        (true, true) => SchemaVersion::Current,
        (true, false) => SchemaVersion::Legacy,
    };
    ManifestValidation {
        valid,
        schema,
        errors,
        warnings,
    }
}

/// Schema markers read from raw JSON, classified the same way
/// [`Manifest::schema`](crate::Manifest::schema) classifies parsed manifests.
fn has_current_markers(obj: &Map<String, Value>) -> bool {
    let runtime = obj
        .get("dependencies")
        .and_then(|d| d.get("runtime"))
        .is_some_and(Value::is_object);
    let services = obj
        .get("requirements")
        .and_then(|r| r.get("services"))
        .and_then(Value::as_array)
        .is_some_and(|s| !s.is_empty());
    let compatibility = obj.get("compatibility").is_some_and(Value::is_object);
    SchemaVersion::detect(runtime, services, compatibility) == SchemaVersion::Current
}

fn check_identity(obj: &Map<String, Value>, errors: &mut Vec<String>) {
    match obj.get("name").and_then(Value::as_str) {
        None => errors.push("missing required field 'name'".into()),
        Some(name) if !ModuleName::is_valid(name) => {
            errors.push(format!("invalid module name '{name}'"));
        },
        Some(_) => {},
    }

    match obj.get("version").and_then(Value::as_str) {
        None => errors.push("missing required field 'version'".into()),
        Some(v) => {
            if let Err(e) = semver::Version::parse(v) {
                errors.push(format!("version '{v}' is not valid semver: {e}"));
            }
        },
    }

    match obj.get("url").and_then(Value::as_str) {
        None => errors.push("missing required field 'url'".into()),
        Some("") => errors.push("field 'url' must not be empty".into()),
        Some(u) if u.contains("://") => {
            if let Err(e) = url::Url::parse(u) {
                errors.push(format!("url '{u}' is not a valid absolute URL: {e}"));
            }
        },
        Some(_) => {},
    }
}

fn check_string_map(value: Option<&Value>, field: &str, errors: &mut Vec<String>) {
    let Some(value) = value else {
        return;
    };
    let Some(map) = value.as_object() else {
        errors.push(format!("'{field}' must be an object"));
        return;
    };
    for (key, v) in map {
        if !v.is_string() {
            errors.push(format!("'{field}.{key}' must be a version string"));
        }
    }
}

fn check_dependencies(obj: &Map<String, Value>, errors: &mut Vec<String>) {
    let deps = obj.get("dependencies");
    check_string_map(
        deps.and_then(|d| d.get("runtime")),
        "dependencies.runtime",
        errors,
    );
    check_string_map(deps.and_then(|d| d.get("peer")), "dependencies.peer", errors);
}

fn check_range(range: &str, field: &str, errors: &mut Vec<String>) {
    if let Err(e) = VersionRange::parse(range) {
        errors.push(format!("'{field}': {e}"));
    }
}

fn check_requirements(
    obj: &Map<String, Value>,
    errors: &mut Vec<String>,
    warnings: &mut Vec<String>,
) {
    let Some(requirements) = obj.get("requirements") else {
        return;
    };
    let Some(services) = requirements.get("services") else {
        return;
    };
    let Some(services) = services.as_array() else {
        errors.push("'requirements.services' must be an array".into());
        return;
    };

    let mut seen = std::collections::HashSet::new();
    for (i, service) in services.iter().enumerate() {
        let Some(name) = service.get("name").and_then(Value::as_str) else {
            errors.push(format!("'requirements.services[{i}]' is missing 'name'"));
            continue;
        };
        if name.is_empty() {
            errors.push(format!("'requirements.services[{i}].name' must not be empty"));
            continue;
        }
        if !seen.insert(name.to_string()) {
            warnings.push(format!("service '{name}' is required more than once"));
        }
        match service.get("version") {
            None | Some(Value::Null) => {},
            Some(Value::String(range)) => {
                check_range(range, &format!("requirements.services[{i}].version"), errors);
            },
            Some(_) => errors.push(format!(
                "'requirements.services[{i}].version' must be a string"
            )),
        }
        if service.get("optional").is_some_and(|o| !o.is_boolean()) {
            errors.push(format!(
                "'requirements.services[{i}].optional' must be a boolean"
            ));
        }
    }
}

fn check_compatibility(
    obj: &Map<String, Value>,
    errors: &mut Vec<String>,
    warnings: &mut Vec<String>,
) {
    let Some(compat) = obj.get("compatibility") else {
        return;
    };
    if !compat.is_object() {
        errors.push("'compatibility' must be an object".into());
        return;
    }

    match compat.get("container") {
        None | Some(Value::Null) => {},
        Some(Value::String(range)) => check_range(range, "compatibility.container", errors),
        Some(_) => errors.push("'compatibility.container' must be a string".into()),
    }

    if let Some(frameworks) = compat.get("frameworks") {
        check_string_map(Some(frameworks), "compatibility.frameworks", errors);
        if let Some(map) = frameworks.as_object() {
            for (fw, range) in map {
                if let Some(range) = range.as_str() {
                    check_range(range, &format!("compatibility.frameworks.{fw}"), errors);
                }
            }
        }
    }

    // Browser minimums are advisory: malformed entries only warn.
    if let Some(browsers) = compat.get("browsers").and_then(Value::as_object) {
        for (browser, min) in browsers {
            if !KNOWN_BROWSERS.contains(&browser.as_str()) {
                warnings.push(format!("unknown browser '{browser}' in compatibility.browsers"));
            }
            let parsed = min.as_str().map(lenient_version);
            if !matches!(parsed, Some(Ok(_))) {
                warnings.push(format!(
                    "'compatibility.browsers.{browser}' is not a version and will be ignored"
                ));
            }
        }
    }
}

fn check_deprecation(obj: &Map<String, Value>, errors: &mut Vec<String>) {
    match obj.get("deprecated") {
        None | Some(Value::Null) => {},
        Some(Value::Object(d)) => {
            if !d.get("since").is_some_and(Value::is_string) {
                errors.push("'deprecated.since' is required".into());
            }
        },
        Some(_) => errors.push("'deprecated' must be an object".into()),
    }
}
