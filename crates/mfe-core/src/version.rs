//! Semantic version ranges.
//!
//! Manifests are authored by frontend build pipelines, so their ranges use
//! npm syntax: whitespace-separated comparators (`>=1.0.0 <2.0.0`), `||`
//! alternatives and hyphen ranges (`1.0.0 - 2.0.0`). The `semver` crate only
//! understands comma-separated comparator sets, so [`VersionRange`] rewrites
//! each alternative into that form before parsing.

use std::fmt;
use std::str::FromStr;

use semver::{Version, VersionReq};
use serde::{Deserialize, Serialize};

use crate::error::{ManifestError, ManifestResult};

/// A parsed semver range: satisfied when any alternative matches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionRange {
    raw: String,
    alternatives: Vec<VersionReq>,
}

impl VersionRange {
    /// Parse an npm-style range.
    ///
    /// # Errors
    ///
    /// Returns [`ManifestError::InvalidRange`] if any alternative fails to
    /// parse.
    pub fn parse(range: &str) -> ManifestResult<Self> {
        let trimmed = range.trim();
        let mut alternatives = Vec::new();
        for alt in trimmed.split("||") {
            let normalized = normalize_alternative(alt);
            let req = VersionReq::parse(&normalized).map_err(|e| ManifestError::InvalidRange {
                range: range.to_string(),
                message: e.to_string(),
            })?;
            alternatives.push(req);
        }
        Ok(Self {
            raw: trimmed.to_string(),
            alternatives,
        })
    }

    /// A range that accepts every release version.
    #[must_use]
    pub fn any() -> Self {
        Self {
            raw: "*".into(),
            alternatives: vec![VersionReq::STAR],
        }
    }

    /// Whether `version` satisfies this range.
    #[must_use]
    pub fn matches(&self, version: &Version) -> bool {
        self.alternatives.iter().any(|req| req.matches(version))
    }

    /// The range as originally written (trimmed).
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

/// Rewrite one npm alternative into `semver` comparator syntax.
fn normalize_alternative(alt: &str) -> String {
    let alt = alt.trim();
    if alt.is_empty() || alt == "x" || alt == "X" {
        return "*".into();
    }

    if let Some((low, high)) = alt.split_once(" - ") {
        return format!(">={}, <={}", low.trim(), high.trim());
    }

    let mut comparators: Vec<String> = Vec::new();
    let mut pending_op = String::new();
    for token in alt
        .split(|c: char| c.is_whitespace() || c == ',')
        .filter(|t| !t.is_empty())
    {
        if token.chars().all(|c| matches!(c, '<' | '>' | '=' | '~' | '^')) {
            // `>= 1.0.0` - the operator is detached from its version.
            pending_op.push_str(token);
            continue;
        }
        let token = token.strip_prefix('v').unwrap_or(token);
        if pending_op.is_empty() && token.starts_with(|c: char| c.is_ascii_digit()) {
            comparators.push(bare_comparator(token));
        } else {
            comparators.push(format!("{pending_op}{token}"));
        }
        pending_op.clear();
    }
    if comparators.is_empty() {
        return "*".into();
    }
    comparators.join(", ")
}

/// npm reads a bare `1.2.3` as an exact match and a bare `1.2` as `1.2.x`,
/// while `semver` would read both as caret requirements.
fn bare_comparator(token: &str) -> String {
    if token.contains(['x', 'X', '*']) {
        return token.to_string();
    }
    let core = token.split(['-', '+']).next().unwrap_or(token);
    if core.split('.').count() >= 3 {
        format!("={token}")
    } else {
        format!("~{token}")
    }
}

impl fmt::Display for VersionRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl FromStr for VersionRange {
    type Err = ManifestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for VersionRange {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.raw)
    }
}

impl<'de> Deserialize<'de> for VersionRange {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}

/// Parse a version leniently: accepts `v1.2.3`, `1.2` and `90`.
///
/// Browser and framework versions reported by hosts are frequently partial,
/// so missing components are filled with zero.
///
/// # Errors
///
/// Returns [`ManifestError::InvalidVersion`] if the string is not a version
/// even after padding.
pub fn lenient_version(value: &str) -> ManifestResult<Version> {
    let trimmed = value.trim();
    let trimmed = trimmed.strip_prefix('v').unwrap_or(trimmed);
    if let Ok(v) = Version::parse(trimmed) {
        return Ok(v);
    }

    let invalid = |message: String| ManifestError::InvalidVersion {
        value: value.to_string(),
        message,
    };
    let mut parts = trimmed.splitn(3, '.');
    let mut next = || -> ManifestResult<u64> {
        match parts.next() {
            None | Some("") => Ok(0),
            Some(p) => p.parse::<u64>().map_err(|e| invalid(e.to_string())),
        }
    };
    let major = next()?;
    let minor = next()?;
    let patch = next()?;
    if trimmed.is_empty() {
        return Err(invalid("empty version".into()));
    }
    Ok(Version::new(major, minor, patch))
}
