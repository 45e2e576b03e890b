//! Module name type.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{ManifestError, ManifestResult};

/// Maximum module name length (mirrors the npm package name limit).
const MAX_NAME_LEN: usize = 214;

/// Unique, stable module identifier.
///
/// Names are strings like `"notification-panel"` or `"@shop/cart"`. They are
/// stable across versions and unique within a registry. Allowed characters
/// are ASCII alphanumerics plus `-`, `_`, `.`, `@` and `/`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ModuleName(String);

/// Deserialize with validation so a crafted registry document cannot smuggle
/// in a malformed name.
impl<'de> Deserialize<'de> for ModuleName {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::new(s).map_err(serde::de::Error::custom)
    }
}

impl ModuleName {
    /// Create a new `ModuleName`, validating the format.
    ///
    /// # Errors
    ///
    /// Returns [`ManifestError::InvalidName`] if the name is empty, too long,
    /// or contains characters outside the allowed set.
    pub fn new(name: impl Into<String>) -> ManifestResult<Self> {
        let name = name.into();
        Self::validate(&name)?;
        Ok(Self(name))
    }

    /// Create a `ModuleName` without validation (for tests and internal use).
    #[must_use]
    pub fn from_static(name: &str) -> Self {
        Self(name.to_string())
    }

    /// Get the inner string value.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Check whether a string is a valid module name without constructing one.
    #[must_use]
    pub fn is_valid(name: &str) -> bool {
        Self::validate(name).is_ok()
    }

    fn validate(name: &str) -> ManifestResult<()> {
        if name.is_empty() {
            return Err(ManifestError::InvalidName(
                "module name must not be empty".into(),
            ));
        }
        if name.len() > MAX_NAME_LEN {
            return Err(ManifestError::InvalidName(format!(
                "module name must be at most {MAX_NAME_LEN} characters, got {}",
                name.len()
            )));
        }
        if let Some(c) = name
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '@' | '/')))
        {
            return Err(ManifestError::InvalidName(format!(
                "module name contains invalid character {c:?}: {name}"
            )));
        }
        if name.starts_with('.') || name.starts_with('-') {
            return Err(ManifestError::InvalidName(format!(
                "module name must not start with '.' or '-', got: {name}"
            )));
        }
        Ok(())
    }
}

impl fmt::Display for ModuleName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ModuleName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::borrow::Borrow<str> for ModuleName {
    fn borrow(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_module_names() {
        assert!(ModuleName::new("notification-panel").is_ok());
        assert!(ModuleName::new("@shop/cart").is_ok());
        assert!(ModuleName::new("mfe_vue.v2").is_ok());
        assert!(ModuleName::new("x").is_ok());
    }

    #[test]
    fn test_invalid_module_names() {
        // Empty
        assert!(ModuleName::new("").is_err());
        // Spaces
        assert!(ModuleName::new("my module").is_err());
        // Leading dot / hyphen
        assert!(ModuleName::new(".hidden").is_err());
        assert!(ModuleName::new("-dash").is_err());
        // Path-ish characters
        assert!(ModuleName::new("..\\evil").is_err());
        // Too long
        assert!(ModuleName::new("a".repeat(MAX_NAME_LEN + 1)).is_err());
    }

    #[test]
    fn test_deserialize_rejects_invalid_name() {
        let ok: Result<ModuleName, _> = serde_json::from_str("\"cart\"");
        assert_eq!(ok.unwrap().as_str(), "cart");

        let bad: Result<ModuleName, _> = serde_json::from_str("\"has space\"");
        assert!(bad.is_err());
    }

    #[test]
    fn test_display_and_borrow() {
        let name = ModuleName::new("header").unwrap();
        assert_eq!(name.to_string(), "header");
        let set: std::collections::HashSet<ModuleName> = [name].into_iter().collect();
        assert!(set.contains("header"));
    }
}
