//! Deployment environment of a host.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ManifestError;

/// Where the host runs.
///
/// Development hosts use a short registry cache TTL and allow the
/// "load anyway" override for incompatible modules; production hosts do not.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    /// Local and staging builds.
    Development,
    /// Production builds.
    #[default]
    Production,
}

impl Environment {
    /// Whether this is [`Environment::Development`].
    #[must_use]
    pub fn is_development(self) -> bool {
        self == Self::Development
    }

    /// Lowercase name as used in config files and registry documents.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Production => "production",
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Environment {
    type Err = ManifestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(Self::Development),
            "production" | "prod" => Ok(Self::Production),
            other => Err(ManifestError::InvalidEnvironment(other.to_string())),
        }
    }
}
