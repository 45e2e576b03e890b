//! Configuration types for the MFE host.
//!
//! The types here mirror domain settings without depending on the runtime
//! crates; conversion happens at the integration boundary. Every struct
//! implements [`Default`] with the same values as the embedded
//! `defaults.toml`, so a bare `[section]` header is a working configuration.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Root configuration for an MFE host.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Host identity and capabilities.
    pub host: HostSection,
    /// Module directory location and caching.
    pub registry: RegistrySection,
    /// Retry and timeout policy for module loads.
    pub loader: LoaderSection,
    /// Logging level, format and per-crate directives.
    pub logging: LoggingSection,
}

// ---------------------------------------------------------------------------
// HostSection
// ---------------------------------------------------------------------------

/// Host identity as seen by the compatibility checker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostSection {
    /// Semantic version of the host ("container").
    pub version: String,
    /// `"development"` or `"production"` (`"dev"`/`"prod"` accepted).
    pub environment: String,
    /// Framework versions supplied to modules (e.g. `react = "18.2.0"`).
    pub frameworks: BTreeMap<String, String>,
    /// Known browser versions, if the host is embedded in one.
    pub browsers: BTreeMap<String, String>,
}

impl Default for HostSection {
    fn default() -> Self {
        Self {
            version: "1.0.0".to_owned(),
            environment: "production".to_owned(),
            frameworks: BTreeMap::new(),
            browsers: BTreeMap::new(),
        }
    }
}

impl HostSection {
    /// Whether the environment names a development build.
    #[must_use]
    pub fn is_development(&self) -> bool {
        matches!(
            self.environment.to_ascii_lowercase().as_str(),
            "development" | "dev"
        )
    }
}

// ---------------------------------------------------------------------------
// RegistrySection
// ---------------------------------------------------------------------------

/// Where the module directory lives and how it is cached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistrySection {
    /// Primary directory URL.
    pub url: Option<String>,
    /// Tried once when the primary fails.
    pub fallback_url: Option<String>,
    /// Cache TTL override in seconds. `None` uses the environment policy
    /// (5 minutes in development, 1 hour in production).
    pub cache_ttl_secs: Option<u64>,
    /// JSON file backing the persistent cache. `None` keeps it in memory.
    pub cache_path: Option<PathBuf>,
    /// HTTP request timeout in seconds.
    pub request_timeout_secs: u64,
}

impl Default for RegistrySection {
    fn default() -> Self {
        Self {
            url: None,
            fallback_url: None,
            cache_ttl_secs: None,
            cache_path: None,
            request_timeout_secs: 30,
        }
    }
}

impl RegistrySection {
    /// Cache TTL override.
    #[must_use]
    pub fn cache_ttl(&self) -> Option<Duration> {
        self.cache_ttl_secs.map(Duration::from_secs)
    }

    /// HTTP request timeout.
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

// ---------------------------------------------------------------------------
// LoaderSection
// ---------------------------------------------------------------------------

/// Retry and timeout policy for module loads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderSection {
    /// Automatic retries after the first failed attempt.
    pub max_retries: u32,
    /// Delay between attempts in milliseconds.
    pub retry_delay_ms: u64,
    /// Deadline for one load attempt in milliseconds.
    pub load_timeout_ms: u64,
}

impl Default for LoaderSection {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay_ms: 1000,
            load_timeout_ms: 30_000,
        }
    }
}

impl LoaderSection {
    /// Delay between attempts.
    #[must_use]
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    /// Load window.
    #[must_use]
    pub fn load_timeout(&self) -> Duration {
        Duration::from_millis(self.load_timeout_ms)
    }
}

// ---------------------------------------------------------------------------
// LoggingSection
// ---------------------------------------------------------------------------

/// Logging and tracing configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    /// Global log level filter (`"trace"`, `"debug"`, `"info"`, `"warn"`,
    /// `"error"`).
    pub level: String,
    /// Output format: `"pretty"`, `"compact"`, `"json"` or `"full"`.
    pub format: String,
    /// Per-crate tracing directives (e.g. `["mfe_runtime=debug"]`).
    pub directives: Vec<String>,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".to_owned(),
            format: "compact".to_owned(),
            directives: Vec::new(),
        }
    }
}
