//! Post-merge configuration validation.

use crate::error::{ConfigError, ConfigResult};
use crate::types::HostConfig;

/// Longest accepted load window (10 minutes).
const MAX_LOAD_TIMEOUT_MS: u64 = 600_000;

/// Most automatic retries accepted.
const MAX_RETRIES: u32 = 20;

/// Validate a fully-merged configuration.
///
/// # Errors
///
/// Returns the first validation error found.
pub fn validate(config: &HostConfig) -> ConfigResult<()> {
    validate_host(config)?;
    validate_registry(config)?;
    validate_loader(config)?;
    validate_logging(config)?;
    Ok(())
}

fn validate_host(config: &HostConfig) -> ConfigResult<()> {
    let h = &config.host;

    semver::Version::parse(&h.version).map_err(|e| {
        ConfigError::validation("host.version", format!("'{}' is not a semantic version: {e}", h.version))
    })?;

    if !matches!(
        h.environment.to_ascii_lowercase().as_str(),
        "development" | "dev" | "production" | "prod"
    ) {
        return Err(ConfigError::validation(
            "host.environment",
            format!(
                "unsupported environment '{}'; expected development or production",
                h.environment
            ),
        ));
    }

    for (name, version) in &h.frameworks {
        semver::Version::parse(version).map_err(|e| {
            ConfigError::validation(
                &format!("host.frameworks.{name}"),
                format!("'{version}' is not a semantic version: {e}"),
            )
        })?;
    }

    Ok(())
}

fn validate_registry(config: &HostConfig) -> ConfigResult<()> {
    let r = &config.registry;

    if let Some(u) = &r.url {
        validate_url("registry.url", u)?;
    }
    if let Some(u) = &r.fallback_url {
        validate_url("registry.fallback_url", u)?;
    }
    if r.request_timeout_secs == 0 {
        return Err(ConfigError::validation(
            "registry.request_timeout_secs",
            "must be greater than 0",
        ));
    }
    if r.cache_ttl_secs == Some(0) {
        return Err(ConfigError::validation(
            "registry.cache_ttl_secs",
            "must be greater than 0; omit it to use the environment default",
        ));
    }
    Ok(())
}

fn validate_url(field: &str, raw: &str) -> ConfigResult<()> {
    let parsed = url::Url::parse(raw)
        .map_err(|e| ConfigError::validation(field, format!("'{raw}' is not a valid URL: {e}")))?;
    if !matches!(parsed.scheme(), "http" | "https" | "file") {
        return Err(ConfigError::validation(
            field,
            format!("unsupported URL scheme '{}'", parsed.scheme()),
        ));
    }
    Ok(())
}

fn validate_loader(config: &HostConfig) -> ConfigResult<()> {
    let l = &config.loader;

    if l.load_timeout_ms == 0 || l.load_timeout_ms > MAX_LOAD_TIMEOUT_MS {
        return Err(ConfigError::validation(
            "loader.load_timeout_ms",
            format!("must be between 1 and {MAX_LOAD_TIMEOUT_MS}"),
        ));
    }
    if l.max_retries > MAX_RETRIES {
        return Err(ConfigError::validation(
            "loader.max_retries",
            format!("must be at most {MAX_RETRIES}"),
        ));
    }
    Ok(())
}

fn validate_logging(config: &HostConfig) -> ConfigResult<()> {
    let l = &config.logging;

    if !matches!(
        l.level.to_ascii_lowercase().as_str(),
        "trace" | "debug" | "info" | "warn" | "error"
    ) {
        return Err(ConfigError::validation(
            "logging.level",
            format!("unsupported level '{}'", l.level),
        ));
    }
    if !matches!(l.format.as_str(), "pretty" | "compact" | "json" | "full") {
        return Err(ConfigError::validation(
            "logging.format",
            format!(
                "unsupported format '{}'; expected one of: pretty, compact, json, full",
                l.format
            ),
        ));
    }
    Ok(())
}
