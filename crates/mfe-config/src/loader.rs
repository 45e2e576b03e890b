//! Layered configuration loading.
//!
//! 1. Parse the embedded `defaults.toml` → base
//! 2. Deep-merge the config file, if given and present
//! 3. Apply `MFE_*` env var fallbacks for fields the file did not set
//! 4. Deserialize the merged tree → [`HostConfig`]
//! 5. Validate

use std::collections::{BTreeSet, HashMap};
use std::path::Path;

use tracing::{debug, info};

use crate::env::{apply_env_fallbacks, collect_env_vars};
use crate::error::{ConfigError, ConfigResult};
use crate::types::HostConfig;
use crate::validate;

/// Embedded default configuration.
const DEFAULTS_TOML: &str = include_str!("defaults.toml");

/// Maximum allowed config file size (1 MB).
const MAX_CONFIG_FILE_SIZE: usize = 1_048_576;

/// Load configuration using the process environment.
///
/// # Errors
///
/// Returns a [`ConfigError`] if the file is malformed or the merged
/// configuration fails validation.
pub fn load(path: Option<&Path>) -> ConfigResult<HostConfig> {
    load_with_env(path, &collect_env_vars())
}

/// Load configuration with an explicit environment map.
///
/// # Errors
///
/// Returns a [`ConfigError`] if the file is malformed or the merged
/// configuration fails validation.
pub fn load_with_env<S: ::std::hash::BuildHasher>(
    path: Option<&Path>,
    env_vars: &HashMap<String, String, S>,
) -> ConfigResult<HostConfig> {
    let mut merged: toml::Value =
        toml::from_str(DEFAULTS_TOML).map_err(|e| ConfigError::ParseError {
            path: "<embedded defaults>".to_owned(),
            source: e,
        })?;

    let mut file_fields = BTreeSet::new();
    if let Some(path) = path
        && let Some(overlay) = try_load_file(path)?
    {
        collect_leaves(&overlay, "", &mut file_fields);
        deep_merge(&mut merged, overlay);
        info!(path = %path.display(), "loaded config file");
    }

    let env_count = apply_env_fallbacks(&mut merged, &file_fields, env_vars);
    if env_count > 0 {
        debug!(count = env_count, "applied environment variable fallbacks");
    }

    let config: HostConfig =
        merged
            .try_into()
            .map_err(|e: toml::de::Error| ConfigError::ParseError {
                path: "<merged config>".to_owned(),
                source: e,
            })?;

    validate::validate(&config)?;
    Ok(config)
}

/// Read a file, returning `None` if it doesn't exist.
fn try_load_file(path: &Path) -> ConfigResult<Option<toml::Value>> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "config file not found, skipping");
            return Ok(None);
        },
        Err(e) => {
            return Err(ConfigError::ReadError {
                path: path.display().to_string(),
                source: e,
            });
        },
    };

    if content.len() > MAX_CONFIG_FILE_SIZE {
        return Err(ConfigError::ValidationError {
            field: path.display().to_string(),
            message: format!(
                "config file is {} bytes, exceeding the {MAX_CONFIG_FILE_SIZE} byte limit",
                content.len()
            ),
        });
    }

    let value: toml::Value = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
        path: path.display().to_string(),
        source: e,
    })?;
    Ok(Some(value))
}

/// Merge `overlay` into `base`; tables merge recursively, anything else
/// replaces.
fn deep_merge(base: &mut toml::Value, overlay: toml::Value) {
    match (base, overlay) {
        (toml::Value::Table(base), toml::Value::Table(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(existing) => deep_merge(existing, value),
                    None => {
                        base.insert(key, value);
                    },
                }
            }
        },
        (base, overlay) => *base = overlay,
    }
}

/// Record the dotted path of every leaf in `val`.
fn collect_leaves(val: &toml::Value, prefix: &str, out: &mut BTreeSet<String>) {
    if let toml::Value::Table(table) = val {
        for (key, child) in table {
            let path = if prefix.is_empty() {
                key.clone()
            } else {
                format!("{prefix}.{key}")
            };
            collect_leaves(child, &path, out);
        }
    } else {
        out.insert(prefix.to_owned());
    }
}
