//! Environment variable fallbacks.
//!
//! Env vars are **fallback**, not override: they only fill fields that no
//! config file set.

use std::collections::{BTreeSet, HashMap};

use tracing::debug;

/// Mapping from environment variable name to config field path.
struct EnvMapping {
    var_name: &'static str,
    field_path: &'static str,
}

/// All supported `MFE_*` env var mappings.
const ENV_MAPPINGS: &[EnvMapping] = &[
    EnvMapping {
        var_name: "MFE_ENV",
        field_path: "host.environment",
    },
    EnvMapping {
        var_name: "MFE_REGISTRY_URL",
        field_path: "registry.url",
    },
    EnvMapping {
        var_name: "MFE_REGISTRY_FALLBACK_URL",
        field_path: "registry.fallback_url",
    },
    EnvMapping {
        var_name: "MFE_LOG_LEVEL",
        field_path: "logging.level",
    },
];

/// Collect the process environment.
#[must_use]
pub fn collect_env_vars() -> HashMap<String, String> {
    std::env::vars().collect()
}

/// Apply env var fallbacks to fields not present in `file_fields`.
///
/// Returns the number of env vars applied.
pub fn apply_env_fallbacks<S: ::std::hash::BuildHasher>(
    merged: &mut toml::Value,
    file_fields: &BTreeSet<String>,
    env_vars: &HashMap<String, String, S>,
) -> usize {
    let mut count: usize = 0;

    for mapping in ENV_MAPPINGS {
        if file_fields.contains(mapping.field_path) {
            continue;
        }
        let Some(val) = env_vars.get(mapping.var_name) else {
            continue;
        };
        if val.trim().is_empty() {
            continue;
        }

        debug!(
            var = mapping.var_name,
            field = mapping.field_path,
            "applying env var fallback"
        );
        set_string_field(merged, mapping.field_path, val.trim());
        count = count.saturating_add(1);
    }

    count
}

/// Set a dotted string field, creating intermediate tables.
fn set_string_field(root: &mut toml::Value, path: &str, val: &str) {
    let mut current = root;
    let mut segments = path.split('.').peekable();
    while let Some(segment) = segments.next() {
        let toml::Value::Table(table) = current else {
            return;
        };
        if segments.peek().is_none() {
            table.insert(segment.to_owned(), toml::Value::String(val.to_owned()));
            return;
        }
        current = table
            .entry(segment.to_owned())
            .or_insert_with(|| toml::Value::Table(toml::map::Map::new()));
    }
}
