/// Helpers for reading settings from an environment-like source.
///
/// Settings are read through a lookup function instead of `std::env` directly
/// so the same parsing code serves the process environment and test maps.

use std::str::FromStr;

use crate::core::error::ConfigError;

/// Get a value with a default fallback. Empty strings count as unset.
pub fn get_or<F>(lookup: &F, key: &str, default: &str) -> String
where
    F: Fn(&str) -> Option<String>,
{
    get_opt(lookup, key).unwrap_or_else(|| default.to_string())
}

/// Get an optional value. Empty and whitespace-only strings count as unset.
pub fn get_opt<F>(lookup: &F, key: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Parse a value with `FromStr`, falling back to `default` when unset.
///
/// A value that is set but does not parse is a configuration error rather
/// than a silent fallback.
pub fn get_parsed<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match get_opt(lookup, key) {
        None => Ok(default),
        Some(raw) => raw.parse::<T>().map_err(|e| ConfigError::Invalid {
            key,
            value: raw.clone(),
            reason: e.to_string(),
        }),
    }
}

/// Split a comma separated list, dropping empty entries.
pub fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
