//! Typed environment variable lookups
//!
//! Values are read after loading an optional `.env` file from the working
//! directory. Unset variables yield `None`; set but unparsable variables are
//! reported as [`CommonError::InvalidEnv`] instead of silently falling back.

use crate::error::{CommonError, Result};
use std::str::FromStr;
use std::sync::Once;

static DOTENV: Once = Once::new();

/// Load `.env` once per process. Missing files are fine.
pub fn load_dotenv() {
    DOTENV.call_once(|| {
        if let Ok(path) = dotenvy::dotenv() {
            tracing::debug!(path = %path.display(), "Loaded environment file");
        }
    });
}

/// Read a string variable. Empty values count as unset.
pub fn var(key: &str) -> Option<String> {
    match std::env::var(key) {
        Ok(value) if !value.trim().is_empty() => Some(value),
        _ => None,
    }
}

/// Read and parse a variable.
pub fn parse<T>(key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match var(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| CommonError::InvalidEnv {
                key: key.to_string(),
                value: raw.clone(),
                reason: e.to_string(),
            }),
    }
}

/// Read a boolean flag. Accepts `true/false`, `1/0`, `yes/no`, `on/off`.
pub fn flag(key: &str) -> Result<Option<bool>> {
    let Some(raw) = var(key) else {
        return Ok(None);
    };

    match raw.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(Some(true)),
        "false" | "0" | "no" | "off" => Ok(Some(false)),
        _ => Err(CommonError::InvalidEnv {
            key: key.to_string(),
            value: raw,
            reason: "expected a boolean".to_string(),
        }),
    }
}
