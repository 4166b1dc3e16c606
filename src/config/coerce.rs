// schemarestore/src/config/coerce.rs
//! Normalization for loosely-typed config scalars.
//!
//! Hand-edited config files arrive with `"fail_fast": "yes"`,
//! `"max_retry_passes": "10"` or numeric 0/1 booleans. The accepted
//! spellings are enumerated here once, at the boundary; everything
//! downstream only ever sees the typed values.

use anyhow::{bail, Result};
use serde_json::Value;

/// Accepted spellings: JSON true/false, numeric 0/1, and the strings
/// "true"/"false", "yes"/"no", "on"/"off", "1"/"0" (case-insensitive).
pub fn coerce_bool(field: &str, value: &Value) -> Result<bool> {
    match value {
        Value::Bool(b) => Ok(*b),
        Value::Number(n) => match n.as_i64() {
            Some(0) => Ok(false),
            Some(1) => Ok(true),
            _ => bail!("'{}' must be a boolean, got number {}", field, n),
        },
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" | "on" | "1" => Ok(true),
            "false" | "no" | "off" | "0" => Ok(false),
            _ => bail!("'{}' must be a boolean, got \"{}\"", field, s),
        },
        other => bail!("'{}' must be a boolean, got {}", field, other),
    }
}

/// Accepted spellings: non-negative JSON integers and decimal digit strings.
pub fn coerce_u32(field: &str, value: &Value) -> Result<u32> {
    match value {
        Value::Number(n) => {
            let wide = n
                .as_u64()
                .ok_or_else(|| anyhow::anyhow!("'{}' must be a non-negative integer, got {}", field, n))?;
            u32::try_from(wide)
                .map_err(|_| anyhow::anyhow!("'{}' is out of range: {}", field, wide))
        }
        Value::String(s) => s
            .trim()
            .parse::<u32>()
            .map_err(|_| anyhow::anyhow!("'{}' must be a non-negative integer, got \"{}\"", field, s)),
        other => bail!("'{}' must be a non-negative integer, got {}", field, other),
    }
}

/// An array whose elements each satisfy [`coerce_u32`]. Used for
/// `retryable_error_numbers`.
pub fn coerce_u32_list(field: &str, value: &Value) -> Result<Vec<u32>> {
    match value {
        Value::Array(items) => items.iter().map(|item| coerce_u32(field, item)).collect(),
        other => bail!("'{}' must be an array of error numbers, got {}", field, other),
    }
}
