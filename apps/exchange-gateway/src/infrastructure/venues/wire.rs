//! Lenient accessors over venue JSON.
//!
//! Venues disagree on whether numbers travel as JSON numbers or strings and
//! on timestamp units; every parser goes through these helpers.

use serde_json::Value;
use thiserror::Error;

use crate::domain::canonical::PriceLevel;
use crate::domain::shared::{normalize_epoch_micros, parse_epoch_micros};
use crate::error::GatewayError;

/// Wire decoding errors.
#[derive(Debug, Error)]
pub enum ParseError {
    /// Frame is not JSON.
    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),

    /// Required field absent.
    #[error("missing field `{0}`")]
    MissingField(&'static str),

    /// Field present but unusable.
    #[error("invalid value for `{field}`: {value}")]
    InvalidField {
        /// Field name.
        field: &'static str,
        /// Offending value.
        value: String,
    },

    /// Well-formed but not something this adapter handles.
    #[error("unsupported message: {0}")]
    Unsupported(String),
}

impl From<ParseError> for GatewayError {
    fn from(err: ParseError) -> Self {
        Self::api(err.to_string())
    }
}

/// Number or numeric string.
#[must_use]
pub fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
    .filter(|v| v.is_finite())
}

/// First present key among `keys`.
#[must_use]
pub fn pick<'a>(raw: &'a Value, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().find_map(|k| raw.get(*k).filter(|v| !v.is_null()))
}

/// Optional numeric field.
#[must_use]
pub fn opt_f64(raw: &Value, keys: &[&str]) -> Option<f64> {
    pick(raw, keys).and_then(as_f64)
}

/// Required numeric field.
///
/// # Errors
///
/// Returns an error when absent or not numeric.
pub fn req_f64(raw: &Value, field: &'static str, keys: &[&str]) -> Result<f64, ParseError> {
    let value = pick(raw, keys).ok_or(ParseError::MissingField(field))?;
    as_f64(value).ok_or_else(|| ParseError::InvalidField {
        field,
        value: value.to_string(),
    })
}

/// Optional string field; numbers are rendered.
#[must_use]
pub fn opt_string(raw: &Value, keys: &[&str]) -> Option<String> {
    match pick(raw, keys)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Required string field.
///
/// # Errors
///
/// Returns an error when absent or empty.
pub fn req_string(raw: &Value, field: &'static str, keys: &[&str]) -> Result<String, ParseError> {
    opt_string(raw, keys).ok_or(ParseError::MissingField(field))
}

/// Optional epoch timestamp in microseconds, from ms or ns, number or string.
#[must_use]
pub fn opt_timestamp(raw: &Value, keys: &[&str]) -> Option<i64> {
    match pick(raw, keys)? {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_u64().and_then(|u| i64::try_from(u).ok()))
            .map(normalize_epoch_micros),
        Value::String(s) => parse_epoch_micros(s),
        _ => None,
    }
}

/// Optional boolean field.
#[must_use]
pub fn opt_bool(raw: &Value, keys: &[&str]) -> Option<bool> {
    pick(raw, keys).and_then(Value::as_bool)
}

/// First element of an array field, or the field itself.
#[must_use]
pub fn first_of(value: &Value) -> &Value {
    value.as_array().and_then(|a| a.first()).unwrap_or(value)
}

/// Book side from `[[price, qty], ...]`, `[["new", price, qty], ...]` or
/// `[{"price","size"}, ...]`.
///
/// # Errors
///
/// Returns an error when the field is not an array or a level is malformed.
pub fn price_levels(raw: &Value, field: &'static str) -> Result<Vec<PriceLevel>, ParseError> {
    let Some(levels) = raw.get(field) else {
        return Ok(Vec::new());
    };
    let levels = levels.as_array().ok_or_else(|| ParseError::InvalidField {
        field,
        value: levels.to_string(),
    })?;

    levels
        .iter()
        .map(|level| {
            let parsed = match level {
                Value::Array(items) => {
                    let numeric: Vec<f64> = items.iter().filter_map(as_f64).collect();
                    match numeric.as_slice() {
                        [price, qty, ..] => Some(PriceLevel {
                            price: *price,
                            qty: *qty,
                        }),
                        _ => None,
                    }
                }
                Value::Object(_) => opt_f64(level, &["price", "p"])
                    .zip(opt_f64(level, &["size", "qty", "amount", "s"]))
                    .map(|(price, qty)| PriceLevel { price, qty }),
                _ => None,
            };
            parsed.ok_or_else(|| ParseError::InvalidField {
                field,
                value: level.to_string(),
            })
        })
        .collect()
}
