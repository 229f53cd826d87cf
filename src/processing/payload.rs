//! Total functions over dynamic JSON payloads
//!
//! Payloads are untyped JSON objects; every extractor here returns a typed
//! error on missing, empty or wrongly-typed fields instead of panicking.

use crate::entity::Payload;
use chrono::{DateTime, Utc};
use serde_json::Value;
use thiserror::Error;

/// Field extraction failure.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FieldError {
    /// The key is absent from the payload
    #[error("missing key {0:?}")]
    Missing(String),
    /// The value under the key has an unexpected JSON type
    #[error("field {0:?} was not the expected type")]
    InvalidType(String),
    /// The value is present but empty
    #[error("empty value for {0:?}")]
    Empty(String),
}

/// Date validation failure.
#[derive(Debug, Error)]
pub enum DateError {
    /// The string does not end with the mandatory `Z` suffix
    #[error("date {0:?} is not an UTC timestamp (missing Z suffix)")]
    MissingUtcSuffix(String),
    /// The string does not use `T` between date and time
    #[error("date {0:?} does not separate date and time with T")]
    InvalidSeparator(String),
    /// The remainder failed RFC 3339 parsing
    #[error("failed to parse date: {0}")]
    Unparsable(#[from] chrono::ParseError),
}

/// Extract a non-empty string field.
pub fn extract_string<'a>(payload: &'a Payload, key: &str) -> Result<&'a str, FieldError> {
    let value = payload
        .get(key)
        .ok_or_else(|| FieldError::Missing(key.to_string()))?;

    let ret = value
        .as_str()
        .ok_or_else(|| FieldError::InvalidType(key.to_string()))?;

    if ret.is_empty() {
        return Err(FieldError::Empty(key.to_string()));
    }

    Ok(ret)
}

/// Shallow-copy a payload. Mutations on the copy never touch the original,
/// which the content hashes are computed over.
pub fn copy_payload(payload: &Payload) -> Payload {
    payload.clone()
}

/// Anonymize a string field: absent or empty values hash to the empty
/// string, anything non-string is an error.
pub fn hash_value(payload: &Payload, key: &str) -> Result<String, FieldError> {
    match payload.get(key) {
        None => Ok(String::new()),
        Some(Value::String(s)) if s.is_empty() => Ok(String::new()),
        Some(Value::String(s)) => Ok(md5_hex(s.as_bytes())),
        Some(_) => Err(FieldError::InvalidType(key.to_string())),
    }
}

/// Deterministic content hash of a payload: MD5 over its key-sorted JSON
/// serialization.
pub fn hash_payload(payload: &Payload) -> serde_json::Result<String> {
    let bytes = serde_json::to_vec(payload)?;

    Ok(md5_hex(&bytes))
}

/// Lowercase hex MD5 digest.
pub fn md5_hex(data: &[u8]) -> String {
    format!("{:x}", md5::compute(data))
}

/// Parse a `YYYY-MM-DDTHH:MM:SS[.fraction]Z` timestamp.
///
/// Accepts 0 to 9 fractional digits. The year must have four digits, the
/// separator must be `T` and the `Z` suffix is mandatory.
pub fn validate_date(date: &str) -> Result<DateTime<Utc>, DateError> {
    if !date.ends_with('Z') {
        return Err(DateError::MissingUtcSuffix(date.to_string()));
    }

    if date.as_bytes().get(10) != Some(&b'T') {
        return Err(DateError::InvalidSeparator(date.to_string()));
    }

    let parsed = DateTime::parse_from_rfc3339(date)?;

    Ok(parsed.with_timezone(&Utc))
}

/// Canonical date format emitted by the pipeline: microsecond precision,
/// zero-padded, sub-microsecond digits truncated.
pub fn format_date(date: DateTime<Utc>) -> String {
    date.format("%Y-%m-%dT%H:%M:%S%.6fZ").to_string()
}
