//! ==============================================================================
//! ingest.rs - form validation pipeline
//! ==============================================================================
//!
//! purpose:
//!     turns an untyped form post from a sensor into a `Reading`.
//!     urlencoded bodies are decoded here. multipart bodies are split into
//!     pairs by server.rs and enter at `extract_pairs`.
//!
//! pipeline (strictly linear, one pass per request):
//!
//! ```text
//!     raw body ──► extract ──► validate ──► parse timestamp ──► coerce ──► Reading
//!                    │            │               │                │
//!                    ▼            ▼               ▼                ▼
//!               Malformed    MissingField    BadTimestamp    BadNumericValue
//! ```
//!
//! every stage is pure. the only side effect (the sink write) happens in
//! server.rs once a `Reading` exists.
//!
//! relationships:
//!     - used by: server.rs (the /data handler)
//!     - uses: domain.rs (field list, Reading), timestamp.rs (date parsing)
//!
//! ==============================================================================

use crate::domain::{self, Reading, FIELDS};
use crate::sink::SinkError;
use crate::timestamp;

use serde::Deserialize;
use std::collections::BTreeMap;

/// Reasons a post is turned away.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("Method not supported")]
    MethodNotAllowed,

    /// carries the decoder's complaint for the logs; callers only see the summary
    #[error("Could not parse form data")]
    MalformedRequest(String),

    #[error("Missing one or more values, including {0}")]
    MissingField(String),

    #[error("Bad date {0}")]
    BadTimestamp(String),

    #[error("Bad value {raw} for key {key}")]
    BadNumericValue { key: String, raw: String },

    #[error("Storage write failed: {0}")]
    StorageWriteFailed(#[from] SinkError),

    /// every problem found in `collect` mode
    #[error("{}", join_messages(.0))]
    Invalid(Vec<IngestError>),
}

fn join_messages(errors: &[IngestError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// How many problems a rejected post reports.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationMode {
    /// stop at the first missing or bad field
    #[default]
    FirstError,
    /// report every missing or bad field at once
    Collect,
}

/// raw string value for every expected field; missing keys map to ""
pub type RawFields = BTreeMap<&'static str, String>;

// ==============================================================================
// extract
// ==============================================================================

/// Pull the expected fields out of a form-encoded body and optional query.
///
/// Body values win over query values and the first occurrence of a repeated
/// key wins, the same way a browser-style `FormValue` lookup behaves.
pub fn extract(body: &[u8], query: Option<&str>) -> Result<RawFields, IngestError> {
    extract_pairs(decode_form(body)?, query)
}

/// Same as [`extract`] for a body that was already split into pairs
/// (multipart forms).
pub fn extract_pairs(
    body_pairs: Vec<(String, String)>,
    query: Option<&str>,
) -> Result<RawFields, IngestError> {
    let query_pairs = match query {
        Some(q) => decode_form(q.as_bytes())?,
        None => Vec::new(),
    };

    let lookup = |name: &str| {
        body_pairs
            .iter()
            .chain(query_pairs.iter())
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.clone())
            .unwrap_or_default()
    };

    Ok(FIELDS.iter().map(|&name| (name, lookup(name))).collect())
}

/// Decode `application/x-www-form-urlencoded` text into ordered pairs.
///
/// The url decoder is lenient, so reject what a strict form parser would:
/// non-utf8 input and broken percent escapes.
pub fn decode_form(raw: &[u8]) -> Result<Vec<(String, String)>, IngestError> {
    let text = std::str::from_utf8(raw)
        .map_err(|e| IngestError::MalformedRequest(e.to_string()))?;

    for (i, _) in text.match_indices('%') {
        let escape = text.as_bytes().get(i + 1..i + 3);
        if !matches!(escape, Some(hex) if hex.iter().all(u8::is_ascii_hexdigit)) {
            return Err(IngestError::MalformedRequest(format!(
                "invalid percent escape at byte {i}"
            )));
        }
    }

    serde_urlencoded::from_str(text).map_err(|e| IngestError::MalformedRequest(e.to_string()))
}

// ==============================================================================
// validate
// ==============================================================================

/// Every field must carry a non-empty value, and the sensor name and id
/// must fit on one line-protocol line.
pub fn validate(fields: &RawFields, mode: ValidationMode) -> Result<(), IngestError> {
    let missing = FIELDS
        .iter()
        .filter(|name| fields.get(*name).map_or(true, |v| v.is_empty()))
        .map(|name| IngestError::MissingField(name.to_string()));
    let broken = [domain::SENSOR_NAME, domain::SENSOR_ID]
        .into_iter()
        .filter(|name| fields.get(name).is_some_and(|v| v.contains(['\n', '\r'])))
        .map(|name| IngestError::MalformedRequest(format!("line break in {name}")));
    let mut problems = missing.chain(broken);

    match mode {
        ValidationMode::FirstError => problems.next().map_or(Ok(()), Err),
        ValidationMode::Collect => collapse(problems.collect()),
    }
}

// ==============================================================================
// coerce
// ==============================================================================

/// Parse every non-identity field as a finite `f64`.
pub fn coerce(
    fields: &RawFields,
    mode: ValidationMode,
) -> Result<BTreeMap<String, f64>, IngestError> {
    let mut measurements = BTreeMap::new();
    let mut errors = Vec::new();

    for &key in FIELDS.iter().filter(|k| !domain::is_identity(k)) {
        let Some(raw) = fields.get(key) else {
            continue;
        };
        match raw.parse::<f64>() {
            Ok(value) if value.is_finite() => {
                measurements.insert(key.to_string(), value);
            }
            _ => {
                let err = IngestError::BadNumericValue {
                    key: key.to_string(),
                    raw: raw.clone(),
                };
                if mode == ValidationMode::FirstError {
                    return Err(err);
                }
                errors.push(err);
            }
        }
    }

    collapse(errors).map(|()| measurements)
}

fn collapse(mut errors: Vec<IngestError>) -> Result<(), IngestError> {
    match errors.len() {
        0 => Ok(()),
        1 => Err(errors.remove(0)),
        _ => Err(IngestError::Invalid(errors)),
    }
}

// ==============================================================================
// pipeline
// ==============================================================================

/// Run extract → validate → parse timestamp → coerce over one form-encoded post.
pub fn parse_reading(
    body: &[u8],
    query: Option<&str>,
    mode: ValidationMode,
) -> Result<Reading, IngestError> {
    build_reading(extract(body, query)?, mode)
}

/// [`parse_reading`] for a body that was already split into pairs.
pub fn parse_pairs(
    body_pairs: Vec<(String, String)>,
    query: Option<&str>,
    mode: ValidationMode,
) -> Result<Reading, IngestError> {
    build_reading(extract_pairs(body_pairs, query)?, mode)
}

fn build_reading(fields: RawFields, mode: ValidationMode) -> Result<Reading, IngestError> {
    let field = |name: &str| fields.get(name).cloned().unwrap_or_default();

    match mode {
        ValidationMode::FirstError => {
            validate(&fields, mode)?;
            let timestamp = parse_timestamp(&field(domain::TIMESTAMP))?;
            let measurements = coerce(&fields, mode)?;
            Ok(Reading {
                timestamp,
                sensor_name: field(domain::SENSOR_NAME),
                sensor_id: field(domain::SENSOR_ID),
                measurements,
            })
        }
        ValidationMode::Collect => {
            let mut errors = Vec::new();
            if let Err(e) = validate(&fields, mode) {
                flatten_into(&mut errors, e);
            }
            // empty values were already reported as missing
            let non_empty: RawFields = fields
                .iter()
                .filter(|(_, v)| !v.is_empty())
                .map(|(k, v)| (*k, v.clone()))
                .collect();

            let raw_ts = field(domain::TIMESTAMP);
            let timestamp = if raw_ts.is_empty() {
                None
            } else {
                parse_timestamp(&raw_ts)
                    .map_err(|e| errors.push(e))
                    .ok()
            };
            let measurements = coerce(&non_empty, mode)
                .map_err(|e| flatten_into(&mut errors, e))
                .ok();

            collapse(errors)?;
            let timestamp = timestamp
                .ok_or_else(|| IngestError::MissingField(domain::TIMESTAMP.to_string()))?;
            Ok(Reading {
                timestamp,
                sensor_name: field(domain::SENSOR_NAME),
                sensor_id: field(domain::SENSOR_ID),
                measurements: measurements.unwrap_or_default(),
            })
        }
    }
}

/// Only instants that fit in i64 nanoseconds (1677-09-21 to 2262-04-11)
/// can be stored, so anything outside that range is a bad date too.
fn parse_timestamp(raw: &str) -> Result<chrono::DateTime<chrono::Utc>, IngestError> {
    timestamp::parse_any(raw)
        .filter(|ts| ts.timestamp_nanos_opt().is_some())
        .ok_or_else(|| IngestError::BadTimestamp(raw.to_string()))
}

fn flatten_into(errors: &mut Vec<IngestError>, err: IngestError) {
    match err {
        IngestError::Invalid(inner) => errors.extend(inner),
        other => errors.push(other),
    }
}
