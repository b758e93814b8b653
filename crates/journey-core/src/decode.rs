//! Field-by-field readers for tolerant record decoding.
//!
//! Stored and in-flight records may come from older or newer library
//! versions. Every reader returns `None` when the field is missing or has an
//! unexpected shape so the caller can substitute its own default.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use thiserror::Error;

/// Decoding errors.
///
/// Only malformed JSON text is an error; any well-formed value decodes.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Parses JSON text, treating any non-object value as an empty object.
pub(crate) fn parse_object(json: &str) -> Result<Map<String, Value>, DecodeError> {
    Ok(into_object(serde_json::from_str(json)?))
}

pub(crate) fn into_object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

pub(crate) fn string(obj: &Map<String, Value>, key: &str) -> Option<String> {
    obj.get(key).and_then(Value::as_str).map(str::to_string)
}

pub(crate) fn boolean(obj: &Map<String, Value>, key: &str) -> Option<bool> {
    obj.get(key).and_then(Value::as_bool)
}

pub(crate) fn timestamp(obj: &Map<String, Value>, key: &str) -> Option<DateTime<Utc>> {
    obj.get(key)
        .and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

pub(crate) fn unsigned(obj: &Map<String, Value>, key: &str) -> Option<u32> {
    obj.get(key)
        .and_then(Value::as_u64)
        .and_then(|n| u32::try_from(n).ok())
}

/// Reads a `name -> count` object, skipping entries that are not counts.
pub(crate) fn tally(obj: &Map<String, Value>, key: &str) -> Option<BTreeMap<String, u64>> {
    let entries = obj.get(key)?.as_object()?;
    Some(
        entries
            .iter()
            .filter_map(|(name, count)| count.as_u64().map(|count| (name.clone(), count)))
            .collect(),
    )
}

/// Reads an array of strings, skipping entries that are not strings.
pub(crate) fn strings(obj: &Map<String, Value>, key: &str) -> Option<Vec<String>> {
    let items = obj.get(key)?.as_array()?;
    Some(
        items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
    )
}
