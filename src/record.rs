//! Record transformation module
//!
//! This module handles everything applied to a flattened record between
//! buffering and the batch file:
//! - Primary key strings used to collapse records within a batch
//! - Metadata columns (`_sdc_extracted_at`, `_sdc_batched_at`, `_sdc_deleted_at`)
//! - Rendering one delimited line per record, with temporal coercion

use crate::column_type::{column_type, ColumnType};
use crate::error::{SinkError, SinkResult};
use crate::flatten::{FlatRecord, FlatSchema};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, SecondsFormat, Utc};
use serde_json::{json, Value};

pub const EXTRACTED_AT_COLUMN: &str = "_sdc_extracted_at";
pub const BATCHED_AT_COLUMN: &str = "_sdc_batched_at";
pub const DELETED_AT_COLUMN: &str = "_sdc_deleted_at";

const MAX_TIMESTAMP: &str = "9999-12-31 23:59:59.999999";
const MAX_DATE: &str = "9999-12-31";
const MAX_TIME: &str = "23:59:59";

/// Comma-joined key property values, or `None` when a key property is missing
///
/// Callers handle streams without key properties before calling this.
pub fn primary_key_string(record: &FlatRecord, key_properties: &[String]) -> Option<String> {
    let values: Option<Vec<String>> = key_properties
        .iter()
        .map(|key| {
            record.get(key).map(|value| match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
        })
        .collect();
    values.map(|v| v.join(","))
}

/// Append the metadata column declarations to a flattened schema
pub fn add_metadata_columns(schema: &mut FlatSchema) {
    schema.insert(
        EXTRACTED_AT_COLUMN.to_string(),
        json!({"type": ["null", "string"], "format": "date-time"}),
    );
    schema.insert(
        BATCHED_AT_COLUMN.to_string(),
        json!({"type": ["null", "string"], "format": "date-time"}),
    );
    schema.insert(
        DELETED_AT_COLUMN.to_string(),
        json!({"type": ["null", "string"], "format": "date-time"}),
    );
}

/// Set the metadata column values of a flattened record
///
/// `_sdc_deleted_at` is taken from the record itself and left untouched.
pub fn add_metadata_values(
    record: &mut FlatRecord,
    time_extracted: Option<DateTime<Utc>>,
    batched_at: DateTime<Utc>,
) {
    match time_extracted {
        Some(extracted) => {
            record.insert(
                EXTRACTED_AT_COLUMN.to_string(),
                Value::String(extracted.to_rfc3339_opts(SecondsFormat::Micros, true)),
            );
        }
        None => {
            record.shift_remove(EXTRACTED_AT_COLUMN);
        }
    }
    record.insert(
        BATCHED_AT_COLUMN.to_string(),
        Value::String(batched_at.to_rfc3339_opts(SecondsFormat::Micros, true)),
    );
}

/// Whether the record carries a delete intent
pub fn is_delete_marked(record: &FlatRecord) -> bool {
    record
        .get(DELETED_AT_COLUMN)
        .map_or(false, |v| !v.is_null())
}

/// Render one delimited line in schema column order
///
/// Absent columns become empty fields; present values are JSON encoded so
/// strings are quoted and numbers/booleans are bare.
pub fn record_to_line(record: &FlatRecord, schema: &FlatSchema) -> SinkResult<String> {
    let mut fields = Vec::with_capacity(schema.len());

    for (column, property) in schema {
        let field = match record.get(column) {
            None | Some(Value::Null) => String::new(),
            Some(value) => {
                let format = property.get("format").and_then(Value::as_str);
                match (column_type(property), format) {
                    (ColumnType::Timestamp, Some("time")) => {
                        json_string(&coerce_time(column, value)?)
                    }
                    (ColumnType::Timestamp, _) => json_string(&coerce_timestamp(column, value)?),
                    (ColumnType::Date, _) => json_string(&coerce_date(column, value)?),
                    _ => value.to_string(),
                }
            }
        };
        fields.push(field);
    }

    Ok(fields.join(","))
}

fn json_string(s: &str) -> String {
    Value::String(s.to_string()).to_string()
}

fn temporal_str<'a>(column: &str, value: &'a Value) -> SinkResult<&'a str> {
    value.as_str().ok_or_else(|| {
        SinkError::unexpected_value(
            column,
            format!("value {} is neither string nor null", value),
        )
    })
}

/// Year of an ISO-like date prefix, when it has more than four digits
fn oversized_year(s: &str) -> bool {
    let digits: String = s.trim().chars().take_while(char::is_ascii_digit).collect();
    digits.len() > 4 && s.trim()[digits.len()..].starts_with('-')
}

fn coerce_timestamp(column: &str, value: &Value) -> SinkResult<String> {
    let s = temporal_str(column, value)?;
    if oversized_year(s) {
        return Ok(MAX_TIMESTAMP.to_string());
    }
    if parse_timestamp(s).is_some() {
        Ok(s.to_string())
    } else {
        Err(SinkError::unexpected_value(
            column,
            format!("'{}' is not a valid date-time", s),
        ))
    }
}

fn coerce_date(column: &str, value: &Value) -> SinkResult<String> {
    let s = temporal_str(column, value)?;
    if oversized_year(s) {
        return Ok(MAX_DATE.to_string());
    }
    if NaiveDate::parse_from_str(s, "%Y-%m-%d").is_ok() || parse_timestamp(s).is_some() {
        Ok(s.to_string())
    } else {
        Err(SinkError::unexpected_value(
            column,
            format!("'{}' is not a valid date", s),
        ))
    }
}

fn coerce_time(column: &str, value: &Value) -> SinkResult<String> {
    let s = temporal_str(column, value)?;
    if NaiveTime::parse_from_str(s, "%H:%M:%S%.f").is_ok() {
        return Ok(s.to_string());
    }

    // Durations past midnight (e.g. "25:01:01") are clamped
    let parts: Vec<&str> = s.split(':').collect();
    let numeric = parts.len() == 3
        && parts
            .iter()
            .all(|p| !p.is_empty() && p.split('.').all(|d| d.chars().all(|c| c.is_ascii_digit())));
    if numeric {
        return Ok(MAX_TIME.to_string());
    }

    Err(SinkError::unexpected_value(
        column,
        format!("'{}' is not a valid time", s),
    ))
}

fn parse_timestamp(s: &str) -> Option<NaiveDateTime> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.naive_utc());
    }
    const FORMATS: [&str; 4] = [
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S%.f%:z",
        "%Y-%m-%dT%H:%M:%S%.f%z",
    ];
    for format in FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, format) {
            return Some(dt);
        }
        if let Ok(dt) = DateTime::parse_from_str(s, format) {
            return Some(dt.naive_utc());
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}
