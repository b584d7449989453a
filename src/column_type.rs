//! JSON schema property → destination column type

use serde_json::Value;
use std::fmt;

/// Destination column types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnType {
    String,
    Double,
    Long,
    Boolean,
    Timestamp,
    Date,
    List,
}

impl ColumnType {
    /// Canonical lower-case name
    pub fn name(&self) -> &'static str {
        match self {
            ColumnType::String => "string",
            ColumnType::Double => "double",
            ColumnType::Long => "long",
            ColumnType::Boolean => "boolean",
            ColumnType::Timestamp => "timestamp",
            ColumnType::Date => "date",
            ColumnType::List => "list",
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Types declared by a property; accepts both `"type": "x"` and `"type": ["x", "null"]`
pub(crate) fn declared_types(property: &Value) -> Vec<&str> {
    match property.get("type") {
        Some(Value::String(t)) => vec![t.as_str()],
        Some(Value::Array(types)) => types.iter().filter_map(Value::as_str).collect(),
        _ => Vec::new(),
    }
}

/// Map a flattened schema property to its destination column type
///
/// First match wins: object, array, date-time, date, time, binary, number,
/// integer+string, integer, boolean, then string.
pub fn column_type(property: &Value) -> ColumnType {
    let types = declared_types(property);
    let has = |t: &str| types.contains(&t);
    let format = property.get("format").and_then(Value::as_str);

    if has("object") {
        ColumnType::String
    } else if has("array") {
        ColumnType::List
    } else if format == Some("date-time") {
        ColumnType::Timestamp
    } else if format == Some("date") {
        ColumnType::Date
    } else if format == Some("time") {
        // No pure time type on the destination
        ColumnType::Timestamp
    } else if format == Some("binary") {
        ColumnType::String
    } else if has("number") {
        ColumnType::Double
    } else if has("integer") && has("string") {
        ColumnType::String
    } else if has("integer") {
        ColumnType::Long
    } else if has("boolean") {
        ColumnType::Boolean
    } else {
        ColumnType::String
    }
}
