//! Input messages
//!
//! The extractor writes one JSON object per line; the `type` field selects
//! the message kind.

use crate::error::{SinkError, SinkResult};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;

/// One message of the input stream
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Message {
    /// Declares (or re-declares) the schema and key properties of a stream
    Schema {
        stream: String,
        schema: Value,
        key_properties: Option<Vec<String>>,
    },

    /// Upserts (or flags for deletion) one record of a stream
    Record {
        stream: String,
        record: Value,
        #[serde(default)]
        version: Option<i64>,
        #[serde(default)]
        time_extracted: Option<DateTime<Utc>>,
    },

    /// Opaque checkpoint payload
    State { value: Value },

    /// Table version switch; accepted and ignored
    ActivateVersion { stream: String, version: i64 },
}

impl Message {
    /// Parse one input line
    pub fn parse(line: &str) -> SinkResult<Self> {
        let raw: Value = serde_json::from_str(line)
            .map_err(|e| SinkError::invalid_message(format!("Unable to parse: {} ({})", line, e)))?;

        let kind = raw
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                SinkError::invalid_message(format!("Line is missing required key 'type': {}", line))
            })?
            .to_string();

        let message: Message = serde_json::from_value(raw).map_err(|e| {
            SinkError::invalid_message(format!("Invalid {} message: {} ({})", kind, line, e))
        })?;

        if let Message::Schema {
            stream,
            key_properties: None,
            ..
        } = &message
        {
            return Err(SinkError::invalid_message(format!(
                "key_properties field is required in SCHEMA message of stream '{}'",
                stream
            )));
        }

        Ok(message)
    }
}
