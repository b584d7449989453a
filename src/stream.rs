//! Per-stream buffering
//!
//! A [`StreamState`] holds the current flattened schema of a stream and its
//! batch buffer, keyed by primary-key string so that a later record for the
//! same key replaces the earlier one within a batch.

use crate::dialect::TableRef;
use crate::error::{SinkError, SinkResult};
use crate::flatten::{flatten_record, flatten_schema, FlatRecord, FlatSchema};
use crate::record::{add_metadata_columns, add_metadata_values, is_delete_marked, primary_key_string};
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use jsonschema::{Draft, JSONSchema};
use serde_json::Value;

/// Components of a `catalog-schema-table` stream id
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamId {
    pub catalog: Option<String>,
    pub schema: Option<String>,
    pub table: String,
}

impl StreamId {
    /// `table`, `schema-table` or `catalog-schema-table`; extra parts join the table name
    pub fn parse(stream: &str) -> Self {
        let parts: Vec<&str> = stream.split('-').collect();
        match parts.as_slice() {
            [table] => Self {
                catalog: None,
                schema: None,
                table: table.to_string(),
            },
            [schema, table] => Self {
                catalog: None,
                schema: Some(schema.to_string()),
                table: table.to_string(),
            },
            [catalog, schema, rest @ ..] => Self {
                catalog: Some(catalog.to_string()),
                schema: Some(schema.to_string()),
                table: rest.join("_"),
            },
            [] => Self {
                catalog: None,
                schema: None,
                table: String::new(),
            },
        }
    }
}

/// Per-stream behaviour taken from the configuration
#[derive(Debug, Clone, Copy)]
pub struct StreamOptions {
    pub max_level: usize,
    pub metadata_columns: bool,
    /// Compile a validator from the declared schema
    pub validate_records: bool,
}

/// Why a record was not buffered
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    /// A declared key property is absent from the flattened record
    MissingKey {
        key_properties: Vec<String>,
        available: Vec<String>,
    },
    /// The record does not validate against the stream's JSON schema
    Invalid(String),
}

/// How a record entered the buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admitted {
    Inserted,
    /// Replaced a buffered record with the same key
    Replaced,
}

/// Buffered records of one stream, detached for flushing
#[derive(Debug, Clone)]
pub struct Batch {
    pub stream: String,
    pub table: TableRef,
    pub flat_schema: FlatSchema,
    pub key_properties: Vec<String>,
    pub records: Vec<FlatRecord>,
}

impl Batch {
    pub fn delete_marked(&self) -> usize {
        self.records.iter().filter(|r| is_delete_marked(r)).count()
    }
}

pub struct StreamState {
    name: String,
    table: TableRef,
    options: StreamOptions,
    key_properties: Vec<String>,
    flat_schema: FlatSchema,
    validator: Option<JSONSchema>,
    buffer: IndexMap<String, FlatRecord>,
}

impl StreamState {
    pub fn new(
        name: &str,
        table: TableRef,
        schema: &Value,
        key_properties: Vec<String>,
        options: StreamOptions,
    ) -> SinkResult<Self> {
        let mut state = Self {
            name: name.to_string(),
            table,
            options,
            key_properties: Vec::new(),
            flat_schema: FlatSchema::new(),
            validator: None,
            buffer: IndexMap::new(),
        };
        state.adopt_schema(schema, key_properties)?;
        Ok(state)
    }

    /// Switch to a new schema; buffered records are kept
    pub fn adopt_schema(&mut self, schema: &Value, key_properties: Vec<String>) -> SinkResult<()> {
        let mut flat_schema = flatten_schema(schema, self.options.max_level)?;
        if self.options.metadata_columns {
            add_metadata_columns(&mut flat_schema);
        }

        self.validator = if self.options.validate_records {
            match JSONSchema::options()
                .with_draft(Draft::Draft7)
                .compile(schema)
            {
                Ok(validator) => Some(validator),
                Err(e) => {
                    return Err(SinkError::invalid_message(format!(
                        "Schema of stream '{}' is not a valid JSON schema: {}",
                        self.name, e
                    )))
                }
            }
        } else {
            None
        };
        self.flat_schema = flat_schema;
        self.key_properties = key_properties;
        Ok(())
    }

    pub fn key_properties(&self) -> &[String] {
        &self.key_properties
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Validate, flatten, key and buffer one record
    pub fn buffer_record(
        &mut self,
        record: &Value,
        time_extracted: Option<DateTime<Utc>>,
        batched_at: DateTime<Utc>,
        validate: bool,
    ) -> Result<Admitted, Rejection> {
        if validate {
            if let Some(validator) = &self.validator {
                if let Err(errors) = validator.validate(record) {
                    let reasons: Vec<String> = errors.map(|e| e.to_string()).take(3).collect();
                    return Err(Rejection::Invalid(reasons.join("; ")));
                }
            }
        }

        let mut flat = flatten_record(record, &self.flat_schema, self.options.max_level);

        let key = if self.key_properties.is_empty() {
            uuid::Uuid::new_v4().to_string()
        } else {
            primary_key_string(&flat, &self.key_properties).ok_or_else(|| {
                Rejection::MissingKey {
                    key_properties: self.key_properties.clone(),
                    available: flat.keys().cloned().collect(),
                }
            })?
        };

        if self.options.metadata_columns {
            add_metadata_values(&mut flat, time_extracted, batched_at);
        }

        match self.buffer.insert(key, flat) {
            Some(_) => Ok(Admitted::Replaced),
            None => Ok(Admitted::Inserted),
        }
    }

    /// Detach the buffer together with the schema it was flattened under
    pub fn take_batch(&mut self) -> Batch {
        Batch {
            stream: self.name.clone(),
            table: self.table.clone(),
            flat_schema: self.flat_schema.clone(),
            key_properties: self.key_properties.clone(),
            records: std::mem::take(&mut self.buffer).into_values().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn options() -> StreamOptions {
        StreamOptions {
            max_level: 0,
            metadata_columns: false,
            validate_records: true,
        }
    }

    fn schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "id": {"type": ["integer"]},
                "name": {"type": ["null", "string"]}
            }
        })
    }

    fn stream(keys: &[&str], options: StreamOptions) -> StreamState {
        StreamState::new(
            "public-orders",
            TableRef::new("analytics", "orders"),
            &schema(),
            keys.iter().map(|k| k.to_string()).collect(),
            options,
        )
        .unwrap()
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_parse_stream_id() {
        assert_eq!(
            StreamId::parse("db-public-orders"),
            StreamId {
                catalog: Some("db".to_string()),
                schema: Some("public".to_string()),
                table: "orders".to_string()
            }
        );
        assert_eq!(StreamId::parse("public-orders").schema.as_deref(), Some("public"));
        assert_eq!(StreamId::parse("orders").table, "orders");
        assert_eq!(StreamId::parse("db-public-orders-v2").table, "orders_v2");
    }

    #[test]
    fn test_same_key_collapses() {
        let mut s = stream(&["id"], options());
        assert_eq!(
            s.buffer_record(&json!({"id": 1, "name": "a"}), None, now(), false),
            Ok(Admitted::Inserted)
        );
        assert_eq!(
            s.buffer_record(&json!({"id": 1, "name": "b"}), None, now(), false),
            Ok(Admitted::Replaced)
        );
        assert_eq!(s.len(), 1);

        let batch = s.take_batch();
        assert_eq!(batch.records.len(), 1);
        assert_eq!(batch.records[0].get("name"), Some(&json!("b")));
        assert!(s.is_empty());
    }

    #[test]
    fn test_keyless_records_never_collapse() {
        let mut s = stream(&[], options());
        for _ in 0..3 {
            s.buffer_record(&json!({"id": 1}), None, now(), false).unwrap();
        }
        assert_eq!(s.len(), 3);
    }

    #[test]
    fn test_missing_key_is_rejected() {
        let mut s = stream(&["id"], options());
        let rejection = s
            .buffer_record(&json!({"name": "x"}), None, now(), false)
            .unwrap_err();
        assert_eq!(
            rejection,
            Rejection::MissingKey {
                key_properties: vec!["id".to_string()],
                available: vec!["name".to_string()],
            }
        );
        assert!(s.is_empty());
    }

    #[test]
    fn test_validation() {
        let mut s = stream(&["id"], options());
        let record = json!({"id": "not-an-int"});
        assert!(matches!(
            s.buffer_record(&record, None, now(), true),
            Err(Rejection::Invalid(_))
        ));
        assert!(s.is_empty());

        // Without validation the record is buffered as is
        assert!(s.buffer_record(&record, None, now(), false).is_ok());
    }

    #[test]
    fn test_metadata_columns() {
        let mut s = stream(
            &["id"],
            StreamOptions {
                metadata_columns: true,
                ..options()
            },
        );
        assert!(s.flat_schema.contains_key("_sdc_deleted_at"));

        s.buffer_record(
            &json!({"id": 1, "_sdc_deleted_at": "2024-01-01T00:00:00Z"}),
            Some(now()),
            now(),
            false,
        )
        .unwrap();
        let batch = s.take_batch();
        assert_eq!(batch.delete_marked(), 1);
        assert_eq!(
            batch.records[0].get("_sdc_batched_at"),
            Some(&json!("2024-01-01T00:00:00.000000Z"))
        );
    }

    #[test]
    fn test_adopt_schema_keeps_buffer() {
        let mut s = stream(&["id"], options());
        s.buffer_record(&json!({"id": 1}), None, now(), false).unwrap();

        let wider = json!({
            "properties": {
                "id": {"type": ["integer"]},
                "extra": {"type": ["boolean"]}
            }
        });
        s.adopt_schema(&wider, vec!["id".to_string()]).unwrap();
        assert_eq!(s.len(), 1);
        assert!(s.flat_schema.contains_key("extra"));
    }

    #[test]
    fn test_unknown_schema_type_only_matters_when_validating() {
        let decimal = json!({
            "properties": {
                "id": {"type": ["integer"]},
                "amt": {"type": ["null", "decimal"]}
            }
        });
        let new_stream = |options| {
            StreamState::new(
                "t",
                TableRef::new("analytics", "t"),
                &decimal,
                vec!["id".to_string()],
                options,
            )
        };

        assert!(matches!(
            new_stream(options()),
            Err(SinkError::InvalidMessage(_))
        ));

        let mut s = new_stream(StreamOptions {
            validate_records: false,
            ..options()
        })
        .unwrap();
        assert!(s.flat_schema.contains_key("amt"));
        assert_eq!(
            s.buffer_record(&json!({"id": 1, "amt": "1.50"}), None, now(), true),
            Ok(Admitted::Inserted)
        );
    }
}
