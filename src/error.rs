//! Error types for the Lakehouse Sink
//!
//! Every variant except a failed staging cleanup is fatal: it propagates to
//! `main`, which terminates the process with a non-zero exit code. The last
//! emitted state stays the recovery point for the upstream extractor.

use thiserror::Error;

/// Result alias used across the crate
pub type SinkResult<T> = Result<T, SinkError>;

/// Errors raised while syncing streams into the lakehouse
#[derive(Debug, Error)]
pub enum SinkError {
    /// Missing or invalid configuration, or no target schema resolvable
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Unparsable input line, unknown message type or out-of-order message
    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    /// A declared key property is missing from a flattened record
    #[error("Cannot find {key_properties:?} primary key(s) in record of stream '{stream}'. Available fields: {available:?}")]
    PrimaryKeyNotFound {
        stream: String,
        key_properties: Vec<String>,
        available: Vec<String>,
    },

    /// Record does not pass schema validation
    #[error("Record of stream '{stream}' does not pass schema validation: {reason}")]
    RecordValidation { stream: String, reason: String },

    /// A value cannot be coerced to its declared column format
    #[error("Unexpected value type for column '{column}': {reason}")]
    UnexpectedValueType { column: String, reason: String },

    /// Flattening produced an impossible column layout
    #[error("Schema mismatch: {0}")]
    SchemaMismatch(String),

    /// Upload to or delete from the staging area failed
    #[error("Staging transport error: {message}")]
    StagingTransport {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The destination engine rejected or timed out on a statement
    #[error("Statement failed: {message}")]
    Statement {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Local file I/O (batch files, temp directories)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SinkError {
    pub fn config(msg: impl Into<String>) -> Self {
        SinkError::Configuration(msg.into())
    }

    pub fn invalid_message(msg: impl Into<String>) -> Self {
        SinkError::InvalidMessage(msg.into())
    }

    pub fn unexpected_value(column: impl Into<String>, reason: impl Into<String>) -> Self {
        SinkError::UnexpectedValueType {
            column: column.into(),
            reason: reason.into(),
        }
    }

    pub fn staging(msg: impl Into<String>) -> Self {
        SinkError::StagingTransport {
            message: msg.into(),
            source: None,
        }
    }

    pub fn staging_with_source<E>(msg: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        SinkError::StagingTransport {
            message: msg.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn statement(msg: impl Into<String>) -> Self {
        SinkError::Statement {
            message: msg.into(),
            source: None,
        }
    }

    pub fn statement_with_source<E>(msg: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        SinkError::Statement {
            message: msg.into(),
            source: Some(Box::new(source)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_primary_key_not_found_message() {
        let err = SinkError::PrimaryKeyNotFound {
            stream: "public-orders".to_string(),
            key_properties: vec!["id".to_string()],
            available: vec!["name".to_string()],
        };
        let msg = err.to_string();
        assert!(msg.contains("[\"id\"]"));
        assert!(msg.contains("public-orders"));
        assert!(msg.contains("[\"name\"]"));
    }

    #[test]
    fn test_source_is_kept() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk full");
        let err = SinkError::staging_with_source("upload failed", io);
        assert!(std::error::Error::source(&err).is_some());
        assert_eq!(err.to_string(), "Staging transport error: upload failed");
    }
}
