//! Fatal error types for cqlbulk
//!
//! Errors here abort a whole job. Per-record failures (a malformed field, a
//! timed-out write) are not represented here; they are counted and routed to
//! the bad-record sinks by the engine.

use thiserror::Error;

/// Result type alias for job-level operations
pub type Result<T> = std::result::Result<T, BulkError>;

/// Job-aborting error
#[derive(Error, Debug)]
pub enum BulkError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    /// Keyspace, table or column could not be resolved
    #[error("Schema error: {0}")]
    Schema(String),

    /// A column's CQL type has no parser
    #[error("Unsupported CQL type: {0}")]
    SchemaType(String),

    #[error("Malformed schema declaration: {0}")]
    MalformedSchema(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Worker failed: {0}")]
    Worker(String),
}

impl BulkError {
    /// Shorthand for a [`BulkError::Config`] error
    pub fn config(msg: impl Into<String>) -> Self {
        BulkError::Config(msg.into())
    }

    /// Shorthand for a [`BulkError::Schema`] error
    pub fn schema(msg: impl Into<String>) -> Self {
        BulkError::Schema(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_converts() {
        let err: BulkError = std::io::Error::new(std::io::ErrorKind::NotFound, "gone").into();
        assert!(matches!(err, BulkError::Io(_)));
        assert_eq!(err.to_string(), "IO error: gone");
    }

    #[test]
    fn test_display_carries_detail() {
        let err = BulkError::schema("table ks.t not found");
        assert_eq!(err.to_string(), "Schema error: table ks.t not found");
        assert_eq!(
            BulkError::SchemaType("tuple<int>".into()).to_string(),
            "Unsupported CQL type: tuple<int>"
        );
    }
}
