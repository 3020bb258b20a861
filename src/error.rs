use thiserror::Error;

/// Main error type for citegraph
#[derive(Error, Debug)]
pub enum CitegraphError {
    /// Database-related errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// File system I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// The storage session could not be established or was lost
    #[error("Connectivity failure: {0}")]
    Connectivity(String),

    /// A single read or write failed
    #[error("Operation failed ({operation}): {message}")]
    Operation { operation: String, message: String },

    /// A referenced entity was expected to be present but is not
    #[error("Resolution miss: {kind} {value:?}")]
    ResolutionMiss { kind: String, value: String },

    /// A scraped source delivered malformed or partial data
    #[error("Upstream data error: {0}")]
    Upstream(String),

    /// Parse errors
    #[error("Parse error: {0}")]
    Parse(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

/// Convenient Result type using CitegraphError
pub type Result<T> = std::result::Result<T, CitegraphError>;

impl CitegraphError {
    pub fn operation(operation: impl Into<String>, message: impl ToString) -> Self {
        CitegraphError::Operation {
            operation: operation.into(),
            message: message.to_string(),
        }
    }

    /// Error class used in failure logs and reports.
    pub fn class(&self) -> &'static str {
        match self {
            CitegraphError::Database(e) if is_connectivity(e) => "ConnectivityFailure",
            CitegraphError::Connectivity(_) => "ConnectivityFailure",
            CitegraphError::ResolutionMiss { .. } => "ResolutionMiss",
            CitegraphError::Upstream(_) | CitegraphError::Parse(_) => "UpstreamDataFailure",
            CitegraphError::Config(_) => "ConfigurationFailure",
            CitegraphError::InvalidInput(_) => "InvalidInput",
            _ => "OperationFailure",
        }
    }

    pub fn is_connectivity(&self) -> bool {
        self.class() == "ConnectivityFailure"
    }
}

/// SQLite failures that mean the session itself is unusable.
pub fn is_connectivity(err: &rusqlite::Error) -> bool {
    use rusqlite::ErrorCode;
    match err.sqlite_error_code() {
        Some(code) => matches!(
            code,
            ErrorCode::CannotOpen
                | ErrorCode::NotADatabase
                | ErrorCode::SystemIoFailure
                | ErrorCode::DatabaseBusy
                | ErrorCode::DatabaseLocked
        ),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CitegraphError::Config("Test error".to_string());
        assert!(err.to_string().contains("Configuration error"));
        assert!(err.to_string().contains("Test error"));
    }

    #[test]
    fn test_error_from_rusqlite() {
        let rusqlite_err = rusqlite::Error::InvalidQuery;
        let err: CitegraphError = rusqlite_err.into();
        assert!(matches!(err, CitegraphError::Database(_)));
        assert_eq!(err.class(), "OperationFailure");
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: CitegraphError = io_err.into();
        assert!(matches!(err, CitegraphError::Io(_)));
    }

    #[test]
    fn test_error_classes() {
        let miss = CitegraphError::ResolutionMiss {
            kind: "author".to_string(),
            value: "Alice".to_string(),
        };
        assert_eq!(miss.class(), "ResolutionMiss");
        assert!(miss.to_string().contains("\"Alice\""));

        let lost = CitegraphError::Connectivity("gone".to_string());
        assert!(lost.is_connectivity());

        let busy = CitegraphError::Database(rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
            None,
        ));
        assert!(busy.is_connectivity());

        let constraint = CitegraphError::Database(rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_CONSTRAINT),
            None,
        ));
        assert_eq!(constraint.class(), "OperationFailure");

        let upstream = CitegraphError::Upstream("no title".to_string());
        assert_eq!(upstream.class(), "UpstreamDataFailure");

        let bad = CitegraphError::InvalidInput("pagerank".to_string());
        assert_eq!(bad.class(), "InvalidInput");
    }

    #[test]
    fn test_operation_helper() {
        let err = CitegraphError::operation("insert paper", "UNIQUE constraint failed");
        assert_eq!(
            err.to_string(),
            "Operation failed (insert paper): UNIQUE constraint failed"
        );
    }
}
