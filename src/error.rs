//! Error types for cqlexec.
//!
//! This module defines domain-specific error types organized by functional area,
//! plus the translation table that maps driver-native failures into stable
//! local error kinds.

use std::fmt;
use std::sync::Arc;
use thiserror::Error;

use crate::query::options::Consistency;

/// Boxed error returned by application-supplied processors and mappers.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Shared error cause. Errors are shared by every handle derived from a failed
/// operation, so application causes are reference counted.
pub type SharedError = Arc<dyn std::error::Error + Send + Sync + 'static>;

/// Top-level error type encompassing all possible errors.
#[derive(Error, Debug, Clone)]
pub enum CqlError {
    /// Translated driver failure (network, protocol, server-side execution)
    #[error(transparent)]
    Driver(#[from] DataAccessError),

    /// Execution-core errors (timeout, cardinality, binding, state)
    #[error(transparent)]
    Query(#[from] QueryError),

    /// Value conversion errors
    #[error(transparent)]
    Conversion(#[from] ConversionError),

    /// Errors raised by row callbacks, row mappers and extractors
    #[error(transparent)]
    Processing(#[from] ProcessingError),

    /// Invalid template configuration
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl CqlError {
    /// Map to the stable local error kind.
    pub fn kind(&self) -> ErrorKind {
        match self {
            CqlError::Driver(e) => e.kind,
            CqlError::Query(e) => e.kind(),
            CqlError::Conversion(_) => ErrorKind::Conversion,
            CqlError::Processing(_) => ErrorKind::Processing,
            CqlError::Config(_) => ErrorKind::InvalidConfiguration,
        }
    }

    /// Whether this is a bounded-wait timeout raised by the execution core.
    pub fn is_timeout(&self) -> bool {
        matches!(self, CqlError::Query(QueryError::Timeout { .. }))
    }
}

/// Driver failures are translated with the default table when converted
/// implicitly; the template uses its configured translator instead.
impl From<DriverError> for CqlError {
    fn from(err: DriverError) -> Self {
        CqlError::Driver(DefaultExceptionTranslator.translate(err))
    }
}

/// Native failures reported by the underlying driver session.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DriverError {
    /// No host in the cluster could be contacted
    #[error("No host available: {0}")]
    NoHostAvailable(String),

    /// Replicas did not answer a read in time
    #[error("Read timeout at consistency {consistency}: {received} of {required} replicas responded")]
    ReadTimeout {
        consistency: Consistency,
        received: u32,
        required: u32,
        data_present: bool,
    },

    /// Replicas did not acknowledge a write in time
    #[error("Write timeout at consistency {consistency}: {received} of {required} replicas acknowledged")]
    WriteTimeout {
        consistency: Consistency,
        received: u32,
        required: u32,
        write_type: String,
    },

    /// Not enough live replicas for the requested consistency
    #[error("Not enough replicas available at consistency {consistency}: {alive} alive, {required} required")]
    Unavailable {
        consistency: Consistency,
        required: u32,
        alive: u32,
    },

    /// Query rejected as invalid by the server
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    /// CQL syntax error
    #[error("Syntax error: {0}")]
    Syntax(String),

    /// Insufficient permissions
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Authentication failure
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Coordinator overloaded
    #[error("Server overloaded: {0}")]
    Overloaded(String),

    /// TRUNCATE could not be completed
    #[error("Truncate failed: {0}")]
    Truncate(String),

    /// Keyspace or table already exists
    #[error("Already exists: {keyspace}.{table}")]
    AlreadyExists { keyspace: String, table: String },

    /// Generic server-side failure
    #[error("Server error: {0}")]
    Server(String),

    /// Protocol violation
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Network I/O error
    #[error("Network I/O error: {0}")]
    Io(String),
}

/// Stable local error kinds.
///
/// Every error surfaced by the execution core maps to exactly one kind,
/// independent of the driver that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Host unreachable or connection lost
    ConnectionFailure,
    /// Server-side read timeout
    ReadTimeout,
    /// Server-side write timeout
    WriteTimeout,
    /// Not enough replicas for the consistency level
    InsufficientReplicas,
    /// Invalid or malformed query
    InvalidQuery,
    /// Authorization failure
    PermissionDenied,
    /// Authentication failure
    Authentication,
    /// Coordinator overloaded
    Overloaded,
    /// Schema object conflict
    SchemaConflict,
    /// Any other driver failure
    Uncategorized,
    /// Caller's bounded wait elapsed
    Timeout,
    /// Single-row expectation violated
    IncorrectResultSize,
    /// Placeholder count or type mismatch
    Binding,
    /// Value not representable in the requested type
    Conversion,
    /// Callback, mapper or extractor failure
    Processing,
    /// Operation cancelled by the caller
    Cancelled,
    /// Invalid use of the execution core
    InvalidState,
    /// Invalid configuration value
    InvalidConfiguration,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::ConnectionFailure => "CONNECTION_FAILURE",
            ErrorKind::ReadTimeout => "READ_TIMEOUT",
            ErrorKind::WriteTimeout => "WRITE_TIMEOUT",
            ErrorKind::InsufficientReplicas => "INSUFFICIENT_REPLICAS",
            ErrorKind::InvalidQuery => "INVALID_QUERY",
            ErrorKind::PermissionDenied => "PERMISSION_DENIED",
            ErrorKind::Authentication => "AUTHENTICATION",
            ErrorKind::Overloaded => "OVERLOADED",
            ErrorKind::SchemaConflict => "SCHEMA_CONFLICT",
            ErrorKind::Uncategorized => "UNCATEGORIZED",
            ErrorKind::Timeout => "TIMEOUT",
            ErrorKind::IncorrectResultSize => "INCORRECT_RESULT_SIZE",
            ErrorKind::Binding => "BINDING",
            ErrorKind::Conversion => "CONVERSION",
            ErrorKind::Processing => "PROCESSING",
            ErrorKind::Cancelled => "CANCELLED",
            ErrorKind::InvalidState => "INVALID_STATE",
            ErrorKind::InvalidConfiguration => "INVALID_CONFIGURATION",
        };
        f.write_str(name)
    }
}

/// A driver failure translated into a stable local kind.
///
/// The original driver error is preserved as the source.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{kind}: {message}")]
pub struct DataAccessError {
    /// Stable local kind
    pub kind: ErrorKind,
    /// Human readable description
    pub message: String,
    /// Original driver failure
    #[source]
    pub cause: DriverError,
}

/// Translates driver-native failures into the local error taxonomy.
pub trait ExceptionTranslator: Send + Sync + fmt::Debug {
    /// Translate a single driver failure.
    fn translate(&self, error: DriverError) -> DataAccessError;
}

/// Default translation table.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultExceptionTranslator;

impl ExceptionTranslator for DefaultExceptionTranslator {
    fn translate(&self, error: DriverError) -> DataAccessError {
        let kind = match &error {
            DriverError::NoHostAvailable(_) | DriverError::Io(_) => ErrorKind::ConnectionFailure,
            DriverError::ReadTimeout { .. } => ErrorKind::ReadTimeout,
            DriverError::WriteTimeout { .. } => ErrorKind::WriteTimeout,
            DriverError::Unavailable { .. } => ErrorKind::InsufficientReplicas,
            DriverError::InvalidQuery(_) | DriverError::Syntax(_) => ErrorKind::InvalidQuery,
            DriverError::Unauthorized(_) => ErrorKind::PermissionDenied,
            DriverError::Authentication(_) => ErrorKind::Authentication,
            DriverError::Overloaded(_) => ErrorKind::Overloaded,
            DriverError::AlreadyExists { .. } => ErrorKind::SchemaConflict,
            DriverError::Truncate(_) | DriverError::Server(_) | DriverError::Protocol(_) => {
                ErrorKind::Uncategorized
            }
        };
        DataAccessError {
            kind,
            message: error.to_string(),
            cause: error,
        }
    }
}

/// Errors raised by the execution core itself.
#[derive(Error, Debug, Clone)]
pub enum QueryError {
    /// Bounded wait elapsed before the operation settled
    #[error("Query timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// Single-row expectation violated
    #[error("Incorrect result size: expected {expected}, actual {actual}")]
    IncorrectResultSize { expected: usize, actual: usize },

    /// Parameter binding error, detected before dispatch
    #[error("Parameter binding error: {message}")]
    Binding {
        index: Option<usize>,
        message: String,
    },

    /// Invalid use of the execution core
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Operation cancelled through its async handle
    #[error("Operation was cancelled")]
    Cancelled,

    /// The operation was dropped before it produced an outcome
    #[error("Pending result dropped before settlement")]
    Abandoned,

    /// A bulk write failed
    #[error("Ingest failed at row {row}: {source}")]
    IngestFailed {
        row: usize,
        #[source]
        source: Box<CqlError>,
    },
}

impl QueryError {
    /// Map to the stable local error kind.
    pub fn kind(&self) -> ErrorKind {
        match self {
            QueryError::Timeout { .. } => ErrorKind::Timeout,
            QueryError::IncorrectResultSize { .. } => ErrorKind::IncorrectResultSize,
            QueryError::Binding { .. } => ErrorKind::Binding,
            QueryError::InvalidState(_) | QueryError::Abandoned => ErrorKind::InvalidState,
            QueryError::Cancelled => ErrorKind::Cancelled,
            QueryError::IngestFailed { source, .. } => source.kind(),
        }
    }

    pub(crate) fn binding(index: Option<usize>, message: impl Into<String>) -> Self {
        QueryError::Binding {
            index,
            message: message.into(),
        }
    }
}

/// Errors related to template configuration.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// Malformed configuration string
    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    /// Unknown configuration key
    #[error("Unknown configuration parameter '{0}'")]
    UnknownParameter(String),

    /// Invalid value for a known key
    #[error("Invalid parameter '{parameter}': {message}")]
    InvalidParameter { parameter: String, message: String },
}

impl ConfigError {
    pub(crate) fn invalid(parameter: &str, message: impl Into<String>) -> Self {
        ConfigError::InvalidParameter {
            parameter: parameter.to_string(),
            message: message.into(),
        }
    }
}

/// Errors related to value conversion.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConversionError {
    /// A NULL value was read into a non-optional type
    #[error("Unexpected NULL in column '{column}'")]
    UnexpectedNull { column: String },

    /// The value cannot be represented in the target type
    #[error("Cannot convert {cql_type} value in column '{column}' to {target}")]
    Incompatible {
        column: String,
        cql_type: String,
        target: &'static str,
    },

    /// Numeric value does not fit the target type
    #[error("Numeric overflow converting '{value}' in column '{column}' to {target}")]
    NumericOverflow {
        column: String,
        value: String,
        target: &'static str,
    },

    /// Column name not present in the result
    #[error("No column named '{0}'")]
    NoSuchColumn(String),

    /// Column index outside of the row
    #[error("Column index {index} out of bounds (row has {count} columns)")]
    ColumnIndexOutOfBounds { index: usize, count: usize },
}

/// Errors raised by application-supplied processors.
#[derive(Error, Debug, Clone)]
pub enum ProcessingError {
    /// Row callback handler failed
    #[error("Row callback failed at row {row}: {source}")]
    Callback {
        row: usize,
        #[source]
        source: SharedError,
    },

    /// Row mapper failed
    #[error("Row mapper failed at row {row}: {source}")]
    Mapper {
        row: usize,
        #[source]
        source: SharedError,
    },

    /// Result set extractor failed
    #[error("Result set extraction failed: {source}")]
    Extractor {
        #[source]
        source: SharedError,
    },

    /// Host mapper failed while reading the ring
    #[error("Host mapping failed for {host}: {source}")]
    HostMapper {
        host: String,
        #[source]
        source: SharedError,
    },
}

impl ProcessingError {
    /// Wrap an application error raised inside a result set extractor.
    pub fn extractor(source: impl Into<BoxError>) -> Self {
        ProcessingError::Extractor {
            source: Arc::from(source.into()),
        }
    }

    pub(crate) fn callback(row: usize, source: BoxError) -> Self {
        ProcessingError::Callback {
            row,
            source: Arc::from(source),
        }
    }

    pub(crate) fn mapper(row: usize, source: BoxError) -> Self {
        ProcessingError::Mapper {
            row,
            source: Arc::from(source),
        }
    }
}

/// Result alias used across the crate.
pub type Result<T, E = CqlError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_translation_table() {
        let translator = DefaultExceptionTranslator;

        let err = translator.translate(DriverError::NoHostAvailable("all down".to_string()));
        assert_eq!(err.kind, ErrorKind::ConnectionFailure);
        assert!(err.message.contains("all down"));

        let err = translator.translate(DriverError::ReadTimeout {
            consistency: Consistency::Quorum,
            received: 1,
            required: 2,
            data_present: false,
        });
        assert_eq!(err.kind, ErrorKind::ReadTimeout);

        let err = translator.translate(DriverError::Syntax("line 1".to_string()));
        assert_eq!(err.kind, ErrorKind::InvalidQuery);

        let err = translator.translate(DriverError::Unauthorized("no".to_string()));
        assert_eq!(err.kind, ErrorKind::PermissionDenied);

        let err = translator.translate(DriverError::AlreadyExists {
            keyspace: "ks".to_string(),
            table: "t".to_string(),
        });
        assert_eq!(err.kind, ErrorKind::SchemaConflict);
    }

    #[test]
    fn test_translation_preserves_cause() {
        let original = DriverError::Io("connection reset".to_string());
        let err: CqlError = original.clone().into();

        match &err {
            CqlError::Driver(access) => assert_eq!(access.cause, original),
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_timeout_kind_distinct_from_driver_timeout() {
        let core: CqlError = QueryError::Timeout { timeout_ms: 50 }.into();
        assert_eq!(core.kind(), ErrorKind::Timeout);
        assert!(core.is_timeout());

        let driver: CqlError = DriverError::WriteTimeout {
            consistency: Consistency::One,
            received: 0,
            required: 1,
            write_type: "SIMPLE".to_string(),
        }
        .into();
        assert_eq!(driver.kind(), ErrorKind::WriteTimeout);
        assert!(!driver.is_timeout());
    }

    #[test]
    fn test_incorrect_result_size_display() {
        let err = QueryError::IncorrectResultSize {
            expected: 1,
            actual: 0,
        };
        assert!(err.to_string().contains("expected 1, actual 0"));
        assert_eq!(err.kind(), ErrorKind::IncorrectResultSize);
    }

    #[test]
    fn test_ingest_failure_reports_inner_kind() {
        let err = QueryError::IngestFailed {
            row: 7,
            source: Box::new(QueryError::binding(Some(1), "bad").into()),
        };
        assert!(err.to_string().contains("row 7"));
        assert_eq!(err.kind(), ErrorKind::Binding);
    }

    #[test]
    fn test_processing_error_keeps_application_source() {
        let app: BoxError = "mapper exploded".into();
        let err = ProcessingError::mapper(3, app);
        assert!(err.to_string().contains("row 3"));
        let source = std::error::Error::source(&err).map(|s| s.to_string());
        assert_eq!(source.as_deref(), Some("mapper exploded"));
    }

    #[test]
    fn test_error_kind_display() {
        assert_eq!(ErrorKind::ConnectionFailure.to_string(), "CONNECTION_FAILURE");
        assert_eq!(ErrorKind::Timeout.to_string(), "TIMEOUT");
    }

    #[test]
    fn test_config_error_kind() {
        let err: CqlError = ConfigError::invalid("fetch_size", "must be positive").into();
        assert_eq!(err.kind(), ErrorKind::InvalidConfiguration);
        assert!(err.to_string().contains("fetch_size"));
    }

    #[test]
    fn test_conversion_error_display() {
        let err = ConversionError::Incompatible {
            column: "payload".to_string(),
            cql_type: "blob".to_string(),
            target: "String",
        };
        assert!(err.to_string().contains("payload"));
        assert!(err.to_string().contains("blob"));
    }
}
